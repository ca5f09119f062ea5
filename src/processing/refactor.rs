//! Token-level refactorings that never touch string literals or comments
//! unless asked to

use std::collections::HashMap;

use crate::modules::error::EngineError;
use crate::processing::lexer::{self, Layout, Syntax, Token, TokenKind};
use crate::types::RefactorSpec;

/// Apply `spec` to `source`, returning the new text and the number of edits
pub fn refactor_source(
    source: &str,
    syntax: &Syntax,
    spec: Option<&RefactorSpec>,
) -> Result<(String, usize), EngineError> {
    let spec = spec.ok_or_else(|| EngineError::Refactor {
        message: "missing refactor spec (expected renameSymbol, stripComments or normalizeWhitespace)"
            .to_string(),
    })?;

    match spec {
        RefactorSpec::RenameSymbol { from, to } => rename_symbol(source, syntax, from, to),
        RefactorSpec::StripComments => Ok(strip_comments(source, syntax)),
        RefactorSpec::NormalizeWhitespace => Ok(normalize_whitespace(source)),
    }
}

/// Whether `name` lexes as a single non-keyword identifier
pub fn is_identifier(name: &str, syntax: &Syntax) -> bool {
    let tokens = lexer::tokenize(name, syntax);
    matches!(tokens.as_slice(), [t] if t.kind == TokenKind::Identifier && !syntax.is_keyword(t.text))
}

pub fn rename_symbol(
    source: &str,
    syntax: &Syntax,
    from: &str,
    to: &str,
) -> Result<(String, usize), EngineError> {
    if !is_identifier(from, syntax) {
        return Err(EngineError::Refactor {
            message: format!("'{from}' is not a renameable identifier"),
        });
    }
    if !is_identifier(to, syntax) {
        return Err(EngineError::Refactor {
            message: format!("'{to}' is not a valid {} identifier", syntax.language),
        });
    }

    let tokens = lexer::tokenize(source, syntax);
    let renames = HashMap::from([(from, to.to_string())]);
    let (code, changes) = apply_renames(&tokens, &renames);

    if changes == 0 {
        return Err(EngineError::Refactor {
            message: format!("symbol '{from}' not found"),
        });
    }
    Ok((code, changes))
}

/// Rewrite identifier tokens found in `renames`, leaving member accesses
/// (`x.name`) alone. Returns the text and the number of tokens rewritten.
pub(crate) fn apply_renames(tokens: &[Token<'_>], renames: &HashMap<&str, String>) -> (String, usize) {
    let mut out = String::new();
    let mut changes = 0;
    let mut after_dot = false;

    for token in tokens {
        match renames.get(token.text) {
            Some(replacement) if token.kind == TokenKind::Identifier && !after_dot => {
                out.push_str(replacement);
                changes += 1;
            }
            _ => out.push_str(token.text),
        }
        if !token.is_trivia() {
            after_dot = token.is_punct('.');
        }
    }
    (out, changes)
}

/// Remove every comment. Lines left empty by the removal are dropped.
pub fn strip_comments(source: &str, syntax: &Syntax) -> (String, usize) {
    let tokens = lexer::tokenize(source, syntax);
    let mut out = String::with_capacity(source.len());
    let mut removed = 0;

    let lines = lexer::split_lines(&tokens);
    let last = lines.len() - 1;
    for (index, line) in lines.into_iter().enumerate() {
        let had_comment = line.iter().any(|t| t.kind == TokenKind::Comment);
        let mut text = String::new();
        for token in line {
            if token.kind == TokenKind::Comment {
                removed += 1;
                // A multi-line comment may separate statements
                if syntax.layout == Layout::NewlineSignificant && token.text.contains('\n') {
                    text.push('\n');
                } else {
                    text.push(' ');
                }
            } else {
                text.push_str(token.text);
            }
        }

        let kept = text.trim_end();
        if had_comment && kept.trim().is_empty() {
            continue;
        }
        out.push_str(if had_comment { kept } else { &text });
        if index != last {
            out.push('\n');
        }
    }

    (out, removed)
}

/// LF line endings, no trailing whitespace, single blank lines and exactly
/// one final newline. Returns the number of lines touched.
pub fn normalize_whitespace(source: &str) -> (String, usize) {
    let mut out = String::with_capacity(source.len());
    let mut changes = 0;
    let mut blank_run = 0;

    for raw in source.split('\n') {
        let line = raw.trim_end();
        if line.len() != raw.len() {
            changes += 1;
        }
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 || out.is_empty() {
                changes += 1;
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }

    let trimmed_len = out.trim_end_matches('\n').len();
    if trimmed_len == 0 {
        return (String::new(), changes);
    }
    out.truncate(trimmed_len);
    out.push('\n');
    if !source.ends_with('\n') || source.ends_with("\n\n") {
        changes += 1;
    }
    (out, changes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::lexer::{GO, RHAI, WAT};

    #[test]
    fn test_rename_skips_strings_comments_and_members() {
        let source = "let count = 1;\n// count here\nlet s = \"count\";\nobj.count + count\n";
        let (code, changes) = rename_symbol(source, &RHAI, "count", "total").unwrap();
        assert_eq!(changes, 2);
        assert_eq!(
            code,
            "let total = 1;\n// count here\nlet s = \"count\";\nobj.count + total\n"
        );
    }

    #[test]
    fn test_rename_wat_locals() {
        let source = "(func $f (param $x i32) (result i32)\n  local.get $x)";
        let (code, changes) = rename_symbol(source, &WAT, "$x", "$value").unwrap();
        assert_eq!(changes, 2);
        assert!(code.contains("(param $value i32)"));
        assert!(code.contains("local.get $value"));
    }

    #[test]
    fn test_rename_rejects_bad_names_and_missing_symbols() {
        assert!(matches!(
            rename_symbol("let a = 1;", &RHAI, "a", "1abc"),
            Err(EngineError::Refactor { .. })
        ));
        assert!(matches!(
            rename_symbol("let a = 1;", &RHAI, "a", "let"),
            Err(EngineError::Refactor { .. })
        ));
        assert!(matches!(
            rename_symbol("let a = 1;", &RHAI, "b", "c"),
            Err(EngineError::Refactor { .. })
        ));
    }

    #[test]
    fn test_strip_comments_drops_emptied_lines() {
        let source = "package main\n\n// entry point\nfunc main() { // start\n\tprintln(\"// not a comment\")\n}\n";
        let (code, removed) = strip_comments(source, &GO);
        assert_eq!(removed, 2);
        assert_eq!(
            code,
            "package main\n\nfunc main() {\n\tprintln(\"// not a comment\")\n}\n"
        );
    }

    #[test]
    fn test_normalize_whitespace() {
        let (code, changes) = normalize_whitespace("\n\nlet a = 1;  \r\n\n\n\nlet b = 2;");
        assert_eq!(code, "let a = 1;\n\nlet b = 2;\n");
        assert!(changes > 0);

        let (clean, changes) = normalize_whitespace("let a = 1;\n");
        assert_eq!(clean, "let a = 1;\n");
        assert_eq!(changes, 0);
    }

    #[test]
    fn test_missing_spec_is_an_error() {
        assert!(matches!(
            refactor_source("x", &RHAI, None),
            Err(EngineError::Refactor { .. })
        ));
    }
}
