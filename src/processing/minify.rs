use crate::modules::error::EngineError;
use crate::processing::lexer::{self, Layout, Syntax, Token, TokenKind};

/// Pairs that would lex differently if written back to back
const FUSING_PAIRS: &[(char, char)] = &[
    ('+', '+'),
    ('-', '-'),
    ('/', '/'),
    ('/', '*'),
    ('*', '/'),
    ('<', '<'),
    ('>', '>'),
    ('&', '&'),
    ('|', '|'),
    ('.', '.'),
    (';', ';'),
    ('(', ';'),
    (';', ')'),
];

fn needs_space(prev: &Token<'_>, next: &Token<'_>, syntax: &Syntax) -> bool {
    if prev.is_word() && next.is_word() {
        return true;
    }
    let (Some(a), Some(b)) = (prev.text.chars().last(), next.text.chars().next()) else {
        return false;
    };
    if syntax.layout == Layout::SExpression {
        // `(;` and `;)` open and close block comments in s-expression syntax
        return FUSING_PAIRS.contains(&(a, b));
    }
    FUSING_PAIRS[..FUSING_PAIRS.len() - 2].contains(&(a, b))
}

/// Strip comments and collapse whitespace. Languages where newlines end
/// statements keep one newline per non-empty line.
pub fn minify_source(source: &str, syntax: &Syntax) -> Result<String, EngineError> {
    let tokens = lexer::tokenize(source, syntax);
    if let Some(first) = lexer::structural_errors(&tokens)
        .into_iter()
        .find(|d| d.rule.as_deref() == Some("unterminated"))
    {
        return Err(EngineError::Minify {
            message: format!(
                "{} at line {}",
                first.message,
                first.line.unwrap_or_default()
            ),
        });
    }

    let keep_newlines = syntax.layout == Layout::NewlineSignificant;
    let mut out = String::with_capacity(source.len());
    let mut prev: Option<&Token<'_>> = None;
    let mut pending_space = false;

    for token in &tokens {
        match token.kind {
            TokenKind::Comment => {
                if keep_newlines && token.text.contains('\n') {
                    push_newline(&mut out);
                    prev = None;
                }
                pending_space = true;
            }
            TokenKind::Whitespace => pending_space = true,
            TokenKind::Newline => {
                if keep_newlines {
                    push_newline(&mut out);
                    prev = None;
                } else {
                    pending_space = true;
                }
            }
            _ => {
                if let Some(p) = prev {
                    if pending_space && needs_space(p, token, syntax) {
                        out.push(' ');
                    }
                }
                out.push_str(token.text);
                prev = Some(token);
                pending_space = false;
            }
        }
    }

    Ok(out.trim_end().to_string())
}

fn push_newline(out: &mut String) {
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::lexer::{GO, RHAI, WAT};

    #[test]
    fn test_collapses_whitespace_and_drops_comments() {
        let source = "// header\nlet x = 1 + 2;  /* note */\nlet y = x - -1;\nprint(\"a  b\");\n";
        assert_eq!(
            minify_source(source, &RHAI).unwrap(),
            "let x=1+2;let y=x- -1;print(\"a  b\");"
        );
    }

    #[test]
    fn test_go_keeps_statement_newlines() {
        let source = "package main\n\n// entry\nfunc main() {\n\tx := 1\n\n\tprintln(x)\n}\n";
        assert_eq!(
            minify_source(source, &GO).unwrap(),
            "package main\nfunc main(){\nx:=1\nprintln(x)\n}"
        );
    }

    #[test]
    fn test_wat_keeps_tokens_apart() {
        let source = "(module\n  ;; c\n  (func $f (result i32)\n    i32.const 1))";
        assert_eq!(
            minify_source(source, &WAT).unwrap(),
            "(module(func $f(result i32)i32.const 1))"
        );
    }

    #[test]
    fn test_unterminated_string_fails() {
        assert!(matches!(
            minify_source("let s = \"open", &RHAI),
            Err(EngineError::Minify { .. })
        ));
    }
}
