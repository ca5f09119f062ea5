use std::collections::BTreeSet;

use crate::processing::lexer::{self, Layout, Syntax, Token, TokenKind};
use crate::types::{AnalysisReport, LineStats};

/// Token-level source metrics
pub fn analyze_source(source: &str, syntax: &Syntax) -> AnalysisReport {
    let tokens = lexer::tokenize(source, syntax);
    let significant: Vec<&Token<'_>> = tokens.iter().filter(|t| !t.is_trivia()).collect();

    let mut report = AnalysisReport {
        language: syntax.language.to_string(),
        lines: line_stats(&tokens),
        characters: source.chars().count(),
        ..AnalysisReport::default()
    };

    let mut depth = 0usize;
    let mut unique = BTreeSet::new();
    let mut branches = 0usize;

    for (i, token) in significant.iter().enumerate() {
        match token.kind {
            TokenKind::Identifier => {
                if syntax.branch_keywords.contains(&token.text) {
                    branches += 1;
                }
                if !syntax.is_keyword(token.text) {
                    report.identifiers += 1;
                    unique.insert(token.text);
                }
            }
            TokenKind::Str => report.string_literals += 1,
            TokenKind::Punct => {
                if token.opener().is_some() {
                    depth += 1;
                    report.max_nesting_depth = report.max_nesting_depth.max(depth);
                } else if token.closer().is_some() {
                    depth = depth.saturating_sub(1);
                }
                let pair = significant
                    .get(i + 1)
                    .filter(|next| next.kind == TokenKind::Punct)
                    .map(|next| format!("{}{}", token.text, next.text));
                if let Some(op) = pair {
                    if syntax.branch_keywords.contains(&op.as_str()) {
                        branches += 1;
                    }
                }
                if syntax.branch_keywords.contains(&token.text) {
                    branches += 1;
                }
            }
            _ => {}
        }
    }

    report.unique_identifiers = unique.len();
    report.cyclomatic_complexity = 1 + branches;
    report.functions = function_names(&significant, syntax);
    report.imports = imports(&significant, syntax);
    report.exports = exports(&significant, syntax, &report.functions);
    report
}

fn line_stats(tokens: &[Token<'_>]) -> LineStats {
    let mut stats = LineStats::default();
    for line in lexer::split_lines(tokens) {
        stats.total += 1;
        let mut has_code = false;
        let mut has_comment = false;
        for token in line {
            match token.kind {
                TokenKind::Whitespace | TokenKind::Newline => {}
                TokenKind::Comment => has_comment = true,
                _ => has_code = true,
            }
        }
        if has_code {
            stats.code += 1;
        } else if has_comment {
            stats.comment += 1;
        } else {
            stats.blank += 1;
        }
    }

    // A trailing newline does not open another line
    if tokens.last().is_some_and(|t| t.kind == TokenKind::Newline) || tokens.is_empty() {
        stats.total -= 1;
        stats.blank -= 1;
    }
    stats
}

fn function_names(tokens: &[&Token<'_>], syntax: &Syntax) -> Vec<String> {
    let mut names = Vec::new();
    for (i, token) in tokens.iter().enumerate() {
        if token.kind != TokenKind::Identifier || !syntax.function_keywords.contains(&token.text) {
            continue;
        }
        let mut j = i + 1;
        // Go method receivers: func (r *T) Name(
        if syntax.layout == Layout::NewlineSignificant
            && tokens.get(j).is_some_and(|t| t.is_punct('('))
        {
            let mut depth = 0;
            while let Some(t) = tokens.get(j) {
                if t.is_punct('(') {
                    depth += 1;
                } else if t.is_punct(')') {
                    depth -= 1;
                    if depth == 0 {
                        j += 1;
                        break;
                    }
                }
                j += 1;
            }
        }
        if let Some(name) = tokens.get(j).filter(|t| t.kind == TokenKind::Identifier) {
            if !syntax.is_keyword(name.text) {
                names.push(name.text.to_string());
            }
        }
    }
    names
}

fn imports(tokens: &[&Token<'_>], syntax: &Syntax) -> Vec<String> {
    let mut found = Vec::new();
    for (i, token) in tokens.iter().enumerate() {
        if token.text != "import" || token.kind != TokenKind::Identifier {
            continue;
        }
        match syntax.layout {
            Layout::SExpression => {
                // (import "module" "name" ...)
                let module = tokens.get(i + 1).filter(|t| t.kind == TokenKind::Str);
                let name = tokens.get(i + 2).filter(|t| t.kind == TokenKind::Str);
                if let (Some(m), Some(n)) = (module, name) {
                    found.push(format!("{}.{}", unquote(m.text), unquote(n.text)));
                }
            }
            _ => {
                let mut j = i + 1;
                let grouped = tokens.get(j).is_some_and(|t| t.is_punct('('));
                if grouped {
                    j += 1;
                }
                while let Some(t) = tokens.get(j) {
                    if t.kind == TokenKind::Str {
                        found.push(unquote(t.text).to_string());
                        if !grouped {
                            break;
                        }
                    } else if t.is_punct(')') || (!grouped && t.kind != TokenKind::Identifier) {
                        break;
                    }
                    j += 1;
                }
            }
        }
    }
    found
}

fn exports(tokens: &[&Token<'_>], syntax: &Syntax, functions: &[String]) -> Vec<String> {
    match syntax.layout {
        Layout::SExpression => tokens
            .windows(2)
            .filter(|w| w[0].text == "export" && w[1].kind == TokenKind::Str)
            .map(|w| unquote(w[1].text).to_string())
            .collect(),
        Layout::NewlineSignificant => functions
            .iter()
            .filter(|name| name.chars().next().is_some_and(char::is_uppercase))
            .cloned()
            .collect(),
        _ => {
            let private: BTreeSet<&str> = tokens
                .windows(3)
                .filter(|w| w[0].text == "private" && w[1].text == "fn")
                .map(|w| w[2].text)
                .collect();
            functions
                .iter()
                .filter(|name| !private.contains(name.as_str()))
                .cloned()
                .collect()
        }
    }
}

fn unquote(text: &str) -> &str {
    text.trim_matches(|c| c == '"' || c == '`' || c == '\'')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::lexer::{GO, RHAI, WAT};

    #[test]
    fn test_rhai_metrics() {
        let source = "// adds\nfn add(a, b) {\n    if a > b && b > 0 { a } else { b }\n}\n\nprivate fn helper() { 1 }\nadd(1, 2)\n";
        let report = analyze_source(source, &RHAI);
        assert_eq!(report.lines.total, 7);
        assert_eq!(report.lines.comment, 1);
        assert_eq!(report.lines.blank, 1);
        assert_eq!(report.lines.code, 5);
        assert_eq!(report.functions, vec!["add", "helper"]);
        assert_eq!(report.exports, vec!["add"]);
        assert_eq!(report.cyclomatic_complexity, 3);
        assert_eq!(report.max_nesting_depth, 2);
    }

    #[test]
    fn test_go_imports_and_methods() {
        let source = "package main\n\nimport (\n\t\"fmt\"\n\t\"strings\"\n)\n\nfunc (s *Server) Start() {}\nfunc main() {\n\tfmt.Println(strings.ToUpper(\"x\"))\n}\n";
        let report = analyze_source(source, &GO);
        assert_eq!(report.imports, vec!["fmt", "strings"]);
        assert_eq!(report.functions, vec!["Start", "main"]);
        assert_eq!(report.exports, vec!["Start"]);
        assert_eq!(report.string_literals, 3);
    }

    #[test]
    fn test_wat_imports_and_exports() {
        let source = r#"(module
  (import "wasi_snapshot_preview1" "fd_write" (func $fd_write (param i32 i32 i32 i32) (result i32)))
  (func $run (export "_start")))"#;
        let report = analyze_source(source, &WAT);
        assert_eq!(report.imports, vec!["wasi_snapshot_preview1.fd_write"]);
        assert_eq!(report.exports, vec!["_start"]);
        assert_eq!(report.functions, vec!["$fd_write", "$run"]);
    }
}
