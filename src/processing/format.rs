//! Bracket-driven re-indenting formatter

use crate::modules::error::EngineError;
use crate::processing::lexer::{self, Layout, Syntax, Token, TokenKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatStyle {
    pub indent: String,
    /// Break statements onto their own lines before re-indenting
    pub reflow: bool,
}

impl FormatStyle {
    pub fn for_syntax(syntax: &Syntax, indent_width: Option<usize>) -> Self {
        let indent = match indent_width {
            Some(width) => " ".repeat(width),
            None => syntax.default_indent.to_string(),
        };
        Self {
            indent,
            reflow: syntax.layout == Layout::Braces,
        }
    }

    pub fn with_reflow(mut self, reflow: bool) -> Self {
        self.reflow = reflow;
        self
    }
}

/// Re-indent `source` by bracket depth. Unbalanced brackets and unterminated
/// literals are reported as `FormatError` at the first offending position.
pub fn format_source(
    source: &str,
    syntax: &Syntax,
    style: &FormatStyle,
) -> Result<String, EngineError> {
    let tokens = lexer::tokenize(source, syntax);

    if let Some(first) = lexer::structural_errors(&tokens).into_iter().next() {
        return Err(EngineError::Format {
            message: first.message,
            line: first.line,
            column: first.column,
        });
    }

    let reflowed;
    let tokens = if style.reflow {
        reflowed = reflow(source, &tokens, syntax);
        lexer::tokenize(&reflowed, syntax)
    } else {
        tokens
    };

    Ok(reindent(&tokens, &style.indent))
}

/// Insert line breaks so that each statement and block boundary starts a line
fn reflow(source: &str, tokens: &[Token<'_>], syntax: &Syntax) -> String {
    let mut out = String::with_capacity(source.len() + source.len() / 8);
    let mut paren_depth = 0usize;
    let mut sexpr_depth = 0usize;

    for (i, token) in tokens.iter().enumerate() {
        let next = tokens[i + 1..]
            .iter()
            .find(|t| t.kind != TokenKind::Whitespace);

        match syntax.layout {
            Layout::SExpression => {
                if token.is_punct('(') {
                    if sexpr_depth > 0 && !ends_with_newline(&out) {
                        trim_trailing_spaces(&mut out);
                        out.push('\n');
                    }
                    sexpr_depth += 1;
                } else if token.is_punct(')') {
                    sexpr_depth = sexpr_depth.saturating_sub(1);
                }
                if token.kind == TokenKind::Whitespace && ends_with_newline(&out) {
                    continue;
                }
                out.push_str(token.text);
            }
            _ => {
                if token.is_punct('(') || token.is_punct('[') {
                    paren_depth += 1;
                } else if token.is_punct(')') || token.is_punct(']') {
                    paren_depth = paren_depth.saturating_sub(1);
                }

                if token.kind == TokenKind::Whitespace && ends_with_newline(&out) {
                    continue;
                }

                if token.is_punct('}') && !ends_with_newline(&out) && !out.is_empty() {
                    trim_trailing_spaces(&mut out);
                    out.push('\n');
                }
                out.push_str(token.text);

                let breaks_after = paren_depth == 0
                    && (token.is_punct('{') || token.is_punct(';') || token.is_punct('}'));
                let followed_inline = next.is_some_and(|n| {
                    n.kind == TokenKind::Newline
                        || (n.kind == TokenKind::Comment && !n.text.contains('\n'))
                        || n.is_punct(';')
                        || n.is_punct(',')
                        || n.is_punct(')')
                        || (token.is_punct('}') && n.text == "else")
                        || (token.is_punct('}') && n.text == "catch")
                });
                if breaks_after && !followed_inline && next.is_some() {
                    out.push('\n');
                }
            }
        }
    }
    out
}

fn ends_with_newline(out: &str) -> bool {
    out.is_empty() || out.ends_with('\n')
}

fn trim_trailing_spaces(out: &mut String) {
    let trimmed = out.trim_end_matches([' ', '\t']).len();
    out.truncate(trimmed);
}

fn reindent(tokens: &[Token<'_>], indent: &str) -> String {
    let mut out = String::new();
    let mut depth = 0usize;
    let mut blank_run = 0usize;

    for line in lexer::split_lines(tokens) {
        let start = line
            .iter()
            .position(|t| t.kind != TokenKind::Whitespace)
            .unwrap_or(line.len());
        let end = line
            .iter()
            .rposition(|t| t.kind != TokenKind::Whitespace)
            .map(|p| p + 1)
            .unwrap_or(start);
        let content = &line[start..end.max(start)];

        if content.is_empty() {
            blank_run += 1;
            continue;
        }
        if blank_run > 0 && !out.is_empty() {
            out.push('\n');
        }
        blank_run = 0;

        let leading_closers = content
            .iter()
            .take_while(|t| t.closer().is_some())
            .count();
        let level = depth.saturating_sub(leading_closers);

        for _ in 0..level {
            out.push_str(indent);
        }
        for token in content {
            out.push_str(token.text);
        }
        out.push('\n');

        for token in content {
            if token.opener().is_some() {
                depth += 1;
            } else if token.closer().is_some() {
                depth = depth.saturating_sub(1);
            }
        }
    }
    out
}
