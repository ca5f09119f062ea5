use crate::modules::validator::forbidden_patterns;
use crate::processing::lexer::{self, Syntax, TokenKind};
use crate::types::{Diagnostic, Severity};

pub const MAX_LINE_LENGTH: usize = 120;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LintReport {
    pub issues: Vec<Diagnostic>,
    pub error_count: usize,
    pub warning_count: usize,
}

impl LintReport {
    pub fn new(mut issues: Vec<Diagnostic>) -> Self {
        issues.sort_by_key(|d| (d.line.unwrap_or(0), d.column.unwrap_or(0)));
        let error_count = issues
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .count();
        let warning_count = issues
            .iter()
            .filter(|d| d.severity == Severity::Warning)
            .count();
        Self {
            issues,
            error_count,
            warning_count,
        }
    }
}

/// Rule-based checks shared by every language. Callers append their own
/// syntax diagnostics through `extra`.
pub fn lint_source(source: &str, syntax: &Syntax, extra: Vec<Diagnostic>) -> LintReport {
    let mut issues = extra;
    let tokens = lexer::tokenize(source, syntax);

    issues.extend(line_rules(source));
    issues.extend(lexer::structural_errors(&tokens));

    for token in tokens.iter().filter(|t| t.kind == TokenKind::Comment) {
        for marker in ["TODO", "FIXME", "XXX"] {
            if token.text.contains(marker) {
                issues.push(
                    Diagnostic::info(format!("{marker} marker in comment"))
                        .at(Some(token.line), Some(token.column))
                        .with_rule("todo"),
                );
                break;
            }
        }
    }

    for pattern in forbidden_patterns() {
        if let Some(offset) = pattern.find(source) {
            issues.push(
                Diagnostic::warning(format!(
                    "{} ({}) will be rejected at execution time",
                    pattern.name,
                    pattern.category.as_str()
                ))
                .at(Some(lexer::line_of(source, offset)), None)
                .with_rule("security"),
            );
        }
    }

    LintReport::new(issues)
}

fn line_rules(source: &str) -> Vec<Diagnostic> {
    let mut issues = Vec::new();
    let mut tab_indented = None;
    let mut space_indented = None;

    for (index, line) in source.lines().enumerate() {
        let line_no = index + 1;
        let length = line.chars().count();

        if length > MAX_LINE_LENGTH {
            issues.push(
                Diagnostic::warning(format!(
                    "line is {length} characters long (max {MAX_LINE_LENGTH})"
                ))
                .at(Some(line_no), Some(MAX_LINE_LENGTH + 1))
                .with_rule("max-line-length"),
            );
        }

        let trimmed = line.trim_end();
        if trimmed.len() != line.len() && !trimmed.is_empty() {
            issues.push(
                Diagnostic::warning("trailing whitespace")
                    .at(Some(line_no), Some(trimmed.chars().count() + 1))
                    .with_rule("trailing-whitespace"),
            );
        }

        let indent: String = line.chars().take_while(|c| *c == ' ' || *c == '\t').collect();
        if indent.contains(' ') && indent.contains('\t') {
            issues.push(
                Diagnostic::warning("mixed tabs and spaces in indentation")
                    .at(Some(line_no), Some(1))
                    .with_rule("mixed-indentation"),
            );
        } else if indent.starts_with('\t') {
            tab_indented.get_or_insert(line_no);
        } else if indent.starts_with(' ') {
            space_indented.get_or_insert(line_no);
        }
    }

    if let (Some(tabs), Some(spaces)) = (tab_indented, space_indented) {
        issues.push(
            Diagnostic::warning(format!(
                "file mixes tab-indented (line {tabs}) and space-indented (line {spaces}) lines"
            ))
            .at(Some(tabs.max(spaces)), Some(1))
            .with_rule("mixed-indentation"),
        );
    }

    issues
}
