use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable error codes surfaced to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    ValidationError,
    UnsupportedLanguage,
    UnsupportedOperation,
    SecurityViolation,
    ExecutionTimeout,
    RuntimeInitializationFailure,
    ModuleNotInitialized,
    ModuleNotFound,
    BuildError,
    RunError,
    FormatError,
    LintError,
    TranspileError,
    MinifyError,
    ValidationSyntaxError,
    AnalysisError,
    GenerationError,
    RefactorError,
    ObfuscateError,
    DeobfuscateError,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Classified error carried by a failed [`ModuleResult`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleError {
    pub code: ErrorCode,
    pub message: String,
    pub details: Option<serde_json::Value>,
    pub recoverable: bool,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// A positioned message from a parser, linter or compiler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub line: Option<usize>,
    pub column: Option<usize>,
    pub rule: Option<String>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
            line: None,
            column: None,
            rule: None,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(message)
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Info,
            ..Self::error(message)
        }
    }

    pub fn at(mut self, line: Option<usize>, column: Option<usize>) -> Self {
        self.line = line;
        self.column = column;
        self
    }

    pub fn with_rule(mut self, rule: impl Into<String>) -> Self {
        self.rule = Some(rule.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutput {
    /// Value produced by the program, `None` when it threw
    pub output: Option<serde_json::Value>,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub error: Option<String>,
    pub execution_time_ms: u64,
    /// Compiler diagnostics for compiled languages
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub build_diagnostics: Vec<Diagnostic>,
    /// Guest linear memory in bytes, when the runtime can observe it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_usage: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineStats {
    pub total: usize,
    pub code: usize,
    pub comment: usize,
    pub blank: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisReport {
    pub language: String,
    pub lines: LineStats,
    pub characters: usize,
    pub functions: Vec<String>,
    pub max_nesting_depth: usize,
    pub cyclomatic_complexity: usize,
    pub identifiers: usize,
    pub unique_identifiers: usize,
    pub string_literals: usize,
    pub imports: Vec<String>,
    pub exports: Vec<String>,
    /// Language-specific figures (JSON key counts, wasm section sizes, ...)
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Operation-specific success payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum OperationOutput {
    Execution(ExecutionOutput),
    Formatted {
        code: String,
    },
    Lint {
        issues: Vec<Diagnostic>,
        error_count: usize,
        warning_count: usize,
    },
    Transpiled {
        code: String,
        from: String,
        to: String,
    },
    Minified {
        code: String,
        original_size: usize,
        minified_size: usize,
    },
    Validation {
        valid: bool,
        errors: Vec<Diagnostic>,
    },
    Analysis(AnalysisReport),
    Generated {
        code: String,
        template: String,
    },
    Refactored {
        code: String,
        changes: usize,
    },
    Obfuscated {
        code: String,
        renamed: usize,
    },
    Deobfuscated {
        code: String,
        renamed: usize,
    },
}

impl OperationOutput {
    /// Size of the primary textual output
    pub fn output_size(&self) -> usize {
        match self {
            OperationOutput::Execution(out) => out.stdout.len() + out.stderr.len(),
            OperationOutput::Formatted { code }
            | OperationOutput::Transpiled { code, .. }
            | OperationOutput::Minified { code, .. }
            | OperationOutput::Generated { code, .. }
            | OperationOutput::Refactored { code, .. }
            | OperationOutput::Obfuscated { code, .. }
            | OperationOutput::Deobfuscated { code, .. } => code.len(),
            OperationOutput::Lint { issues, .. } => issues.len(),
            OperationOutput::Validation { errors, .. } => errors.len(),
            OperationOutput::Analysis(report) => report.characters,
        }
    }

    /// Count of items the operation worked through
    pub fn processed_items(&self) -> usize {
        match self {
            OperationOutput::Lint { issues, .. } => issues.len(),
            OperationOutput::Validation { errors, .. } => errors.len(),
            OperationOutput::Analysis(report) => report.lines.total,
            OperationOutput::Refactored { changes, .. } => *changes,
            OperationOutput::Obfuscated { renamed, .. }
            | OperationOutput::Deobfuscated { renamed, .. } => *renamed,
            OperationOutput::Execution(out) => out.stdout.lines().count(),
            OperationOutput::Formatted { code }
            | OperationOutput::Transpiled { code, .. }
            | OperationOutput::Minified { code, .. }
            | OperationOutput::Generated { code, .. } => code.lines().count(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultMetadata {
    pub execution_id: String,
    pub module_id: String,
    pub operation: String,
    pub execution_time_ms: u64,
    pub memory_usage: Option<u64>,
    pub output_size: usize,
    pub processed_items: usize,
}

/// The sole return shape surfaced to callers. Callers must branch on `success`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleResult {
    pub success: bool,
    pub data: Option<OperationOutput>,
    pub metadata: ResultMetadata,
    pub error: Option<ModuleError>,
}

impl ModuleResult {
    pub fn ok(data: OperationOutput, metadata: ResultMetadata) -> Self {
        Self {
            success: true,
            data: Some(data),
            metadata,
            error: None,
        }
    }

    pub fn failure(error: ModuleError, metadata: ResultMetadata) -> Self {
        Self {
            success: false,
            data: None,
            metadata,
            error: Some(error),
        }
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        self.error.as_ref().map(|e| e.code)
    }

    pub fn execution(&self) -> Option<&ExecutionOutput> {
        match &self.data {
            Some(OperationOutput::Execution(out)) => Some(out),
            _ => None,
        }
    }

    /// Primary code output of text-producing operations
    pub fn code(&self) -> Option<&str> {
        match &self.data {
            Some(OperationOutput::Formatted { code })
            | Some(OperationOutput::Transpiled { code, .. })
            | Some(OperationOutput::Minified { code, .. })
            | Some(OperationOutput::Generated { code, .. })
            | Some(OperationOutput::Refactored { code, .. })
            | Some(OperationOutput::Obfuscated { code, .. })
            | Some(OperationOutput::Deobfuscated { code, .. }) => Some(code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_serializes_as_name() {
        let value = serde_json::to_value(ErrorCode::SecurityViolation).unwrap();
        assert_eq!(value, serde_json::json!("SecurityViolation"));
        assert_eq!(ErrorCode::BuildError.to_string(), "BuildError");
    }

    #[test]
    fn test_output_payload_is_tagged() {
        let output = OperationOutput::Formatted {
            code: "{}".to_string(),
        };
        let value = serde_json::to_value(&output).unwrap();
        assert_eq!(value["type"], "formatted");
        assert_eq!(value["code"], "{}");
    }
}
