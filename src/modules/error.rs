use thiserror::Error;

use crate::runtime::error::BackendError;
use crate::types::{Diagnostic, ErrorCode, ModuleError};

/// Errors raised inside a processing module. Every variant is converted into a
/// classified [`ModuleError`] at the module boundary.
#[derive(Error, Debug, Clone)]
pub enum EngineError {
    #[error("Invalid input: {message}")]
    Validation { message: String },

    #[error("Language '{language}' is not supported by module '{module}'")]
    UnsupportedLanguage { module: String, language: String },

    #[error("Operation '{operation}' is not supported by module '{module}'")]
    UnsupportedOperation {
        module: String,
        operation: String,
        degraded: bool,
    },

    #[error("Security violation: {reason}")]
    SecurityViolation {
        reason: String,
        pattern: Option<String>,
        suggestion: String,
    },

    #[error("Execution timed out after {timeout_ms}ms")]
    ExecutionTimeout { timeout_ms: u64 },

    #[error("Runtime initialization failed for {module}: {reason}")]
    RuntimeInitialization { module: String, reason: String },

    #[error("Module '{module}' is not initialized")]
    NotInitialized { module: String },

    #[error("Build failed: {message}")]
    Build {
        message: String,
        diagnostics: Vec<Diagnostic>,
    },

    #[error("Run failed: {message}")]
    Run { message: String },

    /// The program loaded but its exports or imports do not fit the host
    #[error("Program entry failed: {message}")]
    Entry { message: String },

    #[error("Format failed: {message}")]
    Format { message: String, line: Option<usize>, column: Option<usize> },

    #[error("Lint failed: {message}")]
    Lint { message: String },

    #[error("Transpile failed: {message}")]
    Transpile { message: String },

    #[error("Minify failed: {message}")]
    Minify { message: String },

    #[error("Syntax validation failed: {message}")]
    ValidationSyntax { message: String },

    #[error("Analysis failed: {message}")]
    Analysis { message: String },

    #[error("Code generation failed: {message}")]
    Generation { message: String },

    #[error("Refactor failed: {message}")]
    Refactor { message: String },

    #[error("Obfuscation failed: {message}")]
    Obfuscate { message: String },

    #[error("Deobfuscation failed: {message}")]
    Deobfuscate { message: String },
}

impl EngineError {
    pub fn validation(message: impl Into<String>) -> Self {
        EngineError::Validation {
            message: message.into(),
        }
    }

    pub fn unsupported_operation(module: &str, operation: impl Into<String>) -> Self {
        EngineError::UnsupportedOperation {
            module: module.to_string(),
            operation: operation.into(),
            degraded: false,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            EngineError::Validation { .. } => ErrorCode::ValidationError,
            EngineError::UnsupportedLanguage { .. } => ErrorCode::UnsupportedLanguage,
            EngineError::UnsupportedOperation { .. } => ErrorCode::UnsupportedOperation,
            EngineError::SecurityViolation { .. } => ErrorCode::SecurityViolation,
            EngineError::ExecutionTimeout { .. } => ErrorCode::ExecutionTimeout,
            EngineError::RuntimeInitialization { .. } => ErrorCode::RuntimeInitializationFailure,
            EngineError::NotInitialized { .. } => ErrorCode::ModuleNotInitialized,
            EngineError::Build { .. } => ErrorCode::BuildError,
            EngineError::Run { .. } | EngineError::Entry { .. } => ErrorCode::RunError,
            EngineError::Format { .. } => ErrorCode::FormatError,
            EngineError::Lint { .. } => ErrorCode::LintError,
            EngineError::Transpile { .. } => ErrorCode::TranspileError,
            EngineError::Minify { .. } => ErrorCode::MinifyError,
            EngineError::ValidationSyntax { .. } => ErrorCode::ValidationSyntaxError,
            EngineError::Analysis { .. } => ErrorCode::AnalysisError,
            EngineError::Generation { .. } => ErrorCode::GenerationError,
            EngineError::Refactor { .. } => ErrorCode::RefactorError,
            EngineError::Obfuscate { .. } => ErrorCode::ObfuscateError,
            EngineError::Deobfuscate { .. } => ErrorCode::DeobfuscateError,
        }
    }

    /// Whether the caller can fix the condition by changing the request
    pub fn recoverable(&self) -> bool {
        !matches!(
            self,
            EngineError::RuntimeInitialization { .. }
                | EngineError::NotInitialized { .. }
                | EngineError::Run { .. }
        )
    }

    pub fn suggestions(&self) -> Vec<String> {
        let suggestion = match self {
            EngineError::Validation { .. } => {
                "Submit the source code as a plain string".to_string()
            }
            EngineError::UnsupportedLanguage { module, .. } => {
                format!("Check getMetadata().languages of module '{module}' for supported languages")
            }
            EngineError::UnsupportedOperation { degraded: true, .. } => {
                "The module is running in degraded mode; install its backend toolchain to enable this operation".to_string()
            }
            EngineError::UnsupportedOperation { module, .. } => {
                format!("Check getMetadata().capabilities of module '{module}' for available operations")
            }
            EngineError::SecurityViolation { suggestion, .. } => suggestion.clone(),
            EngineError::ExecutionTimeout { .. } => {
                "Reduce the amount of work or raise the timeout option".to_string()
            }
            EngineError::RuntimeInitialization { .. } => {
                "Retry later or check that the language backend is installed".to_string()
            }
            EngineError::NotInitialized { .. } => {
                "Load the module through the registry before executing".to_string()
            }
            EngineError::Build { .. } => "Fix the reported compile errors and retry".to_string(),
            EngineError::Run { .. } => "Retry the request or check the backend logs".to_string(),
            EngineError::Entry { .. } => {
                "Check the program entry point and its imports".to_string()
            }
            EngineError::Format { .. }
            | EngineError::Minify { .. }
            | EngineError::Transpile { .. }
            | EngineError::Obfuscate { .. }
            | EngineError::Deobfuscate { .. }
            | EngineError::Refactor { .. } => {
                "Make sure the input is syntactically valid for the declared language".to_string()
            }
            EngineError::Lint { .. } | EngineError::Analysis { .. } => {
                "Validate the source syntax first".to_string()
            }
            EngineError::ValidationSyntax { .. } => {
                "Retry the validation or use a different language module".to_string()
            }
            EngineError::Generation { .. } => {
                "Check the template name and the values passed to it".to_string()
            }
        };
        vec![suggestion]
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            EngineError::SecurityViolation {
                pattern: Some(pattern),
                ..
            } => Some(serde_json::json!({ "pattern": pattern })),
            EngineError::Build { diagnostics, .. } => {
                Some(serde_json::json!({ "diagnostics": diagnostics }))
            }
            EngineError::Format {
                line: Some(line),
                column,
                ..
            } => Some(serde_json::json!({ "line": line, "column": column })),
            EngineError::ExecutionTimeout { timeout_ms } => {
                Some(serde_json::json!({ "timeoutMs": timeout_ms }))
            }
            _ => None,
        }
    }
}

impl From<EngineError> for ModuleError {
    fn from(err: EngineError) -> Self {
        ModuleError {
            code: err.code(),
            message: err.to_string(),
            details: err.details(),
            recoverable: err.recoverable(),
            suggestions: err.suggestions(),
        }
    }
}

impl From<BackendError> for EngineError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::BuildFailed {
                message,
                diagnostics,
            } => EngineError::Build {
                message,
                diagnostics,
            },
            BackendError::Timeout { timeout_ms } => EngineError::ExecutionTimeout { timeout_ms },
            other @ (BackendError::EntryPointNotFound { .. }
            | BackendError::Instantiation { .. }) => EngineError::Entry {
                message: other.to_string(),
            },
            BackendError::Unavailable { backend, reason }
            | BackendError::Initialization { backend, reason } => {
                EngineError::RuntimeInitialization {
                    module: backend,
                    reason,
                }
            }
            other => EngineError::Run {
                message: other.to_string(),
            },
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Transpile {
            message: format!("JSON serialization error: {err}"),
        }
    }
}

/// Errors surfaced by the registry and loader
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("Module not found: {id} (known: {known:?})")]
    ModuleNotFound { id: String, known: Vec<String> },

    #[error("No module handles language: {language}")]
    LanguageNotFound { language: String },

    #[error("Module {id} failed to initialize after {attempts} attempt(s): {reason}")]
    InitializationFailed {
        id: String,
        attempts: u32,
        reason: String,
    },

    #[error("Module {id} was unloaded while loading")]
    Cancelled { id: String },
}

impl RegistryError {
    pub fn code(&self) -> ErrorCode {
        match self {
            RegistryError::ModuleNotFound { .. } => ErrorCode::ModuleNotFound,
            RegistryError::LanguageNotFound { .. } => ErrorCode::UnsupportedLanguage,
            RegistryError::InitializationFailed { .. } | RegistryError::Cancelled { .. } => {
                ErrorCode::RuntimeInitializationFailure
            }
        }
    }
}

impl From<RegistryError> for ModuleError {
    fn from(err: RegistryError) -> Self {
        let (recoverable, suggestion) = match &err {
            RegistryError::ModuleNotFound { .. } => {
                (true, "Use searchTools() to list available module ids".to_string())
            }
            RegistryError::LanguageNotFound { .. } => {
                (true, "Use a language listed by getAllToolsMetadata()".to_string())
            }
            RegistryError::InitializationFailed { .. } | RegistryError::Cancelled { .. } => {
                (false, "Retry loading the module later".to_string())
            }
        };
        ModuleError {
            code: err.code(),
            message: err.to_string(),
            details: None,
            recoverable,
            suggestions: vec![suggestion],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_security_violation_is_recoverable_with_pattern_details() {
        let err = EngineError::SecurityViolation {
            reason: "forbidden pattern: eval()".to_string(),
            pattern: Some("eval()".to_string()),
            suggestion: "Remove eval()".to_string(),
        };
        let module_error = ModuleError::from(err);
        assert_eq!(module_error.code, ErrorCode::SecurityViolation);
        assert!(module_error.recoverable);
        assert_eq!(module_error.suggestions, vec!["Remove eval()".to_string()]);
        assert_eq!(module_error.details.unwrap()["pattern"], "eval()");
    }

    #[test]
    fn test_every_error_has_a_suggestion() {
        let errors = vec![
            EngineError::validation("bad"),
            EngineError::unsupported_operation("json", "execute"),
            EngineError::ExecutionTimeout { timeout_ms: 50 },
            EngineError::RuntimeInitialization {
                module: "go".to_string(),
                reason: "missing".to_string(),
            },
            EngineError::Generation {
                message: "boom".to_string(),
            },
        ];
        for err in errors {
            assert!(!ModuleError::from(err).suggestions.is_empty());
        }
    }

    #[test]
    fn test_environment_failures_are_not_recoverable() {
        let err = EngineError::RuntimeInitialization {
            module: "go".to_string(),
            reason: "tinygo not found".to_string(),
        };
        assert!(!err.recoverable());
        assert_eq!(err.code(), ErrorCode::RuntimeInitializationFailure);
    }

    #[test]
    fn test_missing_entry_point_is_recoverable() {
        let err = EngineError::from(BackendError::EntryPointNotFound {
            name: "_start".to_string(),
            exports: vec!["run".to_string()],
        });
        assert!(matches!(err, EngineError::Entry { .. }));
        assert!(err.recoverable());
        assert_eq!(err.code(), ErrorCode::RunError);
        assert!(err.to_string().contains("_start"));

        let instantiation = EngineError::from(BackendError::Instantiation {
            reason: "unknown import: env::host_call".to_string(),
        });
        assert!(ModuleError::from(instantiation).recoverable);

        let task = EngineError::from(BackendError::Task {
            reason: "worker panicked".to_string(),
        });
        assert!(matches!(task, EngineError::Run { .. }));
        assert!(!task.recoverable());
    }

    #[test]
    fn test_not_found_is_distinct_from_init_failure() {
        let not_found = RegistryError::ModuleNotFound {
            id: "unknown-id".to_string(),
            known: vec![],
        };
        let failed = RegistryError::InitializationFailed {
            id: "go".to_string(),
            attempts: 3,
            reason: "x".to_string(),
        };
        assert_eq!(not_found.code(), ErrorCode::ModuleNotFound);
        assert_eq!(failed.code(), ErrorCode::RuntimeInitializationFailure);
    }
}
