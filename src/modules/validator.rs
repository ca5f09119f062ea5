//! Static pre-flight checks on submitted source
//!
//! These are language-agnostic text scans, not parses: size gate, forbidden API
//! signatures, bracket nesting depth. Checks run in that order and stop at the
//! first failure.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use crate::config::SecurityConfig;
use crate::modules::error::EngineError;
use crate::types::ExecutionOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatternCategory {
    DynamicCode,
    Scheduling,
    ModuleLoading,
    Network,
    FileSystem,
    HostObject,
    Subprocess,
}

impl PatternCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternCategory::DynamicCode => "dynamic code construction",
            PatternCategory::Scheduling => "timer scheduling",
            PatternCategory::ModuleLoading => "module loading",
            PatternCategory::Network => "network access",
            PatternCategory::FileSystem => "file system access",
            PatternCategory::HostObject => "host object access",
            PatternCategory::Subprocess => "subprocess spawning",
        }
    }
}

#[derive(Debug)]
pub struct ForbiddenPattern {
    pub name: &'static str,
    pub category: PatternCategory,
    regex: Regex,
}

impl ForbiddenPattern {
    pub fn is_match(&self, source: &str) -> bool {
        self.regex.is_match(source)
    }

    /// Byte offset of the first match
    pub fn find(&self, source: &str) -> Option<usize> {
        self.regex.find(source).map(|m| m.start())
    }
}

const SIGNATURES: &[(&str, &str, PatternCategory)] = &[
    ("eval()", r"\beval\s*\(", PatternCategory::DynamicCode),
    ("new Function()", r"\bnew\s+Function\s*\(", PatternCategory::DynamicCode),
    ("Function()", r#"\bFunction\s*\(\s*['"`]"#, PatternCategory::DynamicCode),
    ("constructor escape", r#"\[\s*['"]constructor['"]\s*\]|\.constructor\s*\("#, PatternCategory::DynamicCode),
    ("__proto__", r"__proto__", PatternCategory::DynamicCode),
    ("setTimeout()", r"\bsetTimeout\s*\(", PatternCategory::Scheduling),
    ("setInterval()", r"\bsetInterval\s*\(", PatternCategory::Scheduling),
    ("setImmediate()", r"\bsetImmediate\s*\(", PatternCategory::Scheduling),
    ("queueMicrotask()", r"\bqueueMicrotask\s*\(", PatternCategory::Scheduling),
    ("requestAnimationFrame()", r"\brequestAnimationFrame\s*\(", PatternCategory::Scheduling),
    ("require()", r"\brequire\s*\(", PatternCategory::ModuleLoading),
    ("import()", r"\bimport\(", PatternCategory::ModuleLoading),
    ("importScripts()", r"\bimportScripts\s*\(", PatternCategory::ModuleLoading),
    ("fetch()", r"\bfetch\s*\(", PatternCategory::Network),
    ("XMLHttpRequest", r"\bXMLHttpRequest\b", PatternCategory::Network),
    ("WebSocket", r"\bWebSocket\b", PatternCategory::Network),
    ("EventSource", r"\bEventSource\b", PatternCategory::Network),
    ("sendBeacon()", r"\bnavigator\s*\.\s*sendBeacon\b", PatternCategory::Network),
    ("net/http", r#""net/http""#, PatternCategory::Network),
    ("net.Dial()", r"\bnet\.Dial\w*\s*\(", PatternCategory::Network),
    ("http client call", r"\bhttp\.(Get|Post|Head|PostForm|NewRequest)\s*\(", PatternCategory::Network),
    ("fs module", r"\bfs\.\w+\s*\(", PatternCategory::FileSystem),
    ("os file API", r"\bos\.(Open|OpenFile|Create|Remove|RemoveAll|ReadFile|WriteFile|ReadDir|Mkdir|MkdirAll|Rename|Chmod|Chdir)\s*\(", PatternCategory::FileSystem),
    ("ioutil", r"\bioutil\.\w+\s*\(", PatternCategory::FileSystem),
    ("localStorage", r"\blocalStorage\b", PatternCategory::FileSystem),
    ("sessionStorage", r"\bsessionStorage\b", PatternCategory::FileSystem),
    ("indexedDB", r"\bindexedDB\b", PatternCategory::FileSystem),
    ("document", r"\bdocument\s*\.", PatternCategory::HostObject),
    ("window", r"\bwindow\s*\.", PatternCategory::HostObject),
    ("globalThis", r"\bglobalThis\b", PatternCategory::HostObject),
    ("global", r"\bglobal\s*\.", PatternCategory::HostObject),
    ("process", r"\bprocess\s*\.", PatternCategory::HostObject),
    ("Deno", r"\bDeno\s*\.", PatternCategory::HostObject),
    ("os environment", r"\bos\.(Getenv|Setenv|Unsetenv|Environ|Exit)\s*\(", PatternCategory::HostObject),
    ("child_process", r"\bchild_process\b", PatternCategory::Subprocess),
    ("spawn()", r"\bspawn(Sync)?\s*\(", PatternCategory::Subprocess),
    ("execSync()", r"\bexec(File)?Sync\s*\(", PatternCategory::Subprocess),
    ("os/exec", r#""os/exec""#, PatternCategory::Subprocess),
    ("exec.Command()", r"\bexec\.Command(Context)?\s*\(", PatternCategory::Subprocess),
    ("syscall", r#"\bsyscall\.\w+|"syscall""#, PatternCategory::Subprocess),
    ("unsafe", r#""unsafe""#, PatternCategory::Subprocess),
];

static FORBIDDEN_PATTERNS: Lazy<Vec<ForbiddenPattern>> = Lazy::new(|| {
    SIGNATURES
        .iter()
        .filter_map(|&(name, pattern, category)| match Regex::new(pattern) {
            Ok(regex) => Some(ForbiddenPattern {
                name,
                category,
                regex,
            }),
            Err(e) => {
                warn!("Invalid forbidden pattern {}: {}", name, e);
                None
            }
        })
        .collect()
});

pub fn forbidden_patterns() -> &'static [ForbiddenPattern] {
    &FORBIDDEN_PATTERNS
}

/// How much of the validator a given operation goes through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationScope {
    /// Size, forbidden patterns and nesting
    Full,
    /// Size and nesting only
    Structural,
}

#[derive(Debug, Clone)]
pub struct SecurityValidator {
    max_source_size: usize,
    max_nesting_depth: usize,
}

impl Default for SecurityValidator {
    fn default() -> Self {
        Self::new(&SecurityConfig::default())
    }
}

impl SecurityValidator {
    pub fn new(config: &SecurityConfig) -> Self {
        Self {
            max_source_size: config.max_source_size,
            max_nesting_depth: config.max_nesting_depth,
        }
    }

    pub fn max_source_size(&self) -> usize {
        self.max_source_size
    }

    pub fn validate(
        &self,
        source: &str,
        options: &ExecutionOptions,
        scope: ValidationScope,
    ) -> Result<(), EngineError> {
        self.check_size(source)?;

        if scope == ValidationScope::Full {
            if let Some(pattern) = self.first_forbidden(source, options) {
                debug!("Rejected source containing forbidden pattern: {}", pattern.name);
                return Err(EngineError::SecurityViolation {
                    reason: format!(
                        "forbidden pattern detected: {} ({})",
                        pattern.name,
                        pattern.category.as_str()
                    ),
                    pattern: Some(pattern.name.to_string()),
                    suggestion: format!("Remove the use of {} from the source", pattern.name),
                });
            }
        }

        self.check_nesting(source)
    }

    pub fn check_size(&self, source: &str) -> Result<(), EngineError> {
        if source.len() > self.max_source_size {
            return Err(EngineError::SecurityViolation {
                reason: format!(
                    "max size exceeded: {} bytes > {} bytes",
                    source.len(),
                    self.max_source_size
                ),
                pattern: None,
                suggestion: format!(
                    "Split the input so each submission stays under {} bytes",
                    self.max_source_size
                ),
            });
        }
        Ok(())
    }

    pub fn check_nesting(&self, source: &str) -> Result<(), EngineError> {
        let depth = nesting_depth(source);
        if depth > self.max_nesting_depth {
            return Err(EngineError::SecurityViolation {
                reason: format!(
                    "excessive nesting: depth {} > {}",
                    depth, self.max_nesting_depth
                ),
                pattern: None,
                suggestion: "Flatten deeply nested expressions or data".to_string(),
            });
        }
        Ok(())
    }

    /// First forbidden signature in `source`, honoring the network and
    /// file-system waivers in `options`
    pub fn first_forbidden(
        &self,
        source: &str,
        options: &ExecutionOptions,
    ) -> Option<&'static ForbiddenPattern> {
        forbidden_patterns()
            .iter()
            .filter(|p| !is_waived(p.category, options))
            .find(|p| p.is_match(source))
    }
}

fn is_waived(category: PatternCategory, options: &ExecutionOptions) -> bool {
    match category {
        PatternCategory::Network => options.allow_network,
        PatternCategory::FileSystem => options.allow_file_system,
        _ => false,
    }
}

/// Maximum bracket/paren/brace nesting depth
pub fn nesting_depth(source: &str) -> usize {
    let mut depth = 0usize;
    let mut max_depth = 0usize;
    for c in source.chars() {
        match c {
            '(' | '[' | '{' => {
                depth += 1;
                max_depth = max_depth.max(depth);
            }
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    max_depth
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ErrorCode;
    use crate::types::ModuleError;

    fn reject_code(validator: &SecurityValidator, source: &str) -> Option<ErrorCode> {
        validator
            .validate(source, &ExecutionOptions::default(), ValidationScope::Full)
            .err()
            .map(|e| ModuleError::from(e).code)
    }

    #[test]
    fn test_all_signatures_compile() {
        assert_eq!(forbidden_patterns().len(), SIGNATURES.len());
    }

    #[test]
    fn test_size_gate() {
        let validator = SecurityValidator::new(&SecurityConfig {
            max_source_size: 8,
            max_nesting_depth: 1000,
        });
        let err = validator
            .validate("123456789", &ExecutionOptions::default(), ValidationScope::Structural)
            .unwrap_err();
        assert!(err.to_string().contains("max size exceeded"));
        assert!(validator.check_size("12345678").is_ok());
    }

    #[test]
    fn test_forbidden_patterns_detected() {
        let validator = SecurityValidator::default();
        for source in [
            r#"eval("2+2")"#,
            "fetch('https://example.com')",
            "setTimeout(f, 10)",
            "const cp = require('child_process')",
            "document.cookie",
            "process.exit(1)",
            "import \"os/exec\"",
            "os.ReadFile(\"/etc/passwd\")",
        ] {
            assert_eq!(
                reject_code(&validator, source),
                Some(ErrorCode::SecurityViolation),
                "expected rejection for {source}"
            );
        }
    }

    #[test]
    fn test_benign_sources_pass() {
        let validator = SecurityValidator::default();
        for source in [
            "1+1",
            "let evaluation = 3; evaluation * 2",
            "package main\n\nimport \"fmt\"\n\nfunc main() {\n\tfmt.Println(\"hi\")\n}\n",
            r#"(module (func (export "main") (result i32) i32.const 7))"#,
            r#"{"a": 1, "b": [1, 2, 3]}"#,
        ] {
            assert_eq!(reject_code(&validator, source), None, "unexpected rejection for {source}");
        }
    }

    #[test]
    fn test_network_waiver() {
        let validator = SecurityValidator::default();
        let options = ExecutionOptions {
            allow_network: true,
            ..ExecutionOptions::default()
        };
        assert!(validator
            .validate("fetch('/api')", &options, ValidationScope::Full)
            .is_ok());
        assert!(validator
            .validate("eval('1')", &options, ValidationScope::Full)
            .is_err());
    }

    #[test]
    fn test_structural_scope_skips_patterns() {
        let validator = SecurityValidator::default();
        assert!(validator
            .validate("eval(1)", &ExecutionOptions::default(), ValidationScope::Structural)
            .is_ok());
    }

    #[test]
    fn test_excessive_nesting() {
        let validator = SecurityValidator::default();
        let deep = format!("{}{}", "[".repeat(1001), "]".repeat(1001));
        let err = validator
            .validate(&deep, &ExecutionOptions::default(), ValidationScope::Full)
            .unwrap_err();
        assert!(err.to_string().contains("excessive nesting"));

        let ok = format!("{}{}", "(".repeat(1000), ")".repeat(1000));
        assert!(validator.check_nesting(&ok).is_ok());
    }

    #[test]
    fn test_nesting_depth_ignores_stray_closers() {
        assert_eq!(nesting_depth(")))((("), 3);
        assert_eq!(nesting_depth("{[()]}"), 3);
        assert_eq!(nesting_depth("plain"), 0);
    }
}
