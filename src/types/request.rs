// Request-side types consumed from callers (UI tool pages, the CLI, tests)
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use super::metadata::Capability;

pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_MAX_MEMORY: u64 = 64 * 1024 * 1024;

/// Operation requested from a processing module.
///
/// Unknown operation names deserialize into [`Operation::Other`] so that dispatch
/// can report them as `UnsupportedOperation` instead of failing at parse time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Operation {
    Execute,
    Format,
    Lint,
    Transpile,
    Minify,
    Validate,
    Analyze,
    Generate,
    Refactor,
    Obfuscate,
    Deobfuscate,
    Other(String),
}

impl Operation {
    pub fn as_str(&self) -> &str {
        match self {
            Operation::Execute => "execute",
            Operation::Format => "format",
            Operation::Lint => "lint",
            Operation::Transpile => "transpile",
            Operation::Minify => "minify",
            Operation::Validate => "validate",
            Operation::Analyze => "analyze",
            Operation::Generate => "generate",
            Operation::Refactor => "refactor",
            Operation::Obfuscate => "obfuscate",
            Operation::Deobfuscate => "deobfuscate",
            Operation::Other(name) => name,
        }
    }

    /// Capability a module must hold to serve this operation
    pub fn capability(&self) -> Option<Capability> {
        let capability = match self {
            Operation::Execute => Capability::Execute,
            Operation::Format => Capability::Format,
            Operation::Lint => Capability::Lint,
            Operation::Transpile => Capability::Transpile,
            Operation::Minify => Capability::Minify,
            Operation::Validate => Capability::Validate,
            Operation::Analyze => Capability::Analyze,
            Operation::Generate => Capability::Generate,
            Operation::Refactor => Capability::Refactor,
            Operation::Obfuscate => Capability::Obfuscate,
            Operation::Deobfuscate => Capability::Deobfuscate,
            Operation::Other(_) => return None,
        };
        Some(capability)
    }

    /// Operations that hand source to a runtime rather than a text processor
    pub fn runs_code(&self) -> bool {
        matches!(self, Operation::Execute)
    }
}

impl From<String> for Operation {
    fn from(value: String) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "execute" | "run" => Operation::Execute,
            "format" => Operation::Format,
            "lint" => Operation::Lint,
            "transpile" => Operation::Transpile,
            "minify" => Operation::Minify,
            "validate" => Operation::Validate,
            "analyze" => Operation::Analyze,
            "generate" => Operation::Generate,
            "refactor" => Operation::Refactor,
            "obfuscate" => Operation::Obfuscate,
            "deobfuscate" => Operation::Deobfuscate,
            _ => Operation::Other(value),
        }
    }
}

impl From<&str> for Operation {
    fn from(value: &str) -> Self {
        Operation::from(value.to_string())
    }
}

impl From<Operation> for String {
    fn from(value: Operation) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxLevel {
    None,
    Basic,
    Strict,
    Maximum,
}

impl Default for SandboxLevel {
    fn default() -> Self {
        SandboxLevel::Basic
    }
}

impl std::str::FromStr for SandboxLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(SandboxLevel::None),
            "basic" => Ok(SandboxLevel::Basic),
            "strict" => Ok(SandboxLevel::Strict),
            "maximum" => Ok(SandboxLevel::Maximum),
            other => Err(format!("unknown sandbox level: {other}")),
        }
    }
}

/// Per-request execution options. Every field has the documented default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutionOptions {
    /// Wall-clock timeout in milliseconds
    pub timeout: u64,
    /// Memory ceiling in bytes
    pub max_memory: u64,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub stdin: Option<String>,
    pub capture_stdout: bool,
    pub capture_stderr: bool,
    pub allow_network: bool,
    pub allow_file_system: bool,
    pub sandbox_level: SandboxLevel,
    pub debug: bool,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT_MS,
            max_memory: DEFAULT_MAX_MEMORY,
            args: Vec::new(),
            env: HashMap::new(),
            stdin: None,
            capture_stdout: true,
            capture_stderr: true,
            allow_network: false,
            allow_file_system: false,
            sandbox_level: SandboxLevel::default(),
            debug: false,
        }
    }
}

impl ExecutionOptions {
    pub fn timeout_duration(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout = timeout_ms;
        self
    }

    pub fn with_sandbox_level(mut self, level: SandboxLevel) -> Self {
        self.sandbox_level = level;
        self
    }
}

/// Structured refactoring request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum RefactorSpec {
    RenameSymbol { from: String, to: String },
    StripComments,
    NormalizeWhitespace,
}

/// Operation-specific parameters. Handlers read only the fields they need.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OperationParams {
    pub from: Option<String>,
    pub to: Option<String>,
    pub template: Option<String>,
    pub inline_template: Option<String>,
    pub values: HashMap<String, serde_json::Value>,
    pub refactor: Option<RefactorSpec>,
    pub indent: Option<usize>,
    pub entry_point: Option<String>,
    pub build_tags: Vec<String>,
    pub build_flags: Vec<String>,
    pub target_version: Option<String>,
}

/// A unit of work submitted to the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    pub operation: Operation,
    /// Empty when omitted; execution requests are still screened before routing
    #[serde(default)]
    pub language: String,
    /// Submitted source. Kept as raw JSON so that malformed input shapes can be
    /// reported as validation errors instead of being rejected by the parser.
    #[serde(default)]
    pub code: serde_json::Value,
    #[serde(default)]
    pub params: OperationParams,
    #[serde(default)]
    pub options: ExecutionOptions,
}

impl ExecutionRequest {
    pub fn new(
        operation: impl Into<Operation>,
        language: impl Into<String>,
        code: impl Into<String>,
    ) -> Self {
        Self {
            operation: operation.into(),
            language: language.into(),
            code: serde_json::Value::String(code.into()),
            params: OperationParams::default(),
            options: ExecutionOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ExecutionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_params(mut self, params: OperationParams) -> Self {
        self.params = params;
        self
    }

    pub fn source(&self) -> Option<&str> {
        self.code.as_str()
    }
}
