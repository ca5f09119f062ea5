//! Engine configuration
//!
//! Every section has defaults, so an empty YAML/JSON document is a valid config.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::types::{ModuleLimits, DEFAULT_MAX_MEMORY, DEFAULT_MAX_SOURCE_SIZE, DEFAULT_TIMEOUT_MS};

pub const DEFAULT_MAX_NESTING_DEPTH: usize = 1000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {error}")]
    Read { path: String, error: String },

    #[error("Failed to parse {format} config: {error}")]
    Parse { format: String, error: String },

    #[error("Unsupported config format: {extension}")]
    UnsupportedFormat { extension: String },

    #[error("Invalid config value: {field} - {reason}")]
    Invalid { field: String, reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub loader: LoaderConfig,
    pub security: SecurityConfig,
    pub execution: ExecutionDefaults,
    pub health: HealthConfig,
    pub toolchain: ToolchainConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub max_concurrent_loads: usize,
    pub retry_attempts: u32,
    /// Base backoff; attempt `n` waits `n * retry_delay_ms`
    pub retry_delay_ms: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            max_concurrent_loads: num_cpus::get().clamp(1, 4),
            retry_attempts: 3,
            retry_delay_ms: 100,
        }
    }
}

impl LoaderConfig {
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_delay_ms.saturating_mul(attempt as u64))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub max_source_size: usize,
    pub max_nesting_depth: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_source_size: DEFAULT_MAX_SOURCE_SIZE,
            max_nesting_depth: DEFAULT_MAX_NESTING_DEPTH,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionDefaults {
    pub timeout_ms: u64,
    pub max_memory: u64,
    /// Cap on captured stdout/stderr bytes per stream
    pub max_output_bytes: usize,
}

impl Default for ExecutionDefaults {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_memory: DEFAULT_MAX_MEMORY,
            max_output_bytes: 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Error rate above which an initialized module reports `degraded`
    pub degraded_error_rate: f64,
    /// Executions required before the error rate is considered
    pub min_samples: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            degraded_error_rate: 0.5,
            min_samples: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolchainConfig {
    /// Explicit TinyGo binary; looked up on PATH when unset
    pub tinygo_path: Option<PathBuf>,
    pub build_timeout_ms: u64,
    pub work_dir: PathBuf,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            tinygo_path: None,
            build_timeout_ms: 120_000,
            work_dir: dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("polyglot-sandbox"),
        }
    }
}

/// Per-module view of the engine configuration, handed to `initialize`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleConfig {
    pub security: SecurityConfig,
    pub execution: ExecutionDefaults,
    pub health: HealthConfig,
    pub toolchain: ToolchainConfig,
    /// Skip backend construction and start on the native fallback
    pub native_only: bool,
}

impl ModuleConfig {
    pub fn limits(&self) -> ModuleLimits {
        ModuleLimits {
            max_source_size: self.security.max_source_size,
            timeout_ms: self.execution.timeout_ms,
            max_memory: self.execution.max_memory,
        }
    }

    pub fn native_only(mut self) -> Self {
        self.native_only = true;
        self
    }
}

impl EngineConfig {
    pub fn module_config(&self) -> ModuleConfig {
        ModuleConfig {
            security: self.security.clone(),
            execution: self.execution.clone(),
            health: self.health.clone(),
            toolchain: self.toolchain.clone(),
            native_only: false,
        }
    }

    /// Load from a `.yaml`/`.yml` or `.json` file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_lowercase();

        let config = match extension.as_str() {
            "yaml" | "yml" => Self::from_yaml_str(&content)?,
            "json" => Self::from_json_str(&content)?,
            other => {
                return Err(ConfigError::UnsupportedFormat {
                    extension: other.to_string(),
                })
            }
        };

        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content).map_err(|e| ConfigError::Parse {
            format: "yaml".to_string(),
            error: e.to_string(),
        })
    }

    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(content).map_err(|e| ConfigError::Parse {
            format: "json".to_string(),
            error: e.to_string(),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.loader.max_concurrent_loads == 0 {
            return Err(ConfigError::Invalid {
                field: "loader.max_concurrent_loads".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.security.max_source_size == 0 {
            return Err(ConfigError::Invalid {
                field: "security.max_source_size".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.health.degraded_error_rate) {
            return Err(ConfigError::Invalid {
                field: "health.degraded_error_rate".to_string(),
                reason: "must be between 0 and 1".to_string(),
            });
        }
        Ok(())
    }
}
