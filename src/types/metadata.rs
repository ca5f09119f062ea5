use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;

use super::request::{DEFAULT_MAX_MEMORY, DEFAULT_TIMEOUT_MS};

pub const DEFAULT_MAX_SOURCE_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
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
    Build,
    Run,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Execute => "execute",
            Capability::Format => "format",
            Capability::Lint => "lint",
            Capability::Transpile => "transpile",
            Capability::Minify => "minify",
            Capability::Validate => "validate",
            Capability::Analyze => "analyze",
            Capability::Generate => "generate",
            Capability::Refactor => "refactor",
            Capability::Obfuscate => "obfuscate",
            Capability::Deobfuscate => "deobfuscate",
            Capability::Build => "build",
            Capability::Run => "run",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type CapabilitySet = BTreeSet<Capability>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleLimits {
    pub max_source_size: usize,
    pub timeout_ms: u64,
    pub max_memory: u64,
}

impl Default for ModuleLimits {
    fn default() -> Self {
        Self {
            max_source_size: DEFAULT_MAX_SOURCE_SIZE,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_memory: DEFAULT_MAX_MEMORY,
        }
    }
}

/// Static description of a module, known before any backend is loaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleInfo {
    pub id: String,
    pub name: String,
    pub version: semver::Version,
    pub category: String,
    pub description: String,
    pub languages: Vec<String>,
    pub capabilities: CapabilitySet,
}

impl ModuleInfo {
    pub fn supports_language(&self, language: &str) -> bool {
        self.languages
            .iter()
            .any(|l| l.eq_ignore_ascii_case(language))
    }

    pub fn checksum(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.id.as_bytes());
        hasher.update(self.version.to_string().as_bytes());
        for language in &self.languages {
            hasher.update(language.as_bytes());
        }
        for capability in &self.capabilities {
            hasher.update(capability.as_str().as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleMetadata {
    pub id: String,
    pub name: String,
    pub version: String,
    pub category: String,
    pub description: String,
    pub capabilities: CapabilitySet,
    pub languages: Vec<String>,
    pub limits: ModuleLimits,
    /// Reduced-capability notes; non-empty when running on a native fallback
    pub limitations: Vec<String>,
    pub loaded_at: Option<DateTime<Utc>>,
    pub checksum: String,
    pub execution_count: u64,
}

impl ModuleMetadata {
    pub fn from_info(info: &ModuleInfo, limits: ModuleLimits) -> Self {
        Self {
            id: info.id.clone(),
            name: info.name.clone(),
            version: info.version.to_string(),
            category: info.category.clone(),
            description: info.description.clone(),
            capabilities: info.capabilities.clone(),
            languages: info.languages.clone(),
            limits,
            limitations: Vec::new(),
            loaded_at: None,
            checksum: info.checksum(),
            execution_count: 0,
        }
    }

    pub fn is_degraded(&self) -> bool {
        !self.limitations.is_empty()
    }

    /// Case-insensitive relevance score used by registry search; 0 means no match
    pub fn search_score(&self, query: &str) -> u32 {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return 1;
        }

        let mut score = 0;
        if self.id.to_lowercase() == query {
            score += 100;
        } else if self.id.to_lowercase().contains(&query) {
            score += 40;
        }
        if self.name.to_lowercase().contains(&query) {
            score += 30;
        }
        if self.languages.iter().any(|l| l.to_lowercase() == query) {
            score += 25;
        }
        if self.category.to_lowercase().contains(&query) {
            score += 20;
        }
        if self.capabilities.iter().any(|c| c.as_str() == query) {
            score += 10;
        }
        if self.description.to_lowercase().contains(&query) {
            score += 5;
        }
        score
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleHealth {
    pub status: HealthStatus,
    pub last_check: DateTime<Utc>,
    pub average_response_time_ms: f64,
    pub error_rate: f64,
    pub uptime_ms: u64,
    pub total_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    pub last_used: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_info() -> ModuleInfo {
        ModuleInfo {
            id: "rhai".to_string(),
            name: "Rhai Script".to_string(),
            version: semver::Version::new(1, 0, 0),
            category: "scripting".to_string(),
            description: "Sandboxed scripting".to_string(),
            languages: vec!["rhai".to_string()],
            capabilities: [Capability::Execute, Capability::Format].into_iter().collect(),
        }
    }

    #[test]
    fn test_checksum_is_stable() {
        let info = sample_info();
        assert_eq!(info.checksum(), info.checksum());
        assert_eq!(info.checksum().len(), 64);

        let mut other = sample_info();
        other.capabilities.insert(Capability::Lint);
        assert_ne!(info.checksum(), other.checksum());
    }

    #[test]
    fn test_search_score_ranks_exact_id_first() {
        let metadata = ModuleMetadata::from_info(&sample_info(), ModuleLimits::default());
        assert!(metadata.search_score("rhai") > metadata.search_score("script"));
        assert!(metadata.search_score("execute") > 0);
        assert_eq!(metadata.search_score("cobol"), 0);
    }
}
