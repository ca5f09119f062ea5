//! External TinyGo toolchain producing WASI modules from Go source

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::ToolchainConfig;
use crate::runtime::backend::{BuildRequest, CompiledModule, SourceCompiler};
use crate::runtime::error::BackendError;
use crate::runtime::wasm::WasmRuntime;
use crate::types::Diagnostic;

pub const DEFAULT_GO_VERSION: &str = "1.21";

/// Flag prefixes a caller may pass through to the compiler
const ALLOWED_FLAG_PREFIXES: &[&str] = &[
    "-opt=",
    "-gc=",
    "-scheduler=",
    "-panic=",
    "-no-debug",
    "-stack-size=",
];

static GO_DIAGNOSTIC: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^(?:\./)?[\w./-]+\.go:(\d+):(\d+):\s*(.+)$").ok());

static TAG_NAME: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.]+$").ok());

static GO_VERSION: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"^1\.\d{1,2}$").ok());

#[derive(Debug, Clone)]
pub struct TinyGoCompiler {
    configured: Option<PathBuf>,
    work_dir: PathBuf,
    build_timeout: Duration,
}

impl TinyGoCompiler {
    pub fn new(config: &ToolchainConfig) -> Self {
        Self {
            configured: config.tinygo_path.clone(),
            work_dir: config.work_dir.clone(),
            build_timeout: Duration::from_millis(config.build_timeout_ms),
        }
    }

    fn binary(&self) -> Result<PathBuf, BackendError> {
        if let Some(path) = &self.configured {
            return if path.exists() {
                Ok(path.clone())
            } else {
                Err(BackendError::Unavailable {
                    backend: "tinygo".to_string(),
                    reason: format!("configured binary {} does not exist", path.display()),
                })
            };
        }
        which::which("tinygo").map_err(|e| BackendError::Unavailable {
            backend: "tinygo".to_string(),
            reason: format!("tinygo not found on PATH: {e}"),
        })
    }

    fn build_args(request: &BuildRequest, output: &Path) -> Result<Vec<String>, BackendError> {
        let mut args = vec![
            "build".to_string(),
            "-o".to_string(),
            output.display().to_string(),
            "-target=wasi".to_string(),
        ];

        if !request.build_tags.is_empty() {
            let valid = TAG_NAME.as_ref().is_some_and(|re| {
                request.build_tags.iter().all(|tag| re.is_match(tag))
            });
            if !valid {
                return Err(rejected_input("build tags may only contain letters, digits, '_' and '.'"));
            }
            args.push(format!("-tags={}", request.build_tags.join(",")));
        }

        for entry in &request.build_flags {
            let flags = shell_words::split(entry)
                .map_err(|e| rejected_input(&format!("unparsable build flags '{entry}': {e}")))?;
            for flag in flags {
                if !ALLOWED_FLAG_PREFIXES.iter().any(|p| flag.starts_with(p)) {
                    return Err(rejected_input(&format!("build flag '{flag}' is not permitted")));
                }
                args.push(flag);
            }
        }

        args.push("main.go".to_string());
        Ok(args)
    }

    fn go_mod(request: &BuildRequest) -> Result<String, BackendError> {
        let version = request
            .target_version
            .as_deref()
            .unwrap_or(DEFAULT_GO_VERSION);
        if !GO_VERSION.as_ref().is_some_and(|re| re.is_match(version)) {
            return Err(rejected_input(&format!("unsupported target version '{version}'")));
        }
        Ok(format!("module sandbox\n\ngo {version}\n"))
    }

    fn scratch_dir(&self) -> Result<tempfile::TempDir, BackendError> {
        if std::fs::create_dir_all(&self.work_dir).is_ok() {
            if let Ok(dir) = tempfile::Builder::new()
                .prefix("build-")
                .tempdir_in(&self.work_dir)
            {
                return Ok(dir);
            }
        }
        Ok(tempfile::Builder::new().prefix("polyglot-build-").tempdir()?)
    }
}

fn rejected_input(message: &str) -> BackendError {
    BackendError::BuildFailed {
        message: message.to_string(),
        diagnostics: vec![Diagnostic::error(message).with_rule("build-options")],
    }
}

/// Compiler output lines of the form `main.go:LINE:COL: message`
pub fn parse_go_diagnostics(stderr: &str) -> Vec<Diagnostic> {
    let Some(re) = GO_DIAGNOSTIC.as_ref() else {
        return Vec::new();
    };
    stderr
        .lines()
        .filter_map(|line| {
            let caps = re.captures(line.trim())?;
            let message = caps.get(3)?.as_str().to_string();
            let line_no = caps.get(1).and_then(|m| m.as_str().parse().ok());
            let column = caps.get(2).and_then(|m| m.as_str().parse().ok());
            let diagnostic = if message.starts_with("warning") {
                Diagnostic::warning(message)
            } else {
                Diagnostic::error(message)
            };
            Some(diagnostic.at(line_no, column).with_rule("tinygo"))
        })
        .collect()
}

#[async_trait]
impl SourceCompiler for TinyGoCompiler {
    fn name(&self) -> &str {
        "tinygo"
    }

    async fn check_available(&self) -> Result<(), BackendError> {
        let binary = self.binary()?;
        let output = Command::new(&binary)
            .arg("version")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| BackendError::Unavailable {
                backend: "tinygo".to_string(),
                reason: format!("failed to run {}: {e}", binary.display()),
            })?;

        if !output.status.success() {
            return Err(BackendError::Unavailable {
                backend: "tinygo".to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        info!(
            "Using {}",
            String::from_utf8_lossy(&output.stdout).trim()
        );
        Ok(())
    }

    async fn compile(
        &self,
        runtime: &WasmRuntime,
        request: &BuildRequest,
    ) -> Result<CompiledModule, BackendError> {
        let binary = self.binary()?;
        let dir = self.scratch_dir()?;
        let output_path = dir.path().join("main.wasm");

        let args = Self::build_args(request, &output_path)?;
        tokio::fs::write(dir.path().join("go.mod"), Self::go_mod(request)?).await?;
        tokio::fs::write(dir.path().join("main.go"), &request.source).await?;

        debug!("Running {} {}", binary.display(), shell_words::join(&args));

        let child = Command::new(&binary)
            .args(&args)
            .current_dir(dir.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.build_timeout, child)
            .await
            .map_err(|_| BackendError::Toolchain {
                reason: format!("build exceeded {}ms", self.build_timeout.as_millis()),
            })??;

        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let mut diagnostics = parse_go_diagnostics(&stderr);

        if !output.status.success() {
            if diagnostics.is_empty() {
                diagnostics.push(Diagnostic::error(stderr.trim().to_string()));
            }
            return Err(BackendError::BuildFailed {
                message: format!(
                    "tinygo exited with {}",
                    output.status.code().unwrap_or(-1)
                ),
                diagnostics,
            });
        }

        let bytes = tokio::fs::read(&output_path).await?;
        let artifact = runtime.compile(&bytes)?;
        diagnostics.retain(|d| d.severity != crate::types::Severity::Error);

        Ok(CompiledModule {
            artifact,
            diagnostics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_compiler_errors() {
        let stderr = "# command-line-arguments\nmain.go:4:2: undefined: fmt.Printn\n./main.go:7:1: missing return\n";
        let diagnostics = parse_go_diagnostics(stderr);
        assert_eq!(diagnostics.len(), 2);
        assert_eq!(diagnostics[0].line, Some(4));
        assert_eq!(diagnostics[0].column, Some(2));
        assert_eq!(diagnostics[0].message, "undefined: fmt.Printn");
        assert_eq!(diagnostics[1].line, Some(7));
    }

    #[test]
    fn test_build_args_filter_flags() {
        let mut request = BuildRequest::new("package main");
        request.build_tags = vec!["debug".to_string()];
        request.build_flags = vec!["-opt=z -no-debug".to_string()];

        let args = TinyGoCompiler::build_args(&request, Path::new("/tmp/out.wasm")).unwrap();
        assert!(args.contains(&"-target=wasi".to_string()));
        assert!(args.contains(&"-tags=debug".to_string()));
        assert!(args.contains(&"-opt=z".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("main.go"));

        request.build_flags = vec!["-o /etc/passwd".to_string()];
        assert!(TinyGoCompiler::build_args(&request, Path::new("/tmp/out.wasm")).is_err());
    }

    #[test]
    fn test_go_mod_version() {
        let mut request = BuildRequest::new("package main");
        assert!(TinyGoCompiler::go_mod(&request).unwrap().contains("go 1.21"));

        request.target_version = Some("1.22".to_string());
        assert!(TinyGoCompiler::go_mod(&request).unwrap().contains("go 1.22"));

        request.target_version = Some("1.22\nreplace x => ../../".to_string());
        assert!(TinyGoCompiler::go_mod(&request).is_err());
    }

    #[tokio::test]
    async fn test_missing_configured_binary_is_unavailable() {
        let config = ToolchainConfig {
            tinygo_path: Some(PathBuf::from("/nonexistent/tinygo")),
            ..ToolchainConfig::default()
        };
        let err = TinyGoCompiler::new(&config)
            .check_available()
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Unavailable { .. }));
    }
}
