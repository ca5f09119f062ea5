//! Two-phase build/run pipeline for compiled guest languages

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

use crate::runtime::error::BackendError;
use crate::runtime::wasm::{WasmArtifact, WasmRuntime};
use crate::types::{Diagnostic, ExecutionOptions, ExecutionOutput};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildRequest {
    pub source: String,
    pub build_tags: Vec<String>,
    pub build_flags: Vec<String>,
    pub target_version: Option<String>,
}

impl BuildRequest {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Self::default()
        }
    }

    /// Cache key over everything that can change the produced module
    pub fn fingerprint(&self, compiler: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(compiler.as_bytes());
        hasher.update([0]);
        hasher.update(self.source.as_bytes());
        for tag in &self.build_tags {
            hasher.update([1]);
            hasher.update(tag.as_bytes());
        }
        for flag in &self.build_flags {
            hasher.update([2]);
            hasher.update(flag.as_bytes());
        }
        if let Some(version) = &self.target_version {
            hasher.update([3]);
            hasher.update(version.as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }
}

#[derive(Debug, Clone)]
pub struct BuildOutput {
    pub success: bool,
    pub fingerprint: String,
    pub artifact: Option<WasmArtifact>,
    pub diagnostics: Vec<Diagnostic>,
    pub cached: bool,
}

/// Successful compile: the module plus non-fatal diagnostics
pub struct CompiledModule {
    pub artifact: WasmArtifact,
    pub diagnostics: Vec<Diagnostic>,
}

/// Turns guest source into a WebAssembly module
#[async_trait]
pub trait SourceCompiler: Send + Sync {
    fn name(&self) -> &str;

    /// Fails with `BackendError::Unavailable` when the toolchain is missing
    async fn check_available(&self) -> Result<(), BackendError>;

    async fn compile(
        &self,
        runtime: &WasmRuntime,
        request: &BuildRequest,
    ) -> Result<CompiledModule, BackendError>;
}

/// In-process compiler for WebAssembly text and binaries
#[derive(Debug, Default, Clone)]
pub struct WatCompiler;

#[async_trait]
impl SourceCompiler for WatCompiler {
    fn name(&self) -> &str {
        "wat"
    }

    async fn check_available(&self) -> Result<(), BackendError> {
        Ok(())
    }

    async fn compile(
        &self,
        runtime: &WasmRuntime,
        request: &BuildRequest,
    ) -> Result<CompiledModule, BackendError> {
        let engine = runtime.engine().clone();
        let source = request.source.clone();

        let module = tokio::task::spawn_blocking(move || {
            wasmtime::Module::new(&engine, source.as_bytes())
        })
        .await?;

        match module {
            Ok(module) => Ok(CompiledModule {
                artifact: WasmArtifact::new(module),
                diagnostics: Vec::new(),
            }),
            Err(err) => {
                let message = format!("{err:#}");
                Err(BackendError::BuildFailed {
                    diagnostics: vec![wat_diagnostic(&message)],
                    message,
                })
            }
        }
    }
}

static WAT_LOCATION: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"-->\s*[^:\n]*:(\d+):(\d+)").ok());

fn wat_diagnostic(message: &str) -> Diagnostic {
    let headline = message.lines().next().unwrap_or(message).to_string();
    let location = WAT_LOCATION.as_ref().and_then(|re| re.captures(message)).map(|c| {
        (
            c.get(1).and_then(|m| m.as_str().parse().ok()),
            c.get(2).and_then(|m| m.as_str().parse().ok()),
        )
    });
    let (line, column) = location.unwrap_or((None, None));
    Diagnostic::error(headline).at(line, column).with_rule("wat")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendState {
    Uninitialized,
    Initializing,
    Ready,
}

impl fmt::Display for BackendState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BackendState::Uninitialized => "uninitialized",
            BackendState::Initializing => "initializing",
            BackendState::Ready => "ready",
        };
        f.write_str(s)
    }
}

pub struct CompiledBackend {
    compiler: Box<dyn SourceCompiler>,
    state: BackendState,
    runtime: Option<WasmRuntime>,
    artifacts: HashMap<String, WasmArtifact>,
    max_output: usize,
    runs: AtomicU64,
}

impl CompiledBackend {
    pub fn new(compiler: Box<dyn SourceCompiler>, max_output: usize) -> Self {
        Self {
            compiler,
            state: BackendState::Uninitialized,
            runtime: None,
            artifacts: HashMap::new(),
            max_output,
            runs: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> BackendState {
        self.state
    }

    pub fn compiler_name(&self) -> &str {
        self.compiler.name()
    }

    pub fn cached_artifacts(&self) -> usize {
        self.artifacts.len()
    }

    /// Number of guest runs started since construction
    pub fn run_count(&self) -> u64 {
        self.runs.load(Ordering::Relaxed)
    }

    pub async fn initialize(&mut self) -> Result<(), BackendError> {
        if self.state == BackendState::Ready {
            return Ok(());
        }

        self.state = BackendState::Initializing;
        info!("Initializing {} backend", self.compiler.name());

        let prepared = async {
            self.compiler.check_available().await?;
            let mut runtime = WasmRuntime::new(self.max_output)?;
            runtime.start_epoch_ticker();
            Ok::<_, BackendError>(runtime)
        }
        .await;

        match prepared {
            Ok(runtime) => {
                self.runtime = Some(runtime);
                self.state = BackendState::Ready;
                Ok(())
            }
            Err(e) => {
                warn!("{} backend failed to initialize: {}", self.compiler.name(), e);
                self.state = BackendState::Uninitialized;
                Err(e)
            }
        }
    }

    fn ready_runtime(&self) -> Result<&WasmRuntime, BackendError> {
        match (&self.state, &self.runtime) {
            (BackendState::Ready, Some(runtime)) => Ok(runtime),
            _ => Err(BackendError::NotReady {
                state: self.state.to_string(),
            }),
        }
    }

    /// Compile `request`, reusing a cached artifact with the same fingerprint.
    /// Compile errors are reported in the output, not as `Err`.
    pub async fn build(&mut self, request: &BuildRequest) -> Result<BuildOutput, BackendError> {
        let runtime = self.ready_runtime()?;
        let fingerprint = request.fingerprint(self.compiler.name());

        if let Some(artifact) = self.artifacts.get(&fingerprint) {
            debug!("Build cache hit for {}", &fingerprint[..12]);
            return Ok(BuildOutput {
                success: true,
                fingerprint,
                artifact: Some(artifact.clone()),
                diagnostics: Vec::new(),
                cached: true,
            });
        }

        match self.compiler.compile(runtime, request).await {
            Ok(compiled) => {
                self.artifacts
                    .insert(fingerprint.clone(), compiled.artifact.clone());
                Ok(BuildOutput {
                    success: true,
                    fingerprint,
                    artifact: Some(compiled.artifact),
                    diagnostics: compiled.diagnostics,
                    cached: false,
                })
            }
            Err(BackendError::BuildFailed {
                message,
                mut diagnostics,
            }) => {
                debug!("Build failed: {}", message);
                if diagnostics.is_empty() {
                    diagnostics.push(Diagnostic::error(message));
                }
                Ok(BuildOutput {
                    success: false,
                    fingerprint,
                    artifact: None,
                    diagnostics,
                    cached: false,
                })
            }
            Err(other) => Err(other),
        }
    }

    pub async fn run(
        &self,
        artifact: &WasmArtifact,
        entry_point: Option<&str>,
        options: &ExecutionOptions,
    ) -> Result<ExecutionOutput, BackendError> {
        let runtime = self.ready_runtime()?;
        self.runs.fetch_add(1, Ordering::Relaxed);
        runtime.run(artifact, entry_point, options).await
    }

    /// Build then run; a failed build never reaches `run`
    pub async fn build_and_run(
        &mut self,
        request: &BuildRequest,
        entry_point: Option<&str>,
        options: &ExecutionOptions,
    ) -> Result<ExecutionOutput, BackendError> {
        let build = self.build(request).await?;

        let artifact = match (build.success, build.artifact) {
            (true, Some(artifact)) => artifact,
            _ => {
                let message = build
                    .diagnostics
                    .first()
                    .map(|d| d.message.clone())
                    .unwrap_or_else(|| "build failed".to_string());
                return Err(BackendError::BuildFailed {
                    message,
                    diagnostics: build.diagnostics,
                });
            }
        };

        let mut output = self.run(&artifact, entry_point, options).await?;
        output.build_diagnostics = build.diagnostics;
        Ok(output)
    }

    /// Drop artifacts and the runtime, returning to `Uninitialized`
    pub fn cleanup(&mut self) {
        self.artifacts.clear();
        if let Some(mut runtime) = self.runtime.take() {
            runtime.stop_epoch_ticker();
        }
        self.state = BackendState::Uninitialized;
    }
}
