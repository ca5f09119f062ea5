//! Shared plumbing for languages that compile to WebAssembly before running

use tracing::warn;

use crate::config::ModuleConfig;
use crate::modules::error::EngineError;
use crate::modules::interface::{HandlerMode, OperationContext};
use crate::runtime::{BuildRequest, CompiledBackend, SourceCompiler};
use crate::types::{Capability, CapabilitySet, Diagnostic, ExecutionOutput, ModuleInfo};

/// Capabilities that need a working backend
pub const BACKEND_CAPABILITIES: [Capability; 3] =
    [Capability::Execute, Capability::Build, Capability::Run];

/// Full capability set of a compiled-language module
pub fn compiled_capabilities() -> CapabilitySet {
    [
        Capability::Execute,
        Capability::Build,
        Capability::Run,
        Capability::Format,
        Capability::Lint,
        Capability::Minify,
        Capability::Validate,
        Capability::Analyze,
        Capability::Generate,
        Capability::Refactor,
        Capability::Obfuscate,
        Capability::Deobfuscate,
    ]
    .into_iter()
    .collect()
}

/// Native-only mode: everything except the backend operations
pub fn degraded_mode(info: &ModuleInfo, reason: &str) -> HandlerMode {
    let capabilities = info
        .capabilities
        .iter()
        .copied()
        .filter(|c| !BACKEND_CAPABILITIES.contains(c))
        .collect();
    HandlerMode::Degraded {
        capabilities,
        limitations: vec![
            format!("execute/build/run unavailable: {reason}"),
            "text operations use the native in-process implementation".to_string(),
        ],
    }
}

pub fn build_request(source: &str, ctx: &OperationContext<'_>) -> BuildRequest {
    BuildRequest {
        build_tags: ctx.params.build_tags.clone(),
        build_flags: ctx.params.build_flags.clone(),
        target_version: ctx.params.target_version.clone(),
        ..BuildRequest::new(source)
    }
}

/// Owns the optional backend of a compiled-language handler
#[derive(Default)]
pub struct BackendSlot {
    backend: Option<CompiledBackend>,
}

impl BackendSlot {
    pub fn is_ready(&self) -> bool {
        self.backend.is_some()
    }

    pub async fn start(
        &mut self,
        compiler: Box<dyn SourceCompiler>,
        config: &ModuleConfig,
        info: &ModuleInfo,
    ) -> HandlerMode {
        if config.native_only {
            return degraded_mode(info, "native-only mode requested");
        }

        let mut backend = CompiledBackend::new(compiler, config.execution.max_output_bytes);
        match backend.initialize().await {
            Ok(()) => {
                self.backend = Some(backend);
                HandlerMode::Full
            }
            Err(e) => {
                warn!("{} falling back to native processing: {}", info.id, e);
                degraded_mode(info, &e.to_string())
            }
        }
    }

    pub fn stop(&mut self) {
        if let Some(mut backend) = self.backend.take() {
            backend.cleanup();
        }
    }

    pub async fn execute(
        &mut self,
        source: &str,
        ctx: &OperationContext<'_>,
    ) -> Result<ExecutionOutput, EngineError> {
        let backend = self.backend.as_mut().ok_or_else(|| EngineError::NotInitialized {
            module: ctx.module_id.to_string(),
        })?;
        let request = build_request(source, ctx);
        let output = backend
            .build_and_run(&request, ctx.params.entry_point.as_deref(), ctx.options)
            .await?;
        Ok(output)
    }

    /// Compiler diagnostics, or `None` when no backend is running
    pub async fn check(
        &mut self,
        source: &str,
        ctx: &OperationContext<'_>,
    ) -> Result<Option<Vec<Diagnostic>>, EngineError> {
        let Some(backend) = self.backend.as_mut() else {
            return Ok(None);
        };
        let build = backend.build(&build_request(source, ctx)).await?;
        Ok(Some(build.diagnostics))
    }
}
