//! WebAssembly text module: compiled in-process and run under wasmtime

use async_trait::async_trait;

use crate::config::ModuleConfig;
use crate::modules::error::EngineError;
use crate::modules::interface::{HandlerMode, LanguageHandler, OperationContext};
use crate::modules::languages::compiled::{compiled_capabilities, BackendSlot};
use crate::processing::{lexer, lint_source, LintReport};
use crate::runtime::WatCompiler;
use crate::types::{Diagnostic, ExecutionOutput, ModuleInfo};

#[derive(Default)]
pub struct WatHandler {
    slot: BackendSlot,
}

impl WatHandler {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LanguageHandler for WatHandler {
    fn info(&self) -> ModuleInfo {
        ModuleInfo {
            id: "wat".to_string(),
            name: "WebAssembly Text".to_string(),
            version: semver::Version::new(1, 0, 0),
            category: "compiled".to_string(),
            description: "Build WebAssembly text into modules and run them on a minimal WASI host"
                .to_string(),
            languages: vec!["wat".to_string(), "wasm".to_string()],
            capabilities: compiled_capabilities(),
        }
    }

    async fn start(&mut self, config: &ModuleConfig) -> Result<HandlerMode, EngineError> {
        let info = self.info();
        Ok(self.slot.start(Box::new(WatCompiler), config, &info).await)
    }

    async fn stop(&mut self) {
        self.slot.stop();
    }

    async fn execute(
        &mut self,
        source: &str,
        ctx: &OperationContext<'_>,
    ) -> Result<ExecutionOutput, EngineError> {
        self.slot.execute(source, ctx).await
    }

    async fn lint(
        &mut self,
        source: &str,
        ctx: &OperationContext<'_>,
    ) -> Result<LintReport, EngineError> {
        let compile_errors = self.validate(source, ctx).await?;
        Ok(lint_source(source, ctx.syntax, compile_errors))
    }

    async fn validate(
        &mut self,
        source: &str,
        ctx: &OperationContext<'_>,
    ) -> Result<Vec<Diagnostic>, EngineError> {
        match self.slot.check(source, ctx).await? {
            Some(diagnostics) => Ok(diagnostics),
            None => Ok(lexer::structural_errors(&lexer::tokenize(source, ctx.syntax))),
        }
    }
}
