//! Go module: TinyGo builds WASI modules; falls back to native text
//! processing when the toolchain is missing

use async_trait::async_trait;

use crate::config::ModuleConfig;
use crate::modules::error::EngineError;
use crate::modules::interface::{HandlerMode, LanguageHandler, OperationContext};
use crate::modules::languages::compiled::{compiled_capabilities, BackendSlot};
use crate::processing::lexer::{self, TokenKind};
use crate::processing::{lint_source, LintReport};
use crate::runtime::TinyGoCompiler;
use crate::types::{Diagnostic, ExecutionOutput, ModuleInfo};

#[derive(Default)]
pub struct GoHandler {
    slot: BackendSlot,
}

impl GoHandler {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Checks that need no compiler: balanced brackets and a package clause
fn native_diagnostics(source: &str, ctx: &OperationContext<'_>) -> Vec<Diagnostic> {
    let tokens = lexer::tokenize(source, ctx.syntax);
    let mut diagnostics = lexer::structural_errors(&tokens);

    let first = tokens.iter().find(|t| !t.is_trivia());
    let has_package = first.is_some_and(|t| t.kind == TokenKind::Identifier && t.text == "package");
    if !has_package {
        diagnostics.insert(
            0,
            Diagnostic::error("expected 'package' clause at start of file")
                .at(first.map(|t| t.line).or(Some(1)), first.map(|t| t.column).or(Some(1)))
                .with_rule("syntax"),
        );
    }
    diagnostics
}

#[async_trait]
impl LanguageHandler for GoHandler {
    fn info(&self) -> ModuleInfo {
        ModuleInfo {
            id: "go".to_string(),
            name: "Go".to_string(),
            version: semver::Version::new(1, 0, 0),
            category: "compiled".to_string(),
            description: "Build Go with TinyGo to WASI and run it under wasmtime".to_string(),
            languages: vec!["go".to_string()],
            capabilities: compiled_capabilities(),
        }
    }

    async fn start(&mut self, config: &ModuleConfig) -> Result<HandlerMode, EngineError> {
        let info = self.info();
        let compiler = TinyGoCompiler::new(&config.toolchain);
        Ok(self.slot.start(Box::new(compiler), config, &info).await)
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
        let extra = if self.slot.is_ready() {
            self.validate(source, ctx).await?
        } else {
            // Structural errors are added by the linter itself
            native_diagnostics(source, ctx)
                .into_iter()
                .filter(|d| d.rule.as_deref() == Some("syntax"))
                .collect()
        };
        Ok(lint_source(source, ctx.syntax, extra))
    }

    async fn validate(
        &mut self,
        source: &str,
        ctx: &OperationContext<'_>,
    ) -> Result<Vec<Diagnostic>, EngineError> {
        let native = native_diagnostics(source, ctx);
        if !native.is_empty() {
            return Ok(native);
        }
        Ok(self.slot.check(source, ctx).await?.unwrap_or_default())
    }
}
