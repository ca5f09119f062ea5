//! Module interface traits and types

use async_trait::async_trait;

use crate::config::ModuleConfig;
use crate::modules::error::EngineError;
use crate::processing::{
    analyze_source, deobfuscate_source, format_source, lexer, lint_source, minify_source,
    obfuscate_source, refactor_source, CodeGenerator, FormatStyle, LintReport, Syntax,
};
use crate::types::{
    AnalysisReport, CapabilitySet, Diagnostic, ExecutionOptions, ExecutionOutput,
    ExecutionRequest, ModuleHealth, ModuleInfo, ModuleMetadata, ModuleResult, OperationParams,
};

/// Uniform contract every language module exposes to the loader and callers
#[async_trait]
pub trait ProcessingModule: Send + Sync {
    fn id(&self) -> &str;

    /// Start the backend. Calling it again on an initialized module is a no-op.
    async fn initialize(&self, config: Option<ModuleConfig>) -> Result<(), EngineError>;

    fn is_initialized(&self) -> bool;

    /// Whether the host can support this module at all
    fn is_compatible(&self) -> bool;

    /// Run one request. Failures are reported inside the result, never raised.
    async fn execute(&self, request: ExecutionRequest) -> ModuleResult;

    fn metadata(&self) -> ModuleMetadata;

    fn health(&self) -> ModuleHealth;

    async fn dispose(&self);
}

/// How a handler came up after `start`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerMode {
    Full,
    /// Backend unavailable; only `capabilities` are served
    Degraded {
        capabilities: CapabilitySet,
        limitations: Vec<String>,
    },
}

/// Everything an operation needs besides the source text
pub struct OperationContext<'a> {
    pub module_id: &'a str,
    /// Requested language, as submitted
    pub language: &'a str,
    pub syntax: &'static Syntax,
    pub params: &'a OperationParams,
    pub options: &'a ExecutionOptions,
    pub generator: &'a CodeGenerator,
}

impl OperationContext<'_> {
    pub fn unsupported(&self, operation: &str) -> EngineError {
        EngineError::unsupported_operation(self.module_id, operation)
    }
}

/// Language-specific behaviour behind a [`ProcessingModule`].
///
/// Text operations default to the shared native implementations keyed by the
/// request's lexical profile. Handlers override what their language does
/// differently; `execute`, `transpile` and `validate` have no generic form.
#[async_trait]
pub trait LanguageHandler: Send + 'static {
    fn info(&self) -> ModuleInfo;

    fn is_compatible(&self) -> bool {
        true
    }

    async fn start(&mut self, config: &ModuleConfig) -> Result<HandlerMode, EngineError>;

    async fn stop(&mut self) {}

    async fn execute(
        &mut self,
        _source: &str,
        ctx: &OperationContext<'_>,
    ) -> Result<ExecutionOutput, EngineError> {
        Err(ctx.unsupported("execute"))
    }

    fn format(&mut self, source: &str, ctx: &OperationContext<'_>) -> Result<String, EngineError> {
        let style = FormatStyle::for_syntax(ctx.syntax, ctx.params.indent);
        format_source(source, ctx.syntax, &style)
    }

    async fn lint(
        &mut self,
        source: &str,
        ctx: &OperationContext<'_>,
    ) -> Result<LintReport, EngineError> {
        Ok(lint_source(source, ctx.syntax, Vec::new()))
    }

    fn transpile(
        &mut self,
        _source: &str,
        ctx: &OperationContext<'_>,
    ) -> Result<(String, String, String), EngineError> {
        Err(ctx.unsupported("transpile"))
    }

    fn minify(&mut self, source: &str, ctx: &OperationContext<'_>) -> Result<String, EngineError> {
        minify_source(source, ctx.syntax)
    }

    /// Syntax diagnostics; an empty list means the source is valid
    async fn validate(
        &mut self,
        source: &str,
        ctx: &OperationContext<'_>,
    ) -> Result<Vec<Diagnostic>, EngineError> {
        let tokens = lexer::tokenize(source, ctx.syntax);
        Ok(lexer::structural_errors(&tokens))
    }

    fn analyze(
        &mut self,
        source: &str,
        ctx: &OperationContext<'_>,
    ) -> Result<AnalysisReport, EngineError> {
        Ok(analyze_source(source, ctx.syntax))
    }

    /// Returns the generated code and the template name used
    fn generate(&mut self, ctx: &OperationContext<'_>) -> Result<(String, String), EngineError> {
        ctx.generator.generate(
            ctx.language,
            ctx.params.template.as_deref(),
            ctx.params.inline_template.as_deref(),
            &ctx.params.values,
        )
    }

    fn refactor(
        &mut self,
        source: &str,
        ctx: &OperationContext<'_>,
    ) -> Result<(String, usize), EngineError> {
        refactor_source(source, ctx.syntax, ctx.params.refactor.as_ref())
    }

    fn obfuscate(
        &mut self,
        source: &str,
        ctx: &OperationContext<'_>,
    ) -> Result<(String, usize), EngineError> {
        obfuscate_source(source, ctx.syntax)
    }

    fn deobfuscate(
        &mut self,
        source: &str,
        ctx: &OperationContext<'_>,
    ) -> Result<(String, usize), EngineError> {
        deobfuscate_source(source, ctx.syntax)
    }
}
