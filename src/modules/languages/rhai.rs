//! Rhai scripting module backed by the in-process sandboxed executor

use async_trait::async_trait;

use crate::config::ModuleConfig;
use crate::modules::error::EngineError;
use crate::modules::interface::{HandlerMode, LanguageHandler, OperationContext};
use crate::processing::{lint_source, LintReport};
use crate::runtime::SandboxedExecutor;
use crate::types::{Capability, Diagnostic, ExecutionOutput, ModuleInfo};

#[derive(Debug, Default)]
pub struct RhaiHandler {
    executor: Option<SandboxedExecutor>,
}

impl RhaiHandler {
    pub fn new() -> Self {
        Self::default()
    }

    fn executor(&self, module: &str) -> Result<&SandboxedExecutor, EngineError> {
        self.executor.as_ref().ok_or_else(|| EngineError::NotInitialized {
            module: module.to_string(),
        })
    }
}

#[async_trait]
impl LanguageHandler for RhaiHandler {
    fn info(&self) -> ModuleInfo {
        ModuleInfo {
            id: "rhai".to_string(),
            name: "Rhai Script".to_string(),
            version: semver::Version::new(1, 0, 0),
            category: "scripting".to_string(),
            description: "Run and transform Rhai scripts in an in-process sandbox".to_string(),
            languages: vec!["rhai".to_string()],
            capabilities: [
                Capability::Execute,
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
            .collect(),
        }
    }

    async fn start(&mut self, config: &ModuleConfig) -> Result<HandlerMode, EngineError> {
        self.executor = Some(SandboxedExecutor::new(&config.execution));
        Ok(HandlerMode::Full)
    }

    async fn stop(&mut self) {
        self.executor = None;
    }

    async fn execute(
        &mut self,
        source: &str,
        ctx: &OperationContext<'_>,
    ) -> Result<ExecutionOutput, EngineError> {
        let executor = self.executor(ctx.module_id)?;
        Ok(executor.execute(source, ctx.options).await?)
    }

    async fn lint(
        &mut self,
        source: &str,
        ctx: &OperationContext<'_>,
    ) -> Result<LintReport, EngineError> {
        let syntax_errors = self.executor(ctx.module_id)?.check_syntax(source);
        Ok(lint_source(source, ctx.syntax, syntax_errors))
    }

    async fn validate(
        &mut self,
        source: &str,
        ctx: &OperationContext<'_>,
    ) -> Result<Vec<Diagnostic>, EngineError> {
        Ok(self.executor(ctx.module_id)?.check_syntax(source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::interface::ProcessingModule;
    use crate::modules::module::CodeModule;
    use crate::types::{ErrorCode, ExecutionOptions, ExecutionRequest, OperationOutput};

    async fn ready() -> CodeModule<RhaiHandler> {
        let module = CodeModule::new(RhaiHandler::new());
        module.initialize(None).await.unwrap();
        module
    }

    #[tokio::test]
    async fn test_execute_returns_value_and_stdout() {
        let module = ready().await;
        let result = module
            .execute(ExecutionRequest::new(
                "execute",
                "rhai",
                "print(\"hi\"); 6 * 7",
            ))
            .await;
        let output = result.execution().unwrap();
        assert_eq!(output.output, Some(serde_json::json!(42)));
        assert_eq!(output.stdout, "hi\n");
        assert_eq!(output.exit_code, 0);
    }

    #[tokio::test]
    async fn test_timeout_is_reported() {
        let module = ready().await;
        let request = ExecutionRequest::new("execute", "rhai", "loop { }")
            .with_options(ExecutionOptions::default().with_timeout(50));
        let result = module.execute(request).await;
        assert!(!result.success);
        assert_eq!(result.error_code(), Some(ErrorCode::ExecutionTimeout));
    }

    #[tokio::test]
    async fn test_validate_and_lint_report_syntax_errors() {
        let module = ready().await;
        let result = module
            .execute(ExecutionRequest::new("validate", "rhai", "let x = ;"))
            .await;
        match result.data {
            Some(OperationOutput::Validation { valid, errors }) => {
                assert!(!valid);
                assert!(errors[0].line.is_some());
            }
            other => panic!("unexpected payload {other:?}"),
        }

        let lint = module
            .execute(ExecutionRequest::new("lint", "rhai", "let x = ;"))
            .await;
        match lint.data {
            Some(OperationOutput::Lint { error_count, .. }) => assert!(error_count >= 1),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_transpile_is_not_offered() {
        let module = ready().await;
        let result = module
            .execute(ExecutionRequest::new("transpile", "rhai", "1"))
            .await;
        assert_eq!(result.error_code(), Some(ErrorCode::UnsupportedOperation));
    }
}
