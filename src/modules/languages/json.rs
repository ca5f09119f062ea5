//! JSON and YAML documents, processed natively through serde

use async_trait::async_trait;

use crate::config::ModuleConfig;
use crate::modules::error::EngineError;
use crate::modules::interface::{HandlerMode, LanguageHandler, OperationContext};
use crate::processing::data::{self, DataFormat, DEFAULT_JSON_INDENT};
use crate::processing::lexer::YAML;
use crate::processing::refactor::{normalize_whitespace, strip_comments};
use crate::processing::{lint_source, LintReport};
use crate::types::{AnalysisReport, Capability, Diagnostic, ModuleInfo, RefactorSpec};

#[derive(Debug, Default)]
pub struct DataHandler;

impl DataHandler {
    pub fn new() -> Self {
        Self
    }
}

fn data_format(ctx: &OperationContext<'_>) -> Result<DataFormat, EngineError> {
    DataFormat::from_language(ctx.language).ok_or_else(|| EngineError::UnsupportedLanguage {
        module: ctx.module_id.to_string(),
        language: ctx.language.to_string(),
    })
}

fn serialize(value: &serde_json::Value, format: DataFormat, indent: Option<usize>) -> Result<String, EngineError> {
    match format {
        DataFormat::Json => {
            let mut out = data::to_json_pretty(value, indent.unwrap_or(DEFAULT_JSON_INDENT))?;
            out.push('\n');
            Ok(out)
        }
        DataFormat::Yaml => data::to_yaml(value),
    }
}

#[async_trait]
impl LanguageHandler for DataHandler {
    fn info(&self) -> ModuleInfo {
        ModuleInfo {
            id: "json".to_string(),
            name: "JSON / YAML".to_string(),
            version: semver::Version::new(1, 0, 0),
            category: "data".to_string(),
            description: "Format, validate, analyze and convert JSON and YAML documents"
                .to_string(),
            languages: vec!["json".to_string(), "yaml".to_string()],
            capabilities: [
                Capability::Format,
                Capability::Lint,
                Capability::Transpile,
                Capability::Minify,
                Capability::Validate,
                Capability::Analyze,
                Capability::Generate,
                Capability::Refactor,
            ]
            .into_iter()
            .collect(),
        }
    }

    async fn start(&mut self, _config: &ModuleConfig) -> Result<HandlerMode, EngineError> {
        Ok(HandlerMode::Full)
    }

    fn format(&mut self, source: &str, ctx: &OperationContext<'_>) -> Result<String, EngineError> {
        data::format(source, data_format(ctx)?, ctx.params.indent)
    }

    async fn lint(
        &mut self,
        source: &str,
        ctx: &OperationContext<'_>,
    ) -> Result<LintReport, EngineError> {
        let parse_errors = data::validate(source, data_format(ctx)?);
        Ok(lint_source(source, ctx.syntax, parse_errors))
    }

    fn transpile(
        &mut self,
        source: &str,
        ctx: &OperationContext<'_>,
    ) -> Result<(String, String, String), EngineError> {
        let from_name = ctx.params.from.as_deref().unwrap_or(ctx.language);
        let to_name = ctx.params.to.as_deref().ok_or_else(|| EngineError::Transpile {
            message: "missing target format (params.to)".to_string(),
        })?;

        let resolve = |name: &str| {
            DataFormat::from_language(name).ok_or_else(|| EngineError::Transpile {
                message: format!("unsupported format '{name}' (expected json or yaml)"),
            })
        };
        let from = resolve(from_name)?;
        let to = resolve(to_name)?;

        let code = data::transpile(source, from, to)?;
        Ok((code, from.as_str().to_string(), to.as_str().to_string()))
    }

    fn minify(&mut self, source: &str, ctx: &OperationContext<'_>) -> Result<String, EngineError> {
        data::minify(source, data_format(ctx)?)
    }

    async fn validate(
        &mut self,
        source: &str,
        ctx: &OperationContext<'_>,
    ) -> Result<Vec<Diagnostic>, EngineError> {
        Ok(data::validate(source, data_format(ctx)?))
    }

    fn analyze(
        &mut self,
        source: &str,
        ctx: &OperationContext<'_>,
    ) -> Result<AnalysisReport, EngineError> {
        data::analyze(source, data_format(ctx)?)
    }

    /// Generated documents must parse in the requested format
    fn generate(&mut self, ctx: &OperationContext<'_>) -> Result<(String, String), EngineError> {
        let format = data_format(ctx)?;
        let (code, template) = ctx.generator.generate(
            ctx.language,
            ctx.params.template.as_deref(),
            ctx.params.inline_template.as_deref(),
            &ctx.params.values,
        )?;
        if let Err(failure) = data::parse(&code, format) {
            return Err(EngineError::Generation {
                message: format!(
                    "template '{template}' produced invalid {}: {}",
                    format.as_str(),
                    failure.message
                ),
            });
        }
        Ok((code, template))
    }

    fn refactor(
        &mut self,
        source: &str,
        ctx: &OperationContext<'_>,
    ) -> Result<(String, usize), EngineError> {
        let format = data_format(ctx)?;
        match ctx.params.refactor.as_ref() {
            Some(RefactorSpec::RenameSymbol { from, to }) => {
                let mut value = data::parse(source, format).map_err(|f| EngineError::Refactor {
                    message: format!("invalid {} input: {}", format.as_str(), f.message),
                })?;
                let renamed = data::rename_key(&mut value, from, to);
                if renamed == 0 {
                    return Err(EngineError::Refactor {
                        message: format!("key '{from}' not found"),
                    });
                }
                Ok((serialize(&value, format, ctx.params.indent)?, renamed))
            }
            Some(RefactorSpec::StripComments) => match format {
                DataFormat::Json => Ok((source.to_string(), 0)),
                DataFormat::Yaml => Ok(strip_comments(source, &YAML)),
            },
            Some(RefactorSpec::NormalizeWhitespace) => Ok(normalize_whitespace(source)),
            None => Err(EngineError::Refactor {
                message: "missing refactor spec".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::interface::ProcessingModule;
    use crate::modules::module::CodeModule;
    use crate::types::{ErrorCode, ExecutionRequest, OperationOutput, OperationParams};
    use serde_json::json;

    async fn ready() -> CodeModule<DataHandler> {
        let module = CodeModule::new(DataHandler::new());
        module.initialize(None).await.unwrap();
        module
    }

    fn with_params(request: ExecutionRequest, params: OperationParams) -> ExecutionRequest {
        request.with_params(params)
    }

    #[tokio::test]
    async fn test_format_default_and_custom_indent() {
        let module = ready().await;
        let result = module
            .execute(ExecutionRequest::new("format", "json", r#"{"a":1}"#))
            .await;
        assert_eq!(result.code(), Some("{\n  \"a\": 1\n}\n"));

        let result = module
            .execute(with_params(
                ExecutionRequest::new("format", "json", r#"{"a":1}"#),
                OperationParams {
                    indent: Some(4),
                    ..OperationParams::default()
                },
            ))
            .await;
        assert_eq!(result.code(), Some("{\n    \"a\": 1\n}\n"));
    }

    #[tokio::test]
    async fn test_invalid_json_format_fails() {
        let module = ready().await;
        let result = module
            .execute(ExecutionRequest::new("format", "json", "{\"a\": }"))
            .await;
        assert!(!result.success);
        assert_eq!(result.error_code(), Some(ErrorCode::FormatError));
    }

    #[tokio::test]
    async fn test_transpile_yaml_to_json() {
        let module = ready().await;
        let result = module
            .execute(with_params(
                ExecutionRequest::new("transpile", "yaml", "name: demo\ncount: 2\n"),
                OperationParams {
                    to: Some("json".to_string()),
                    ..OperationParams::default()
                },
            ))
            .await;
        match result.data {
            Some(OperationOutput::Transpiled { code, from, to }) => {
                assert_eq!(from, "yaml");
                assert_eq!(to, "json");
                let value: serde_json::Value = serde_json::from_str(&code).unwrap();
                assert_eq!(value, json!({"name": "demo", "count": 2}));
            }
            other => panic!("unexpected payload {other:?}"),
        }

        let missing_target = module
            .execute(ExecutionRequest::new("transpile", "json", "{}"))
            .await;
        assert_eq!(missing_target.error_code(), Some(ErrorCode::TranspileError));
    }

    #[tokio::test]
    async fn test_rename_key_refactor() {
        let module = ready().await;
        let result = module
            .execute(with_params(
                ExecutionRequest::new("refactor", "json", r#"{"old":1,"nested":{"old":2}}"#),
                OperationParams {
                    refactor: Some(RefactorSpec::RenameSymbol {
                        from: "old".to_string(),
                        to: "new".to_string(),
                    }),
                    ..OperationParams::default()
                },
            ))
            .await;
        match result.data {
            Some(OperationOutput::Refactored { code, changes }) => {
                assert_eq!(changes, 2);
                let value: serde_json::Value = serde_json::from_str(&code).unwrap();
                assert_eq!(value, json!({"new": 1, "nested": {"new": 2}}));
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_generate_object_and_reject_broken_template() {
        let module = ready().await;
        let mut params = OperationParams::default();
        params.values.insert("fields".to_string(), json!({"enabled": true}));
        let result = module
            .execute(with_params(ExecutionRequest::new("generate", "json", ""), params))
            .await;
        let code = result.code().unwrap();
        assert_eq!(serde_json::from_str::<serde_json::Value>(code).unwrap(), json!({"enabled": true}));

        let broken = module
            .execute(with_params(
                ExecutionRequest::new("generate", "json", ""),
                OperationParams {
                    inline_template: Some("{ not json".to_string()),
                    ..OperationParams::default()
                },
            ))
            .await;
        assert_eq!(broken.error_code(), Some(ErrorCode::GenerationError));
    }

    #[tokio::test]
    async fn test_execute_is_unsupported() {
        let module = ready().await;
        let result = module
            .execute(ExecutionRequest::new("execute", "json", "{}"))
            .await;
        assert_eq!(result.error_code(), Some(ErrorCode::UnsupportedOperation));
    }
}
