//! Generic processing module: validation, dispatch and bookkeeping around a
//! [`LanguageHandler`]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ModuleConfig;
use crate::modules::error::EngineError;
use crate::modules::interface::{HandlerMode, LanguageHandler, OperationContext, ProcessingModule};
use crate::modules::monitor::HealthMonitor;
use crate::modules::validator::{SecurityValidator, ValidationScope};
use crate::processing::{lexer, CodeGenerator};
use crate::types::{
    CapabilitySet, ExecutionRequest, HealthStatus, ModuleHealth, ModuleInfo, ModuleLimits,
    ModuleMetadata, ModuleResult, Operation, OperationOutput, ResultMetadata, Severity,
};

#[derive(Debug, Clone)]
struct Lifecycle {
    initialized: bool,
    capabilities: CapabilitySet,
    limitations: Vec<String>,
    loaded_at: Option<DateTime<Utc>>,
    limits: ModuleLimits,
}

pub struct CodeModule<H: LanguageHandler> {
    info: ModuleInfo,
    handler: Arc<tokio::sync::Mutex<H>>,
    lifecycle: RwLock<Lifecycle>,
    validator: RwLock<SecurityValidator>,
    monitor: Mutex<HealthMonitor>,
    generator: Arc<CodeGenerator>,
    starts: AtomicU64,
    executions: AtomicU64,
}

impl<H: LanguageHandler> CodeModule<H> {
    pub fn new(handler: H) -> Self {
        let info = handler.info();
        let config = ModuleConfig::default();
        Self {
            lifecycle: RwLock::new(Lifecycle {
                initialized: false,
                capabilities: info.capabilities.clone(),
                limitations: Vec::new(),
                loaded_at: None,
                limits: config.limits(),
            }),
            info,
            handler: Arc::new(tokio::sync::Mutex::new(handler)),
            validator: RwLock::new(SecurityValidator::new(&config.security)),
            monitor: Mutex::new(HealthMonitor::new(config.health)),
            generator: Arc::new(CodeGenerator::new()),
            starts: AtomicU64::new(0),
            executions: AtomicU64::new(0),
        }
    }

    /// Number of times the handler backend has been started
    pub fn start_count(&self) -> u64 {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn info(&self) -> &ModuleInfo {
        &self.info
    }

    async fn dispatch(
        &self,
        request: &ExecutionRequest,
    ) -> Result<(OperationOutput, Option<u64>), EngineError> {
        let (capabilities, degraded) = {
            let lifecycle = self.lifecycle.read();
            if !lifecycle.initialized {
                return Err(EngineError::NotInitialized {
                    module: self.info.id.clone(),
                });
            }
            (lifecycle.capabilities.clone(), !lifecycle.limitations.is_empty())
        };

        // Code headed for a runtime is screened before any routing decision
        if request.operation.runs_code() {
            self.validator
                .read()
                .validate(require_source(request)?, &request.options, ValidationScope::Full)?;
        }

        let Some(capability) = request.operation.capability() else {
            return Err(EngineError::unsupported_operation(
                &self.info.id,
                request.operation.as_str(),
            ));
        };

        if !self.info.supports_language(&request.language) {
            return Err(EngineError::UnsupportedLanguage {
                module: self.info.id.clone(),
                language: request.language.clone(),
            });
        }

        if !capabilities.contains(&capability) {
            return Err(EngineError::UnsupportedOperation {
                module: self.info.id.clone(),
                operation: request.operation.to_string(),
                degraded: degraded && self.info.capabilities.contains(&capability),
            });
        }

        let source = require_source(request)?;
        if !request.operation.runs_code() {
            self.validator
                .read()
                .validate(source, &request.options, ValidationScope::Structural)?;
        }

        match tokio::time::timeout(request.options.timeout_duration(), self.run(request)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(
                    "{} {} exceeded {}ms, abandoning it",
                    self.info.id, request.operation, request.options.timeout
                );
                Err(EngineError::ExecutionTimeout {
                    timeout_ms: request.options.timeout,
                })
            }
        }
    }

    /// Execute runs on the async runtime, where backends enforce their own
    /// deadlines. Text operations run on the blocking pool so an expired
    /// timeout can abandon them.
    async fn run(
        &self,
        request: &ExecutionRequest,
    ) -> Result<(OperationOutput, Option<u64>), EngineError> {
        if request.operation == Operation::Execute {
            let ctx = OperationContext {
                module_id: &self.info.id,
                language: &request.language,
                syntax: lexer::syntax_for(&request.language),
                params: &request.params,
                options: &request.options,
                generator: &self.generator,
            };
            let mut handler = self.handler.lock().await;
            let output = handler.execute(require_source(request)?, &ctx).await?;
            let memory = output.memory_usage;
            return Ok((OperationOutput::Execution(output), memory));
        }

        let mut handler = self.handler.clone().lock_owned().await;
        let request = request.clone();
        let module_id = self.info.id.clone();
        let generator = self.generator.clone();
        let runtime = Handle::current();

        let output = tokio::task::spawn_blocking(move || {
            let ctx = OperationContext {
                module_id: &module_id,
                language: &request.language,
                syntax: lexer::syntax_for(&request.language),
                params: &request.params,
                options: &request.options,
                generator: &generator,
            };
            let source = request.source().unwrap_or_default();
            run_text_operation(&mut *handler, &runtime, &request.operation, source, &ctx)
        })
        .await
        .map_err(|e| EngineError::Run {
            message: format!("operation task failed: {e}"),
        })??;
        Ok((output, None))
    }
}

fn require_source(request: &ExecutionRequest) -> Result<&str, EngineError> {
    request
        .source()
        .ok_or_else(|| EngineError::validation("code must be a string"))
}

/// Runs on a blocking thread; async handler methods are driven through `runtime`
fn run_text_operation<H: LanguageHandler>(
    handler: &mut H,
    runtime: &Handle,
    operation: &Operation,
    source: &str,
    ctx: &OperationContext<'_>,
) -> Result<OperationOutput, EngineError> {
    let output = match operation {
        Operation::Format => OperationOutput::Formatted {
            code: handler.format(source, ctx)?,
        },
        Operation::Lint => {
            let report = runtime.block_on(handler.lint(source, ctx))?;
            OperationOutput::Lint {
                issues: report.issues,
                error_count: report.error_count,
                warning_count: report.warning_count,
            }
        }
        Operation::Transpile => {
            let (code, from, to) = handler.transpile(source, ctx)?;
            OperationOutput::Transpiled { code, from, to }
        }
        Operation::Minify => {
            let code = handler.minify(source, ctx)?;
            OperationOutput::Minified {
                original_size: source.len(),
                minified_size: code.len(),
                code,
            }
        }
        Operation::Validate => {
            let errors = runtime.block_on(handler.validate(source, ctx))?;
            OperationOutput::Validation {
                valid: !errors.iter().any(|d| d.severity == Severity::Error),
                errors,
            }
        }
        Operation::Analyze => OperationOutput::Analysis(handler.analyze(source, ctx)?),
        Operation::Generate => {
            let (code, template) = handler.generate(ctx)?;
            OperationOutput::Generated { code, template }
        }
        Operation::Refactor => {
            let (code, changes) = handler.refactor(source, ctx)?;
            OperationOutput::Refactored { code, changes }
        }
        Operation::Obfuscate => {
            let (code, renamed) = handler.obfuscate(source, ctx)?;
            OperationOutput::Obfuscated { code, renamed }
        }
        Operation::Deobfuscate => {
            let (code, renamed) = handler.deobfuscate(source, ctx)?;
            OperationOutput::Deobfuscated { code, renamed }
        }
        Operation::Execute | Operation::Other(_) => {
            return Err(ctx.unsupported(operation.as_str()))
        }
    };
    Ok(output)
}

#[async_trait]
impl<H: LanguageHandler> ProcessingModule for CodeModule<H> {
    fn id(&self) -> &str {
        &self.info.id
    }

    async fn initialize(&self, config: Option<ModuleConfig>) -> Result<(), EngineError> {
        if self.is_initialized() {
            return Ok(());
        }

        // Holding the handler lock serializes concurrent initializers
        let mut handler = self.handler.lock().await;
        if self.is_initialized() {
            return Ok(());
        }

        let config = config.unwrap_or_default();
        self.starts.fetch_add(1, Ordering::SeqCst);
        info!("Initializing module {}", self.info.id);

        let mode = match handler.start(&config).await {
            Ok(mode) => mode,
            Err(e) => {
                warn!("Module {} failed to initialize: {}", self.info.id, e);
                self.monitor.lock().mark_failed();
                return Err(e);
            }
        };

        let (capabilities, limitations) = match mode {
            HandlerMode::Full => (self.info.capabilities.clone(), Vec::new()),
            HandlerMode::Degraded {
                capabilities,
                limitations,
            } => {
                warn!(
                    "Module {} running in degraded mode: {}",
                    self.info.id,
                    limitations.join("; ")
                );
                (capabilities, limitations)
            }
        };

        *self.validator.write() = SecurityValidator::new(&config.security);
        {
            let mut monitor = self.monitor.lock();
            monitor.set_config(config.health.clone());
            monitor.mark_initialized();
        }
        *self.lifecycle.write() = Lifecycle {
            initialized: true,
            capabilities,
            limitations,
            loaded_at: Some(Utc::now()),
            limits: config.limits(),
        };
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.lifecycle.read().initialized
    }

    fn is_compatible(&self) -> bool {
        match self.handler.try_lock() {
            Ok(handler) => handler.is_compatible(),
            // Busy handlers were started, so they are compatible
            Err(_) => true,
        }
    }

    async fn execute(&self, request: ExecutionRequest) -> ModuleResult {
        let started = Instant::now();
        let execution_id = Uuid::new_v4().to_string();

        let outcome = self.dispatch(&request).await;
        let elapsed = started.elapsed();

        self.executions.fetch_add(1, Ordering::Relaxed);
        self.monitor.lock().record(elapsed, outcome.is_ok());

        let mut metadata = ResultMetadata {
            execution_id,
            module_id: self.info.id.clone(),
            operation: request.operation.to_string(),
            execution_time_ms: elapsed.as_millis() as u64,
            ..ResultMetadata::default()
        };

        match outcome {
            Ok((output, memory_usage)) => {
                debug!(
                    "{} {} completed in {}ms",
                    self.info.id, request.operation, metadata.execution_time_ms
                );
                metadata.memory_usage = memory_usage;
                metadata.output_size = output.output_size();
                metadata.processed_items = output.processed_items();
                ModuleResult::ok(output, metadata)
            }
            Err(e) => {
                debug!("{} {} failed: {}", self.info.id, request.operation, e);
                ModuleResult::failure(e.into(), metadata)
            }
        }
    }

    fn metadata(&self) -> ModuleMetadata {
        let lifecycle = self.lifecycle.read();
        let mut metadata = ModuleMetadata::from_info(&self.info, lifecycle.limits.clone());
        metadata.capabilities = lifecycle.capabilities.clone();
        metadata.limitations = lifecycle.limitations.clone();
        metadata.loaded_at = lifecycle.loaded_at;
        metadata.execution_count = self.executions.load(Ordering::Relaxed);
        metadata
    }

    fn health(&self) -> ModuleHealth {
        let mut health = self.monitor.lock().snapshot();
        let lifecycle = self.lifecycle.read();
        if health.status == HealthStatus::Healthy && !lifecycle.limitations.is_empty() {
            health.status = HealthStatus::Degraded;
        }
        health
    }

    async fn dispose(&self) {
        let mut handler = self.handler.lock().await;
        if !self.is_initialized() {
            return;
        }
        handler.stop().await;
        self.monitor.lock().mark_disposed();
        let mut lifecycle = self.lifecycle.write();
        lifecycle.initialized = false;
        lifecycle.capabilities = self.info.capabilities.clone();
        lifecycle.limitations.clear();
        info!("Disposed module {}", self.info.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Capability, ErrorCode, ExecutionOutput, OperationParams};
    use crate::processing::{format_source, FormatStyle};
    use crate::types::ExecutionOptions;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct EchoHandler {
        starts: Arc<AtomicUsize>,
        degrade: bool,
        format_delay: Duration,
    }

    #[async_trait]
    impl LanguageHandler for EchoHandler {
        fn info(&self) -> ModuleInfo {
            ModuleInfo {
                id: "echo".to_string(),
                name: "Echo".to_string(),
                version: semver::Version::new(0, 1, 0),
                category: "testing".to_string(),
                description: "Echoes its input".to_string(),
                languages: vec!["rhai".to_string()],
                capabilities: [Capability::Execute, Capability::Format, Capability::Minify]
                    .into_iter()
                    .collect(),
            }
        }

        async fn start(&mut self, _config: &ModuleConfig) -> Result<HandlerMode, EngineError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            if self.degrade {
                return Ok(HandlerMode::Degraded {
                    capabilities: [Capability::Format].into_iter().collect(),
                    limitations: vec!["no runtime".to_string()],
                });
            }
            Ok(HandlerMode::Full)
        }

        async fn execute(
            &mut self,
            source: &str,
            _ctx: &OperationContext<'_>,
        ) -> Result<ExecutionOutput, EngineError> {
            Ok(ExecutionOutput {
                output: Some(serde_json::json!(source)),
                stdout: String::new(),
                stderr: String::new(),
                exit_code: 0,
                error: None,
                execution_time_ms: 0,
                build_diagnostics: Vec::new(),
                memory_usage: Some(1024),
            })
        }

        fn format(&mut self, source: &str, ctx: &OperationContext<'_>) -> Result<String, EngineError> {
            if !self.format_delay.is_zero() {
                std::thread::sleep(self.format_delay);
                return Ok(source.to_string());
            }
            let style = FormatStyle::for_syntax(ctx.syntax, ctx.params.indent);
            format_source(source, ctx.syntax, &style)
        }
    }

    fn module(degrade: bool) -> (CodeModule<EchoHandler>, Arc<AtomicUsize>) {
        module_with_delay(degrade, Duration::ZERO)
    }

    fn module_with_delay(
        degrade: bool,
        format_delay: Duration,
    ) -> (CodeModule<EchoHandler>, Arc<AtomicUsize>) {
        let starts = Arc::new(AtomicUsize::new(0));
        let handler = EchoHandler {
            starts: starts.clone(),
            degrade,
            format_delay,
        };
        (CodeModule::new(handler), starts)
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let (module, starts) = module(false);
        module.initialize(None).await.unwrap();
        module.initialize(None).await.unwrap();
        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert_eq!(module.start_count(), 1);
        assert!(module.metadata().loaded_at.is_some());
    }

    #[tokio::test]
    async fn test_dispatch_order() {
        let (module, _) = module(false);
        let request = ExecutionRequest::new("execute", "rhai", "40 + 2");

        let result = module.execute(request.clone()).await;
        assert_eq!(result.error_code(), Some(ErrorCode::ModuleNotInitialized));

        module.initialize(None).await.unwrap();
        let result = module.execute(request).await;
        assert!(result.success);
        assert_eq!(result.metadata.memory_usage, Some(1024));
        assert_eq!(result.metadata.module_id, "echo");

        let unknown = module
            .execute(ExecutionRequest::new("teleport", "rhai", ""))
            .await;
        assert_eq!(unknown.error_code(), Some(ErrorCode::UnsupportedOperation));

        let wrong_language = module
            .execute(ExecutionRequest::new("execute", "cobol", ""))
            .await;
        assert_eq!(wrong_language.error_code(), Some(ErrorCode::UnsupportedLanguage));

        let missing_capability = module.execute(ExecutionRequest::new("lint", "rhai", "")).await;
        assert_eq!(
            missing_capability.error_code(),
            Some(ErrorCode::UnsupportedOperation)
        );

        let mut non_string = ExecutionRequest::new("format", "rhai", "");
        non_string.code = serde_json::json!(42);
        let result = module.execute(non_string).await;
        assert_eq!(result.error_code(), Some(ErrorCode::ValidationError));

        assert_eq!(module.metadata().execution_count, 6);
        assert_eq!(module.health().total_executions, 6);
    }

    #[tokio::test]
    async fn test_security_gate_applies_to_execution_only() {
        let (module, _) = module(false);
        module.initialize(None).await.unwrap();

        let source = "let f = eval(\"1\");";
        let result = module
            .execute(ExecutionRequest::new("execute", "rhai", source))
            .await;
        assert_eq!(result.error_code(), Some(ErrorCode::SecurityViolation));

        let result = module
            .execute(ExecutionRequest::new("minify", "rhai", source))
            .await;
        assert!(result.success);
    }

    #[tokio::test]
    async fn test_execution_is_screened_before_language_routing() {
        let (module, _) = module(false);
        module.initialize(None).await.unwrap();

        for language in ["javascript", ""] {
            let result = module
                .execute(ExecutionRequest::new("execute", language, "eval(\"2+2\")"))
                .await;
            assert_eq!(
                result.error_code(),
                Some(ErrorCode::SecurityViolation),
                "{language:?}"
            );
        }

        let clean = module
            .execute(ExecutionRequest::new("execute", "javascript", "1 + 1"))
            .await;
        assert_eq!(clean.error_code(), Some(ErrorCode::UnsupportedLanguage));
    }

    #[tokio::test]
    async fn test_slow_text_operation_times_out() {
        let (module, _) = module_with_delay(false, Duration::from_millis(400));
        module.initialize(None).await.unwrap();

        let request = ExecutionRequest::new("format", "rhai", "let x = 1;")
            .with_options(ExecutionOptions::default().with_timeout(50));
        let started = Instant::now();
        let result = module.execute(request).await;
        let elapsed = started.elapsed();

        assert_eq!(result.error_code(), Some(ErrorCode::ExecutionTimeout));
        assert!(result.error.unwrap().recoverable);
        assert!(elapsed < Duration::from_millis(300), "took {elapsed:?}");

        // The abandoned call releases the handler once it finishes
        let followup = module
            .execute(ExecutionRequest::new("format", "rhai", "let y = 2;"))
            .await;
        assert_eq!(followup.code(), Some("let y = 2;"));
        assert_eq!(module.health().failed_executions, 1);
    }

    #[tokio::test]
    async fn test_degraded_mode_limits_capabilities() {
        let (module, _) = module(true);
        module.initialize(None).await.unwrap();

        let metadata = module.metadata();
        assert!(metadata.is_degraded());
        assert!(!metadata.capabilities.contains(&Capability::Execute));
        assert_eq!(module.health().status, HealthStatus::Degraded);

        let result = module
            .execute(ExecutionRequest::new("execute", "rhai", "1"))
            .await;
        let error = result.error.unwrap();
        assert_eq!(error.code, ErrorCode::UnsupportedOperation);
        assert!(error.suggestions[0].contains("degraded"));

        let formatted = module
            .execute(
                ExecutionRequest::new("format", "rhai", "fn f() {\n1\n}")
                    .with_params(OperationParams {
                        indent: Some(2),
                        ..OperationParams::default()
                    }),
            )
            .await;
        assert_eq!(formatted.code(), Some("fn f() {\n  1\n}\n"));
    }

    #[tokio::test]
    async fn test_dispose_ends_lifecycle() {
        let (module, _) = module(false);
        module.initialize(None).await.unwrap();
        module.dispose().await;

        assert!(!module.is_initialized());
        assert_eq!(module.health().status, HealthStatus::Unhealthy);
        let result = module
            .execute(ExecutionRequest::new("execute", "rhai", "1"))
            .await;
        assert_eq!(result.error_code(), Some(ErrorCode::ModuleNotInitialized));
    }
}
