//! End-to-end behaviour of the built-in modules through the loader

use std::sync::Arc;
use std::time::{Duration, Instant};

use polyglot_sandbox::config::{EngineConfig, ExecutionDefaults, ModuleConfig, SecurityConfig};
use polyglot_sandbox::modules::languages::{RhaiHandler, WatHandler};
use polyglot_sandbox::modules::{CodeModule, ModuleLoader, ModuleRegistry, ProcessingModule};
use polyglot_sandbox::runtime::{BackendError, BuildRequest, CompiledBackend, WatCompiler};
use polyglot_sandbox::types::{
    ErrorCode, ExecutionOptions, ExecutionRequest, HealthStatus, OperationOutput, OperationParams,
};
use serde_json::json;

fn small_limit_loader(max_source_size: usize) -> ModuleLoader {
    let config = EngineConfig {
        security: SecurityConfig {
            max_source_size,
            ..SecurityConfig::default()
        },
        ..EngineConfig::default()
    };
    ModuleLoader::new(ModuleRegistry::with_builtin_modules(), config)
}

#[tokio::test]
async fn test_scripting_execute_returns_value() {
    let loader = ModuleLoader::with_builtin_modules();
    let result = loader
        .execute(ExecutionRequest::new("execute", "rhai", "1+1"))
        .await;

    assert!(result.success, "{:?}", result.error);
    let output = result.execution().unwrap();
    assert_eq!(output.output, Some(json!(2)));
    assert_eq!(output.exit_code, 0);
    assert_eq!(result.metadata.module_id, "rhai");
    assert_eq!(result.metadata.operation, "execute");
}

#[tokio::test]
async fn test_dynamic_evaluation_is_rejected() {
    let loader = ModuleLoader::with_builtin_modules();
    let result = loader
        .execute(ExecutionRequest::new("execute", "rhai", r#"eval("2+2")"#))
        .await;

    assert!(!result.success);
    let error = result.error.unwrap();
    assert_eq!(error.code, ErrorCode::SecurityViolation);
    assert!(!error.suggestions.is_empty());
}

#[tokio::test]
async fn test_dynamic_evaluation_is_rejected_before_language_routing() {
    let loader = ModuleLoader::with_builtin_modules();

    let request: ExecutionRequest = serde_json::from_value(json!({
        "operation": "execute",
        "code": "eval(\"2+2\")"
    }))
    .unwrap();
    let result = loader.execute(request).await;
    assert_eq!(result.error_code(), Some(ErrorCode::SecurityViolation));

    let result = loader
        .execute(ExecutionRequest::new("execute", "javascript", r#"eval("2+2")"#))
        .await;
    assert_eq!(result.error_code(), Some(ErrorCode::SecurityViolation));
    assert!(loader.loaded_tools().is_empty());

    let unknown = loader
        .execute(ExecutionRequest::new("execute", "javascript", "2 + 2"))
        .await;
    assert_eq!(unknown.error_code(), Some(ErrorCode::UnsupportedLanguage));
}

#[tokio::test]
async fn test_json_format_uses_two_space_indent() {
    let loader = ModuleLoader::with_builtin_modules();
    let result = loader
        .execute(ExecutionRequest::new("format", "json", r#"{"a":1}"#))
        .await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.code(), Some("{\n  \"a\": 1\n}\n"));
}

#[tokio::test]
async fn test_json_format_honours_indent_param() {
    let loader = ModuleLoader::with_builtin_modules();
    let request = ExecutionRequest::new("format", "json", r#"{"a":[1]}"#).with_params(
        OperationParams {
            indent: Some(4),
            ..OperationParams::default()
        },
    );
    let result = loader.execute(request).await;
    assert_eq!(result.code(), Some("{\n    \"a\": [\n        1\n    ]\n}\n"));
}

#[tokio::test]
async fn test_invalid_json_format_is_an_error() {
    let loader = ModuleLoader::with_builtin_modules();
    let result = loader
        .execute(ExecutionRequest::new("format", "json", "{\"a\":"))
        .await;
    assert_eq!(result.error_code(), Some(ErrorCode::FormatError));
}

#[tokio::test]
async fn test_wat_build_failure_never_runs() {
    let loader = ModuleLoader::with_builtin_modules();
    let result = loader
        .execute(ExecutionRequest::new("execute", "wat", "(module (func (i32.add))"))
        .await;

    assert!(!result.success);
    let error = result.error.unwrap();
    assert_eq!(error.code, ErrorCode::BuildError);
    assert!(error.details.is_some());

    let mut backend = CompiledBackend::new(Box::new(WatCompiler), 1024);
    backend.initialize().await.unwrap();
    let err = backend
        .build_and_run(
            &BuildRequest::new("(module (func (i32.add))"),
            None,
            &ExecutionOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::BuildFailed { .. }));
    assert_eq!(backend.run_count(), 0);
}

#[tokio::test]
async fn test_oversized_source_is_rejected_for_every_operation() {
    let loader = small_limit_loader(16);
    let source = "let x = 1; let y = 2; x + y";

    for (operation, language) in [
        ("execute", "rhai"),
        ("format", "rhai"),
        ("minify", "json"),
        ("analyze", "go"),
        ("execute", "wat"),
    ] {
        let result = loader
            .execute(ExecutionRequest::new(operation, language, source))
            .await;
        assert_eq!(
            result.error_code(),
            Some(ErrorCode::SecurityViolation),
            "{operation} on {language}"
        );
        assert!(result.error.unwrap().message.contains("max size exceeded"));
    }

    let result = loader
        .execute(ExecutionRequest::new("execute", "rhai", "1"))
        .await;
    assert!(result.success);
}

#[tokio::test]
async fn test_forbidden_patterns_rejected_regardless_of_language() {
    let loader = ModuleLoader::with_builtin_modules();
    for (language, source) in [
        ("rhai", "fetch(\"https://example.com\")"),
        ("wat", "(module) ;; require(\"fs\")"),
    ] {
        let result = loader
            .execute(ExecutionRequest::new("execute", language, source))
            .await;
        assert_eq!(
            result.error_code(),
            Some(ErrorCode::SecurityViolation),
            "{language}"
        );
    }
}

#[tokio::test]
async fn test_runaway_script_times_out_and_engine_stays_responsive() {
    let loader = ModuleLoader::with_builtin_modules();
    let request = ExecutionRequest::new("execute", "rhai", "loop { }")
        .with_options(ExecutionOptions::default().with_timeout(50));

    let started = Instant::now();
    let result = loader.execute(request).await;
    let elapsed = started.elapsed();

    assert_eq!(result.error_code(), Some(ErrorCode::ExecutionTimeout));
    assert!(result.error.unwrap().recoverable);
    assert!(elapsed < Duration::from_millis(250), "took {elapsed:?}");

    let followup = loader
        .execute(ExecutionRequest::new("execute", "rhai", "3 * 3"))
        .await;
    assert_eq!(followup.execution().unwrap().output, Some(json!(9)));
}

#[tokio::test]
async fn test_configured_execution_defaults_apply_to_library_requests() {
    let config = EngineConfig {
        execution: ExecutionDefaults {
            timeout_ms: 50,
            ..ExecutionDefaults::default()
        },
        ..EngineConfig::default()
    };
    let loader = ModuleLoader::new(ModuleRegistry::with_builtin_modules(), config);

    let started = Instant::now();
    let result = loader
        .execute(ExecutionRequest::new("execute", "rhai", "loop { }"))
        .await;
    let elapsed = started.elapsed();

    assert_eq!(result.error_code(), Some(ErrorCode::ExecutionTimeout));
    assert_eq!(result.error.unwrap().details.unwrap()["timeoutMs"], 50);
    assert!(elapsed < Duration::from_millis(250), "took {elapsed:?}");

    // An explicit timeout wins over the configured default
    let explicit = loader
        .execute(
            ExecutionRequest::new("execute", "rhai", "let x = 0; while x < 10 { x += 1; } x")
                .with_options(ExecutionOptions::default().with_timeout(5_000)),
        )
        .await;
    assert_eq!(explicit.execution().unwrap().output, Some(json!(10)));
}

#[tokio::test]
async fn test_disposed_module_is_unhealthy_and_refuses_work() {
    let module = CodeModule::new(RhaiHandler::new());
    module.initialize(None).await.unwrap();
    assert_eq!(module.health().status, HealthStatus::Healthy);

    module.dispose().await;
    assert!(!module.is_initialized());
    assert_eq!(module.health().status, HealthStatus::Unhealthy);

    let result = module
        .execute(ExecutionRequest::new("execute", "rhai", "1"))
        .await;
    assert_eq!(result.error_code(), Some(ErrorCode::ModuleNotInitialized));
}

#[tokio::test]
async fn test_initialize_twice_starts_backend_once() {
    let module = Arc::new(CodeModule::new(WatHandler::new()));

    let first = {
        let module = module.clone();
        tokio::spawn(async move { module.initialize(None).await })
    };
    let second = {
        let module = module.clone();
        tokio::spawn(async move { module.initialize(Some(ModuleConfig::default())).await })
    };
    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();
    module.initialize(None).await.unwrap();

    assert_eq!(module.start_count(), 1);
    assert!(module.is_initialized());
}

#[tokio::test]
async fn test_go_without_toolchain_keeps_text_operations() {
    let mut config = EngineConfig::default();
    config.toolchain.tinygo_path = Some("/nonexistent/tinygo".into());
    let loader = ModuleLoader::new(ModuleRegistry::with_builtin_modules(), config);

    let module = loader.load_tool("go").await.unwrap();
    assert!(module.metadata().is_degraded());
    assert_eq!(module.health().status, HealthStatus::Degraded);
    assert_eq!(loader.health_report().status, HealthStatus::Degraded);

    let execute = loader
        .execute(ExecutionRequest::new("execute", "go", "package main\n"))
        .await;
    assert_eq!(execute.error_code(), Some(ErrorCode::UnsupportedOperation));

    let analyze = loader
        .execute(ExecutionRequest::new(
            "analyze",
            "go",
            "package main\n\nfunc main() {\n\tif true {\n\t}\n}\n",
        ))
        .await;
    match analyze.data {
        Some(OperationOutput::Analysis(report)) => {
            assert_eq!(report.functions, vec!["main"]);
            assert!(report.cyclomatic_complexity >= 2);
        }
        other => panic!("unexpected payload {other:?}"),
    }
}

#[tokio::test]
async fn test_yaml_to_json_transpile() {
    let loader = ModuleLoader::with_builtin_modules();
    let request = ExecutionRequest::new("transpile", "yaml", "name: demo\ncount: 2\n").with_params(
        OperationParams {
            to: Some("json".to_string()),
            ..OperationParams::default()
        },
    );
    let result = loader.execute(request).await;

    match result.data {
        Some(OperationOutput::Transpiled { code, from, to }) => {
            assert_eq!(from, "yaml");
            assert_eq!(to, "json");
            let value: serde_json::Value = serde_json::from_str(&code).unwrap();
            assert_eq!(value, json!({"name": "demo", "count": 2}));
        }
        other => panic!("unexpected payload {other:?}"),
    }
}

#[tokio::test]
async fn test_rhai_obfuscate_then_execute_preserves_behaviour() {
    let loader = ModuleLoader::with_builtin_modules();
    let source = "let total = 0;\nfor value in [1, 2, 3] {\n    total += value;\n}\ntotal\n";

    let obfuscated = loader
        .execute(ExecutionRequest::new("obfuscate", "rhai", source))
        .await;
    let code = obfuscated.code().unwrap().to_string();
    assert!(!code.contains("total"));

    let result = loader
        .execute(ExecutionRequest::new("execute", "rhai", code))
        .await;
    assert_eq!(result.execution().unwrap().output, Some(json!(6)));
}
