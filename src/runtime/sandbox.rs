//! In-process script sandbox built on the Rhai interpreter

use parking_lot::Mutex;
use rhai::module_resolvers::DummyModuleResolver;
use rhai::packages::{
    BasicArrayPackage, BasicMapPackage, BasicMathPackage, BasicStringPackage, CorePackage,
    LogicPackage, Package,
};
use rhai::{Dynamic, Engine, EvalAltResult, Map, Position, Scope};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::config::ExecutionDefaults;
use crate::runtime::error::BackendError;
use crate::types::{Diagnostic, ExecutionOptions, ExecutionOutput, SandboxLevel};

const TERMINATION_TOKEN: &str = "deadline";

/// Interpreter limits applied for one sandbox level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SandboxLimits {
    /// 0 leaves the operation count unbounded; the deadline still applies
    pub max_operations: u64,
    pub max_call_levels: usize,
    pub max_expr_depth: usize,
    pub allow_looping: bool,
}

impl SandboxLimits {
    pub fn for_level(level: SandboxLevel) -> Self {
        match level {
            SandboxLevel::None | SandboxLevel::Basic => Self {
                max_operations: 0,
                max_call_levels: 64,
                max_expr_depth: 128,
                allow_looping: true,
            },
            SandboxLevel::Strict => Self {
                max_operations: 50_000_000,
                max_call_levels: 32,
                max_expr_depth: 64,
                allow_looping: true,
            },
            SandboxLevel::Maximum => Self {
                max_operations: 1_000_000,
                max_call_levels: 16,
                max_expr_depth: 32,
                allow_looping: false,
            },
        }
    }
}

#[derive(Debug, Default)]
struct OutputBuffer {
    text: String,
    limit: usize,
    truncated: bool,
}

impl OutputBuffer {
    fn with_limit(limit: usize) -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self {
            limit,
            ..Self::default()
        }))
    }

    fn push_line(&mut self, line: &str) {
        if self.truncated {
            return;
        }
        if self.text.len() + line.len() + 1 > self.limit {
            self.truncated = true;
            return;
        }
        self.text.push_str(line);
        self.text.push('\n');
    }
}

/// Runs script source under a restricted binding set and a wall-clock deadline
#[derive(Debug, Clone)]
pub struct SandboxedExecutor {
    max_output_bytes: usize,
}

impl Default for SandboxedExecutor {
    fn default() -> Self {
        Self::new(&ExecutionDefaults::default())
    }
}

impl SandboxedExecutor {
    pub fn new(defaults: &ExecutionDefaults) -> Self {
        Self {
            max_output_bytes: defaults.max_output_bytes,
        }
    }

    /// Execute `source`. A script that throws still yields `Ok` with exit code 1;
    /// only an expired deadline or a task failure is an `Err`.
    pub async fn execute(
        &self,
        source: &str,
        options: &ExecutionOptions,
    ) -> Result<ExecutionOutput, BackendError> {
        let timeout = options.timeout_duration();
        let source = source.to_string();
        let options = options.clone();
        let max_output = self.max_output_bytes;

        debug!(
            "Running script ({} bytes) at sandbox level {:?} with timeout {}ms",
            source.len(),
            options.sandbox_level,
            options.timeout
        );

        let handle = tokio::task::spawn_blocking(move || run_script(&source, &options, max_output));

        match tokio::time::timeout(timeout, handle).await {
            Ok(joined) => joined?,
            Err(_) => {
                warn!("Script abandoned after {}ms", timeout.as_millis());
                Err(BackendError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Parse without running; syntax errors come back as diagnostics
    pub fn check_syntax(&self, source: &str) -> Vec<Diagnostic> {
        let engine = Engine::new();
        match engine.compile(source) {
            Ok(_) => Vec::new(),
            Err(err) => {
                let position = err.position();
                vec![Diagnostic::error(err.to_string())
                    .at(position.line(), position.position())
                    .with_rule("syntax")]
            }
        }
    }
}

fn run_script(
    source: &str,
    options: &ExecutionOptions,
    max_output: usize,
) -> Result<ExecutionOutput, BackendError> {
    let started = Instant::now();
    let deadline = started + options.timeout_duration();

    let stdout = OutputBuffer::with_limit(max_output);
    let stderr = OutputBuffer::with_limit(max_output);

    let mut engine = build_engine(options, deadline);

    if options.capture_stdout {
        let sink = stdout.clone();
        engine.on_print(move |text| sink.lock().push_line(text));
    } else {
        engine.on_print(|_| {});
    }

    if options.capture_stderr {
        let sink = stderr.clone();
        engine.on_debug(move |text, _source, position: Position| {
            let line = match position.line() {
                Some(line) => format!("[debug:{line}] {text}"),
                None => format!("[debug] {text}"),
            };
            sink.lock().push_line(&line);
        });
    } else {
        engine.on_debug(|_, _, _| {});
    }

    let mut scope = script_scope(options);
    let outcome = engine.eval_with_scope::<Dynamic>(&mut scope, source);
    let elapsed = started.elapsed().as_millis() as u64;

    let stdout = std::mem::take(&mut stdout.lock().text);
    let mut stderr = std::mem::take(&mut stderr.lock().text);

    match outcome {
        Ok(value) => Ok(ExecutionOutput {
            output: Some(dynamic_to_json(&value)),
            stdout,
            stderr,
            exit_code: 0,
            error: None,
            execution_time_ms: elapsed,
            build_diagnostics: Vec::new(),
            memory_usage: None,
        }),
        Err(err) => {
            if let EvalAltResult::ErrorTerminated(..) = *err {
                return Err(BackendError::Timeout {
                    timeout_ms: options.timeout,
                });
            }

            let message = describe_error(&err);
            if options.capture_stderr {
                stderr.push_str(&message);
                stderr.push('\n');
            }
            Ok(ExecutionOutput {
                output: None,
                stdout,
                stderr,
                exit_code: 1,
                error: Some(message),
                execution_time_ms: elapsed,
                build_diagnostics: Vec::new(),
                memory_usage: None,
            })
        }
    }
}

fn describe_error(err: &EvalAltResult) -> String {
    match err {
        EvalAltResult::ErrorRuntime(value, _) => format!("Uncaught: {value}"),
        EvalAltResult::ErrorTooManyOperations(_) => {
            "Operation limit exceeded for this sandbox level".to_string()
        }
        other => other.to_string(),
    }
}

fn build_engine(options: &ExecutionOptions, deadline: Instant) -> Engine {
    let level = options.sandbox_level;
    let mut engine = match level {
        SandboxLevel::None | SandboxLevel::Basic => Engine::new(),
        SandboxLevel::Strict => {
            let mut engine = Engine::new_raw();
            engine.register_global_module(CorePackage::new().as_shared_module());
            engine.register_global_module(LogicPackage::new().as_shared_module());
            engine.register_global_module(BasicStringPackage::new().as_shared_module());
            engine.register_global_module(BasicMathPackage::new().as_shared_module());
            engine.register_global_module(BasicArrayPackage::new().as_shared_module());
            engine.register_global_module(BasicMapPackage::new().as_shared_module());
            engine
        }
        SandboxLevel::Maximum => {
            let mut engine = Engine::new_raw();
            engine.register_global_module(CorePackage::new().as_shared_module());
            engine.register_global_module(LogicPackage::new().as_shared_module());
            engine.register_global_module(BasicMathPackage::new().as_shared_module());
            engine
        }
    };

    let limits = SandboxLimits::for_level(level);
    engine.set_max_operations(limits.max_operations);
    engine.set_max_call_levels(limits.max_call_levels);
    engine.set_max_expr_depths(limits.max_expr_depth, limits.max_expr_depth);
    engine.set_allow_looping(limits.allow_looping);

    // maxMemory is advisory for the interpreter: cap the container sizes
    let max_items = (options.max_memory / 64).clamp(1024, usize::MAX as u64) as usize;
    engine.set_max_string_size(options.max_memory.min(usize::MAX as u64) as usize);
    engine.set_max_array_size(max_items);
    engine.set_max_map_size(max_items);

    engine.disable_symbol("eval");
    engine.set_module_resolver(DummyModuleResolver::new());

    engine.on_progress(move |_ops| {
        if Instant::now() >= deadline {
            Some(Dynamic::from(TERMINATION_TOKEN))
        } else {
            None
        }
    });

    if level != SandboxLevel::None && level != SandboxLevel::Maximum {
        register_utilities(&mut engine);
    }

    engine
}

/// Allow-listed helper bindings: numeric, string, date and JSON utilities only
fn register_utilities(engine: &mut Engine) {
    engine.register_fn("to_json", |value: Dynamic| -> String {
        serde_json::to_string(&dynamic_to_json(&value)).unwrap_or_else(|_| "null".to_string())
    });
    engine.register_fn("from_json", |json: &str| -> Dynamic {
        serde_json::from_str::<serde_json::Value>(json)
            .map(|v| json_to_dynamic(&v))
            .unwrap_or(Dynamic::UNIT)
    });

    engine.register_fn("trim", |s: &str| -> String { s.trim().to_string() });
    engine.register_fn("upper", |s: &str| -> String { s.to_uppercase() });
    engine.register_fn("lower", |s: &str| -> String { s.to_lowercase() });

    engine.register_fn("abs", |x: i64| -> i64 { x.abs() });
    engine.register_fn("min", |a: i64, b: i64| -> i64 { a.min(b) });
    engine.register_fn("max", |a: i64, b: i64| -> i64 { a.max(b) });
    engine.register_fn("clamp", |value: i64, min: i64, max: i64| -> i64 {
        value.max(min).min(max)
    });

    engine.register_fn("now", || -> i64 { chrono::Utc::now().timestamp() });
    engine.register_fn("now_ms", || -> i64 { chrono::Utc::now().timestamp_millis() });
    engine.register_fn("iso_date", || -> String { chrono::Utc::now().to_rfc3339() });
}

fn script_scope(options: &ExecutionOptions) -> Scope<'static> {
    let mut scope = Scope::new();

    let args: rhai::Array = options.args.iter().cloned().map(Dynamic::from).collect();
    scope.push_constant("ARGS", args);

    let mut env = Map::new();
    for (key, value) in &options.env {
        env.insert(key.as_str().into(), Dynamic::from(value.clone()));
    }
    scope.push_constant("ENV", env);

    scope.push_constant("STDIN", options.stdin.clone().unwrap_or_default());
    scope
}

pub fn json_to_dynamic(value: &serde_json::Value) -> Dynamic {
    match value {
        serde_json::Value::Null => Dynamic::UNIT,
        serde_json::Value::Bool(b) => Dynamic::from(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Dynamic::from(i)
            } else if let Some(f) = n.as_f64() {
                Dynamic::from(f)
            } else {
                Dynamic::UNIT
            }
        }
        serde_json::Value::String(s) => Dynamic::from(s.clone()),
        serde_json::Value::Array(items) => {
            let array: rhai::Array = items.iter().map(json_to_dynamic).collect();
            Dynamic::from(array)
        }
        serde_json::Value::Object(object) => {
            let mut map = Map::new();
            for (k, v) in object {
                map.insert(k.as_str().into(), json_to_dynamic(v));
            }
            Dynamic::from(map)
        }
    }
}

pub fn dynamic_to_json(value: &Dynamic) -> serde_json::Value {
    if value.is_unit() {
        serde_json::Value::Null
    } else if let Ok(b) = value.as_bool() {
        serde_json::Value::Bool(b)
    } else if let Ok(i) = value.as_int() {
        serde_json::json!(i)
    } else if let Ok(f) = value.as_float() {
        serde_json::json!(f)
    } else if let Ok(c) = value.as_char() {
        serde_json::Value::String(c.to_string())
    } else if value.is_string() {
        serde_json::Value::String(value.to_string())
    } else if value.is_array() {
        let items = value.clone().cast::<rhai::Array>();
        serde_json::Value::Array(items.iter().map(dynamic_to_json).collect())
    } else if value.is_map() {
        let map = value.clone().cast::<Map>();
        let mut object = serde_json::Map::new();
        for (k, v) in map.iter() {
            object.insert(k.to_string(), dynamic_to_json(v));
        }
        serde_json::Value::Object(object)
    } else {
        serde_json::Value::String(value.to_string())
    }
}
