//! wasmtime-backed runner for compiled guest modules
//!
//! Guests see a minimal `wasi_snapshot_preview1` surface: stdio, args, env,
//! clocks, randomness and `proc_exit`. Any other import traps when called.

use rand::RngCore;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use wasmtime::{
    Caller, Config, Engine, Extern, Linker, Memory, Module, Store, StoreLimits,
    StoreLimitsBuilder, Trap, Val,
};

use crate::runtime::error::BackendError;
use crate::types::{ExecutionOptions, ExecutionOutput};

pub const EPOCH_TICK_MS: u64 = 10;
pub const DEFAULT_ENTRY_POINTS: &[&str] = &["_start", "main", "run"];

const WASI: &str = "wasi_snapshot_preview1";
const ERRNO_SUCCESS: i32 = 0;
const ERRNO_BADF: i32 = 8;
const ERRNO_FAULT: i32 = 21;
const ERRNO_INVAL: i32 = 28;

/// Raised by the `proc_exit` import to unwind the guest
#[derive(Debug, thiserror::Error)]
#[error("guest exited with status {0}")]
struct ProcExit(i32);

struct HostState {
    limits: StoreLimits,
    stdin: Vec<u8>,
    stdin_pos: usize,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    capture_stdout: bool,
    capture_stderr: bool,
    max_output: usize,
    args: Vec<String>,
    env: Vec<String>,
}

impl HostState {
    fn new(options: &ExecutionOptions, program: &str, max_output: usize) -> Self {
        let limits = StoreLimitsBuilder::new()
            .memory_size(options.max_memory.min(usize::MAX as u64) as usize)
            .instances(1)
            .build();

        let mut args = vec![program.to_string()];
        args.extend(options.args.iter().cloned());

        let mut env: Vec<String> = options
            .env
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        env.sort();

        Self {
            limits,
            stdin: options.stdin.clone().unwrap_or_default().into_bytes(),
            stdin_pos: 0,
            stdout: Vec::new(),
            stderr: Vec::new(),
            capture_stdout: options.capture_stdout,
            capture_stderr: options.capture_stderr,
            max_output,
            args,
            env,
        }
    }

    /// Bytes `fd` can still capture; `None` for descriptors the guest may not write
    fn room(&self, fd: i32) -> Option<usize> {
        let (sink, capture) = match fd {
            1 => (&self.stdout, self.capture_stdout),
            2 => (&self.stderr, self.capture_stderr),
            _ => return None,
        };
        Some(if capture {
            self.max_output.saturating_sub(sink.len())
        } else {
            0
        })
    }

    fn write(&mut self, fd: i32, bytes: &[u8]) {
        let room = self.room(fd).unwrap_or_default();
        let sink = match fd {
            1 => &mut self.stdout,
            2 => &mut self.stderr,
            _ => return,
        };
        sink.extend_from_slice(&bytes[..bytes.len().min(room)]);
    }
}

/// Compiled module handle plus the exports it offers
#[derive(Clone)]
pub struct WasmArtifact {
    pub module: Module,
    pub exports: Vec<String>,
}

impl std::fmt::Debug for WasmArtifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmArtifact")
            .field("exports", &self.exports)
            .finish()
    }
}

impl WasmArtifact {
    pub fn new(module: Module) -> Self {
        let exports = module.exports().map(|e| e.name().to_string()).collect();
        Self { module, exports }
    }

    /// Explicit entry point, else the first conventional one the module exports
    pub fn resolve_entry(&self, requested: Option<&str>) -> Result<String, BackendError> {
        if let Some(name) = requested {
            return if self.exports.iter().any(|e| e == name) {
                Ok(name.to_string())
            } else {
                Err(BackendError::EntryPointNotFound {
                    name: name.to_string(),
                    exports: self.exports.clone(),
                })
            };
        }

        DEFAULT_ENTRY_POINTS
            .iter()
            .find(|candidate| self.exports.iter().any(|e| e == *candidate))
            .map(|s| s.to_string())
            .ok_or_else(|| BackendError::EntryPointNotFound {
                name: DEFAULT_ENTRY_POINTS.join("|"),
                exports: self.exports.clone(),
            })
    }
}

pub struct WasmRuntime {
    engine: Engine,
    ticker: Option<JoinHandle<()>>,
    max_output: usize,
}

impl WasmRuntime {
    pub fn new(max_output: usize) -> Result<Self, BackendError> {
        let mut config = Config::new();
        config.epoch_interruption(true);

        let engine = Engine::new(&config).map_err(|e| BackendError::Initialization {
            backend: "wasmtime".to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            engine,
            ticker: None,
            max_output,
        })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Drive epoch-based interruption; required for run timeouts to fire
    pub fn start_epoch_ticker(&mut self) {
        if self.ticker.is_some() {
            return;
        }
        let engine = self.engine.clone();
        self.ticker = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(EPOCH_TICK_MS));
            loop {
                interval.tick().await;
                engine.increment_epoch();
            }
        }));
    }

    pub fn stop_epoch_ticker(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }

    /// Compile WebAssembly text or binary into a module
    pub fn compile(&self, bytes: &[u8]) -> Result<WasmArtifact, BackendError> {
        let module = Module::new(&self.engine, bytes).map_err(|e| BackendError::BuildFailed {
            message: format!("{e:#}"),
            diagnostics: Vec::new(),
        })?;
        Ok(WasmArtifact::new(module))
    }

    /// Instantiate `artifact` and invoke its entry point
    pub async fn run(
        &self,
        artifact: &WasmArtifact,
        entry_point: Option<&str>,
        options: &ExecutionOptions,
    ) -> Result<ExecutionOutput, BackendError> {
        let entry = artifact.resolve_entry(entry_point)?;
        let timeout = options.timeout_duration();
        let engine = self.engine.clone();
        let module = artifact.module.clone();
        let options_owned = options.clone();
        let max_output = self.max_output;

        debug!("Running wasm entry point '{}' with timeout {}ms", entry, options.timeout);

        let handle = tokio::task::spawn_blocking(move || {
            invoke(&engine, &module, &entry, &options_owned, max_output)
        });

        match tokio::time::timeout(timeout, handle).await {
            Ok(joined) => joined?,
            Err(_) => {
                warn!("Guest abandoned after {}ms", timeout.as_millis());
                Err(BackendError::Timeout {
                    timeout_ms: options.timeout,
                })
            }
        }
    }
}

impl Drop for WasmRuntime {
    fn drop(&mut self) {
        self.stop_epoch_ticker();
    }
}

fn invoke(
    engine: &Engine,
    module: &Module,
    entry: &str,
    options: &ExecutionOptions,
    max_output: usize,
) -> Result<ExecutionOutput, BackendError> {
    let started = Instant::now();

    let mut store = Store::new(engine, HostState::new(options, entry, max_output));
    store.limiter(|state| &mut state.limits);
    store.set_epoch_deadline(options.timeout / EPOCH_TICK_MS + 1);

    let mut linker: Linker<HostState> = Linker::new(engine);
    add_wasi_host(&mut linker).map_err(|e| BackendError::Instantiation {
        reason: e.to_string(),
    })?;
    linker
        .define_unknown_imports_as_traps(module)
        .map_err(|e| BackendError::Instantiation {
            reason: e.to_string(),
        })?;

    let instance = linker
        .instantiate(&mut store, module)
        .map_err(|e| BackendError::Instantiation {
            reason: format!("{e:#}"),
        })?;

    let func = instance
        .get_func(&mut store, entry)
        .ok_or_else(|| BackendError::EntryPointNotFound {
            name: entry.to_string(),
            exports: module.exports().map(|e| e.name().to_string()).collect(),
        })?;

    let ty = func.ty(&store);
    if ty.params().len() > 0 {
        return Err(BackendError::Instantiation {
            reason: format!("entry point '{entry}' must take no parameters"),
        });
    }
    let mut results: Vec<Val> = ty.results().map(|_| Val::I32(0)).collect();

    let outcome = func.call(&mut store, &[], &mut results);
    let elapsed = started.elapsed().as_millis() as u64;

    let memory_usage = instance
        .get_memory(&mut store, "memory")
        .map(|m| m.data_size(&store) as u64);

    let (exit_code, output, error) = match outcome {
        Ok(()) => (0, results.first().and_then(val_to_json), None),
        Err(err) => {
            if let Some(ProcExit(code)) = err.downcast_ref::<ProcExit>() {
                (*code, None, None)
            } else if err.downcast_ref::<Trap>() == Some(&Trap::Interrupt) {
                return Err(BackendError::Timeout {
                    timeout_ms: options.timeout,
                });
            } else {
                (1, None, Some(format!("{err:#}")))
            }
        }
    };

    let state = store.into_data();
    let mut stderr = String::from_utf8_lossy(&state.stderr).into_owned();
    if let Some(message) = &error {
        if options.capture_stderr {
            stderr.push_str(message);
            stderr.push('\n');
        }
    }

    Ok(ExecutionOutput {
        output,
        stdout: String::from_utf8_lossy(&state.stdout).into_owned(),
        stderr,
        exit_code,
        error,
        execution_time_ms: elapsed,
        build_diagnostics: Vec::new(),
        memory_usage,
    })
}

fn val_to_json(val: &Val) -> Option<serde_json::Value> {
    match val {
        Val::I32(v) => Some(serde_json::json!(v)),
        Val::I64(v) => Some(serde_json::json!(v)),
        Val::F32(bits) => Some(serde_json::json!(f32::from_bits(*bits))),
        Val::F64(bits) => Some(serde_json::json!(f64::from_bits(*bits))),
        _ => None,
    }
}

fn guest_memory(caller: &mut Caller<'_, HostState>) -> anyhow::Result<Memory> {
    match caller.get_export("memory") {
        Some(Extern::Memory(memory)) => Ok(memory),
        _ => anyhow::bail!("guest does not export linear memory"),
    }
}

fn read_u32(memory: &Memory, caller: &Caller<'_, HostState>, offset: u32) -> anyhow::Result<u32> {
    let mut bytes = [0u8; 4];
    memory.read(caller, offset as usize, &mut bytes)?;
    Ok(u32::from_le_bytes(bytes))
}

/// `(ptr, len)` of the `index`th iovec, or `None` when the table overflows the
/// address space
fn read_iovec(
    memory: &Memory,
    caller: &Caller<'_, HostState>,
    iovs: i32,
    index: u32,
) -> anyhow::Result<Option<(u32, u32)>> {
    let Some(base) = index
        .checked_mul(8)
        .and_then(|offset| (iovs as u32).checked_add(offset))
    else {
        return Ok(None);
    };
    let Some(len_at) = base.checked_add(4) else {
        return Ok(None);
    };
    Ok(Some((read_u32(memory, caller, base)?, read_u32(memory, caller, len_at)?)))
}

/// Guest byte range `ptr..ptr + len`, if it lies inside linear memory
fn guest_range(memory_len: usize, ptr: u32, len: u32) -> Option<std::ops::Range<usize>> {
    let start = ptr as usize;
    let end = start.checked_add(len as usize)?;
    (end <= memory_len).then_some(start..end)
}

/// Write a NUL-terminated string list in the `args_get`/`environ_get` layout
fn write_string_list(
    caller: &mut Caller<'_, HostState>,
    items: &[String],
    pointers: u32,
    buffer: u32,
) -> anyhow::Result<()> {
    let memory = guest_memory(caller)?;
    let mut cursor = buffer;
    for (i, item) in items.iter().enumerate() {
        memory.write(&mut *caller, pointers as usize + i * 4, &cursor.to_le_bytes())?;
        let mut bytes = item.as_bytes().to_vec();
        bytes.push(0);
        memory.write(&mut *caller, cursor as usize, &bytes)?;
        cursor = u32::try_from(bytes.len())
            .ok()
            .and_then(|len| cursor.checked_add(len))
            .ok_or_else(|| anyhow::anyhow!("string list overflows guest memory"))?;
    }
    Ok(())
}

fn write_list_sizes(
    caller: &mut Caller<'_, HostState>,
    items: &[String],
    count_ptr: u32,
    size_ptr: u32,
) -> anyhow::Result<()> {
    let memory = guest_memory(caller)?;
    let size: usize = items.iter().map(|s| s.len() + 1).sum();
    memory.write(&mut *caller, count_ptr as usize, &(items.len() as u32).to_le_bytes())?;
    memory.write(&mut *caller, size_ptr as usize, &(size as u32).to_le_bytes())?;
    Ok(())
}

fn add_wasi_host(linker: &mut Linker<HostState>) -> anyhow::Result<()> {
    linker.func_wrap(
        WASI,
        "fd_write",
        |mut caller: Caller<'_, HostState>,
         fd: i32,
         iovs: i32,
         iovs_len: i32,
         nwritten: i32|
         -> anyhow::Result<i32> {
            let Some(mut room) = caller.data().room(fd) else {
                return Ok(ERRNO_BADF);
            };
            let memory = guest_memory(&mut caller)?;
            // Bytes past the capture limit are accepted and dropped
            let mut written = 0u32;
            for i in 0..iovs_len.max(0) as u32 {
                let Some((ptr, len)) = read_iovec(&memory, &caller, iovs, i)? else {
                    return Ok(ERRNO_FAULT);
                };
                let (data, state) = memory.data_and_store_mut(&mut caller);
                let Some(range) = guest_range(data.len(), ptr, len) else {
                    return Ok(ERRNO_FAULT);
                };
                let Some(total) = written.checked_add(len) else {
                    return Ok(ERRNO_INVAL);
                };
                written = total;
                if room > 0 {
                    let take = range.len().min(room);
                    state.write(fd, &data[range.start..range.start + take]);
                    room -= take;
                }
            }
            memory.write(&mut caller, nwritten as u32 as usize, &written.to_le_bytes())?;
            Ok(ERRNO_SUCCESS)
        },
    )?;

    linker.func_wrap(
        WASI,
        "fd_read",
        |mut caller: Caller<'_, HostState>,
         fd: i32,
         iovs: i32,
         iovs_len: i32,
         nread: i32|
         -> anyhow::Result<i32> {
            if fd != 0 {
                return Ok(ERRNO_BADF);
            }
            let memory = guest_memory(&mut caller)?;
            let mut total = 0u32;
            for i in 0..iovs_len.max(0) as u32 {
                let Some((ptr, len)) = read_iovec(&memory, &caller, iovs, i)? else {
                    return Ok(ERRNO_FAULT);
                };
                let (data, state) = memory.data_and_store_mut(&mut caller);
                let Some(range) = guest_range(data.len(), ptr, len) else {
                    return Ok(ERRNO_FAULT);
                };

                let available = state.stdin.len() - state.stdin_pos;
                let take = range.len().min(available);
                data[range.start..range.start + take]
                    .copy_from_slice(&state.stdin[state.stdin_pos..state.stdin_pos + take]);
                state.stdin_pos += take;

                total = total.saturating_add(take as u32);
                if take < range.len() {
                    break;
                }
            }
            memory.write(&mut caller, nread as u32 as usize, &total.to_le_bytes())?;
            Ok(ERRNO_SUCCESS)
        },
    )?;

    linker.func_wrap(
        WASI,
        "fd_close",
        |_caller: Caller<'_, HostState>, _fd: i32| -> i32 { ERRNO_SUCCESS },
    )?;

    linker.func_wrap(
        WASI,
        "fd_fdstat_get",
        |mut caller: Caller<'_, HostState>, fd: i32, stat: i32| -> anyhow::Result<i32> {
            if !(0..=2).contains(&fd) {
                return Ok(ERRNO_BADF);
            }
            let memory = guest_memory(&mut caller)?;
            // filetype character_device, no flags, all rights on the stdio fds
            let mut record = [0u8; 24];
            record[0] = 2;
            record[8..16].copy_from_slice(&u64::MAX.to_le_bytes());
            memory.write(&mut caller, stat as u32 as usize, &record)?;
            Ok(ERRNO_SUCCESS)
        },
    )?;

    linker.func_wrap(
        WASI,
        "proc_exit",
        |_caller: Caller<'_, HostState>, code: i32| -> anyhow::Result<()> {
            Err(anyhow::Error::new(ProcExit(code)))
        },
    )?;

    linker.func_wrap(
        WASI,
        "args_sizes_get",
        |mut caller: Caller<'_, HostState>, count: i32, size: i32| -> anyhow::Result<i32> {
            let args = caller.data().args.clone();
            write_list_sizes(&mut caller, &args, count as u32, size as u32)?;
            Ok(ERRNO_SUCCESS)
        },
    )?;

    linker.func_wrap(
        WASI,
        "args_get",
        |mut caller: Caller<'_, HostState>, argv: i32, buf: i32| -> anyhow::Result<i32> {
            let args = caller.data().args.clone();
            write_string_list(&mut caller, &args, argv as u32, buf as u32)?;
            Ok(ERRNO_SUCCESS)
        },
    )?;

    linker.func_wrap(
        WASI,
        "environ_sizes_get",
        |mut caller: Caller<'_, HostState>, count: i32, size: i32| -> anyhow::Result<i32> {
            let env = caller.data().env.clone();
            write_list_sizes(&mut caller, &env, count as u32, size as u32)?;
            Ok(ERRNO_SUCCESS)
        },
    )?;

    linker.func_wrap(
        WASI,
        "environ_get",
        |mut caller: Caller<'_, HostState>, environ: i32, buf: i32| -> anyhow::Result<i32> {
            let env = caller.data().env.clone();
            write_string_list(&mut caller, &env, environ as u32, buf as u32)?;
            Ok(ERRNO_SUCCESS)
        },
    )?;

    linker.func_wrap(
        WASI,
        "clock_time_get",
        |mut caller: Caller<'_, HostState>, clock: i32, _precision: i64, time: i32| -> anyhow::Result<i32> {
            let nanos: u64 = match clock {
                0 => chrono::Utc::now()
                    .timestamp_nanos_opt()
                    .unwrap_or_default()
                    .max(0) as u64,
                1..=3 => {
                    static START: once_cell::sync::Lazy<Instant> =
                        once_cell::sync::Lazy::new(Instant::now);
                    START.elapsed().as_nanos() as u64
                }
                _ => return Ok(ERRNO_INVAL),
            };
            let memory = guest_memory(&mut caller)?;
            memory.write(&mut caller, time as u32 as usize, &nanos.to_le_bytes())?;
            Ok(ERRNO_SUCCESS)
        },
    )?;

    linker.func_wrap(
        WASI,
        "random_get",
        |mut caller: Caller<'_, HostState>, buf: i32, len: i32| -> anyhow::Result<i32> {
            let memory = guest_memory(&mut caller)?;
            let data = memory.data_mut(&mut caller);
            let Some(range) = guest_range(data.len(), buf as u32, len as u32) else {
                return Ok(ERRNO_FAULT);
            };
            rand::thread_rng().fill_bytes(&mut data[range]);
            Ok(ERRNO_SUCCESS)
        },
    )?;

    linker.func_wrap(
        WASI,
        "sched_yield",
        |_caller: Caller<'_, HostState>| -> i32 { ERRNO_SUCCESS },
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO: &str = r#"
        (module
          (import "wasi_snapshot_preview1" "fd_write" (func $fd_write (param i32 i32 i32 i32) (result i32)))
          (memory (export "memory") 1)
          (data (i32.const 16) "hello\n")
          (func (export "_start")
            (i32.store (i32.const 0) (i32.const 16))
            (i32.store (i32.const 4) (i32.const 6))
            (drop (call $fd_write (i32.const 1) (i32.const 0) (i32.const 1) (i32.const 8)))))
    "#;

    fn runtime() -> WasmRuntime {
        let mut runtime = WasmRuntime::new(1024 * 1024).unwrap();
        runtime.start_epoch_ticker();
        runtime
    }

    #[tokio::test]
    async fn test_captures_stdout() {
        let runtime = runtime();
        let artifact = runtime.compile(HELLO.as_bytes()).unwrap();
        let output = runtime
            .run(&artifact, None, &ExecutionOptions::default())
            .await
            .unwrap();
        assert_eq!(output.stdout, "hello\n");
        assert_eq!(output.exit_code, 0);
        assert_eq!(output.memory_usage, Some(65536));
    }

    #[tokio::test]
    async fn test_return_value_and_proc_exit() {
        let runtime = runtime();
        let artifact = runtime
            .compile(br#"(module (func (export "main") (result i32) i32.const 42))"#)
            .unwrap();
        let output = runtime
            .run(&artifact, None, &ExecutionOptions::default())
            .await
            .unwrap();
        assert_eq!(output.output, Some(serde_json::json!(42)));

        let artifact = runtime
            .compile(
                br#"(module
                  (import "wasi_snapshot_preview1" "proc_exit" (func $exit (param i32)))
                  (func (export "_start") (call $exit (i32.const 3))))"#,
            )
            .unwrap();
        let output = runtime
            .run(&artifact, None, &ExecutionOptions::default())
            .await
            .unwrap();
        assert_eq!(output.exit_code, 3);
        assert!(output.error.is_none());
    }

    #[tokio::test]
    async fn test_infinite_loop_is_interrupted() {
        let runtime = runtime();
        let artifact = runtime
            .compile(br#"(module (func (export "_start") (loop $l (br $l))))"#)
            .unwrap();
        let started = Instant::now();
        let err = runtime
            .run(&artifact, None, &ExecutionOptions::default().with_timeout(50))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Timeout { timeout_ms: 50 }));
        assert!(started.elapsed() < Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_unknown_imports_trap_when_called() {
        let runtime = runtime();
        let artifact = runtime
            .compile(
                br#"(module
                  (import "wasi_snapshot_preview1" "path_open" (func $open (param i32) (result i32)))
                  (func (export "_start") (drop (call $open (i32.const 0)))))"#,
            )
            .unwrap();
        let output = runtime
            .run(&artifact, None, &ExecutionOptions::default())
            .await
            .unwrap();
        assert_eq!(output.exit_code, 1);
        assert!(output.error.is_some());
    }

    #[tokio::test]
    async fn test_missing_entry_point() {
        let runtime = runtime();
        let artifact = runtime
            .compile(br#"(module (func (export "helper")))"#)
            .unwrap();
        let err = runtime
            .run(&artifact, None, &ExecutionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::EntryPointNotFound { .. }));

        let output = runtime
            .run(&artifact, Some("helper"), &ExecutionOptions::default())
            .await
            .unwrap();
        assert_eq!(output.exit_code, 0);
    }

    /// Points `count` iovecs at the whole first page and returns `nwritten`
    const FLOOD: &str = r#"
        (module
          (import "wasi_snapshot_preview1" "fd_write" (func $fd_write (param i32 i32 i32 i32) (result i32)))
          (memory (export "memory") 1)
          (func (export "run") (result i32) (local $i i32)
            (block $done
              (loop $fill
                (br_if $done (i32.ge_u (local.get $i) (i32.const 4000)))
                (i32.store (i32.mul (local.get $i) (i32.const 8)) (i32.const 0))
                (i32.store
                  (i32.add (i32.mul (local.get $i) (i32.const 8)) (i32.const 4))
                  (i32.const 65536))
                (local.set $i (i32.add (local.get $i) (i32.const 1)))
                (br $fill)))
            (drop (call $fd_write (i32.const 1) (i32.const 0) (i32.const 4000) (i32.const 65532)))
            (i32.load (i32.const 65532))))
    "#;

    #[tokio::test]
    async fn test_large_writes_are_capped_at_max_output() {
        let mut runtime = WasmRuntime::new(4096).unwrap();
        runtime.start_epoch_ticker();
        let artifact = runtime.compile(FLOOD.as_bytes()).unwrap();
        let output = runtime
            .run(&artifact, None, &ExecutionOptions::default())
            .await
            .unwrap();

        assert_eq!(output.stdout.len(), 4096);
        assert_eq!(output.output, Some(serde_json::json!(4000 * 65536)));
        assert_eq!(output.exit_code, 0);
    }

    #[tokio::test]
    async fn test_out_of_bounds_buffers_fault() {
        let runtime = runtime();
        let artifact = runtime
            .compile(
                br#"(module
                  (import "wasi_snapshot_preview1" "fd_write" (func $fd_write (param i32 i32 i32 i32) (result i32)))
                  (import "wasi_snapshot_preview1" "random_get" (func $random_get (param i32 i32) (result i32)))
                  (memory (export "memory") 1)
                  (func (export "run") (result i32)
                    (i32.store (i32.const 0) (i32.const 65000))
                    (i32.store (i32.const 4) (i32.const 10000))
                    (i32.add
                      (i32.mul
                        (call $fd_write (i32.const 1) (i32.const 0) (i32.const 1) (i32.const 8))
                        (i32.const 100))
                      (i32.add
                        (call $random_get (i32.const 65000) (i32.const 10000))
                        (call $random_get (i32.const 64) (i32.const 16))))))"#,
            )
            .unwrap();
        let output = runtime
            .run(&artifact, None, &ExecutionOptions::default())
            .await
            .unwrap();

        // fd_write and the oversized random_get fault; the in-bounds fill succeeds
        assert_eq!(output.output, Some(serde_json::json!(21 * 100 + 21)));
        assert!(output.stdout.is_empty());
    }

    #[test]
    fn test_invalid_text_fails_to_compile() {
        let runtime = WasmRuntime::new(1024).unwrap();
        let err = runtime.compile(b"(module (func").unwrap_err();
        assert!(matches!(err, BackendError::BuildFailed { .. }));
    }
}
