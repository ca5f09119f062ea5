pub mod backend;
pub mod error;
pub mod sandbox;
pub mod toolchain;
pub mod wasm;

pub use backend::{
    BackendState, BuildOutput, BuildRequest, CompiledBackend, CompiledModule, SourceCompiler,
    WatCompiler,
};
pub use error::*;
pub use sandbox::{SandboxLimits, SandboxedExecutor};
pub use toolchain::TinyGoCompiler;
pub use wasm::{WasmArtifact, WasmRuntime};
