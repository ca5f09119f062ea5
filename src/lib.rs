//! Polyglot Sandbox - pluggable, sandboxed code processing
//!
//! Language modules are discovered through a [`ModuleRegistry`], loaded on
//! demand by the [`ModuleLoader`] and driven with [`ExecutionRequest`]s. Every
//! request passes a security gate before reaching the module's handler.

pub mod cli;
pub mod config;
pub mod modules;
pub mod processing;
pub mod runtime;
pub mod types;

pub use config::{ConfigError, EngineConfig, ModuleConfig};
pub use modules::{
    EngineError, HealthReport, LoadState, ModuleLoader, ModuleRegistry, ProcessingModule,
    RegistryError,
};
pub use types::*;
