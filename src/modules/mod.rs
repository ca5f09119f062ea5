//! Processing modules, their registry and the lazy loader

pub mod error;
pub mod interface;
pub mod languages;
pub mod loader;
pub mod module;
pub mod monitor;
pub mod registry;
pub mod validator;

pub use error::*;
pub use interface::*;
pub use loader::{HealthReport, LoadState, ModuleLoader};
pub use module::CodeModule;
pub use monitor::HealthMonitor;
pub use registry::{ModuleDescriptor, ModuleFactory, ModuleRegistry};
pub use validator::{SecurityValidator, ValidationScope};
