//! Built-in language handlers

pub mod compiled;
pub mod go;
pub mod json;
pub mod rhai;
pub mod wat;

pub use go::GoHandler;
pub use json::DataHandler;
pub use rhai::RhaiHandler;
pub use wat::WatHandler;
