//! Command-line front end for the `polyglot-sandbox` binary

pub mod commands;
pub mod options;
pub mod output;

pub use commands::{build_request, run_command};
pub use options::*;
