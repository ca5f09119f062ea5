//! Native in-process text operations shared by every language module

pub mod analyze;
pub mod data;
pub mod format;
pub mod generate;
pub mod lexer;
pub mod lint;
pub mod minify;
pub mod obfuscate;
pub mod refactor;

pub use analyze::analyze_source;
pub use data::DataFormat;
pub use format::{format_source, FormatStyle};
pub use generate::CodeGenerator;
pub use lexer::{syntax_for, Syntax};
pub use lint::{lint_source, LintReport};
pub use minify::minify_source;
pub use obfuscate::{deobfuscate_source, obfuscate_source};
pub use refactor::refactor_source;
