use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::types::SandboxLevel;

/// Pluggable sandboxed code processing
#[derive(Parser)]
#[command(name = "polyglot-sandbox")]
#[command(about = "Run, format, lint and transform code through sandboxed language modules")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct SandboxCli {
    #[command(subcommand)]
    pub command: Commands,

    /// Engine configuration file (YAML or JSON)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value = "text", global = true)]
    pub format: OutputFormat,

    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List every registered module
    List {
        /// Only modules in this category
        #[arg(long)]
        category: Option<String>,
    },

    /// Search modules by id, name, language, category or capability
    Search { query: String },

    /// Show metadata for one module
    Info { id: String },

    /// Submit source to a module
    Run(RunArgs),

    /// Report health of the given modules, loading them first
    Health {
        /// Module ids; all registered modules when empty
        ids: Vec<String>,
    },
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Source file, or - for stdin
    #[arg(default_value = "-")]
    pub file: PathBuf,

    /// Language of the source
    #[arg(short, long)]
    pub language: String,

    /// Operation to perform
    #[arg(short, long, default_value = "execute")]
    pub operation: String,

    /// Use this module instead of routing by language
    #[arg(long)]
    pub module: Option<String>,

    /// Timeout in milliseconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Memory limit in bytes
    #[arg(long)]
    pub max_memory: Option<u64>,

    /// Sandbox level (none, basic, strict, maximum)
    #[arg(long)]
    pub sandbox_level: Option<SandboxLevel>,

    /// Permit network-related constructs
    #[arg(long)]
    pub allow_network: bool,

    /// Permit filesystem-related constructs
    #[arg(long)]
    pub allow_file_system: bool,

    /// Argument passed to the program (repeatable)
    #[arg(long = "arg")]
    pub args: Vec<String>,

    /// Environment variable KEY=VALUE (repeatable)
    #[arg(long = "env", value_parser = parse_key_value)]
    pub env: Vec<(String, String)>,

    /// File whose contents are fed to the program's stdin
    #[arg(long)]
    pub stdin_file: Option<PathBuf>,

    /// Source language for transpile
    #[arg(long)]
    pub from: Option<String>,

    /// Target language for transpile
    #[arg(long)]
    pub to: Option<String>,

    /// Named template for generate
    #[arg(long)]
    pub template: Option<String>,

    /// Template value KEY=JSON (repeatable; non-JSON values are taken as strings)
    #[arg(long = "set", value_parser = parse_key_value)]
    pub values: Vec<(String, String)>,

    /// Indent width for format
    #[arg(long)]
    pub indent: Option<usize>,

    /// Symbol rename for refactor, as FROM=TO
    #[arg(long, value_parser = parse_key_value)]
    pub rename: Option<(String, String)>,

    /// Strip comments during refactor
    #[arg(long)]
    pub strip_comments: bool,

    /// Entry point for compiled modules
    #[arg(long)]
    pub entry_point: Option<String>,
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_command() {
        let cli = SandboxCli::try_parse_from([
            "polyglot-sandbox",
            "run",
            "--language",
            "rhai",
            "--timeout",
            "500",
            "--env",
            "A=1",
            "--sandbox-level",
            "strict",
            "script.rhai",
        ])
        .unwrap();

        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.language, "rhai");
                assert_eq!(args.operation, "execute");
                assert_eq!(args.timeout, Some(500));
                assert_eq!(args.env, vec![("A".to_string(), "1".to_string())]);
                assert_eq!(args.sandbox_level, Some(SandboxLevel::Strict));
                assert_eq!(args.file, PathBuf::from("script.rhai"));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_key_value_requires_key() {
        assert!(parse_key_value("=1").is_err());
        assert!(parse_key_value("noequals").is_err());
        assert_eq!(
            parse_key_value("a=b=c").unwrap(),
            ("a".to_string(), "b=c".to_string())
        );
    }
}
