use anyhow::{Context, Result};
use clap::Parser;
use polyglot_sandbox::cli::{run_command, SandboxCli};
use polyglot_sandbox::config::EngineConfig;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = SandboxCli::parse();

    let default_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!("Starting polyglot-sandbox v{}", env!("CARGO_PKG_VERSION"));

    let config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => EngineConfig::default(),
    };

    match run_command(cli.command, config, cli.format).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("{:#}", e);
            Err(e)
        }
    }
}
