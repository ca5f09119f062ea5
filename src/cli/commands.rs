use anyhow::{bail, Context, Result};
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

use crate::cli::options::{Commands, OutputFormat, RunArgs};
use crate::cli::output;
use crate::config::EngineConfig;
use crate::modules::ModuleLoader;
use crate::types::{ExecutionOptions, ExecutionRequest, OperationParams, RefactorSpec};

/// Execute a parsed subcommand. Returns the process exit code.
pub async fn run_command(command: Commands, config: EngineConfig, format: OutputFormat) -> Result<i32> {
    let loader = ModuleLoader::new(crate::modules::ModuleRegistry::with_builtin_modules(), config.clone());

    let exit_code = match command {
        Commands::List { category } => {
            let modules = match category {
                Some(category) => loader.tools_by_category(&category),
                None => loader.all_tools_metadata(),
            };
            emit(format, &modules, || output::print_module_list(&modules))?;
            0
        }
        Commands::Search { query } => {
            let modules = loader.search_tools(&query);
            emit(format, &modules, || output::print_module_list(&modules))?;
            0
        }
        Commands::Info { id } => {
            let metadata = loader.tool_metadata(&id)?;
            emit(format, &metadata, || output::print_module_info(&metadata))?;
            0
        }
        Commands::Run(args) => {
            let request = build_request(&args, &config)?;
            info!("Running {} on {} source", request.operation, request.language);
            let result = match &args.module {
                Some(id) => loader.execute_with(id, request).await,
                None => loader.execute(request).await,
            };
            emit(format, &result, || output::print_result(&result))?;
            if result.success {
                result.execution().map(|out| out.exit_code).unwrap_or(0)
            } else {
                1
            }
        }
        Commands::Health { ids } => {
            let ids = if ids.is_empty() { loader.registry().ids() } else { ids };
            for id in &ids {
                if let Err(e) = loader.load_tool(id).await {
                    debug!("Health check could not load {}: {}", id, e);
                }
            }
            let report = loader.health_report();
            emit(format, &report, || output::print_health_report(&report))?;
            0
        }
    };

    loader.dispose().await;
    Ok(exit_code)
}

fn emit<T: serde::Serialize>(format: OutputFormat, value: &T, text: impl FnOnce()) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Text => text(),
    }
    Ok(())
}

fn read_source(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut source = String::new();
        std::io::stdin()
            .read_to_string(&mut source)
            .context("Failed to read source from stdin")?;
        Ok(source)
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read source file {}", path.display()))
    }
}

/// Assemble an [`ExecutionRequest`] from command-line flags
pub fn build_request(args: &RunArgs, config: &EngineConfig) -> Result<ExecutionRequest> {
    if args.rename.is_some() && args.strip_comments {
        bail!("--rename and --strip-comments cannot be combined");
    }

    let source = read_source(&args.file)?;
    let stdin = match &args.stdin_file {
        Some(path) => Some(
            std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read stdin file {}", path.display()))?,
        ),
        None => None,
    };

    let mut options = ExecutionOptions {
        timeout: config.execution.timeout_ms,
        max_memory: config.execution.max_memory,
        ..ExecutionOptions::default()
    };
    if let Some(timeout) = args.timeout {
        options.timeout = timeout;
    }
    if let Some(max_memory) = args.max_memory {
        options.max_memory = max_memory;
    }
    if let Some(level) = args.sandbox_level {
        options.sandbox_level = level;
    }
    options.allow_network = args.allow_network;
    options.allow_file_system = args.allow_file_system;
    options.args = args.args.clone();
    options.env = args.env.iter().cloned().collect();
    options.stdin = stdin;

    let refactor = match (&args.rename, args.strip_comments) {
        (Some((from, to)), _) => Some(RefactorSpec::RenameSymbol {
            from: from.clone(),
            to: to.clone(),
        }),
        (None, true) => Some(RefactorSpec::StripComments),
        (None, false) => None,
    };

    let params = OperationParams {
        from: args.from.clone(),
        to: args.to.clone(),
        template: args.template.clone(),
        values: args
            .values
            .iter()
            .map(|(key, raw)| {
                let value = serde_json::from_str(raw)
                    .unwrap_or_else(|_| serde_json::Value::String(raw.clone()));
                (key.clone(), value)
            })
            .collect(),
        refactor,
        indent: args.indent,
        entry_point: args.entry_point.clone(),
        ..OperationParams::default()
    };

    Ok(ExecutionRequest::new(args.operation.as_str(), args.language.as_str(), source)
        .with_options(options)
        .with_params(params))
}
