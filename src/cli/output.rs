use crate::modules::HealthReport;
use crate::types::{Diagnostic, HealthStatus, ModuleMetadata, ModuleResult, OperationOutput, Severity};

/// Print module metadata as a compact table
pub fn print_module_list(modules: &[ModuleMetadata]) {
    if modules.is_empty() {
        println!("No modules matched");
        return;
    }

    println!("{:<8} {:<10} {:<8} {:<20} NAME", "ID", "CATEGORY", "VERSION", "LANGUAGES");
    for module in modules {
        println!(
            "{:<8} {:<10} {:<8} {:<20} {}",
            module.id,
            module.category,
            module.version,
            module.languages.join(","),
            module.name
        );
    }
}

pub fn print_module_info(module: &ModuleMetadata) {
    println!("📦 {} ({}) v{}", module.name, module.id, module.version);
    println!("   {}", module.description);
    println!("   Category:     {}", module.category);
    println!("   Languages:    {}", module.languages.join(", "));
    let capabilities: Vec<&str> = module.capabilities.iter().map(|c| c.as_str()).collect();
    println!("   Capabilities: {}", capabilities.join(", "));
    println!(
        "   Limits:       {} bytes source, {}ms timeout, {} bytes memory",
        module.limits.max_source_size, module.limits.timeout_ms, module.limits.max_memory
    );
    println!("   Checksum:     {}", module.checksum);
    if let Some(loaded_at) = module.loaded_at {
        println!("   Loaded at:    {loaded_at}");
        println!("   Executions:   {}", module.execution_count);
    }
    for limitation in &module.limitations {
        println!("   ⚠️  {limitation}");
    }
}

pub fn print_health_report(report: &HealthReport) {
    println!("{} Overall: {}", status_icon(report.status), report.status);
    for (id, health) in &report.modules {
        println!(
            "  {} {:<6} {:>5} runs, {:>5.1}% errors, {:>8.2}ms avg, up {}ms",
            status_icon(health.status),
            id,
            health.total_executions,
            health.error_rate * 100.0,
            health.average_response_time_ms,
            health.uptime_ms
        );
    }
}

fn status_icon(status: HealthStatus) -> &'static str {
    match status {
        HealthStatus::Healthy => "✅",
        HealthStatus::Degraded => "⚠️ ",
        HealthStatus::Unhealthy => "❌",
    }
}

/// Print the payload of a result; code-bearing outputs go to stdout verbatim
pub fn print_result(result: &ModuleResult) {
    if let Some(error) = &result.error {
        eprintln!("❌ {}: {}", error.code, error.message);
        for suggestion in &error.suggestions {
            eprintln!("  💡 {suggestion}");
        }
        return;
    }

    match &result.data {
        Some(OperationOutput::Execution(out)) => {
            print!("{}", out.stdout);
            eprint!("{}", out.stderr);
            if let Some(value) = &out.output {
                println!("=> {value}");
            }
            if let Some(error) = &out.error {
                eprintln!("error: {error}");
            }
            print_diagnostics(&out.build_diagnostics);
        }
        Some(OperationOutput::Formatted { code })
        | Some(OperationOutput::Transpiled { code, .. })
        | Some(OperationOutput::Minified { code, .. })
        | Some(OperationOutput::Generated { code, .. })
        | Some(OperationOutput::Refactored { code, .. })
        | Some(OperationOutput::Obfuscated { code, .. })
        | Some(OperationOutput::Deobfuscated { code, .. }) => print!("{code}"),
        Some(OperationOutput::Lint {
            issues,
            error_count,
            warning_count,
        }) => {
            print_diagnostics(issues);
            println!("{error_count} error(s), {warning_count} warning(s)");
        }
        Some(OperationOutput::Validation { valid, errors }) => {
            if *valid {
                println!("✅ valid");
            } else {
                println!("❌ invalid");
            }
            print_diagnostics(errors);
        }
        Some(OperationOutput::Analysis(report)) => {
            println!(
                "lines: {} ({} code, {} comment, {} blank)",
                report.lines.total, report.lines.code, report.lines.comment, report.lines.blank
            );
            println!("functions: {}", report.functions.join(", "));
            println!("max nesting depth: {}", report.max_nesting_depth);
            println!("cyclomatic complexity: {}", report.cyclomatic_complexity);
            println!(
                "identifiers: {} ({} unique)",
                report.identifiers, report.unique_identifiers
            );
        }
        None => {}
    }
}

fn print_diagnostics(diagnostics: &[Diagnostic]) {
    for d in diagnostics {
        let severity = match d.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
        };
        let location = match (d.line, d.column) {
            (Some(line), Some(column)) => format!("{line}:{column}: "),
            (Some(line), None) => format!("{line}: "),
            _ => String::new(),
        };
        let rule = d.rule.as_deref().map(|r| format!(" [{r}]")).unwrap_or_default();
        println!("{location}{severity}: {}{rule}", d.message);
    }
}
