//! One-line console output for the orchestrator loop. Detailed records go
//! to the logs; this is the operator-facing summary.

use crate::config::Config;
use crate::models::TaskStatistics;
use console::style;

pub fn print_banner(config: &Config, in_container: bool, cli_available: bool) {
    println!();
    println!("{}", style("maestro orchestrator").cyan().bold());
    println!("{}", style("====================").cyan());
    println!("  goal:           {}", config.project_goal);
    println!("  working dir:    {}", config.working_dir.display());
    println!("  state dir:      {}", config.state_dir.display());
    println!(
        "  backend:        {} ({})",
        config.llm_backend, config.llm_output_format
    );
    println!(
        "  model:          {}",
        config.llm_model.as_deref().unwrap_or("(backend default)")
    );
    println!(
        "  parallelism:    {}",
        if config.enable_parallel_execution {
            format!("up to {} workers", config.max_parallel_workers)
        } else {
            "disabled".to_string()
        }
    );
    println!(
        "  loop:           max {} iterations, {}s wait",
        config.max_iterations,
        config.wait_time.as_secs()
    );
    println!(
        "  environment:    {}",
        if in_container { "container" } else { "host" }
    );
    println!(
        "  LLM CLI:        {}",
        if cli_available {
            style("available").green().to_string()
        } else {
            style("NOT FOUND").red().to_string()
        }
    );
    println!();
}

pub fn iteration_header(iteration: u32, max_iterations: u32) {
    println!(
        "{}",
        style(format!("--- iteration {iteration}/{max_iterations} ---"))
            .blue()
            .bold()
    );
}

pub fn progress_line(stats: &TaskStatistics) {
    println!(
        "  tasks: {} total, {} completed, {} failed, {} pending",
        stats.total,
        style(stats.completed).green(),
        style(stats.failed).red(),
        stats.pending,
    );
}

pub fn role_error(role: &str, error: &str) {
    println!("  {} {role}: {error}", style("error").red().bold());
}

pub fn stop_line(reason: &str) {
    println!("{} {}", style("stopping:").yellow().bold(), reason);
}
