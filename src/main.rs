use anyhow::Result;
use clap::Parser;
use maestro::config::Config;
use maestro::driver::IterationDriver;
use maestro::llm::CursorCliClient;
use maestro::{dashboard, environment, logging, ui};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "maestro")]
#[command(version, about = "Autonomous coding-agent orchestrator")]
pub struct Cli {
    /// Launch the read-only dashboard instead of the orchestrator loop
    #[arg(long)]
    pub dashboard: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    if cli.dashboard {
        return dashboard::run(&config);
    }

    let _log_guard = logging::init(&config.log_dir, &config.log_level, config.log_fsync)?;

    let in_container = environment::is_running_in_container();
    let cli_available = environment::cli_available("agent");
    ui::print_banner(&config, in_container, cli_available);

    if !cli_available {
        anyhow::bail!(
            "LLM CLI `agent` not found on PATH. Install with: curl https://cursor.com/install -fsS | bash"
        );
    }
    if !environment::cli_authenticated() {
        anyhow::bail!(environment::auth_guidance());
    }

    let client = Arc::new(CursorCliClient::new(
        config.working_dir.clone(),
        config.llm_output_format.clone(),
    ));
    let driver = IterationDriver::new(config, client)?;
    driver.run().await
}
