mod cli;

use clap::Parser;
use cli::{Cli, CliContext, default_command, execute};
use discbus::config::{ConfigManager, EnvConfigManager};
use discbus::logger::init_tracing;
use tracing::error;

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _logger = init_tracing(&cli.log_level, cli.log_dir.as_deref())?;

    let config_manager = ConfigManager(EnvConfigManager::new(Some(cli.env_file.clone())));
    let context = CliContext::new(config_manager);

    let command = cli.command.unwrap_or_else(default_command);
    if let Err(e) = execute(&context, command).await {
        error!("{e:#}");
        return Err(e);
    }
    Ok(())
}
