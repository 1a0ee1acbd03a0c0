use anyhow::bail;
use clap::{Args, Subcommand};
use discbus::config::KEY_PREFIX;

use super::CliContext;

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Store a `DISCBUS_*` setting
    Set { key: String, value: String },
    /// Print the effective configuration as JSON
    Show,
}

pub async fn execute(args: ConfigArgs, context: &CliContext) -> anyhow::Result<()> {
    match args.command {
        ConfigCommands::Set { key, value } => {
            if !key.starts_with(KEY_PREFIX) {
                bail!("configuration keys start with {KEY_PREFIX}, got `{key}`");
            }
            match context.config_manager.0.set(&key, &value).await {
                Ok(()) => println!("✅ Config updated."),
                Err(e) => eprintln!("❌ Config could not be updated: {e}"),
            }
            // Reject values the bus would not accept.
            context.bus_config().await?;
            Ok(())
        }
        ConfigCommands::Show => {
            let config = context.bus_config().await?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}
