use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub mod config;
pub mod decode;
pub mod launch;
pub mod pipe;
pub mod schema;

use config::ConfigArgs;
use decode::DecodeArgs;
use launch::LaunchArgs;
use pipe::PipeArgs;
use schema::SchemaArgs;

use discbus::config::{BusConfig, ConfigManager};

#[derive(Parser, Debug)]
#[command(
    name = "discbus",
    about = "Message channels, capture stacks and the frontend packet protocol",
    version = "0.2.0"
)]
pub struct Cli {
    /// Level for the internal diagnostics (e.g. error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    /// Write diagnostics to a daily rolling file in this directory instead of stderr
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    /// Read `DISCBUS_*` settings from this file
    #[arg(long, global = true, default_value = ".env")]
    pub env_file: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Emit stdin lines on a message channel
    Pipe(PipeArgs),

    /// Turn a packet stream back into plain result and info output
    Decode(DecodeArgs),

    /// Connect a frontend through pipes and serve its commands
    Launch(LaunchArgs),

    /// Emit the JSON-Schema of the bus configuration
    Schema(SchemaArgs),

    /// Handle configuration
    Config(ConfigArgs),
}

#[derive(Clone, Debug)]
pub struct CliContext {
    pub config_manager: ConfigManager,
}

impl CliContext {
    pub fn new(config_manager: ConfigManager) -> Self {
        Self { config_manager }
    }

    pub async fn bus_config(&self) -> anyhow::Result<BusConfig> {
        Ok(BusConfig::from_manager(&self.config_manager).await?)
    }
}

pub async fn execute(context: &CliContext, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Pipe(args) => pipe::execute(args, context).await,
        Commands::Decode(args) => decode::execute(args, context).await,
        Commands::Launch(args) => launch::execute(args, context).await,
        Commands::Schema(args) => schema::execute(args, context).await,
        Commands::Config(args) => config::execute(args, context).await,
    }
}

pub fn default_command() -> Commands {
    Commands::Pipe(PipeArgs::default_pipe())
}
