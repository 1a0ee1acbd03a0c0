use std::fs;
use std::path::PathBuf;

use clap::Args;
use discbus::config::BusConfig;

use super::CliContext;

#[derive(Args, Debug)]
pub struct SchemaArgs {
    /// Write the schema to this file instead of stdout
    #[arg(long)]
    pub out: Option<PathBuf>,
}

pub async fn execute(args: SchemaArgs, _context: &CliContext) -> anyhow::Result<()> {
    let schema = schemars::schema_for!(BusConfig);
    let json = serde_json::to_string_pretty(&schema)?;
    match args.out {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, json)?;
            println!("Schema written to {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}
