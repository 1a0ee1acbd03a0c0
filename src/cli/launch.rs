use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::Args;
use discbus::MsgContext;
use discbus::frontend::{self, LaunchRequest};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use super::CliContext;

#[derive(Args, Debug)]
pub struct LaunchArgs {
    /// Named pipe carrying commands from the frontend
    #[arg(long, requires = "reply_pipe")]
    pub cmd_pipe: Option<PathBuf>,

    /// Named pipe carrying replies to the frontend
    #[arg(long, requires = "cmd_pipe")]
    pub reply_pipe: Option<PathBuf>,

    /// Frontend program and its arguments; the program path needs a `/`
    #[arg(last = true)]
    pub argv: Vec<String>,
}

/// Becomes the driven side, then answers each command line with a result
/// packet until the frontend sends `end` or closes the command pipe.
pub async fn execute(args: LaunchArgs, context: &CliContext) -> anyhow::Result<()> {
    if args.argv.is_empty() && args.cmd_pipe.is_none() {
        bail!("give a frontend program after `--` or both --cmd-pipe and --reply-pipe");
    }
    let mut config = context.bus_config().await?;
    config.packet_output = true;

    let request = LaunchRequest { argv: args.argv, cmd_pipe: args.cmd_pipe, reply_pipe: args.reply_pipe };
    let launched = frontend::launch(&config, &request).context("cannot connect the frontend")?;
    let bus = MsgContext::new(config).context("cannot set up the message context")?;

    let mut commands = BufReader::new(tokio::io::stdin()).lines();
    let mut served = 0usize;
    while let Some(line) = commands.next_line().await? {
        if line.trim() == "end" {
            break;
        }
        bus.result(&format!("{line}\n"))?;
        served += 1;
    }
    bus.mark(&format!("{served} commands served\n"))?;
    bus.shutdown()?;
    info!(served, "frontend session finished");

    if let Some(mut child) = launched.frontend {
        let status = child.wait().context("cannot wait for the frontend")?;
        if !status.success() {
            warn!(%status, "frontend exited unsuccessfully");
        }
    }
    Ok(())
}
