use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use discbus::config::BusConfig;
use discbus::sieve::SieveError;
use discbus::{BusError, Channel, FnHandler, HandlerFlow, MsgContext};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

use super::CliContext;

#[derive(Args, Debug)]
pub struct PipeArgs {
    /// Channel for the input lines: result, info or mark
    #[arg(long, default_value = "result")]
    pub channel: Channel,

    /// Write packet lines (`R:1: ...`) instead of raw text
    #[arg(long)]
    pub packets: bool,

    /// Log file for a channel letter, e.g. `R=/tmp/result.log` or `.=/tmp/all.log`
    #[arg(long = "log", value_parser = parse_log)]
    pub logs: Vec<(String, PathBuf)>,

    /// Append every packet line to this file
    #[arg(long)]
    pub packet_log: Option<PathBuf>,

    /// Install the standard sieve filters and report their results on stderr
    #[arg(long)]
    pub sieve: bool,

    /// Let the message watcher take over the output
    #[arg(long)]
    pub watch: bool,
}

impl PipeArgs {
    pub fn default_pipe() -> Self {
        Self {
            channel: Channel::Result,
            packets: false,
            logs: Vec::new(),
            packet_log: None,
            sieve: false,
            watch: false,
        }
    }

    fn apply(&self, config: &mut BusConfig) {
        config.packet_output |= self.packets;
        for (letter, path) in &self.logs {
            config.log_files.insert(letter.clone(), path.clone());
        }
        if let Some(path) = &self.packet_log {
            config.packet_log = Some(path.clone());
        }
    }
}

fn parse_log(arg: &str) -> Result<(String, PathBuf), String> {
    match arg.split_once('=') {
        Some((letter, path)) if !path.is_empty() => Ok((letter.to_string(), PathBuf::from(path))),
        _ => Err(format!("expected LETTER=PATH, got `{arg}`")),
    }
}

pub async fn execute(args: PipeArgs, context: &CliContext) -> anyhow::Result<()> {
    let mut config = context.bus_config().await?;
    args.apply(&mut config);
    let bus = MsgContext::new(config).context("cannot set up the message context")?;

    if args.sieve {
        let installed = bus.install_default_filters()?;
        debug!(installed, "standard sieve filters installed");
    }
    if args.watch {
        let handler = FnHandler::new(
            |line: &str| {
                print!("{line}");
                HandlerFlow::Continue
            },
            |line: &str| {
                eprint!("{line}");
                HandlerFlow::Continue
            },
        );
        bus.start_watcher(Box::new(handler))?;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        bus.emit(&format!("{line}\n"), args.channel)?;
    }

    if args.watch {
        bus.stop_watcher(false)?;
    }
    if args.sieve {
        let report = sieve_report(&bus)?;
        if !report.is_empty() {
            eprintln!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    bus.shutdown()?;
    Ok(())
}

/// Every stored tuple of every filter that matched something.
fn sieve_report(bus: &MsgContext) -> Result<BTreeMap<String, Vec<Vec<String>>>, BusError> {
    let mut report = BTreeMap::new();
    for name in bus.filter_names()? {
        let mut tuples = Vec::new();
        let mut reset = true;
        loop {
            match bus.get_result(&name, reset, false) {
                Ok(result) => tuples.push(result.tuple),
                Err(BusError::Sieve(SieveError::NoData(_))) => break,
                Err(e) => return Err(e),
            }
            reset = false;
        }
        if !tuples.is_empty() {
            report.insert(name, tuples);
        }
    }
    Ok(report)
}
