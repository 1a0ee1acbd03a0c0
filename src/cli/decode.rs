use clap::Args;
use discbus::Channel;
use msg_protocol::PacketReader;
use tokio::io::{AsyncWriteExt, BufReader};

use super::CliContext;

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Skip lines that are not packets instead of failing
    #[arg(long)]
    pub lenient: bool,
}

/// Result payloads go to stdout, info and mark payloads to stderr.
pub async fn execute(args: DecodeArgs, _context: &CliContext) -> anyhow::Result<()> {
    let mut reader = PacketReader::new(BufReader::new(tokio::io::stdin())).lenient(args.lenient);
    let mut stdout = tokio::io::stdout();
    let mut stderr = tokio::io::stderr();

    while let Some(packet) = reader.next_packet().await? {
        let text = packet.restore();
        match packet.channel {
            Channel::Result => stdout.write_all(text.as_bytes()).await?,
            Channel::Info | Channel::Mark => stderr.write_all(text.as_bytes()).await?,
            Channel::None => {}
        }
    }
    stdout.flush().await?;
    stderr.flush().await?;
    Ok(())
}
