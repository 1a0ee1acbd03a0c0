//! Async consumer side of the packet protocol.
//!
//! A frontend reads the reply pipe line by line; this wraps that loop.
//! ```ignore
//! let stdin = tokio::io::BufReader::new(tokio::io::stdin());
//! let mut reader = PacketReader::new(stdin);
//! while let Some(packet) = reader.next_packet().await? {
//!     println!("{}: {}", packet.channel, packet.payload);
//! }
//! ```

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::warn;

use crate::{Packet, ProtocolError, decode_packet};

pub struct PacketReader<R> {
    inner: R,
    line: String,
    /// Skip undecodable lines instead of failing.
    lenient: bool,
}

impl<R: AsyncBufRead + Unpin> PacketReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, line: String::new(), lenient: false }
    }

    pub fn lenient(mut self, lenient: bool) -> Self {
        self.lenient = lenient;
        self
    }

    /// Returns `Ok(None)` at end of stream.
    pub async fn next_packet(&mut self) -> Result<Option<Packet>, ProtocolError> {
        loop {
            self.line.clear();
            if self.inner.read_line(&mut self.line).await? == 0 {
                return Ok(None);
            }
            match decode_packet(&self.line) {
                Ok(packet) => return Ok(Some(packet)),
                Err(e) if self.lenient => {
                    warn!(error = %e, "skipping line that is not a packet");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Reads until end of stream.
    pub async fn collect(mut self) -> Result<Vec<Packet>, ProtocolError> {
        let mut packets = Vec::new();
        while let Some(packet) = self.next_packet().await? {
            packets.push(packet);
        }
        Ok(packets)
    }
}
