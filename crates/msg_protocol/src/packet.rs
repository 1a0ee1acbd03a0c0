//! Packet-output wire format.
//!
//! Every packet is one line on the wire: a fixed 5-byte prefix `"C:N: "`
//! followed by the payload and a line break. `C` is the channel letter,
//! `N` is `1` when the payload was a complete line of the emitted text and
//! `0` when it is the final, newline-less remainder.

use serde::{Deserialize, Serialize};

use crate::{Channel, ProtocolError};

pub const PREFIX_LEN: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    pub channel: Channel,
    /// The original text had a line break after `payload`.
    pub complete: bool,
    pub payload: String,
}

impl Packet {
    pub fn new(channel: Channel, complete: bool, payload: impl Into<String>) -> Self {
        Self { channel, complete, payload: payload.into() }
    }

    /// Wire form, including the terminating line break.
    pub fn to_line(&self) -> String {
        let mut line = String::with_capacity(PREFIX_LEN + self.payload.len() + 1);
        line.push(self.channel.letter());
        line.push(':');
        line.push(if self.complete { '1' } else { '0' });
        line.push_str(": ");
        line.push_str(&self.payload);
        line.push('\n');
        line
    }

    /// The slice of original text this packet stands for.
    pub fn restore(&self) -> String {
        if self.complete {
            format!("{}\n", self.payload)
        } else {
            self.payload.clone()
        }
    }
}

/// Splits `text` into one packet per physical line.
pub fn split_packets(text: &str, channel: Channel) -> Vec<Packet> {
    text.split_inclusive('\n')
        .map(|piece| match piece.strip_suffix('\n') {
            Some(line) => Packet::new(channel, true, line),
            None => Packet::new(channel, false, piece),
        })
        .collect()
}

/// Encodes `text` into wire lines, ready to be written back to back.
pub fn encode_packets(text: &str, channel: Channel) -> Vec<String> {
    split_packets(text, channel).iter().map(Packet::to_line).collect()
}

/// Decodes one wire line. A single trailing line break is tolerated.
pub fn decode_packet(line: &str) -> Result<Packet, ProtocolError> {
    let line = line.strip_suffix('\n').unwrap_or(line);
    let bytes = line.as_bytes();
    if bytes.len() < PREFIX_LEN || bytes[1] != b':' || bytes[3] != b':' || bytes[4] != b' ' {
        return Err(ProtocolError::MalformedPrefix(line.chars().take(PREFIX_LEN).collect()));
    }
    let channel = Channel::from_letter(bytes[0] as char)?;
    let complete = match bytes[2] {
        b'1' => true,
        b'0' => false,
        other => return Err(ProtocolError::BadFlag(other as char)),
    };
    Ok(Packet::new(channel, complete, &line[PREFIX_LEN..]))
}

/// Joins decoded packets back into the text they were split from.
pub fn reassemble<'a>(packets: impl IntoIterator<Item = &'a Packet>) -> String {
    packets.into_iter().map(Packet::restore).collect()
}
