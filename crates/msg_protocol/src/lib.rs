pub mod channel;
pub mod packet;
pub mod reader;
pub mod severity;

pub use channel::{Channel, ChannelMask};
pub use packet::{Packet, decode_packet, encode_packets, reassemble, split_packets};
pub use reader::PacketReader;
pub use severity::Severity;

use thiserror::Error;

/// Errors raised while decoding the packet protocol.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("malformed packet prefix `{0}`")]
    MalformedPrefix(String),

    #[error("unknown channel letter `{0}`")]
    UnknownChannel(char),

    #[error("packet line flag must be 0 or 1, got `{0}`")]
    BadFlag(char),

    #[error("packet stream error: {0}")]
    Io(#[from] std::io::Error),
}
