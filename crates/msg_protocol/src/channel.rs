use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::ProtocolError;

/// The semantic category of an emitted line.
///
/// The numeric values are part of the wire contract: they index the
/// per-channel log slots and select the packet letter.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
    Serialize, Deserialize, JsonSchema, EnumString, AsRefStr, Display,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Reserved; only used for log-file housekeeping.
    None = 0,
    Result = 1,
    Info = 2,
    Mark = 3,
}

impl Channel {
    pub const ALL: [Channel; 4] = [Channel::None, Channel::Result, Channel::Info, Channel::Mark];

    pub const fn index(self) -> usize {
        self as usize
    }

    /// Packet and log-banner letter: `.`, `R`, `I` or `M`.
    pub const fn letter(self) -> char {
        match self {
            Channel::None => '.',
            Channel::Result => 'R',
            Channel::Info => 'I',
            Channel::Mark => 'M',
        }
    }

    pub fn from_letter(letter: char) -> Result<Self, ProtocolError> {
        match letter {
            '.' => Ok(Channel::None),
            'R' | 'r' => Ok(Channel::Result),
            'I' | 'i' => Ok(Channel::Info),
            'M' | 'm' => Ok(Channel::Mark),
            other => Err(ProtocolError::UnknownChannel(other)),
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

/// Bitset over {result, info, mark}, used by sieve filters to pick the
/// channels they listen on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct ChannelMask(u8);

impl ChannelMask {
    pub const NONE: ChannelMask = ChannelMask(0);
    pub const RESULT: ChannelMask = ChannelMask(1 << 1);
    pub const INFO: ChannelMask = ChannelMask(1 << 2);
    pub const MARK: ChannelMask = ChannelMask(1 << 3);
    pub const ALL: ChannelMask = ChannelMask((1 << 1) | (1 << 2) | (1 << 3));

    pub const fn of(channel: Channel) -> Self {
        ChannelMask(1 << channel as u8)
    }

    pub const fn union(self, other: ChannelMask) -> Self {
        ChannelMask(self.0 | other.0)
    }

    pub const fn contains(self, channel: Channel) -> bool {
        self.0 & (1 << channel as u8) != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Parses a letter string such as `"RI"` or `"M"`.
    pub fn from_letters(letters: &str) -> Result<Self, ProtocolError> {
        letters.chars().try_fold(ChannelMask::NONE, |mask, c| {
            match Channel::from_letter(c)? {
                Channel::None => Err(ProtocolError::UnknownChannel(c)),
                channel => Ok(mask.union(ChannelMask::of(channel))),
            }
        })
    }

    pub fn letters(self) -> String {
        Channel::ALL
            .iter()
            .filter(|c| **c != Channel::None && self.contains(**c))
            .map(|c| c.letter())
            .collect()
    }
}

impl From<Channel> for ChannelMask {
    fn from(channel: Channel) -> Self {
        ChannelMask::of(channel)
    }
}

impl std::ops::BitOr for ChannelMask {
    type Output = ChannelMask;

    fn bitor(self, rhs: ChannelMask) -> ChannelMask {
        self.union(rhs)
    }
}
