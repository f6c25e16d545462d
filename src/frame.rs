// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! On-air LoRaMAC frame layout and hex-ASCII codec.
//!
//! # Frame layout
//!
//! ```text
//! |<--8-->|<--16-->|<--8-->|<--16-->|<1>|<1>|<--2-->|<--4-->|<--8-->|<== payload ==>|
//! |src pfx|src nid |dst pfx|dst nid | K | N | rsvd  |  cmd  |  seq  |   hex-ASCII   |
//! ```
//!
//! The 64-bit header is transmitted as 16 hex-ASCII characters, followed by
//! the payload (also hex-ASCII, even length). `K` requests an explicit ACK;
//! `N` piggybacks "more data queued for this destination".

use std::fmt;

/// Size of the on-air header in hex-ASCII characters (64 bits -> 16 chars).
pub const HEADER_HEX_LEN: usize = 16;

/// A 24-bit LoRa address: an 8-bit prefix plus a 16-bit node id.
///
/// The prefix `1` with node id `0` is reserved for the root. Prefixes
/// `2..=0xFC` are assignable to children; `0` and `0xFD..=0xFF` are
/// reserved/terminal. Equality is structural; no ordering is implied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoraAddr {
    pub prefix: u8,
    pub node_id: u16,
}

impl LoraAddr {
    pub const fn new(prefix: u8, node_id: u16) -> Self {
        Self { prefix, node_id }
    }

    fn to_hex(self) -> String {
        format!("{:02X}{:04X}", self.prefix, self.node_id)
    }

    fn from_hex(prefix: &str, node_id: &str) -> Option<Self> {
        Some(Self {
            prefix: u8::from_str_radix(prefix, 16).ok()?,
            node_id: u16::from_str_radix(node_id, 16).ok()?,
        })
    }
}

impl fmt::Display for LoraAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}:{:04X}", self.prefix, self.node_id)
    }
}

/// MAC command carried in the frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacCommand {
    Join,
    JoinResponse,
    Data,
    Ack,
    Query,
}

impl MacCommand {
    const fn value(self) -> u8 {
        match self {
            Self::Join => 0,
            Self::JoinResponse => 1,
            Self::Data => 2,
            Self::Ack => 3,
            Self::Query => 4,
        }
    }

    const fn from_value(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Join),
            1 => Some(Self::JoinResponse),
            2 => Some(Self::Data),
            3 => Some(Self::Ack),
            4 => Some(Self::Query),
            _ => None,
        }
    }
}

/// A decoded LoRaMAC frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoraFrame {
    pub src: LoraAddr,
    pub dst: LoraAddr,
    /// Explicit-ACK request bit.
    pub k: bool,
    /// "More data queued for this destination" bit.
    pub more: bool,
    pub command: MacCommand,
    pub seq: u8,
    /// Even-length hex-ASCII payload, empty string if none.
    pub payload: String,
}

impl LoraFrame {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        src: LoraAddr,
        dst: LoraAddr,
        command: MacCommand,
        seq: u8,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            src,
            dst,
            k: false,
            more: false,
            command,
            seq,
            payload: payload.into(),
        }
    }

    pub fn with_k(mut self, k: bool) -> Self {
        self.k = k;
        self
    }

    pub fn with_more(mut self, more: bool) -> Self {
        self.more = more;
        self
    }

    /// Serialize the frame into a hex-ASCII string ready to follow `radio tx `.
    ///
    /// An odd-length payload is left-padded with a `0` nibble, per §6.
    pub fn to_hex(&self) -> String {
        let mut flags_cmd = self.command.value() & 0x0F;
        if self.k {
            flags_cmd |= 0x80;
        }
        if self.more {
            flags_cmd |= 0x40;
        }

        let mut payload = self.payload.clone();
        if payload.len() % 2 != 0 {
            payload.insert(0, '0');
        }

        format!(
            "{}{}{:02X}{:02X}{}",
            self.src.to_hex(),
            self.dst.to_hex(),
            flags_cmd,
            self.seq,
            payload
        )
    }

    /// Decode a frame from the hex-ASCII payload of a `radio_rx` line (the
    /// `<hex>` part, already stripped of the `radio_rx ` prefix).
    ///
    /// Returns `None` if the string is malformed or too short to contain a
    /// full header.
    pub fn from_hex(data: &str) -> Option<Self> {
        if data.len() < HEADER_HEX_LEN {
            return None;
        }

        let src = LoraAddr::from_hex(&data[0..2], &data[2..6])?;
        let dst = LoraAddr::from_hex(&data[6..8], &data[8..12])?;
        let flags_cmd = u8::from_str_radix(&data[12..14], 16).ok()?;
        let seq = u8::from_str_radix(&data[14..16], 16).ok()?;

        let k = (flags_cmd & 0x80) != 0;
        let more = (flags_cmd & 0x40) != 0;
        let command = MacCommand::from_value(flags_cmd & 0x0F)?;
        let payload = data[HEADER_HEX_LEN..].to_string();

        Some(Self {
            src,
            dst,
            k,
            more,
            command,
            seq,
            payload,
        })
    }
}

impl fmt::Display for LoraFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}[{} -> {}] seq={} k={} more={} payload={}",
            self.command, self.src, self.dst, self.seq, self.k, self.more, self.payload
        )
    }
}
