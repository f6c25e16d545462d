// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! IP adaptation: LoRa address <-> IPv6 address mapping, and the
//! header-elision/reconstruction codec that strips the 32 address bytes
//! out of an IPv6 packet before it goes over the radio and rebuilds them
//! on receipt.
//!
//! # Address template
//!
//! ```text
//! byte:    0   1..6     7         8..13                       14   15
//! content: FD  0x00*6   lora_pfx  0x02 0x12 0x4B 0x00 0x06 0x0D nid_hi nid_lo
//! ```
//!
//! Root addresses live in the ULA prefix `fd00::/8`. All 24 bits of the
//! LoRa address are preserved by the mapping in both directions.

use crate::frame::LoraAddr;
use crate::mac::{MacError, MacLayer, PayloadSink};
use std::net::Ipv6Addr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Bytes 8..14 of the address template, fixed regardless of node id.
const COMMON_LINK_ADDR_PART: [u8; 6] = [0x02, 0x12, 0x4B, 0x00, 0x06, 0x0D];

/// Length, in bytes, of a full IPv6 header.
const IPV6_HEADER_LEN: usize = 40;
/// Length of the leading header fields retained on the wire (version,
/// traffic class, flow label, payload length, next header, hop limit).
const RETAINED_PREFIX_LEN: usize = 8;
/// Length of the elided source+destination address pair.
const ELIDED_ADDR_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum IpError {
    #[error("packet shorter than a full IPv6 header ({0} bytes)")]
    Truncated(usize),

    #[error("elided MAC payload shorter than the retained header prefix")]
    MalformedPayload,

    #[error("odd-length hex payload")]
    OddLengthHex,

    #[error("invalid hex digit in payload")]
    InvalidHex,

    #[error(transparent)]
    Mac(#[from] MacError),
}

/// Convert a LoRa address into its IPv6 representation in the `fd00::/8`
/// ULA prefix.
pub fn lora_to_ipv6(addr: LoraAddr) -> Ipv6Addr {
    let mut bytes = [0u8; 16];
    bytes[0] = 0xFD;
    bytes[7] = addr.prefix;
    bytes[8..14].copy_from_slice(&COMMON_LINK_ADDR_PART);
    bytes[14] = (addr.node_id >> 8) as u8;
    bytes[15] = (addr.node_id & 0xFF) as u8;
    Ipv6Addr::from(bytes)
}

/// Recover the LoRa address carried in an IPv6 address built by
/// [`lora_to_ipv6`]. Total: every byte pattern decodes to some `LoraAddr`.
pub fn ipv6_to_lora(addr: Ipv6Addr) -> LoraAddr {
    let bytes = addr.octets();
    let prefix = bytes[7];
    let node_id = u16::from_be_bytes([bytes[14], bytes[15]]);
    LoraAddr::new(prefix, node_id)
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}

fn hex_decode(hex: &str) -> Result<Vec<u8>, IpError> {
    if hex.len() % 2 != 0 {
        return Err(IpError::OddLengthHex);
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| IpError::InvalidHex))
        .collect()
}

/// A full IPv6 packet: header plus payload, carried as raw bytes. The
/// crate does not interpret next-header chains or extension headers; it
/// only needs the fixed 40-byte header layout to elide/reconstruct
/// addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipv6Packet {
    bytes: Vec<u8>,
}

impl Ipv6Packet {
    /// Wrap raw bytes as an IPv6 packet, checking only that it is at
    /// least a full header long.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, IpError> {
        if bytes.len() < IPV6_HEADER_LEN {
            return Err(IpError::Truncated(bytes.len()));
        }
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn src(&self) -> Ipv6Addr {
        let mut octets = [0u8; 16];
        octets.copy_from_slice(&self.bytes[8..24]);
        Ipv6Addr::from(octets)
    }

    pub fn dst(&self) -> Ipv6Addr {
        let mut octets = [0u8; 16];
        octets.copy_from_slice(&self.bytes[24..40]);
        Ipv6Addr::from(octets)
    }

    /// Elide the 32 address bytes, producing the hex-ASCII MAC payload and
    /// the LoRa source/destination addresses derived from the packet's
    /// IPv6 addresses.
    pub fn serialize(&self) -> (String, LoraAddr, LoraAddr) {
        let src = ipv6_to_lora(self.src());
        let dst = ipv6_to_lora(self.dst());

        let mut elided = Vec::with_capacity(self.bytes.len() - ELIDED_ADDR_LEN);
        elided.extend_from_slice(&self.bytes[0..RETAINED_PREFIX_LEN]);
        elided.extend_from_slice(&self.bytes[RETAINED_PREFIX_LEN + ELIDED_ADDR_LEN..]);

        (hex_encode(&elided), src, dst)
    }

    /// Re-synthesize a full IPv6 packet from a MAC payload that had its
    /// addresses elided, plus the LoRa source/destination that carried it.
    pub fn build(hex_payload: &str, src: LoraAddr, dst: LoraAddr) -> Result<Self, IpError> {
        let elided = hex_decode(hex_payload)?;
        if elided.len() < RETAINED_PREFIX_LEN {
            return Err(IpError::MalformedPayload);
        }

        let mut bytes = Vec::with_capacity(elided.len() + ELIDED_ADDR_LEN);
        bytes.extend_from_slice(&elided[0..RETAINED_PREFIX_LEN]);
        bytes.extend_from_slice(&lora_to_ipv6(src).octets());
        bytes.extend_from_slice(&lora_to_ipv6(dst).octets());
        bytes.extend_from_slice(&elided[RETAINED_PREFIX_LEN..]);

        Self::from_bytes(bytes)
    }
}

/// IP adaptation layer: sits above [`MacLayer`], translating between
/// IPv6 packets and the (addr, hex-payload) shape the MAC layer moves.
pub struct IpLayer {
    mac: Arc<MacLayer>,
    root_lora_addr: LoraAddr,
}

impl IpLayer {
    /// Wrap a MAC layer. Does not itself register the upward listener;
    /// call [`Self::register_listener`].
    pub fn new(mac: Arc<MacLayer>, root_lora_addr: LoraAddr) -> Arc<Self> {
        Arc::new(Self {
            mac,
            root_lora_addr,
        })
    }

    /// This root's own address, translated into the `fd00::/8` space.
    pub fn node_ip_addr(&self) -> Ipv6Addr {
        lora_to_ipv6(self.root_lora_addr)
    }

    /// This root's own LoRa address.
    pub fn node_lora_addr(&self) -> LoraAddr {
        self.root_lora_addr
    }

    /// Install the sink that receives fully-rebuilt IPv6 packets arriving
    /// from any child.
    pub fn register_listener(self: &Arc<Self>, sink: Box<dyn Fn(Ipv6Packet) + Send + Sync>) {
        let layer = Arc::clone(self);
        let forward: PayloadSink = Box::new(move |src, payload_hex| {
            match Ipv6Packet::build(&payload_hex, src, layer.root_lora_addr) {
                Ok(packet) => sink(packet),
                Err(err) => warn!(?err, %src, "failed to rebuild IPv6 packet, dropping"),
            }
        });
        self.mac.register_listener(forward);
    }

    /// Elide `packet`'s addresses and hand the result to the MAC layer
    /// for radio delivery. Blocks if the destination child's downlink
    /// buffer is full; fails fast if the destination is not a joined
    /// child.
    pub fn send(&self, packet: &Ipv6Packet) -> Result<(), IpError> {
        let (payload, _src, dst) = packet.serialize();
        debug!(%dst, "IP TX");
        self.mac.mac_send(dst, payload)?;
        Ok(())
    }
}
