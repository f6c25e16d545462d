// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! LoRaMAC gateway core.
//!
//! Drives a long-range radio modem over a UART link, implements a custom
//! polling MAC protocol ("LoRaMAC") that schedules a single half-duplex
//! channel across many child nodes, and presents an IPv6-packet interface
//! so that standard UDP/IPv6 applications can exchange datagrams with
//! distant microcontrollers over the star network.
//!
//! # Layers
//!
//! - [`phy`] — the UART command/response state machine against the modem.
//! - [`mac`] — child registry, join handshake, sequencing, retransmission,
//!   downlink queueing.
//! - [`ip`] — LoRa <-> IPv6 address mapping and header elision.
//! - [`stack`] — [`GatewayStack`], the assembled object an embedding
//!   application constructs once at startup.
//!
//! This crate is a library: the application layer (ping/pong, UDP echo),
//! logging configuration, CLI argument handling, and serial-port
//! passthrough for debugging are left to the binary that embeds it.
//!
//! # Quick start
//!
//! ```no_run
//! use loramac_gateway::config::GatewayConfig;
//! use loramac_gateway::stack::GatewayStack;
//!
//! let config = GatewayConfig::default();
//! let stack = GatewayStack::new(&config).expect("open serial port");
//! stack.register_listener(Box::new(|packet| {
//!     println!("received {} bytes from {}", packet.as_bytes().len(), packet.src());
//! }));
//! stack.start(&config).expect("start PHY");
//! ```

pub mod config;
pub mod frame;
pub mod ip;
pub mod mac;
pub mod phy;
pub mod stack;

pub use config::{ConfigError, GatewayConfig};
pub use frame::{LoraAddr, LoraFrame, MacCommand};
pub use ip::{ipv6_to_lora, lora_to_ipv6, IpError, IpLayer, Ipv6Packet};
pub use mac::{MacError, MacLayer};
pub use phy::{PhyDriver, PhyError};
pub use stack::{GatewayStack, StackError};
