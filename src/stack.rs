// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Stack assembly: the glue that owns a [`PhyDriver`] + [`MacLayer`] +
//! [`IpLayer`] and presents the upper-layer surface of §6 — registering a
//! listener, sending IPv6 packets, and reading this node's own addresses.
//!
//! The source exposes this as a single process-wide singleton; per §9's
//! design note, this port makes it an explicit owned object constructed
//! once at startup and handed to upper layers by reference. There is no
//! hidden global state.

use crate::config::GatewayConfig;
use crate::ip::{IpError, IpLayer, Ipv6Packet};
use crate::mac::{MacLayer, ROOT_ADDR};
use crate::phy::{open_serial, LineReader, LineWriter, PhyDriver};
use std::net::Ipv6Addr;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum StackError {
    #[error("failed to open serial port: {0}")]
    Serial(#[from] std::io::Error),

    #[error(transparent)]
    Ip(#[from] IpError),
}

/// The assembled gateway: PHY driver, MAC layer, and IP adaptation wired
/// together over one serial link.
pub struct GatewayStack {
    phy: Arc<PhyDriver>,
    ip: Arc<IpLayer>,
}

impl GatewayStack {
    /// Open the configured serial port and assemble the full stack, but
    /// do not yet send any configuration commands or arm reception — call
    /// [`Self::start`] for that. Splitting construction from start lets
    /// tests substitute a loopback line via [`Self::from_line`].
    pub fn new(config: &GatewayConfig) -> Result<Self, StackError> {
        let (reader, writer) = open_serial(&config.port, config.baudrate)?;
        Ok(Self::from_line(config, reader, writer))
    }

    /// Assemble the stack over an already-opened line (real or, in
    /// tests, a loopback pair).
    pub fn from_line(
        config: &GatewayConfig,
        reader: Box<dyn LineReader>,
        writer: Box<dyn LineWriter>,
    ) -> Self {
        let phy = Arc::new(PhyDriver::new(config, reader, writer));
        let mac = MacLayer::new(Arc::clone(&phy));
        let ip = IpLayer::new(mac, ROOT_ADDR);
        Self { phy, ip }
    }

    /// Push the modem configuration commands of §4.1 and arm the first
    /// receive window. Idempotent calls are not supported — call once.
    pub fn start(&self, config: &GatewayConfig) -> Result<(), StackError> {
        info!(port = %config.port, baud = config.baudrate, "starting gateway stack");
        self.phy.init(config)?;
        self.phy.rx_enable()?;
        Ok(())
    }

    /// Install the sink that receives fully-rebuilt IPv6 packets arriving
    /// from any child.
    pub fn register_listener(&self, sink: Box<dyn Fn(Ipv6Packet) + Send + Sync>) {
        self.ip.register_listener(sink);
    }

    /// Enqueue an IPv6 packet for radio delivery. Blocks if the
    /// destination child's downlink buffer is full; fails fast if no
    /// such child is registered.
    pub fn send(&self, packet: &Ipv6Packet) -> Result<(), StackError> {
        self.ip.send(packet)?;
        Ok(())
    }

    /// This node's own address in the `fd00::/8` space.
    pub fn node_ip_addr(&self) -> Ipv6Addr {
        self.ip.node_ip_addr()
    }

    /// This node's own LoRa address.
    pub fn node_lora_addr(&self) -> crate::frame::LoraAddr {
        self.ip.node_lora_addr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::LoraAddr;
    use crate::phy::loopback_pair;

    #[test]
    fn node_addresses_reflect_the_fixed_root_address() {
        let config = GatewayConfig::default();
        let ((reader, writer), _controller) = loopback_pair();
        let stack = GatewayStack::from_line(&config, reader, writer);
        assert_eq!(stack.node_lora_addr(), LoraAddr::new(1, 0));
        assert_eq!(stack.node_ip_addr().octets()[7], 1);
    }

    #[test]
    fn start_issues_the_configuration_sequence() {
        let config = GatewayConfig::default();
        let ((reader, writer), controller) = loopback_pair();
        let stack = GatewayStack::from_line(&config, reader, writer);
        stack.start(&config).expect("start");

        let pause = controller.recv_written().expect("mac pause");
        assert_eq!(pause, "mac pause");
        controller.inject("4294967245");

        for _ in 0..6 {
            let cmd = controller.recv_written().expect("radio set command");
            assert!(cmd.starts_with("radio set"));
            controller.inject("ok");
        }

        let rx_cmd = controller.recv_written().expect("rx command");
        assert_eq!(rx_cmd, "radio rx 0");
    }
}
