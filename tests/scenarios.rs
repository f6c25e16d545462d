// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! End-to-end scenarios driving the assembled [`GatewayStack`] through a
//! fake serial line, covering the concrete scenarios enumerated in the
//! protocol specification: join handshake, duplicate-frame retransmission,
//! retransmit exhaustion, JOIN-retransmission eviction, downlink draining
//! on QUERY, and prefix-space exhaustion.

use loramac_gateway::config::GatewayConfig;
use loramac_gateway::frame::{LoraAddr, LoraFrame, MacCommand};
use loramac_gateway::ip::{lora_to_ipv6, Ipv6Packet};
use loramac_gateway::phy::{loopback_pair, LoopbackController};
use loramac_gateway::stack::GatewayStack;
use std::time::Duration;

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// Install a `tracing` subscriber that writes to the test harness's
/// captured output, so `RUST_LOG=debug cargo test -- --nocapture` shows
/// the protocol trace for a failing scenario.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Assemble a stack over a loopback line and drive it through the startup
/// handshake (`mac pause` + the `radio set ...` sequence), leaving the
/// first `radio rx 0` outstanding so the caller can inject inbound lines.
fn start_stack() -> (GatewayStack, LoopbackController) {
    init_tracing();
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

    let rx_cmd = controller.recv_written().expect("initial rx window");
    assert_eq!(rx_cmd, "radio rx 0");

    (stack, controller)
}

/// Decode the `<hex>` frame out of a `radio tx <hex>` line written by the
/// driver.
fn frame_from_tx_line(line: &str) -> LoraFrame {
    let hex = line.strip_prefix("radio tx ").expect("radio tx line");
    LoraFrame::from_hex(hex).expect("well-formed frame")
}

/// Inject an inbound `radio_rx` line carrying `frame`, matching the
/// modem's two-space separator.
fn inject_frame(controller: &LoopbackController, frame: &LoraFrame) {
    controller.inject(format!("radio_rx  {}", frame.to_hex()));
}

fn minimal_ipv6_packet(src: LoraAddr, dst: LoraAddr, payload: &[u8]) -> Ipv6Packet {
    let mut bytes = vec![0u8; 40];
    bytes[0] = 0x60; // version 6
    bytes[6] = 17; // next header: UDP
    bytes[7] = 64; // hop limit
    bytes[8..24].copy_from_slice(&lora_to_ipv6(src).octets());
    bytes[24..40].copy_from_slice(&lora_to_ipv6(dst).octets());
    bytes.extend_from_slice(payload);
    Ipv6Packet::from_bytes(bytes).expect("valid header")
}

/// Scenario 1: a child joins, then sends its first post-join data frame.
#[test]
fn join_then_first_data_delivers_ipv6_packet() {
    let (stack, controller) = start_stack();
    let (tx, rx) = crossbeam::channel::unbounded();
    stack.register_listener(Box::new(move |packet| {
        let _ = tx.send(packet);
    }));

    let join = LoraFrame::new(
        LoraAddr::new(0x5B, 0x015B),
        LoraAddr::new(0x01, 0x0000),
        MacCommand::Join,
        0,
        "",
    );
    inject_frame(&controller, &join);

    let join_response_line = controller.recv_written().expect("JOIN_RESPONSE sent");
    let join_response = frame_from_tx_line(&join_response_line);
    assert_eq!(join_response.command, MacCommand::JoinResponse);
    assert_eq!(join_response.payload, "02");
    assert_eq!(join_response.dst, LoraAddr::new(0x02, 0x015B));
    controller.inject("radio_tx_ok");

    let rearm = controller.recv_written().expect("rx rearm");
    assert_eq!(rearm, "radio rx 0");

    let child_addr = LoraAddr::new(0x02, 0x015B);
    let root_addr = LoraAddr::new(0x01, 0x0000);
    let uplink_packet = minimal_ipv6_packet(child_addr, root_addr, b"Hello");
    let (elided_hex, _src, _dst) = uplink_packet.serialize();

    let data = LoraFrame::new(child_addr, root_addr, MacCommand::Data, 1, elided_hex);
    inject_frame(&controller, &data);

    let packet = rx.recv_timeout(RECV_TIMEOUT).expect("packet delivered");
    assert_eq!(packet.src(), lora_to_ipv6(child_addr));
    assert_eq!(&packet.as_bytes()[40..], b"Hello");

    // DATA had no K bit set, so no ack is owed; only the rearm follows.
    let next = controller.recv_written().expect("rx rearm after data");
    assert_eq!(next, "radio rx 0");
}

/// Drives a fresh stack through JOIN and a first DATA frame that requests
/// an explicit ACK (`k=true`), leaving `last_sent` populated so later
/// duplicates have something to retransmit.
fn joined_child_expecting_ack() -> (
    GatewayStack,
    LoopbackController,
    crossbeam::channel::Receiver<Ipv6Packet>,
    LoraFrame,
) {
    let (stack, controller) = start_stack();
    let (tx, rx) = crossbeam::channel::unbounded();
    stack.register_listener(Box::new(move |packet| {
        let _ = tx.send(packet);
    }));

    let join = LoraFrame::new(
        LoraAddr::new(0x5B, 0x015B),
        LoraAddr::new(0x01, 0x0000),
        MacCommand::Join,
        0,
        "",
    );
    inject_frame(&controller, &join);
    controller.recv_written().expect("JOIN_RESPONSE sent");
    controller.inject("radio_tx_ok");
    controller.recv_written().expect("rx rearm");

    let child_addr = LoraAddr::new(0x02, 0x015B);
    let root_addr = LoraAddr::new(0x01, 0x0000);
    let uplink_packet = minimal_ipv6_packet(child_addr, root_addr, b"Hello");
    let (elided_hex, _src, _dst) = uplink_packet.serialize();

    let data = LoraFrame::new(child_addr, root_addr, MacCommand::Data, 1, elided_hex).with_k(true);
    inject_frame(&controller, &data);

    let ack_line = controller.recv_written().expect("ACK sent for k=1 data");
    let ack = frame_from_tx_line(&ack_line);
    assert_eq!(ack.command, MacCommand::Ack);
    assert_eq!(ack.seq, 1);
    controller.inject("radio_tx_ok");
    controller.recv_written().expect("rx rearm");

    rx.recv_timeout(RECV_TIMEOUT).expect("first data delivered");

    (stack, controller, rx, data)
}

/// Scenario 2: a duplicate of an already-processed frame causes the
/// stored `last_sent` to be retransmitted, not a second upward delivery.
#[test]
fn duplicate_data_triggers_retransmit() {
    let (_stack, controller, rx, data) = joined_child_expecting_ack();

    inject_frame(&controller, &data);
    let retransmit_line = controller.recv_written().expect("retransmit sent");
    let retransmit = frame_from_tx_line(&retransmit_line);
    assert_eq!(retransmit.command, MacCommand::Ack);
    assert_eq!(retransmit.seq, 1);
    controller.inject("radio_tx_ok");
    controller.recv_written().expect("rx rearm");

    assert!(
        rx.try_recv().is_err(),
        "duplicate must not deliver a second packet upward"
    );
}

/// Scenario 3: once `MAX_RETRANSMIT` (3) retransmissions have been spent
/// on a duplicate, the next duplicate is dropped silently: no frame is
/// written to the wire, only the receive window is re-armed.
#[test]
fn retransmit_exhaustion_drops_silently() {
    let (_stack, controller, rx, data) = joined_child_expecting_ack();

    for attempt in 1..=3 {
        inject_frame(&controller, &data);
        let line = controller
            .recv_written()
            .unwrap_or_else(|| panic!("retransmit {attempt} expected"));
        assert!(line.starts_with("radio tx"), "attempt {attempt}: {line}");
        controller.inject("radio_tx_ok");
        controller.recv_written().expect("rx rearm");
    }

    // fourth duplicate: transmit_count has hit MAX_RETRANSMIT, so the
    // retransmit is given up on. The only line written is the rearm.
    inject_frame(&controller, &data);
    let line = controller.recv_written().expect("only rearm expected");
    assert_eq!(line, "radio rx 0");

    assert!(rx.try_recv().is_err());
}

/// Scenario 4: a child that keeps retransmitting its JOIN without ever
/// completing the handshake (no `seq=1` frame) is evicted once
/// `MAX_RETRANSMIT` JOIN retransmissions have been observed. A JOIN
/// arriving afterwards from the same transient prefix is treated as
/// brand new and gets the next prefix in sequence.
#[test]
fn join_retransmission_exhaustion_evicts_then_reissues() {
    let (_stack, controller) = start_stack();

    let join = LoraFrame::new(
        LoraAddr::new(0x7A, 0x017A),
        LoraAddr::new(0x01, 0x0000),
        MacCommand::Join,
        0,
        "",
    );
    inject_frame(&controller, &join);
    let first_response = frame_from_tx_line(&controller.recv_written().expect("JOIN_RESPONSE"));
    assert_eq!(first_response.payload, "02");
    controller.inject("radio_tx_ok");
    controller.recv_written().expect("rearm");

    // two further retransmissions of the same JOIN, still no eviction
    for _ in 0..2 {
        inject_frame(&controller, &join);
        let resend = frame_from_tx_line(&controller.recv_written().expect("resend"));
        assert_eq!(resend.payload, "02");
        controller.inject("radio_tx_ok");
        controller.recv_written().expect("rearm");
    }

    // fourth JOIN from the same source: transmit_count has reached
    // MAX_RETRANSMIT, the child is evicted, nothing is sent.
    inject_frame(&controller, &join);
    let line = controller.recv_written().expect("only rearm expected");
    assert_eq!(line, "radio rx 0");

    // a fresh JOIN from the same transient prefix is now unknown to the
    // registry and gets the next prefix in the allocation sequence.
    inject_frame(&controller, &join);
    let fresh_response = frame_from_tx_line(&controller.recv_written().expect("fresh JOIN_RESPONSE"));
    assert_eq!(fresh_response.payload, "03");
}

/// Scenario 5: three packets queued for a joined child are drained one
/// per QUERY, the first two carrying the "more data" bit and the last
/// one clearing it.
#[test]
fn downlink_drains_on_query() {
    let (stack, controller) = start_stack();

    let join = LoraFrame::new(
        LoraAddr::new(0x5B, 0x015B),
        LoraAddr::new(0x01, 0x0000),
        MacCommand::Join,
        0,
        "",
    );
    inject_frame(&controller, &join);
    controller.recv_written().expect("JOIN_RESPONSE");
    controller.inject("radio_tx_ok");
    controller.recv_written().expect("rearm");

    let child_addr = LoraAddr::new(0x02, 0x015B);
    for i in 0..3u8 {
        let packet = minimal_ipv6_packet(
            stack.node_lora_addr(),
            child_addr,
            &[b'A' + i],
        );
        stack.send(&packet).expect("enqueue downlink");
    }

    let mut seqs = Vec::new();
    let mut mores = Vec::new();
    for query_seq in 1..=3u8 {
        let query = LoraFrame::new(child_addr, LoraAddr::new(0x01, 0x0000), MacCommand::Query, query_seq, "");
        inject_frame(&controller, &query);
        let sent = frame_from_tx_line(&controller.recv_written().expect("downlink frame"));
        assert_eq!(sent.command, MacCommand::Data);
        seqs.push(sent.seq);
        mores.push(sent.more);
        controller.inject("radio_tx_ok");
        controller.recv_written().expect("rearm");
    }

    assert_eq!(seqs, vec![1, 2, 3]);
    assert_eq!(mores, vec![true, true, false]);
}

/// Scenario 6: the prefix space holds `MAX_PREFIX - MIN_PREFIX + 1 = 251`
/// children (`0x02..=0xFC`); the join that would need the 252nd prefix is
/// refused outright — no JOIN_RESPONSE, no child record.
#[test]
fn prefix_exhaustion_refuses_further_joins() {
    let (_stack, controller) = start_stack();

    const ALLOCATABLE: u16 = 251; // 0xFC - 0x02 + 1

    for i in 0..ALLOCATABLE {
        let join = LoraFrame::new(
            LoraAddr::new(i as u8, i),
            LoraAddr::new(0x01, 0x0000),
            MacCommand::Join,
            0,
            "",
        );
        inject_frame(&controller, &join);
        let response = frame_from_tx_line(&controller.recv_written().expect("JOIN_RESPONSE"));
        assert_eq!(response.command, MacCommand::JoinResponse);
        assert_eq!(response.payload, format!("{:02X}", 2 + i));
        controller.inject("radio_tx_ok");
        controller.recv_written().expect("rearm");
    }

    // one more distinct source: the prefix counter has exceeded MAX_PREFIX.
    let refused = LoraFrame::new(
        LoraAddr::new(ALLOCATABLE as u8, ALLOCATABLE),
        LoraAddr::new(0x01, 0x0000),
        MacCommand::Join,
        0,
        "",
    );
    inject_frame(&controller, &refused);
    let line = controller.recv_written().expect("only rearm expected");
    assert_eq!(line, "radio rx 0");
}
