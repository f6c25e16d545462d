// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! MAC layer: child registry, join handshake, per-child sequence numbering,
//! retransmission, and downlink queueing over a [`PhyDriver`].
//!
//! A single worker thread owns both child registries (`childs`, keyed by
//! assigned prefix, and `pending`, a transient-prefix → assigned-prefix
//! index used only during the join handshake) and pulls frames off
//! [`PhyDriver::take_frame`]. Upper-layer sends go through
//! [`MacLayer::mac_send`], which only ever touches a child's downlink
//! channel — never the registries directly — so it needs no coordination
//! with the worker beyond the channel's own backpressure.

use crate::frame::{LoraAddr, LoraFrame, MacCommand};
use crate::phy::PhyDriver;
use crossbeam::channel::{bounded, Receiver, Sender};
use parking_lot::Mutex as PLMutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use thiserror::Error;
use tracing::{debug, warn};

/// Root's own address.
pub const ROOT_ADDR: LoraAddr = LoraAddr::new(ROOT_PREFIX, ROOT_ID);
const ROOT_PREFIX: u8 = 1;
const ROOT_ID: u16 = 0;
const MIN_PREFIX: u8 = 2;
const MAX_PREFIX: u8 = 0xFC;
const MAX_RETRANSMIT: u32 = 3;
const CHILD_TX_BUF_CAPACITY: usize = 5;

#[derive(Debug, Error)]
pub enum MacError {
    #[error("no child registered for {0}")]
    Unreachable(LoraAddr),
}

/// Sink for payloads reaching the root from a child, forwarded on to IP
/// adaptation.
pub type PayloadSink = Box<dyn Fn(LoraAddr, String) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SeqOutcome {
    /// In order, or a gap was skipped — process the frame.
    Process,
    /// Duplicate or stale arrival — retransmit the last downlink.
    Retransmit,
}

/// Apply the §4.2.2 sequence-number policy, mutating `expected` in place.
fn apply_seq_policy(expected: &mut u8, observed: u8) -> SeqOutcome {
    if observed == *expected {
        *expected = expected.wrapping_add(1);
        SeqOutcome::Process
    } else if (*expected == 0 && observed == 255) || observed < *expected {
        SeqOutcome::Retransmit
    } else {
        *expected = observed.wrapping_add(1);
        SeqOutcome::Process
    }
}

struct Child {
    addr: LoraAddr,
    expected_sn: u8,
    next_sn: u8,
    last_sent: Option<LoraFrame>,
    transmit_count: u32,
    not_send_count: u64,
    tx_tx: Sender<LoraFrame>,
    tx_rx: Receiver<LoraFrame>,
    /// Mirrors the number of frames currently sitting in `tx_rx`; `tx_rx`
    /// itself offers no non-destructive peek, so `mac_send` and
    /// `handle_query` keep this count in step to derive the downlink `N`
    /// ("more data queued") bit without consuming an extra frame.
    queued: Arc<AtomicUsize>,
}

impl Child {
    fn new(addr: LoraAddr) -> Self {
        let (tx_tx, tx_rx) = bounded(CHILD_TX_BUF_CAPACITY);
        Self {
            addr,
            expected_sn: 1,
            next_sn: 0,
            last_sent: None,
            transmit_count: 0,
            not_send_count: 0,
            tx_tx,
            tx_rx,
            queued: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Allocate the next downlink sequence number, post-incrementing.
    fn take_next_sn(&mut self) -> u8 {
        let sn = self.next_sn;
        self.next_sn = self.next_sn.wrapping_add(1);
        sn
    }
}

struct MacInner {
    childs: HashMap<u8, Child>,
    /// transient (low byte of node id) -> assigned prefix, live only until
    /// the child's first `seq == 1` frame.
    pending: HashMap<u8, u8>,
    next_prefix: u8,
}

impl MacInner {
    fn new() -> Self {
        Self {
            childs: HashMap::new(),
            pending: HashMap::new(),
            next_prefix: MIN_PREFIX,
        }
    }

    fn is_fully_joined(&self, node_id: u16) -> bool {
        self.childs.values().any(|c| c.addr.node_id == node_id)
    }

    fn complete_join_if_due(&mut self, prefix: u8, seq: u8) {
        if seq != 1 {
            return;
        }
        self.pending.retain(|_, assigned| *assigned != prefix);
        if let Some(child) = self.childs.get_mut(&prefix) {
            child.transmit_count = 0;
        }
    }
}

pub struct MacLayer {
    phy: Arc<PhyDriver>,
    inner: PLMutex<MacInner>,
    listener: PLMutex<Option<PayloadSink>>,
}

impl MacLayer {
    /// Construct the layer and start its RX worker, which owns both child
    /// registries for the lifetime of the process.
    pub fn new(phy: Arc<PhyDriver>) -> Arc<Self> {
        let mac = Arc::new(Self {
            phy,
            inner: PLMutex::new(MacInner::new()),
            listener: PLMutex::new(None),
        });
        let worker = Arc::clone(&mac);
        thread::spawn(move || worker.rx_loop());
        mac
    }

    /// Install the sink that receives `(source, payload_hex)` for every
    /// frame carrying data upward.
    pub fn register_listener(&self, sink: PayloadSink) {
        *self.listener.lock() = Some(sink);
    }

    /// Enqueue `payload` for delivery to the child at `dest`. Blocks if
    /// that child's downlink buffer is full; fails fast if no such child
    /// is registered.
    pub fn mac_send(&self, dest: LoraAddr, payload: String) -> Result<(), MacError> {
        let (sender, queued) = {
            let inner = self.inner.lock();
            inner
                .childs
                .get(&dest.prefix)
                .map(|c| (c.tx_tx.clone(), Arc::clone(&c.queued)))
                .ok_or(MacError::Unreachable(dest))?
        };
        let frame = LoraFrame::new(ROOT_ADDR, dest, MacCommand::Data, 0, payload);
        sender
            .send(frame)
            .map_err(|_| MacError::Unreachable(dest))?;
        queued.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn rx_loop(self: Arc<Self>) {
        loop {
            let Some(frame) = self.phy.take_frame() else {
                return;
            };
            self.handle_frame(frame);
            if let Err(err) = self.phy.rx_enable() {
                warn!(?err, "failed to re-arm receive window");
            }
        }
    }

    fn handle_frame(&self, frame: LoraFrame) {
        match frame.command {
            MacCommand::Join => self.handle_join(&frame),
            MacCommand::Query => self.handle_query(&frame),
            MacCommand::Data => self.handle_data(&frame),
            MacCommand::Ack | MacCommand::JoinResponse => {
                debug!(?frame.command, "unexpected command from child, ignoring");
            }
        }
    }

    fn handle_join(&self, frame: &LoraFrame) {
        if frame.seq != 0 {
            debug!(seq = frame.seq, "JOIN with nonzero seq, dropping");
            return;
        }
        let transient = frame.src.prefix;
        let node_id = frame.src.node_id;
        let mut inner = self.inner.lock();

        if inner.is_fully_joined(node_id) {
            debug!(%node_id, "JOIN from already-joined child, ignoring");
            return;
        }

        if let Some(&assigned) = inner.pending.get(&transient) {
            let resend = inner.childs.get_mut(&assigned).map(|c| {
                c.transmit_count += 1;
                (c.transmit_count, c.last_sent.clone())
            });
            let Some((transmit_count, last_sent)) = resend else {
                inner.pending.remove(&transient);
                return;
            };
            if transmit_count >= MAX_RETRANSMIT {
                inner.pending.remove(&transient);
                inner.childs.remove(&assigned);
                debug!(prefix = assigned, "JOIN retransmit exhausted, evicting child");
                return;
            }
            drop(inner);
            if let Some(last_sent) = last_sent {
                if let Err(err) = self.phy.send_frame(&last_sent) {
                    warn!(?err, "failed to resend JOIN_RESPONSE");
                }
            }
            return;
        }

        if inner.next_prefix > MAX_PREFIX {
            debug!("prefix space exhausted, refusing JOIN");
            return;
        }

        let assigned = inner.next_prefix;
        inner.next_prefix += 1;
        let addr = LoraAddr::new(assigned, node_id);

        let mut child = Child::new(addr);
        let response = LoraFrame::new(
            ROOT_ADDR,
            addr,
            MacCommand::JoinResponse,
            child.take_next_sn(),
            format!("{:02X}", assigned),
        );
        child.last_sent = Some(response.clone());
        inner.childs.insert(assigned, child);
        inner.pending.insert(transient, assigned);
        drop(inner);

        if let Err(err) = self.phy.send_frame(&response) {
            warn!(?err, "failed to send JOIN_RESPONSE");
        }
    }

    fn handle_query(&self, frame: &LoraFrame) {
        let prefix = frame.src.prefix;
        let mut inner = self.inner.lock();
        inner.complete_join_if_due(prefix, frame.seq);

        let Some(child) = inner.childs.get_mut(&prefix) else {
            debug!(prefix, "QUERY from unknown child, ignoring");
            return;
        };

        let outcome = apply_seq_policy(&mut child.expected_sn, frame.seq);
        if outcome == SeqOutcome::Retransmit {
            self.retransmit(child);
            return;
        }

        let payload_for_listener = (!frame.payload.is_empty()).then(|| frame.payload.clone());
        let src = child.addr;

        let next = child.tx_rx.try_recv().ok();
        let to_send = match next {
            Some(mut pending) => {
                child.queued.fetch_sub(1, Ordering::SeqCst);
                pending.seq = child.take_next_sn();
                pending.more = child.queued.load(Ordering::SeqCst) > 0;
                pending
            }
            None => LoraFrame::new(ROOT_ADDR, child.addr, MacCommand::Ack, frame.seq, ""),
        };
        child.last_sent = Some(to_send.clone());
        child.transmit_count = 0;
        drop(inner);

        if let Some(payload) = payload_for_listener {
            self.deliver(src, payload);
        }
        if let Err(err) = self.phy.send_frame(&to_send) {
            warn!(?err, "failed to send QUERY response");
        }
    }

    fn handle_data(&self, frame: &LoraFrame) {
        let prefix = frame.src.prefix;
        let mut inner = self.inner.lock();
        inner.complete_join_if_due(prefix, frame.seq);

        let Some(child) = inner.childs.get_mut(&prefix) else {
            debug!(prefix, "DATA from unknown child, ignoring");
            return;
        };

        let outcome = apply_seq_policy(&mut child.expected_sn, frame.seq);
        if outcome == SeqOutcome::Retransmit {
            self.retransmit(child);
            return;
        }

        let src = child.addr;
        let ack = if frame.k {
            let ack = LoraFrame::new(ROOT_ADDR, child.addr, MacCommand::Ack, frame.seq, "");
            child.last_sent = Some(ack.clone());
            child.transmit_count = 0;
            Some(ack)
        } else {
            child.last_sent = None;
            None
        };
        drop(inner);

        self.deliver(src, frame.payload.clone());
        if let Some(ack) = ack {
            if let Err(err) = self.phy.send_frame(&ack) {
                warn!(?err, "failed to send DATA ack");
            }
        }
    }

    /// Re-emit a child's stored `last_sent`, or give up once
    /// `MAX_RETRANSMIT` has been reached.
    fn retransmit(&self, child: &mut Child) {
        let Some(last_sent) = child.last_sent.clone() else {
            return;
        };
        if child.transmit_count < MAX_RETRANSMIT {
            child.transmit_count += 1;
            if let Err(err) = self.phy.send_frame(&last_sent) {
                warn!(?err, "retransmit failed");
            }
        } else {
            child.transmit_count = 0;
            child.not_send_count += 1;
            debug!(addr = %child.addr, "retransmit exhausted, dropping");
        }
    }

    fn deliver(&self, src: LoraAddr, payload: String) {
        if let Some(sink) = self.listener.lock().as_ref() {
            sink(src, payload);
        }
    }
}
