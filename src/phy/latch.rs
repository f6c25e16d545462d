// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Half-duplex arbitration latch.
//!
//! A single lock-protected boolean pair models the two-state radio
//! arbitration of §5: `can_send` is false while a UART command is
//! outstanding and becomes true only when its terminal response is
//! parsed; `listening` is true only between issuing `radio rx` and
//! observing `radio_rx`/`radio_err`. The TX worker blocks on a condvar
//! until `can_send` flips true; the lock is held only for flag updates,
//! never across I/O, per §5's locking discipline.

use parking_lot::{Condvar, Mutex};

/// Lock-protected `can_send`/`listening` pair, shared between the UART
/// TX and RX workers.
#[derive(Debug)]
pub struct CanSendLatch {
    can_send: Mutex<bool>,
    condvar: Condvar,
    listening: Mutex<bool>,
}

impl CanSendLatch {
    /// Start with sending permitted and the radio not listening.
    pub fn new() -> Self {
        Self {
            can_send: Mutex::new(true),
            condvar: Condvar::new(),
            listening: Mutex::new(false),
        }
    }

    /// Block the calling (TX worker) thread until a command may be sent.
    pub fn wait_until_can_send(&self) {
        let mut can_send = self.can_send.lock();
        while !*can_send {
            self.condvar.wait(&mut can_send);
        }
        *can_send = false;
    }

    /// Release the latch: a terminal response for the outstanding command
    /// was observed. Called from the RX worker.
    pub fn release(&self) {
        *self.can_send.lock() = true;
        self.condvar.notify_one();
    }

    /// Set the `listening` flag.
    pub fn set_listening(&self, value: bool) {
        *self.listening.lock() = value;
    }

    /// Read the `listening` flag.
    pub fn listening(&self) -> bool {
        *self.listening.lock()
    }
}

impl Default for CanSendLatch {
    fn default() -> Self {
        Self::new()
    }
}
