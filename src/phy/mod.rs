// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! PHY driver: the UART command/response state machine against the LoRa
//! modem.
//!
//! ```text
//! +-----------+  enqueue   +-----------+  write_line   +--------+
//! | caller    | ---------> | cmd queue | ------------> | modem  |
//! | (init,    |            +-----------+   TX worker   |        |
//! |  send,    |                                        |        |
//! |  rx_enable)            +-----------+  read_line    |        |
//! |           | <--------- | frame     | <------------ |        |
//! +-----------+ take_frame | queue     |   RX worker    +--------+
//!                          +-----------+
//! ```
//!
//! A single [`latch::CanSendLatch`] arbitrates the half-duplex link: the TX
//! worker blocks until `can_send` is set, writes one command line, and the
//! RX worker releases it once that command's terminal response is parsed.
//! `listening` is a second, independent flag: set the instant `radio rx` is
//! enqueued, cleared the instant a `radio_rx`/`radio_err` line is observed —
//! regardless of whether that line happens to be the current command's own
//! terminal response.

mod latch;
mod uart;

pub use latch::CanSendLatch;
pub use uart::{loopback_pair, open_serial, LineReader, LineWriter, LoopbackController};

use crate::config::GatewayConfig;
use crate::frame::LoraFrame;
use crossbeam::channel::{bounded, Receiver, Sender, TryRecvError, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use thiserror::Error;
use tracing::{debug, warn};

/// Length of the `radio_rx  ` response prefix stripped before hex-decoding
/// an inbound frame (`radio_rx` plus the modem's two-space separator).
const ASYNC_PREFIX_LEN: usize = 10;

#[derive(Debug, Error)]
pub enum PhyError {
    #[error("PHY command queue is full")]
    QueueFull,

    #[error("PHY driver has shut down")]
    Closed,

    #[error("serial I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The set of modem response lines that terminate a given outstanding
/// command, per §4.1's vocabulary table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Acceptable {
    /// `radio set …` commands: a bare `ok`.
    Ok,
    /// `mac pause`: a large unsigned integer.
    Numeric,
    /// `radio tx`: `radio_tx_ok` or `radio_err`.
    TxTerminal,
    /// `radio rx`: `radio_rx <hex>` or `radio_err`.
    RxTerminal,
}

impl Acceptable {
    fn matches(self, line: &str) -> bool {
        match self {
            Self::Ok => line == "ok",
            Self::Numeric => !line.is_empty() && line.bytes().all(|b| b.is_ascii_digit()),
            Self::TxTerminal => line == "radio_tx_ok" || line == "radio_err",
            Self::RxTerminal => line.starts_with("radio_rx") || line == "radio_err",
        }
    }
}

/// A command line plus the response pattern that terminates it.
struct PendingCommand {
    line: String,
    acceptable: Acceptable,
}

fn config_commands(config: &GatewayConfig) -> Vec<PendingCommand> {
    vec![
        PendingCommand {
            line: "mac pause".to_string(),
            acceptable: Acceptable::Numeric,
        },
        PendingCommand {
            line: "radio set mod lora".to_string(),
            acceptable: Acceptable::Ok,
        },
        PendingCommand {
            line: format!("radio set freq {}", config.frequency),
            acceptable: Acceptable::Ok,
        },
        PendingCommand {
            line: format!("radio set bw {}", config.bandwidth.as_khz()),
            acceptable: Acceptable::Ok,
        },
        PendingCommand {
            line: format!("radio set cr {}", config.cr.as_str()),
            acceptable: Acceptable::Ok,
        },
        PendingCommand {
            line: format!("radio set pwr {}", config.pwr),
            acceptable: Acceptable::Ok,
        },
        PendingCommand {
            line: format!("radio set sf {}", config.sf.as_str()),
            acceptable: Acceptable::Ok,
        },
    ]
}

/// The PHY driver: owns the command and frame queues and the two worker
/// threads that drive the serial line.
pub struct PhyDriver {
    /// `None` only after `Drop` has closed the channel to unblock the TX
    /// worker; see the `Drop` impl below.
    cmd_tx: Option<Sender<PendingCommand>>,
    frame_rx: Mutex<Receiver<LoraFrame>>,
    latch: Arc<CanSendLatch>,
    // The TX/RX workers are not joined on drop: per §5, there is no
    // cancellation at steady state, and the RX worker's only unblocking
    // point (a serial read) is outside this driver's control. The
    // handles are kept only so `#[allow(dead_code)]` isn't needed and a
    // future graceful-shutdown mode has somewhere to attach.
    #[allow(dead_code)]
    tx_worker: JoinHandle<()>,
    #[allow(dead_code)]
    rx_worker: JoinHandle<()>,
}

impl PhyDriver {
    /// Start the TX and RX workers over an already-opened line. Does not
    /// itself enqueue the configuration commands; call [`Self::init`] for
    /// that.
    pub fn new(
        config: &GatewayConfig,
        reader: Box<dyn LineReader>,
        writer: Box<dyn LineWriter>,
    ) -> Self {
        let latch = Arc::new(CanSendLatch::new());
        let last_sent: Arc<Mutex<Option<PendingCommand>>> = Arc::new(Mutex::new(None));

        let (cmd_tx, cmd_rx) = bounded::<PendingCommand>(config.tx_buf_size);
        let (frame_tx, frame_rx) = bounded::<LoraFrame>(config.rx_buf_size);

        let tx_worker = {
            let latch = Arc::clone(&latch);
            let last_sent = Arc::clone(&last_sent);
            std::thread::spawn(move || tx_loop(writer, cmd_rx, latch, last_sent))
        };

        let rx_worker = {
            let latch = Arc::clone(&latch);
            let last_sent = Arc::clone(&last_sent);
            std::thread::spawn(move || rx_loop(reader, latch, last_sent, frame_tx))
        };

        Self {
            cmd_tx: Some(cmd_tx),
            frame_rx: Mutex::new(frame_rx),
            latch,
            tx_worker,
            rx_worker,
        }
    }

    /// Enqueue `mac pause` followed by the `radio set …` commands of §6, in
    /// order, per §4.1 step 1.
    pub fn init(&self, config: &GatewayConfig) -> Result<(), PhyError> {
        for cmd in config_commands(config) {
            self.enqueue(cmd)?;
        }
        Ok(())
    }

    /// Enqueue a frame for transmission.
    pub fn send_frame(&self, frame: &LoraFrame) -> Result<(), PhyError> {
        self.enqueue(PendingCommand {
            line: format!("radio tx {}", frame.to_hex()),
            acceptable: Acceptable::TxTerminal,
        })
    }

    /// Enqueue a watchdog update; `0` disables it (continuous listen).
    pub fn set_watchdog(&self, ms: u32) -> Result<(), PhyError> {
        self.enqueue(PendingCommand {
            line: format!("radio set wdt {}", ms),
            acceptable: Acceptable::Ok,
        })
    }

    /// Atomically arm `listening` and enqueue a receive window.
    pub fn rx_enable(&self) -> Result<(), PhyError> {
        self.latch.set_listening(true);
        self.enqueue(PendingCommand {
            line: "radio rx 0".to_string(),
            acceptable: Acceptable::RxTerminal,
        })
    }

    /// True between `rx_enable` and the modem's `radio_rx`/`radio_err`.
    pub fn listening(&self) -> bool {
        self.latch.listening()
    }

    /// Block until a decoded frame is available.
    pub fn take_frame(&self) -> Option<LoraFrame> {
        self.frame_rx.lock().unwrap().recv().ok()
    }

    /// Poll for a decoded frame without blocking.
    pub fn try_take_frame(&self) -> Option<LoraFrame> {
        match self.frame_rx.lock().unwrap().try_recv() {
            Ok(frame) => Some(frame),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    fn enqueue(&self, cmd: PendingCommand) -> Result<(), PhyError> {
        self.cmd_tx
            .as_ref()
            .ok_or(PhyError::Closed)?
            .try_send(cmd)
            .map_err(|e| match e {
                TrySendError::Full(_) => PhyError::QueueFull,
                TrySendError::Disconnected(_) => PhyError::Closed,
            })
    }
}

impl Drop for PhyDriver {
    fn drop(&mut self) {
        // Closing the command channel unblocks the TX worker's
        // `cmd_rx.recv()` so it exits promptly instead of lingering as an
        // orphaned thread. The RX worker has no equivalent signal — its
        // only suspension point is a serial read outside this driver's
        // control — so per §5 ("no cancellation at steady state") it is
        // simply left running until its read errors out or the process
        // exits; joining it here would risk blocking drop indefinitely.
        self.cmd_tx.take();
    }
}

fn tx_loop(
    mut writer: Box<dyn LineWriter>,
    cmd_rx: Receiver<PendingCommand>,
    latch: Arc<CanSendLatch>,
    last_sent: Arc<Mutex<Option<PendingCommand>>>,
) {
    while let Ok(cmd) = cmd_rx.recv() {
        latch.wait_until_can_send();
        let line = cmd.line.clone();
        *last_sent.lock().unwrap() = Some(cmd);
        if let Err(err) = writer.write_line(&line) {
            warn!(error = %err, "PHY write failed");
            last_sent.lock().unwrap().take();
            latch.release();
            continue;
        }
        debug!(line = %line, "PHY command sent");
    }
}

fn rx_loop(
    mut reader: Box<dyn LineReader>,
    latch: Arc<CanSendLatch>,
    last_sent: Arc<Mutex<Option<PendingCommand>>>,
    frame_tx: Sender<LoraFrame>,
) {
    loop {
        let line = match reader.read_line() {
            Ok(line) => line,
            Err(err) => {
                warn!(error = %err, "PHY read failed, stopping RX worker");
                return;
            }
        };

        if line.starts_with("radio_rx") || line == "radio_err" {
            latch.set_listening(false);
        }

        let matched = {
            let guard = last_sent.lock().unwrap();
            guard.as_ref().is_some_and(|p| p.acceptable.matches(&line))
        };

        if !matched {
            debug!(line, "unexpected PHY line, ignoring");
            continue;
        }

        last_sent.lock().unwrap().take();

        if line.starts_with("radio_rx") && line.len() > ASYNC_PREFIX_LEN {
            let hex = &line[ASYNC_PREFIX_LEN..];
            match LoraFrame::from_hex(hex) {
                Some(frame) => {
                    if let Err(TrySendError::Full(_)) = frame_tx.try_send(frame) {
                        warn!("PHY RX queue full, dropping frame");
                    }
                }
                None => warn!(hex, "malformed radio_rx payload, dropping"),
            }
        }

        latch.release();
    }
}
