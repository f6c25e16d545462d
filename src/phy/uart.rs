// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Serial line abstraction.
//!
//! The PHY driver needs an independent reader and writer half so its TX
//! and RX workers can each own one side without contending on a lock —
//! exactly how a real serial port is used (`try_clone` for an independent
//! write handle over the same file descriptor). Production code opens a
//! real port via [`open_serial`]; tests substitute [`loopback_pair`], an
//! in-memory line pipe, the same way the project's own low-bandwidth
//! transport substitutes a `SimLink` for a real socket in tests.

use crossbeam::channel::{Receiver, Sender, TryRecvError};
use std::io::{self, BufRead, BufReader, Write};
use std::time::Duration;

/// Read one CRLF-terminated ASCII line at a time from the modem.
pub trait LineReader: Send {
    fn read_line(&mut self) -> io::Result<String>;
}

/// Write one CRLF-terminated ASCII line at a time to the modem.
pub trait LineWriter: Send {
    fn write_line(&mut self, line: &str) -> io::Result<()>;
}

struct SerialReader(BufReader<Box<dyn serialport::SerialPort>>);

impl LineReader for SerialReader {
    fn read_line(&mut self) -> io::Result<String> {
        let mut line = String::new();
        self.0.read_line(&mut line)?;
        Ok(line.trim_end().to_string())
    }
}

struct SerialWriter(Box<dyn serialport::SerialPort>);

impl LineWriter for SerialWriter {
    fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.0.write_all(line.as_bytes())?;
        self.0.write_all(b"\r\n")?;
        self.0.flush()
    }
}

/// Open a real serial port and split it into independent reader/writer
/// halves. Opening failure is fatal per §7.
pub fn open_serial(
    port: &str,
    baudrate: u32,
) -> io::Result<(Box<dyn LineReader>, Box<dyn LineWriter>)> {
    let handle = serialport::new(port, baudrate)
        .timeout(Duration::from_secs(3600))
        .open()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    let write_handle = handle
        .try_clone()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    Ok((
        Box::new(SerialReader(BufReader::new(handle))),
        Box::new(SerialWriter(write_handle)),
    ))
}

struct LoopbackReader(Receiver<String>);

impl LineReader for LoopbackReader {
    fn read_line(&mut self) -> io::Result<String> {
        self.0
            .recv()
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "loopback closed"))
    }
}

struct LoopbackWriter(Sender<String>);

impl LineWriter for LoopbackWriter {
    fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.0
            .send(line.to_string())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "loopback closed"))
    }
}

/// Test-side handle for a loopback line: injects modem responses and
/// observes what the driver wrote.
pub struct LoopbackController {
    inject: Sender<String>,
    written: Receiver<String>,
}

impl LoopbackController {
    pub fn inject(&self, line: impl Into<String>) {
        let _ = self.inject.send(line.into());
    }

    /// Block until the driver writes a line.
    pub fn recv_written(&self) -> Option<String> {
        self.written.recv().ok()
    }

    /// Non-blocking poll for a written line.
    pub fn try_recv_written(&self) -> Option<String> {
        match self.written.try_recv() {
            Ok(line) => Some(line),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }
}

/// Build an in-memory reader/writer pair plus a test controller.
pub fn loopback_pair() -> ((Box<dyn LineReader>, Box<dyn LineWriter>), LoopbackController) {
    let (in_tx, in_rx) = crossbeam::channel::unbounded();
    let (out_tx, out_rx) = crossbeam::channel::unbounded();
    (
        (Box::new(LoopbackReader(in_rx)), Box::new(LoopbackWriter(out_tx))),
        LoopbackController {
            inject: in_tx,
            written: out_rx,
        },
    )
}
