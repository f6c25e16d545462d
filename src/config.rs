// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Gateway configuration.
//!
//! Supports both programmatic and file-based (TOML) configuration of the
//! serial link, radio parameters, and the PHY driver's queue depths.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Coding rate, one of `4/5`..`4/8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CodingRate {
    #[serde(rename = "4/5")]
    Cr4_5,
    #[serde(rename = "4/6")]
    Cr4_6,
    #[serde(rename = "4/7")]
    Cr4_7,
    #[serde(rename = "4/8")]
    Cr4_8,
}

impl CodingRate {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cr4_5 => "4/5",
            Self::Cr4_6 => "4/6",
            Self::Cr4_7 => "4/7",
            Self::Cr4_8 => "4/8",
        }
    }
}

/// Spreading factor, one of `sf7`..`sf12`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpreadingFactor {
    #[serde(rename = "sf7")]
    Sf7,
    #[serde(rename = "sf8")]
    Sf8,
    #[serde(rename = "sf9")]
    Sf9,
    #[serde(rename = "sf10")]
    Sf10,
    #[serde(rename = "sf11")]
    Sf11,
    #[serde(rename = "sf12")]
    Sf12,
}

impl SpreadingFactor {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sf7 => "sf7",
            Self::Sf8 => "sf8",
            Self::Sf9 => "sf9",
            Self::Sf10 => "sf10",
            Self::Sf11 => "sf11",
            Self::Sf12 => "sf12",
        }
    }
}

/// Radio bandwidth in kHz.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bandwidth {
    Bw125 = 125,
    Bw250 = 250,
    Bw500 = 500,
}

impl Bandwidth {
    pub fn as_khz(self) -> u32 {
        self as u32
    }
}

/// Full configuration surface of the gateway core, per §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Serial device path.
    #[serde(default = "default_port")]
    pub port: String,

    /// UART baud rate.
    #[serde(default = "default_baudrate")]
    pub baudrate: u32,

    /// Radio frequency in Hz; one of the two legal LoRa bands.
    #[serde(default = "default_frequency")]
    pub frequency: u32,

    /// Radio bandwidth.
    #[serde(default = "default_bandwidth")]
    pub bandwidth: Bandwidth,

    /// Forward error correction coding rate.
    #[serde(default = "default_cr")]
    pub cr: CodingRate,

    /// TX power in dBm, -3..=15.
    #[serde(default = "default_pwr")]
    pub pwr: i8,

    /// Spreading factor.
    #[serde(default = "default_sf")]
    pub sf: SpreadingFactor,

    /// PHY TX (command) queue depth.
    #[serde(default = "default_tx_buf_size")]
    pub tx_buf_size: usize,

    /// PHY RX (decoded frame) queue depth.
    #[serde(default = "default_rx_buf_size")]
    pub rx_buf_size: usize,
}

fn default_port() -> String {
    "/dev/ttyUSB0".to_string()
}
fn default_baudrate() -> u32 {
    57600
}
fn default_frequency() -> u32 {
    868_100_000
}
fn default_bandwidth() -> Bandwidth {
    Bandwidth::Bw125
}
fn default_cr() -> CodingRate {
    CodingRate::Cr4_5
}
fn default_pwr() -> i8 {
    1
}
fn default_sf() -> SpreadingFactor {
    SpreadingFactor::Sf10
}
fn default_tx_buf_size() -> usize {
    10
}
fn default_rx_buf_size() -> usize {
    10
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            baudrate: default_baudrate(),
            frequency: default_frequency(),
            bandwidth: default_bandwidth(),
            cr: default_cr(),
            pwr: default_pwr(),
            sf: default_sf(),
            tx_buf_size: default_tx_buf_size(),
            rx_buf_size: default_rx_buf_size(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration against the legal ranges of §6.
    pub fn validate(&self) -> Result<(), ConfigError> {
        const LEGAL_BANDS: [(u32, u32); 2] = [(433_050_000, 434_790_000), (863_000_000, 870_000_000)];
        if !LEGAL_BANDS
            .iter()
            .any(|(lo, hi)| (*lo..=*hi).contains(&self.frequency))
        {
            return Err(ConfigError::Invalid(format!(
                "frequency {} Hz is outside the legal LoRa bands",
                self.frequency
            )));
        }

        if !(-3..=15).contains(&self.pwr) {
            return Err(ConfigError::Invalid(format!(
                "tx power {} dBm out of range -3..=15",
                self.pwr
            )));
        }

        if self.tx_buf_size == 0 || self.rx_buf_size == 0 {
            return Err(ConfigError::Invalid(
                "tx_buf_size and rx_buf_size must be non-zero".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let cfg = GatewayConfig::default();
        assert_eq!(cfg.port, "/dev/ttyUSB0");
        assert_eq!(cfg.baudrate, 57600);
        assert_eq!(cfg.frequency, 868_100_000);
        assert_eq!(cfg.bandwidth.as_khz(), 125);
        assert_eq!(cfg.cr.as_str(), "4/5");
        assert_eq!(cfg.pwr, 1);
        assert_eq!(cfg.sf.as_str(), "sf10");
        assert_eq!(cfg.tx_buf_size, 10);
        assert_eq!(cfg.rx_buf_size, 10);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_out_of_band_frequency() {
        let cfg = GatewayConfig {
            frequency: 900_000_000,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_excessive_power() {
        let cfg = GatewayConfig {
            pwr: 20,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn from_file_round_trips() {
        let toml_str = r#"
            port = "/dev/ttyACM0"
            baudrate = 115200
            frequency = 868100000
            bandwidth = "bw125"
            cr = "4/5"
            pwr = 5
            sf = "sf7"
            tx_buf_size = 20
            rx_buf_size = 20
        "#;
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("gateway.toml");
        std::fs::write(&path, toml_str).expect("write");

        let cfg = GatewayConfig::from_file(&path).expect("load");
        assert_eq!(cfg.port, "/dev/ttyACM0");
        assert_eq!(cfg.baudrate, 115200);
        assert_eq!(cfg.pwr, 5);
    }
}
