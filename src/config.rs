// src/config.rs
//
// Link configuration. Defaults are the contract - the fixed parameters the
// tag bridge ships with - and a TOML file can override them for bench setups
// with nonstandard serial bridges.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::io::error::IoError;
use crate::io::transport::Parity;

/// Serial link configuration with device discovery settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LinkConfig {
    /// USB product-string substrings that identify the tag bridge
    #[serde(default = "default_device_names")]
    pub device_names: Vec<String>,
    /// Serial baud rate - defaults to 115200
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Data bits (5, 6, 7, 8) - defaults to 8
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    /// Stop bits (1, 2) - defaults to 1
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    /// Parity - defaults to none
    #[serde(default)]
    pub parity: Parity,
    /// Read/write timeout in milliseconds - defaults to 1000
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Fixed delay between unsuccessful discovery attempts - defaults to 5000 ms
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
}

fn default_device_names() -> Vec<String> {
    vec!["USB Serial Device".to_string(), "Arduino Mega".to_string()]
}
fn default_baud_rate() -> u32 {
    115200
}
fn default_data_bits() -> u8 {
    8
}
fn default_stop_bits() -> u8 {
    1
}
fn default_timeout_ms() -> u64 {
    1000
}
fn default_retry_interval_ms() -> u64 {
    5000
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            device_names: default_device_names(),
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            stop_bits: default_stop_bits(),
            parity: Parity::default(),
            timeout_ms: default_timeout_ms(),
            retry_interval_ms: default_retry_interval_ms(),
        }
    }
}

impl LinkConfig {
    /// Load configuration from a TOML file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<LinkConfig, IoError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            IoError::configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;
        toml::from_str(&text).map_err(|e| {
            IoError::configuration(format!("Failed to parse {}: {}", path.display(), e))
        })
    }
}
