// src/io/mod.rs
//
// Serial acquisition subsystem: transport discovery, the line-protocol
// driver, and the shared types both sides exchange.

pub mod error;
pub mod pozyx;
pub mod transport;

pub use error::IoError;
pub use transport::{list_ports, PortCandidate};

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

// ============================================================================
// Shared Types
// ============================================================================

/// Decoded tag position - one record per accepted POS frame.
/// Superseded by the next decode, never mutated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// X coordinate in millimetres
    pub x: i32,
    /// Y coordinate in millimetres
    pub y: i32,
    /// Z coordinate in millimetres
    pub z: i32,
    /// Host UNIX timestamp at decode time, in microseconds
    pub timestamp_us: u64,
}

/// Get current time in microseconds since UNIX epoch
pub fn now_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}
