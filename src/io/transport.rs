// src/io/transport.rs
//
// Port discovery and the transport seam for the serial link.
// Provides the serialport-backed implementation used in production and the
// traits that let tests substitute simulated transports.

use serde::{Deserialize, Serialize};
use serialport::{DataBits, FlowControl, Parity as SpParity, StopBits};
use std::io::Read;
use std::time::Duration;

use crate::config::LinkConfig;
use crate::io::error::IoError;

// ============================================================================
// Types
// ============================================================================

/// Parity setting for the serial link
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    None,
    Odd,
    Even,
}

impl Default for Parity {
    fn default() -> Self {
        Parity::None
    }
}

/// A serial port visible to device discovery.
/// `description` is the USB product string; ports without one (non-USB
/// transports) carry an empty description and never name-match.
#[derive(Clone, Debug, Serialize)]
pub struct PortCandidate {
    pub port_name: String,
    pub description: String,
}

// ============================================================================
// Transport Seam
// ============================================================================

/// An open byte transport to the tag. Reads honor the link read timeout.
pub trait LinkTransport: Send {
    /// Read up to `buf.len()` bytes. A timeout or an empty read is not an
    /// error; an `Err` other than `TimedOut` means the link is gone.
    fn read_chunk(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;
}

/// Enumerates candidate ports and opens transports.
/// The production implementation is [`SerialProvider`]; tests substitute
/// simulated providers to drive discovery and failure paths.
pub trait TransportProvider: Send + Sync {
    fn list_ports(&self) -> Result<Vec<PortCandidate>, IoError>;
    fn open(&self, port_name: &str) -> Result<Box<dyn LinkTransport>, IoError>;
}

// ============================================================================
// Serial Implementation
// ============================================================================

struct SerialTransport {
    port: Box<dyn serialport::SerialPort>,
}

impl LinkTransport for SerialTransport {
    fn read_chunk(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.port.read(buf)
    }
}

/// serialport-backed provider carrying the link parameters applied at open
pub struct SerialProvider {
    baud_rate: u32,
    data_bits: DataBits,
    stop_bits: StopBits,
    parity: SpParity,
    timeout: Duration,
}

impl SerialProvider {
    pub fn new(config: &LinkConfig) -> Self {
        SerialProvider {
            baud_rate: config.baud_rate,
            data_bits: to_serialport_data_bits(config.data_bits),
            stop_bits: to_serialport_stop_bits(config.stop_bits),
            parity: to_serialport_parity(&config.parity),
            timeout: Duration::from_millis(config.timeout_ms),
        }
    }
}

impl TransportProvider for SerialProvider {
    fn list_ports(&self) -> Result<Vec<PortCandidate>, IoError> {
        list_ports()
    }

    fn open(&self, port_name: &str) -> Result<Box<dyn LinkTransport>, IoError> {
        let port = serialport::new(port_name, self.baud_rate)
            .data_bits(self.data_bits)
            .stop_bits(self.stop_bits)
            .parity(self.parity)
            .flow_control(FlowControl::None)
            .timeout(self.timeout)
            .open()
            .map_err(|e| IoError::connection(port_name, e.to_string()))?;

        Ok(Box::new(SerialTransport { port }))
    }
}

/// List serial ports visible to device discovery.
///
/// On macOS, filters out /dev/tty.* devices and only shows /dev/cu.* devices.
/// The cu (calling unit) devices are non-blocking and preferred for outgoing
/// connections. The tty (terminal) devices block on open waiting for carrier
/// detect.
pub fn list_ports() -> Result<Vec<PortCandidate>, IoError> {
    let ports = serialport::available_ports()
        .map_err(|e| IoError::connection("serial", format!("enumerate ports: {}", e)))?;

    Ok(ports
        .into_iter()
        .filter(|_p| {
            #[cfg(target_os = "macos")]
            {
                !_p.port_name.starts_with("/dev/tty.")
            }
            #[cfg(not(target_os = "macos"))]
            {
                true
            }
        })
        .map(|p| {
            let description = match p.port_type {
                serialport::SerialPortType::UsbPort(info) => info.product.unwrap_or_default(),
                _ => String::new(),
            };
            PortCandidate {
                port_name: p.port_name,
                description,
            }
        })
        .collect())
}

// ============================================================================
// Conversion Functions
// ============================================================================

/// Convert our Parity enum to serialport crate's Parity type
pub(crate) fn to_serialport_parity(p: &Parity) -> SpParity {
    match p {
        Parity::None => SpParity::None,
        Parity::Odd => SpParity::Odd,
        Parity::Even => SpParity::Even,
    }
}

/// Convert data bits count to serialport crate's DataBits type
pub(crate) fn to_serialport_data_bits(bits: u8) -> DataBits {
    match bits {
        5 => DataBits::Five,
        6 => DataBits::Six,
        7 => DataBits::Seven,
        _ => DataBits::Eight,
    }
}

/// Convert stop bits count to serialport crate's StopBits type
pub(crate) fn to_serialport_stop_bits(bits: u8) -> StopBits {
    match bits {
        2 => StopBits::Two,
        _ => StopBits::One,
    }
}

// ============================================================================
// Tests
// ============================================================================
