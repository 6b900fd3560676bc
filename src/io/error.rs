// src/io/error.rs
//
// Error type for device discovery, transport setup, and configuration.
// Internal stream errors are traced and recovered, not surfaced; this type
// covers the failures that do reach API callers.

use std::fmt;

/// IO error with device context
#[derive(Clone, Debug, PartialEq)]
pub enum IoError {
    /// Transport could not be enumerated or opened
    Connection { device: String, message: String },
    /// Invalid or unreadable configuration
    Configuration { message: String },
}

impl IoError {
    /// Connection-level failure (port enumeration, open)
    pub fn connection(device: &str, message: impl Into<String>) -> Self {
        IoError::Connection {
            device: device.to_string(),
            message: message.into(),
        }
    }

    /// Configuration failure (unreadable file, bad value)
    pub fn configuration(message: impl Into<String>) -> Self {
        IoError::Configuration {
            message: message.into(),
        }
    }
}

impl fmt::Display for IoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoError::Connection { device, message } => {
                write!(f, "Connection error ({}): {}", device, message)
            }
            IoError::Configuration { message } => {
                write!(f, "Configuration error: {}", message)
            }
        }
    }
}

impl std::error::Error for IoError {}
