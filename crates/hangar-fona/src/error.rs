//! Error types for Fona modem operations
//!
//! Most public operations in this crate absorb these errors and degrade to a
//! safe default (empty response, zeroed snapshot). The typed errors exist so
//! that the internal steps can use `?` and so that the manager can tell a
//! retriable transport fault from a message that can never be delivered.

use thiserror::Error;

/// Main error type for Fona modem operations
#[derive(Error, Debug)]
pub enum FonaError {
    // ===== Transport Errors =====
    /// No serial connection is attached to the channel
    #[error("No serial transport attached")]
    TransportUnavailable,

    /// Serial port open failed
    #[error("Failed to open serial port {port}: {reason}")]
    PortOpenFailed {
        /// Port path
        port: String,
        /// Failure reason
        reason: String,
    },

    /// Serial read error
    #[error("Serial read error: {0}")]
    ReadError(String),

    /// Serial write error
    #[error("Serial write error: {0}")]
    WriteError(String),

    /// The modem did not answer in time
    #[error("Command timeout after {duration_ms}ms")]
    CommandTimeout {
        /// Timeout duration in milliseconds
        duration_ms: u64,
    },

    // ===== Message Errors =====
    /// Destination number could not be normalized
    #[error("Invalid phone number: {0:?}")]
    InvalidNumber(String),

    /// Outbound message has no body
    #[error("Refusing to send an empty message")]
    EmptyMessage,

    // ===== Hardware Errors =====
    /// GPIO pin could not be read
    #[error("GPIO error: {0}")]
    Gpio(String),

    // ===== Configuration Errors =====
    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration file could not be parsed
    #[error("Configuration parse error: {0}")]
    ConfigParse(String),

    /// IO error wrapper
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FonaError {
    /// Check if this error is recoverable/retriable
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            FonaError::TransportUnavailable
                | FonaError::CommandTimeout { .. }
                | FonaError::ReadError(_)
                | FonaError::WriteError(_)
                | FonaError::Io(_)
        )
    }

    /// Get an error code for logging
    pub fn error_code(&self) -> &'static str {
        match self {
            FonaError::TransportUnavailable => "TRANSPORT_UNAVAILABLE",
            FonaError::PortOpenFailed { .. } => "PORT_OPEN_FAILED",
            FonaError::ReadError(_) => "READ_ERROR",
            FonaError::WriteError(_) => "WRITE_ERROR",
            FonaError::CommandTimeout { .. } => "COMMAND_TIMEOUT",
            FonaError::InvalidNumber(_) => "INVALID_NUMBER",
            FonaError::EmptyMessage => "EMPTY_MESSAGE",
            FonaError::Gpio(_) => "GPIO_ERROR",
            FonaError::InvalidConfig(_) => "INVALID_CONFIG",
            FonaError::ConfigParse(_) => "CONFIG_PARSE",
            FonaError::Io(_) => "IO_ERROR",
        }
    }
}

/// Result type alias for Fona operations
pub type Result<T> = std::result::Result<T, FonaError>;

impl From<toml::de::Error> for FonaError {
    fn from(err: toml::de::Error) -> Self {
        FonaError::ConfigParse(err.to_string())
    }
}

// Conversion from serialport error (only when serial feature is enabled)
#[cfg(feature = "serial")]
impl From<tokio_serial::Error> for FonaError {
    fn from(err: tokio_serial::Error) -> Self {
        match err.kind {
            tokio_serial::ErrorKind::Io(kind) => {
                FonaError::Io(std::io::Error::new(kind, err.description))
            }
            _ => FonaError::PortOpenFailed {
                port: String::new(),
                reason: err.description,
            },
        }
    }
}
