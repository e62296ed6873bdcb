//! Error handling for the tallyman recorder
//!
//! The recording hot path never fails; these types cover the surfaces that
//! can: configuration loading, the wire codec, output setup and the
//! background consumer of the buffered strategies.

use std::io;

use thiserror::Error;

/// The main error type for the recorder library
#[derive(Error, Debug)]
pub enum RecorderError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Wire encoding and decoding errors
    #[error("Wire format error: {0}")]
    Wire(#[from] WireError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An event could not be handled by the consumer of a buffered strategy
    #[error("Event handling failed for {kind}: {reason}")]
    Handle { kind: &'static str, reason: String },

    /// The consumer thread of a buffered strategy is gone
    #[error("Event consumer stopped")]
    ConsumerStopped,

    /// Generic errors
    #[error("{0}")]
    Generic(String),
}

/// Configuration related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("Missing required configuration field: {field}")]
    MissingField { field: String },

    #[error("Invalid configuration value: {field} = {value}")]
    InvalidValue { field: String, value: String },

    #[error("Configuration validation failed: {reason}")]
    ValidationFailed { reason: String },

    #[error("Configuration file permission denied: {path}")]
    PermissionDenied { path: String },

    #[error("Configuration parsing error: {reason}")]
    ParseError { reason: String },
}

/// Errors of the binary event format
#[derive(Error, Debug)]
pub enum WireError {
    #[error("Unknown event kind: {id}")]
    UnknownEventKind { id: i32 },

    #[error("Invalid {kind} ordinal: {ordinal}")]
    InvalidOrdinal { kind: &'static str, ordinal: i32 },

    #[error("Invalid string marker: {marker}")]
    InvalidMarker { marker: i16 },

    #[error("String too long for the wire: {len} bytes")]
    StringTooLong { len: usize },

    #[error("Invalid UTF-8 in string field")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("Truncated {what}: needed {needed} bytes, {available} available")]
    Truncated {
        what: &'static str,
        needed: usize,
        available: usize,
    },

    #[error("Invalid collection length: {len}")]
    InvalidLength { len: i32 },

    #[error("Wire I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result type alias for convenience
pub type RecorderResult<T> = std::result::Result<T, RecorderError>;

/// A specialized result type for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// A specialized result type for wire operations
pub type WireResult<T> = std::result::Result<T, WireError>;

impl RecorderError {
    /// Check if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            RecorderError::Handle { .. } => false,
            RecorderError::ConsumerStopped => false,
            RecorderError::Wire(WireError::UnknownEventKind { .. }) => false,
            RecorderError::Io(io_error) => {
                matches!(
                    io_error.kind(),
                    io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                )
            }
            _ => true,
        }
    }

    /// Check if this error invalidates the measurements gathered so far
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            RecorderError::Handle { .. } | RecorderError::ConsumerStopped
        )
    }

    /// Get the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            RecorderError::Config(_) => "config",
            RecorderError::Wire(_) => "wire",
            RecorderError::Io(_) => "io",
            RecorderError::Serialization(_) => "serialization",
            RecorderError::Handle { .. } => "handle",
            RecorderError::ConsumerStopped => "consumer",
            RecorderError::Generic(_) => "generic",
        }
    }
}

impl From<String> for RecorderError {
    fn from(msg: String) -> Self {
        RecorderError::Generic(msg)
    }
}

impl From<&str> for RecorderError {
    fn from(msg: &str) -> Self {
        RecorderError::Generic(msg.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categorization() {
        let wire_error = RecorderError::Wire(WireError::UnknownEventKind { id: 42 });
        assert_eq!(wire_error.category(), "wire");
        assert!(!wire_error.is_recoverable());
        assert!(!wire_error.is_critical());

        let handle_error = RecorderError::Handle {
            kind: "enter",
            reason: "socket closed".to_string(),
        };
        assert_eq!(handle_error.category(), "handle");
        assert!(!handle_error.is_recoverable());
        assert!(handle_error.is_critical());

        let config_error = RecorderError::Config(ConfigError::MissingField {
            field: "tcp.host".to_string(),
        });
        assert!(config_error.is_recoverable());
        assert!(!config_error.is_critical());
        assert_eq!(config_error.category(), "config");

        let stopped = RecorderError::ConsumerStopped;
        assert_eq!(stopped.category(), "consumer");
        assert!(stopped.is_critical());
    }

    #[test]
    fn test_io_recoverability() {
        let timeout = RecorderError::Io(io::Error::new(io::ErrorKind::TimedOut, "slow"));
        assert!(timeout.is_recoverable());

        let refused = RecorderError::Io(io::Error::new(io::ErrorKind::ConnectionRefused, "down"));
        assert!(!refused.is_recoverable());
        assert_eq!(refused.category(), "io");
    }

    #[test]
    fn test_error_conversion() {
        let recorder_error = RecorderError::from("Test error".to_string());
        assert!(matches!(recorder_error, RecorderError::Generic(_)));

        let recorder_error = RecorderError::from("Test error");
        assert!(matches!(recorder_error, RecorderError::Generic(_)));

        let message = WireError::Truncated {
            what: "string",
            needed: 8,
            available: 3,
        }
        .to_string();
        assert!(message.contains("needed 8"));
    }
}
