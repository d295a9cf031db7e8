//! Error types for reader driver operations.
//!
//! This module defines the errors a driver backend can report. Connectivity
//! failures that callers need to tell apart (service down, no reader plugged
//! in, tag gone) have their own variants so that nothing upstream has to
//! inspect message text to classify them.

/// Result type alias for hardware operations.
pub type Result<T> = std::result::Result<T, HardwareError>;

/// Errors that can occur during reader driver operations.
#[derive(Debug, thiserror::Error)]
pub enum HardwareError {
    /// Reader is not connected or has been disconnected.
    #[error("Device disconnected: {device}")]
    Disconnected { device: String },

    /// The smart card service (pcscd / WinSCard) is not running.
    #[error("PC/SC service not running: {message}")]
    ServiceUnavailable { message: String },

    /// The service is running but no reader is attached.
    #[error("No readers available")]
    NoReaders,

    /// No tag is in the reader field.
    #[error("No card present")]
    NoCard,

    /// The tag rejected the key for a block.
    #[error("Authentication rejected for block {block}: {message}")]
    AuthenticationRejected { block: u8, message: String },

    /// Operation is not supported by this reader.
    #[error("Unsupported operation: {operation}")]
    Unsupported { operation: String },

    /// Reader communication error.
    #[error("Communication error: {message}")]
    CommunicationError { message: String },

    /// Invalid data received from or sent to the reader.
    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    /// Driver initialization failed.
    #[error("Initialization failed: {message}")]
    InitializationFailed { message: String },

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with custom message.
    #[error("{0}")]
    Other(String),
}

impl HardwareError {
    /// Create a new disconnected error.
    pub fn disconnected(device: impl Into<String>) -> Self {
        Self::Disconnected {
            device: device.into(),
        }
    }

    /// Create a new service unavailable error.
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::ServiceUnavailable {
            message: message.into(),
        }
    }

    /// Create a new authentication rejected error.
    pub fn authentication_rejected(block: u8, message: impl Into<String>) -> Self {
        Self::AuthenticationRejected {
            block,
            message: message.into(),
        }
    }

    /// Create a new unsupported operation error.
    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::Unsupported {
            operation: operation.into(),
        }
    }

    /// Create a new communication error.
    pub fn communication(message: impl Into<String>) -> Self {
        Self::CommunicationError {
            message: message.into(),
        }
    }

    /// Create a new invalid data error.
    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData {
            message: message.into(),
        }
    }

    /// Create a new initialization failed error.
    pub fn initialization_failed(message: impl Into<String>) -> Self {
        Self::InitializationFailed {
            message: message.into(),
        }
    }

    /// Create a generic error with custom message.
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }

    /// Whether the error means the reader (or the whole service) is unreachable.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            Self::Disconnected { .. } | Self::ServiceUnavailable { .. } | Self::NoReaders
        )
    }
}
