//! Operation result taxonomy.
//!
//! Every reader operation fails with one of four [`SessionError`] kinds. The
//! request boundary turns them into a stable [`MessageKey`] for localization
//! plus the raw message for diagnostics.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Another authenticate/read/write sequence holds the reader.
    #[error("Reader busy: another operation is in progress")]
    Busy,

    /// No reader or session is available.
    #[error("Reader not connected: {0}")]
    NotConnected(String),

    /// Every candidate key was rejected by the tag.
    #[error("Authentication failed for block {block}: {message}")]
    AuthFailed { block: u8, message: String },

    /// Anything else; the driver message is kept verbatim.
    #[error("{0}")]
    Unknown(String),
}

impl SessionError {
    pub fn not_connected(reason: impl Into<String>) -> Self {
        Self::NotConnected(reason.into())
    }

    pub fn auth_failed(block: u8, message: impl Into<String>) -> Self {
        Self::AuthFailed {
            block,
            message: message.into(),
        }
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::Unknown(message.into())
    }

    /// Consumer-facing key for this failure.
    ///
    /// # Examples
    ///
    /// ```
    /// use spooltag_core::{MessageKey, SessionError};
    ///
    /// assert_eq!(SessionError::Busy.message_key(), MessageKey::Busy);
    /// assert_eq!(
    ///     SessionError::not_connected("no reader").message_key().as_str(),
    ///     "nfcNotConnected"
    /// );
    /// ```
    pub fn message_key(&self) -> MessageKey {
        match self {
            Self::Busy => MessageKey::Busy,
            Self::NotConnected(_) => MessageKey::NfcNotConnected,
            Self::AuthFailed { .. } => MessageKey::NfcAuthFailed,
            Self::Unknown(_) => MessageKey::UnknownError,
        }
    }
}

/// Stable, language-independent identifiers for user-visible failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageKey {
    Busy,
    NfcNotConnected,
    NfcAuthFailed,
    UnknownError,
}

impl MessageKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Busy => "busy",
            Self::NfcNotConnected => "nfcNotConnected",
            Self::NfcAuthFailed => "nfcAuthFailed",
            Self::UnknownError => "unknownError",
        }
    }
}

impl std::fmt::Display for MessageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
