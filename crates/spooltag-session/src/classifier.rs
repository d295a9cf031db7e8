//! Driver error classification.
//!
//! Status reporting only needs to know whether the smart card service is
//! down, whether no reader is plugged in, or neither. Structured
//! [`HardwareError`] kinds decide when available; otherwise the message is
//! matched case-insensitively against the identifiers PC/SC stacks put in
//! their error text.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use spooltag_hardware::HardwareError;

/// Message fragments reported when the PC/SC service is not running.
const SERVICE_NOT_RUNNING_SIGNATURES: &[&str] = &[
    "scard_e_no_service",
    "0x8010001d",
    "scard_e_service_stopped",
    "0x8010001e",
    "service not running",
    "resource manager is not running",
    "pcscd",
];

/// Message fragments reported when no reader is available.
const NO_READERS_SIGNATURES: &[&str] = &[
    "scard_e_no_readers_available",
    "0x8010002e",
    "no readers",
];

/// Coarse category of the last driver error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    PcscServiceNotRunning,
    NoReaders,
    Unknown,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PcscServiceNotRunning => "PCSC_SERVICE_NOT_RUNNING",
            Self::NoReaders => "NO_READERS",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify raw error text.
///
/// # Examples
///
/// ```
/// use spooltag_session::classifier::{ErrorCode, classify_message};
///
/// assert_eq!(
///     classify_message("SCardEstablishContext: Scard_E_No_Service"),
///     ErrorCode::PcscServiceNotRunning
/// );
/// assert_eq!(classify_message("No readers found"), ErrorCode::NoReaders);
/// assert_eq!(classify_message("card mute"), ErrorCode::Unknown);
/// ```
pub fn classify_message(message: &str) -> ErrorCode {
    let lowered = message.to_lowercase();
    let matches_any = |signatures: &[&str]| signatures.iter().any(|s| lowered.contains(s));

    if matches_any(SERVICE_NOT_RUNNING_SIGNATURES) {
        ErrorCode::PcscServiceNotRunning
    } else if matches_any(NO_READERS_SIGNATURES) {
        ErrorCode::NoReaders
    } else {
        ErrorCode::Unknown
    }
}

/// Classify a driver error, preferring its structured kind over its text.
pub fn classify(error: &HardwareError) -> ErrorCode {
    match error {
        HardwareError::ServiceUnavailable { .. } => ErrorCode::PcscServiceNotRunning,
        HardwareError::NoReaders => ErrorCode::NoReaders,
        other => classify_message(&other.to_string()),
    }
}

/// Most recent classified error with its capture time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastError {
    pub code: ErrorCode,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl LastError {
    pub fn from_hardware(error: &HardwareError) -> Self {
        Self {
            code: classify(error),
            message: error.to_string(),
            at: Utc::now(),
        }
    }

    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            code: classify_message(&message),
            message,
            at: Utc::now(),
        }
    }

    /// Capture `error`, or clear the stored value when there is none.
    pub fn capture(error: Option<&HardwareError>) -> Option<Self> {
        error.map(Self::from_hardware)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("SCARD_E_NO_SERVICE", ErrorCode::PcscServiceNotRunning)]
    #[case("error 0x8010001D while connecting", ErrorCode::PcscServiceNotRunning)]
    #[case("SCARD_E_SERVICE_STOPPED", ErrorCode::PcscServiceNotRunning)]
    #[case("code 0x8010001e", ErrorCode::PcscServiceNotRunning)]
    #[case("The Smart Card Resource Manager is not running.", ErrorCode::PcscServiceNotRunning)]
    #[case("is pcscd running?", ErrorCode::PcscServiceNotRunning)]
    #[case("Service not running", ErrorCode::PcscServiceNotRunning)]
    #[case("SCARD_E_NO_READERS_AVAILABLE", ErrorCode::NoReaders)]
    #[case("0x8010002E", ErrorCode::NoReaders)]
    #[case("No Readers attached", ErrorCode::NoReaders)]
    #[case("Transaction failed", ErrorCode::Unknown)]
    #[case("", ErrorCode::Unknown)]
    fn test_classify_message(#[case] message: &str, #[case] expected: ErrorCode) {
        assert_eq!(classify_message(message), expected);
    }

    #[test]
    fn test_structured_kind_wins() {
        // Text would say "no readers" but the kind is authoritative.
        let error = HardwareError::service_unavailable("no readers either");
        assert_eq!(classify(&error), ErrorCode::PcscServiceNotRunning);

        assert_eq!(classify(&HardwareError::NoReaders), ErrorCode::NoReaders);
    }

    #[test]
    fn test_unstructured_falls_back_to_text() {
        let error = HardwareError::communication("SCardConnect: SCARD_E_NO_SERVICE");
        assert_eq!(classify(&error), ErrorCode::PcscServiceNotRunning);

        let error = HardwareError::communication("status 63 00");
        assert_eq!(classify(&error), ErrorCode::Unknown);
    }

    #[test]
    fn test_capture() {
        assert!(LastError::capture(None).is_none());

        let before = Utc::now();
        let captured = LastError::capture(Some(&HardwareError::NoReaders)).unwrap();
        assert_eq!(captured.code, ErrorCode::NoReaders);
        assert_eq!(captured.message, "No readers available");
        assert!(captured.at >= before);
    }

    #[test]
    fn test_error_code_serialization() {
        let json = serde_json::to_string(&ErrorCode::PcscServiceNotRunning).unwrap();
        assert_eq!(json, "\"PCSC_SERVICE_NOT_RUNNING\"");
        assert_eq!(ErrorCode::NoReaders.to_string(), "NO_READERS");
    }
}
