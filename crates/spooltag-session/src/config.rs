//! Session configuration.
//!
//! Every field has a default, so an empty TOML document is a valid
//! configuration:
//!
//! ```toml
//! auto_detect_interval_ms = 200
//! init_retry_ms = 5000
//! channel_capacity = 32
//! keys = ["D3F7D3F7D3F7", "FFFFFFFFFFFF"]
//!
//! [pcsc]
//! reader_filter = "ACR122"
//! poll_interval_ms = 500
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use spooltag_core::MifareKey;
use spooltag_core::constants::{
    AUTO_DETECT_INTERVAL_MS, DEFAULT_KEYS, INIT_RETRY_MS, NOTIFICATION_CHANNEL_CAPACITY,
};
use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config syntax: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config value for {field}: {message}")]
    Invalid { field: &'static str, message: String },
}

impl ConfigError {
    fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// PC/SC backend settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PcscConfig {
    /// Substring a reader name must contain to be used.
    pub reader_filter: Option<String>,
    pub poll_interval_ms: u64,
}

impl Default for PcscConfig {
    fn default() -> Self {
        Self {
            reader_filter: None,
            poll_interval_ms: 500,
        }
    }
}

impl PcscConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Tunables of the session manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Auto-detect tick period.
    pub auto_detect_interval_ms: u64,

    /// How long a failed session construction suppresses non-forced retries.
    pub init_retry_ms: u64,

    /// Capacity of the auto-detect notification channel.
    pub channel_capacity: usize,

    /// Keys tried in order when authenticating the tag block (key type A).
    pub keys: Vec<MifareKey>,

    pub pcsc: PcscConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auto_detect_interval_ms: AUTO_DETECT_INTERVAL_MS,
            init_retry_ms: INIT_RETRY_MS,
            channel_capacity: NOTIFICATION_CHANNEL_CAPACITY,
            keys: DEFAULT_KEYS.to_vec(),
            pcsc: PcscConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Parse and validate a TOML document.
    ///
    /// # Examples
    ///
    /// ```
    /// use spooltag_session::SessionConfig;
    ///
    /// let config = SessionConfig::from_toml_str("init_retry_ms = 1000").unwrap();
    /// assert_eq!(config.init_retry_ms, 1000);
    /// assert_eq!(config.auto_detect_interval_ms, 200);
    /// ```
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.auto_detect_interval_ms == 0 {
            return Err(ConfigError::invalid("auto_detect_interval_ms", "must be greater than 0"));
        }
        if self.init_retry_ms == 0 {
            return Err(ConfigError::invalid("init_retry_ms", "must be greater than 0"));
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::invalid("channel_capacity", "must be greater than 0"));
        }
        if self.keys.is_empty() {
            return Err(ConfigError::invalid("keys", "at least one key is required"));
        }
        if self.pcsc.poll_interval_ms == 0 {
            return Err(ConfigError::invalid("pcsc.poll_interval_ms", "must be greater than 0"));
        }
        Ok(())
    }

    pub fn auto_detect_interval(&self) -> Duration {
        Duration::from_millis(self.auto_detect_interval_ms)
    }

    pub fn init_retry(&self) -> Duration {
        Duration::from_millis(self.init_retry_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use spooltag_core::constants::{FACTORY_DEFAULT_KEY, VENDOR_KEY};
    use std::io::Write;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = SessionConfig::from_toml_str("").unwrap();
        assert_eq!(config, SessionConfig::default());
        assert_eq!(config.keys, vec![VENDOR_KEY, FACTORY_DEFAULT_KEY]);
        assert_eq!(config.init_retry(), Duration::from_secs(5));
    }

    #[test]
    fn test_full_document() {
        let config = SessionConfig::from_toml_str(
            r#"
            auto_detect_interval_ms = 100
            init_retry_ms = 2500
            channel_capacity = 8
            keys = ["FF FF FF FF FF FF"]

            [pcsc]
            reader_filter = "ACR122"
            poll_interval_ms = 250
            "#,
        )
        .unwrap();

        assert_eq!(config.auto_detect_interval(), Duration::from_millis(100));
        assert_eq!(config.init_retry_ms, 2500);
        assert_eq!(config.channel_capacity, 8);
        assert_eq!(config.keys, vec![FACTORY_DEFAULT_KEY]);
        assert_eq!(config.pcsc.reader_filter.as_deref(), Some("ACR122"));
        assert_eq!(config.pcsc.poll_interval(), Duration::from_millis(250));
    }

    #[rstest]
    #[case("auto_detect_interval_ms = 0", "auto_detect_interval_ms")]
    #[case("init_retry_ms = 0", "init_retry_ms")]
    #[case("channel_capacity = 0", "channel_capacity")]
    #[case("keys = []", "keys")]
    #[case("[pcsc]\npoll_interval_ms = 0", "pcsc.poll_interval_ms")]
    fn test_invalid_values(#[case] document: &str, #[case] expected_field: &str) {
        match SessionConfig::from_toml_str(document) {
            Err(ConfigError::Invalid { field, .. }) => assert_eq!(field, expected_field),
            other => panic!("expected invalid {}, got {:?}", expected_field, other),
        }
    }

    #[rstest]
    #[case(r#"keys = ["FFFF"]"#)]
    #[case(r#"keys = ["ZZZZZZZZZZZZ"]"#)]
    #[case("auto_detect_interval_ms = \"fast\"")]
    fn test_parse_errors(#[case] document: &str) {
        assert!(matches!(
            SessionConfig::from_toml_str(document),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "init_retry_ms = 750").unwrap();

        let config = SessionConfig::load(file.path()).unwrap();
        assert_eq!(config.init_retry_ms, 750);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = SessionConfig::load(dir.path().join("missing.toml"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}
