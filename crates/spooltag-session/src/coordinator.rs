//! Request coordinator.
//!
//! Front door for the presentation layer. Manual reads and writes share one
//! [`BusyGate`] with the auto-detect loop, so a request that arrives while a
//! tick is reading is answered with `busy` instead of waiting. Every outcome
//! is converted to a [`CommandResponse`] here; nothing below this layer
//! reaches the consumer as an error.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use spooltag_core::{MessageKey, SessionError, TagRecord};
use spooltag_hardware::AnyDriver;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::auto_detect::{AutoDetector, AutoStatus};
use crate::config::SessionConfig;
use crate::factory::SessionFactory;
use crate::gate::BusyGate;
use crate::session::StatusSnapshot;

/// Result of a manual read or write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<TagRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_key: Option<MessageKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl CommandResponse {
    pub fn ok(data: Option<TagRecord>) -> Self {
        Self {
            success: true,
            data,
            message_key: None,
            details: None,
        }
    }

    pub fn failed(error: &SessionError) -> Self {
        Self {
            success: false,
            data: None,
            message_key: Some(error.message_key()),
            details: Some(error.to_string()),
        }
    }
}

/// Result of an auto-detect toggle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoDetectResponse {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_key: Option<MessageKey>,
}

/// Serializes consumer requests against the reader.
///
/// # Examples
///
/// ```
/// use spooltag_hardware::AnyDriver;
/// use spooltag_hardware::mock::MockDriver;
/// use spooltag_session::{RequestCoordinator, SessionConfig};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let (driver, _handle) = MockDriver::new();
/// let (coordinator, _notifications) =
///     RequestCoordinator::new(AnyDriver::Mock(driver), &SessionConfig::default());
///
/// // Nothing has been constructed yet.
/// let status = coordinator.status();
/// assert!(!status.connected);
///
/// // No reader attached: the read is refused.
/// let response = coordinator.read().await;
/// assert_eq!(response.message_key.map(|k| k.as_str()), Some("nfcNotConnected"));
/// # }
/// ```
#[derive(Debug)]
pub struct RequestCoordinator {
    factory: Arc<SessionFactory>,
    gate: Arc<BusyGate>,
    detector: AutoDetector,
}

impl RequestCoordinator {
    /// Build the coordinator and the receiver for auto-detect notifications.
    pub fn new(driver: AnyDriver, config: &SessionConfig) -> (Self, mpsc::Receiver<AutoStatus>) {
        let factory = Arc::new(SessionFactory::from_config(driver, config));
        let gate = Arc::new(BusyGate::new());
        let (tx, rx) = mpsc::channel(config.channel_capacity);
        let detector = AutoDetector::new(Arc::clone(&factory), Arc::clone(&gate), tx)
            .with_interval(config.auto_detect_interval());

        (
            Self {
                factory,
                gate,
                detector,
            },
            rx,
        )
    }

    pub fn factory(&self) -> &Arc<SessionFactory> {
        &self.factory
    }

    /// Read the tag block.
    pub async fn read(&self) -> CommandResponse {
        let Some(_guard) = self.gate.try_acquire() else {
            debug!("read refused, reader busy");
            return CommandResponse::failed(&SessionError::Busy);
        };

        let result = match self.factory.get_session(true).await {
            Ok(session) => session.read_tag().await,
            Err(e) => Err(e),
        };

        match result {
            Ok(record) => {
                info!(
                    material = record.material,
                    color = record.color,
                    manufacturer = record.manufacturer,
                    "tag read"
                );
                CommandResponse::ok(Some(record))
            }
            Err(e) => {
                warn!(error = %e, "read failed");
                CommandResponse::failed(&e)
            }
        }
    }

    /// Write the three codes to the tag block.
    pub async fn write(&self, material: u8, color: u8, manufacturer: u8) -> CommandResponse {
        let Some(_guard) = self.gate.try_acquire() else {
            debug!("write refused, reader busy");
            return CommandResponse::failed(&SessionError::Busy);
        };

        let result = match self.factory.get_session(true).await {
            Ok(session) => session.write_tag(material, color, manufacturer).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => CommandResponse::ok(None),
            Err(e) => {
                warn!(error = %e, "write failed");
                CommandResponse::failed(&e)
            }
        }
    }

    /// Current status. Never constructs a session.
    pub fn status(&self) -> StatusSnapshot {
        match self.factory.try_session() {
            Some(session) => session.status(),
            None => StatusSnapshot::disconnected(self.factory.last_init_error().as_ref()),
        }
    }

    pub async fn set_auto_detect(&self, enable: bool) -> AutoDetectResponse {
        if !enable {
            self.detector.disable().await;
            return AutoDetectResponse {
                enabled: false,
                message_key: None,
            };
        }

        match self.detector.enable().await {
            Ok(()) => AutoDetectResponse {
                enabled: self.detector.is_enabled(),
                message_key: None,
            },
            Err(e) => AutoDetectResponse {
                enabled: false,
                message_key: Some(e.message_key()),
            },
        }
    }

    pub fn auto_detect_enabled(&self) -> bool {
        self.detector.is_enabled()
    }

    /// Stop auto-detect and close the session.
    pub async fn shutdown(&self) {
        self.detector.disable().await;
        self.factory.shutdown();
        info!("coordinator shut down");
    }
}
