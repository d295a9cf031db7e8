//! Reader session.
//!
//! A [`ReaderSession`] mirrors what the driver reports (reader attached, tag
//! in the field, last error) and runs the authenticate/read/write sequences
//! against the tag block. State changes arrive only through
//! [`ReaderSession::apply_event`]; operations never mutate connection state.
//!
//! Operations are mutually exclusive and do not queue: a second caller gets
//! [`SessionError::Busy`] immediately.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use spooltag_core::constants::{BLOCK_SIZE, DEFAULT_KEYS, TAG_BLOCK};
use spooltag_core::{KeyType, MifareKey, Result, SessionError, TagRecord};
use spooltag_hardware::{AnyReader, CardInfo, DriverEvent, HardwareError, TagReader};
use tracing::{debug, info, warn};

use crate::classifier::{ErrorCode, LastError};
use crate::gate::BusyGate;

/// Tag currently in the reader field.
///
/// UID and card are stored together so one is never present without the
/// other. `uid` is `None` when the reader could not report one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentTag {
    pub uid: Option<String>,
    pub card: CardInfo,
}

/// Point-in-time view of a session, as reported to consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub connected: bool,
    pub reader_name: Option<String>,
    pub card_present: bool,
    pub uid: Option<String>,
    pub error_code: Option<ErrorCode>,
    pub error_message: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub error_at: Option<DateTime<Utc>>,
}

impl StatusSnapshot {
    /// Snapshot for when no session exists.
    pub fn disconnected(last_error: Option<&LastError>) -> Self {
        Self {
            connected: false,
            reader_name: None,
            card_present: false,
            uid: None,
            error_code: last_error.map(|e| e.code),
            error_message: last_error.map(|e| e.message.clone()),
            error_at: last_error.map(|e| e.at),
        }
    }
}

#[derive(Debug, Default)]
struct SessionState {
    reader: Option<Arc<AnyReader>>,
    tag: Option<PresentTag>,
    last_error: Option<LastError>,
}

impl SessionState {
    fn disconnect(&mut self) {
        self.reader = None;
        self.tag = None;
    }
}

/// Connection state and tag operations for the single attached reader.
#[derive(Debug)]
pub struct ReaderSession {
    state: Mutex<SessionState>,
    gate: BusyGate,
    keys: Vec<MifareKey>,
}

impl Default for ReaderSession {
    fn default() -> Self {
        Self::new(DEFAULT_KEYS.to_vec())
    }
}

impl ReaderSession {
    /// Create a disconnected session that authenticates with `keys`, in order.
    pub fn new(keys: Vec<MifareKey>) -> Self {
        Self {
            state: Mutex::new(SessionState::default()),
            gate: BusyGate::new(),
            keys,
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply one driver event.
    ///
    /// Events must be applied in the order the driver emitted them.
    pub fn apply_event(&self, event: DriverEvent) {
        let mut state = self.state();
        match event {
            DriverEvent::ReaderAppeared(reader) => {
                info!(reader = reader.name(), "reader connected");
                state.reader = Some(reader);
                state.tag = None;
                state.last_error = None;
            }
            DriverEvent::CardInserted { uid, card } => {
                debug!(uid = ?uid, card = card.card_type.name(), "tag inserted");
                state.tag = Some(PresentTag { uid, card });
            }
            DriverEvent::CardRemoved => {
                debug!("tag removed");
                state.tag = None;
            }
            DriverEvent::ReaderError(error) => {
                warn!(error = %error, "reader error");
                state.last_error = Some(LastError::from_hardware(&error));
            }
            DriverEvent::ReaderEnd => {
                info!("reader disconnected");
                state.disconnect();
            }
            DriverEvent::DriverError(error) => {
                warn!(error = %error, "driver error");
                state.last_error = Some(LastError::from_hardware(&error));
                state.disconnect();
            }
            other => debug!(event = ?other, "ignoring driver event"),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state().reader.is_some()
    }

    /// UID of the tag in the field, if any.
    pub fn current_uid(&self) -> Option<String> {
        self.state().tag.as_ref().and_then(|tag| tag.uid.clone())
    }

    /// Whether a tag is in the field, with or without a known UID.
    pub fn card_present(&self) -> bool {
        self.state().tag.is_some()
    }

    pub fn last_error(&self) -> Option<LastError> {
        self.state().last_error.clone()
    }

    pub fn status(&self) -> StatusSnapshot {
        let state = self.state();
        StatusSnapshot {
            connected: state.reader.is_some(),
            reader_name: state.reader.as_ref().map(|r| r.name().to_string()),
            card_present: state.tag.is_some(),
            uid: state.tag.as_ref().and_then(|tag| tag.uid.clone()),
            error_code: state.last_error.as_ref().map(|e| e.code),
            error_message: state.last_error.as_ref().map(|e| e.message.clone()),
            error_at: state.last_error.as_ref().map(|e| e.at),
        }
    }

    /// Whether an operation is in flight.
    pub fn is_busy(&self) -> bool {
        self.gate.is_busy()
    }

    /// Clone the reader handle for the duration of one operation.
    fn reader(&self) -> Result<Arc<AnyReader>> {
        self.state()
            .reader
            .clone()
            .ok_or_else(|| SessionError::not_connected("no reader attached"))
    }

    /// Authenticate `block` with the configured keys.
    ///
    /// # Errors
    ///
    /// - [`SessionError::Busy`] if another operation is in flight
    /// - [`SessionError::NotConnected`] if no reader is attached
    /// - [`SessionError::AuthFailed`] if every key was rejected
    pub async fn authenticate_block(&self, block: u8) -> Result<()> {
        let _guard = self.gate.try_acquire().ok_or(SessionError::Busy)?;
        let reader = self.reader()?;
        self.authenticate_with(&reader, block).await
    }

    async fn authenticate_with(&self, reader: &AnyReader, block: u8) -> Result<()> {
        let mut last_failure = None;

        for key in &self.keys {
            match reader.authenticate(block, KeyType::A, key).await {
                Ok(()) => {
                    debug!(block, key = %key, "block authenticated");
                    return Ok(());
                }
                Err(e) => {
                    debug!(block, key = %key, error = %e, "key rejected");
                    last_failure = Some(e);
                }
            }
        }

        let message = last_failure
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no keys configured".to_string());
        warn!(block, message = %message, "authentication failed with every key");
        Err(SessionError::auth_failed(block, message))
    }

    /// Read and decode the tag block.
    ///
    /// # Errors
    ///
    /// - [`SessionError::Busy`] if another operation is in flight
    /// - [`SessionError::NotConnected`] if no reader is attached
    /// - [`SessionError::AuthFailed`] if every key was rejected
    /// - [`SessionError::Unknown`] if the read itself fails
    pub async fn read_tag(&self) -> Result<TagRecord> {
        let _guard = self.gate.try_acquire().ok_or(SessionError::Busy)?;
        let reader = self.reader()?;

        self.authenticate_with(&reader, TAG_BLOCK).await?;
        let data = reader
            .read_block(TAG_BLOCK, BLOCK_SIZE, BLOCK_SIZE)
            .await
            .map_err(operation_error)?;

        if data.len() < BLOCK_SIZE {
            debug!(len = data.len(), "short block read");
        }
        Ok(TagRecord::from_block(&data))
    }

    /// Write the three codes to the tag block; the rest of the block is zeroed.
    ///
    /// # Errors
    ///
    /// Same as [`ReaderSession::read_tag`].
    pub async fn write_tag(&self, material: u8, color: u8, manufacturer: u8) -> Result<()> {
        let _guard = self.gate.try_acquire().ok_or(SessionError::Busy)?;
        let reader = self.reader()?;

        self.authenticate_with(&reader, TAG_BLOCK).await?;
        let block = TagRecord::encode(material, color, manufacturer);
        reader
            .write_block(TAG_BLOCK, &block, BLOCK_SIZE)
            .await
            .map_err(operation_error)?;

        info!(material, color, manufacturer, "tag written");
        Ok(())
    }
}

/// Map a block I/O failure to the operation taxonomy.
fn operation_error(error: HardwareError) -> SessionError {
    if error.is_connectivity() {
        SessionError::not_connected(error.to_string())
    } else {
        SessionError::unknown(error.to_string())
    }
}
