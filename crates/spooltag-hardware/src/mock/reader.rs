//! Mock contactless reader for testing and development.
//!
//! This module provides a simulated reader backend that can be controlled
//! programmatically: readers are attached and detached, tags are placed on
//! and lifted off the reader, and every authenticate/read/write is served
//! from an in-memory tag database.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use spooltag_core::constants::BLOCK_SIZE;
use spooltag_core::{KeyType, MifareKey};
use tokio::sync::mpsc;

use crate::devices::AnyReader;
use crate::error::{HardwareError, Result};
use crate::traits::{DriverEvent, DriverEvents, ReaderDriver, TagReader};
use crate::types::CardInfo;

/// Capacity of the mock event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// ATR reported for every mock tag (Mifare Classic 1K storage card).
pub const MIFARE_CLASSIC_1K_ATR: [u8; 20] = [
    0x3B, 0x8F, 0x80, 0x01, 0x80, 0x4F, 0x0C, 0xA0, 0x00, 0x00, 0x03, 0x06, 0x03, 0x00, 0x01,
    0x00, 0x00, 0x00, 0x00, 0x6A,
];

/// Failure injected into [`MockDriver::open`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenFailure {
    /// Behave as if the smart card service is stopped.
    ServiceUnavailable,

    /// Behave as if no reader is plugged in.
    NoReaders,

    /// Fail with an arbitrary message.
    Other(String),
}

impl OpenFailure {
    fn to_error(&self) -> HardwareError {
        match self {
            Self::ServiceUnavailable => HardwareError::service_unavailable(
                "SCardEstablishContext: SCARD_E_NO_SERVICE (0x8010001D)",
            ),
            Self::NoReaders => HardwareError::NoReaders,
            Self::Other(message) => HardwareError::initialization_failed(message.clone()),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct MockTag {
    keys: Vec<MifareKey>,
    blocks: HashMap<u8, [u8; BLOCK_SIZE]>,
}

#[derive(Debug, Default)]
struct MockState {
    reader_name: String,
    attached: bool,
    tags: HashMap<String, MockTag>,
    present: Option<String>,
    authenticated: Option<u8>,
    auth_log: Vec<MifareKey>,
    latency: Duration,
    short_read: Option<usize>,
    read_failure: Option<String>,
    read_panic: bool,
    open_failure: Option<OpenFailure>,
    open_attempts: usize,
    in_flight: usize,
    max_in_flight: usize,
    event_tx: Option<mpsc::Sender<DriverEvent>>,
}

type SharedState = Arc<Mutex<MockState>>;

fn lock(state: &SharedState) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn new_reader(state: &SharedState, name: &str) -> Arc<AnyReader> {
    Arc::new(AnyReader::Mock(MockReader {
        name: name.to_string(),
        state: Arc::clone(state),
    }))
}

/// Mock driver for testing and development.
///
/// # Examples
///
/// ```
/// use spooltag_core::constants::FACTORY_DEFAULT_KEY;
/// use spooltag_hardware::mock::MockDriver;
/// use spooltag_hardware::traits::{DriverEvent, ReaderDriver};
///
/// #[tokio::main]
/// async fn main() -> spooltag_hardware::Result<()> {
///     let (driver, handle) = MockDriver::new();
///
///     handle.add_tag("04A1B2C3", vec![FACTORY_DEFAULT_KEY]);
///     handle.attach_reader().await?;
///     handle.insert_tag("04A1B2C3").await?;
///
///     // Readers and tags already present are replayed on open.
///     let mut events = driver.open().await?;
///     assert!(matches!(events.recv().await, Some(DriverEvent::ReaderAppeared(_))));
///     assert!(matches!(events.recv().await, Some(DriverEvent::CardInserted { .. })));
///
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct MockDriver {
    state: SharedState,
}

impl MockDriver {
    /// Create a new mock driver with the default reader name.
    ///
    /// Returns a tuple of (MockDriver, MockHandle) where the handle drives
    /// the simulated hardware.
    pub fn new() -> (Self, MockHandle) {
        Self::with_name("Mock NFC Reader")
    }

    /// Create a new mock driver whose reader reports `name`.
    pub fn with_name(name: impl Into<String>) -> (Self, MockHandle) {
        let state = Arc::new(Mutex::new(MockState {
            reader_name: name.into(),
            ..MockState::default()
        }));

        (
            Self {
                state: Arc::clone(&state),
            },
            MockHandle { state },
        )
    }

    fn open_now(&self) -> Result<DriverEvents> {
        let mut state = lock(&self.state);
        state.open_attempts += 1;

        if let Some(failure) = &state.open_failure {
            return Err(failure.to_error());
        }

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        // Replay what is already on the desk; the channel is fresh so these cannot fail.
        if state.attached {
            let _ = tx.try_send(DriverEvent::ReaderAppeared(new_reader(
                &self.state,
                &state.reader_name,
            )));
            if let Some(uid) = state.present.clone() {
                let _ = tx.try_send(DriverEvent::CardInserted {
                    uid: Some(uid),
                    card: CardInfo::from_atr(MIFARE_CLASSIC_1K_ATR.to_vec()),
                });
            }
        }

        state.event_tx = Some(tx);
        Ok(rx)
    }
}

impl ReaderDriver for MockDriver {
    async fn open(&self) -> Result<DriverEvents> {
        self.open_now()
    }
}

/// Mock reader handle delivered through [`DriverEvent::ReaderAppeared`].
#[derive(Debug)]
pub struct MockReader {
    name: String,
    state: SharedState,
}

/// Tracks overlapping hardware calls for the lifetime of one call.
struct OperationProbe {
    state: SharedState,
}

impl OperationProbe {
    fn enter(state: &SharedState) -> Self {
        let mut guard = lock(state);
        guard.in_flight += 1;
        guard.max_in_flight = guard.max_in_flight.max(guard.in_flight);
        Self {
            state: Arc::clone(state),
        }
    }
}

impl Drop for OperationProbe {
    fn drop(&mut self) {
        lock(&self.state).in_flight -= 1;
    }
}

impl MockReader {
    async fn simulate_latency(&self) {
        let latency = lock(&self.state).latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    fn check_block_size(block_size: usize) -> Result<()> {
        if block_size != BLOCK_SIZE {
            return Err(HardwareError::unsupported(format!(
                "block size {} (mock tags use {})",
                block_size, BLOCK_SIZE
            )));
        }
        Ok(())
    }

    /// UID of the present tag, provided `block` was authenticated.
    fn authorized_tag(&self, state: &MockState, block: u8) -> Result<String> {
        if !state.attached {
            return Err(HardwareError::disconnected(self.name.clone()));
        }
        let uid = state.present.clone().ok_or(HardwareError::NoCard)?;
        if state.authenticated != Some(block) {
            return Err(HardwareError::communication(format!(
                "block {} not authenticated (status 69 82)",
                block
            )));
        }
        Ok(uid)
    }
}

impl TagReader for MockReader {
    fn name(&self) -> &str {
        &self.name
    }

    async fn authenticate(&self, block: u8, key_type: KeyType, key: &MifareKey) -> Result<()> {
        let _probe = OperationProbe::enter(&self.state);
        self.simulate_latency().await;

        let mut state = lock(&self.state);
        state.auth_log.push(*key);

        if !state.attached {
            return Err(HardwareError::disconnected(self.name.clone()));
        }
        let uid = state.present.clone().ok_or(HardwareError::NoCard)?;

        let accepted = key_type == KeyType::A
            && state
                .tags
                .get(&uid)
                .is_some_and(|tag| tag.keys.contains(key));

        if accepted {
            state.authenticated = Some(block);
            Ok(())
        } else {
            state.authenticated = None;
            Err(HardwareError::authentication_rejected(block, "status 63 00"))
        }
    }

    async fn read_block(&self, block: u8, length: usize, block_size: usize) -> Result<Vec<u8>> {
        let _probe = OperationProbe::enter(&self.state);
        Self::check_block_size(block_size)?;
        self.simulate_latency().await;

        if lock(&self.state).read_panic {
            panic!("mock reader crashed reading block {}", block);
        }

        let state = lock(&self.state);
        let uid = self.authorized_tag(&state, block)?;

        if let Some(message) = &state.read_failure {
            return Err(HardwareError::communication(message.clone()));
        }

        let tag = state.tags.get(&uid).cloned().unwrap_or_default();
        let mut data = Vec::with_capacity(length);
        for offset in 0..length.div_ceil(block_size) {
            let index = block.wrapping_add(offset as u8);
            data.extend_from_slice(&tag.blocks.get(&index).copied().unwrap_or([0; BLOCK_SIZE]));
        }
        data.truncate(length);

        if let Some(limit) = state.short_read {
            data.truncate(limit);
        }
        Ok(data)
    }

    async fn write_block(&self, block: u8, data: &[u8], block_size: usize) -> Result<()> {
        let _probe = OperationProbe::enter(&self.state);
        Self::check_block_size(block_size)?;
        if data.is_empty() || data.len() % block_size != 0 {
            return Err(HardwareError::invalid_data(format!(
                "data length {} is not a multiple of {}",
                data.len(),
                block_size
            )));
        }
        self.simulate_latency().await;

        let mut state = lock(&self.state);
        let uid = self.authorized_tag(&state, block)?;

        let tag = state.tags.entry(uid).or_default();
        for (offset, chunk) in data.chunks(block_size).enumerate() {
            let mut contents = [0u8; BLOCK_SIZE];
            contents.copy_from_slice(chunk);
            tag.blocks.insert(block.wrapping_add(offset as u8), contents);
        }
        Ok(())
    }
}

/// Handle for controlling a mock driver.
///
/// Cloning the handle shares the same simulated hardware.
#[derive(Debug, Clone)]
pub struct MockHandle {
    state: SharedState,
}

impl MockHandle {
    async fn send(&self, event: DriverEvent) -> Result<()> {
        let tx = lock(&self.state).event_tx.clone();
        match tx {
            Some(tx) => tx
                .send(event)
                .await
                .map_err(|_| HardwareError::disconnected("mock event channel closed")),
            None => Ok(()),
        }
    }

    /// Register a tag that accepts `keys` (key type A) for every block.
    pub fn add_tag(&self, uid: impl Into<String>, keys: Vec<MifareKey>) {
        lock(&self.state).tags.insert(
            uid.into(),
            MockTag {
                keys,
                blocks: HashMap::new(),
            },
        );
    }

    /// Register a tag unless one with this UID exists; existing contents are kept.
    pub fn ensure_tag(&self, uid: impl Into<String>, keys: Vec<MifareKey>) {
        lock(&self.state)
            .tags
            .entry(uid.into())
            .or_insert_with(|| MockTag {
                keys,
                blocks: HashMap::new(),
            });
    }

    /// Preload the contents of a block of a registered tag.
    pub fn set_tag_block(&self, uid: &str, block: u8, contents: [u8; BLOCK_SIZE]) {
        if let Some(tag) = lock(&self.state).tags.get_mut(uid) {
            tag.blocks.insert(block, contents);
        }
    }

    /// Current contents of a block of a registered tag.
    pub fn tag_block(&self, uid: &str, block: u8) -> Option<[u8; BLOCK_SIZE]> {
        lock(&self.state)
            .tags
            .get(uid)
            .and_then(|tag| tag.blocks.get(&block).copied())
    }

    /// Plug the reader in.
    pub async fn attach_reader(&self) -> Result<()> {
        let reader = {
            let mut state = lock(&self.state);
            state.attached = true;
            state.authenticated = None;
            new_reader(&self.state, &state.reader_name)
        };
        self.send(DriverEvent::ReaderAppeared(reader)).await
    }

    /// Unplug the reader; any tag on it is gone too.
    pub async fn detach_reader(&self) -> Result<()> {
        {
            let mut state = lock(&self.state);
            state.attached = false;
            state.present = None;
            state.authenticated = None;
        }
        self.send(DriverEvent::ReaderEnd).await
    }

    /// Place a registered tag on the reader.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The tag UID is not in the database
    /// - No reader is attached
    /// - The event channel is closed
    pub async fn insert_tag(&self, uid: &str) -> Result<()> {
        {
            let mut state = lock(&self.state);
            if !state.tags.contains_key(uid) {
                return Err(HardwareError::invalid_data(format!(
                    "Tag {} not in database",
                    uid
                )));
            }
            if !state.attached {
                return Err(HardwareError::disconnected(state.reader_name.clone()));
            }
            state.present = Some(uid.to_string());
            state.authenticated = None;
        }

        self.send(DriverEvent::CardInserted {
            uid: Some(uid.to_string()),
            card: CardInfo::from_atr(MIFARE_CLASSIC_1K_ATR.to_vec()),
        })
        .await
    }

    /// Lift the current tag off the reader.
    pub async fn remove_tag(&self) -> Result<()> {
        {
            let mut state = lock(&self.state);
            state.present = None;
            state.authenticated = None;
        }
        self.send(DriverEvent::CardRemoved).await
    }

    /// Report an error scoped to the reader.
    pub async fn emit_reader_error(&self, error: HardwareError) -> Result<()> {
        self.send(DriverEvent::ReaderError(error)).await
    }

    /// Report a driver-wide error; the reader and tag are gone afterwards.
    pub async fn emit_driver_error(&self, error: HardwareError) -> Result<()> {
        {
            let mut state = lock(&self.state);
            state.attached = false;
            state.present = None;
            state.authenticated = None;
        }
        self.send(DriverEvent::DriverError(error)).await
    }

    /// Make every subsequent `open` fail (or succeed again with `None`).
    pub fn fail_open(&self, failure: Option<OpenFailure>) {
        lock(&self.state).open_failure = failure;
    }

    /// Number of times the driver has been opened, including failures.
    pub fn open_attempts(&self) -> usize {
        lock(&self.state).open_attempts
    }

    /// Keys presented to `authenticate`, in call order.
    pub fn auth_log(&self) -> Vec<MifareKey> {
        lock(&self.state).auth_log.clone()
    }

    pub fn clear_auth_log(&self) {
        lock(&self.state).auth_log.clear();
    }

    /// Delay applied to every hardware call.
    pub fn set_latency(&self, latency: Duration) {
        lock(&self.state).latency = latency;
    }

    /// Truncate every read to at most `limit` bytes.
    pub fn set_short_read(&self, limit: Option<usize>) {
        lock(&self.state).short_read = limit;
    }

    /// Make every read fail with `message`.
    pub fn fail_reads(&self, message: Option<String>) {
        lock(&self.state).read_failure = message;
    }

    /// Make every read panic, as a crashing driver would.
    pub fn panic_reads(&self, panic: bool) {
        lock(&self.state).read_panic = panic;
    }

    /// Close the event stream, as a driver whose service went away does.
    pub fn close_events(&self) {
        lock(&self.state).event_tx = None;
    }

    /// Highest number of hardware calls that were ever in flight at once.
    pub fn max_concurrent_operations(&self) -> usize {
        lock(&self.state).max_in_flight
    }

    /// Check if a tag is currently on the reader.
    pub fn is_tag_present(&self) -> bool {
        lock(&self.state).present.is_some()
    }

    /// Get the reader name.
    pub fn name(&self) -> String {
        lock(&self.state).reader_name.clone()
    }
}
