//! PC/SC backend.
//!
//! Talks to the system smart card service (pcscd on Linux/macOS, WinSCard on
//! Windows) through the `pcsc` crate. A dedicated monitor thread blocks in
//! `SCardGetStatusChange` and turns reader and card state changes into
//! [`DriverEvent`]s; block operations are executed with the pseudo-APDUs from
//! [`crate::apdu`] on Tokio's blocking pool.
//!
//! Only the first reader matching the configured filter is tracked.

use std::ffi::{CStr, CString};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use pcsc::{
    Card, Context, MAX_BUFFER_SIZE, PNP_NOTIFICATION, Protocols, ReaderState, Scope, ShareMode,
    State,
};
use spooltag_core::{KeyType, MifareKey};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::apdu::{self, KEY_SLOT};
use crate::devices::AnyReader;
use crate::error::{HardwareError, Result};
use crate::traits::{DriverEvent, DriverEvents, ReaderDriver, TagReader};
use crate::types::{CardInfo, uid_hex};

/// Capacity of the PC/SC event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Default timeout of one `SCardGetStatusChange` wait.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

impl From<pcsc::Error> for HardwareError {
    fn from(error: pcsc::Error) -> Self {
        match error {
            pcsc::Error::NoService | pcsc::Error::ServiceStopped => {
                Self::service_unavailable(error.to_string())
            }
            pcsc::Error::NoReadersAvailable => Self::NoReaders,
            pcsc::Error::NoSmartcard | pcsc::Error::RemovedCard => Self::NoCard,
            pcsc::Error::ReaderUnavailable | pcsc::Error::UnknownReader => {
                Self::disconnected(error.to_string())
            }
            other => Self::communication(other.to_string()),
        }
    }
}

/// Driver backed by the system PC/SC service.
#[derive(Debug, Clone)]
pub struct PcscDriver {
    reader_filter: Option<String>,
    poll_interval: Duration,
}

impl Default for PcscDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl PcscDriver {
    pub fn new() -> Self {
        Self {
            reader_filter: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Only track readers whose name contains `filter`.
    pub fn with_reader_filter(mut self, filter: impl Into<String>) -> Self {
        self.reader_filter = Some(filter.into());
        self
    }

    /// Timeout of each status-change wait; bounds how fast shutdown is noticed.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

impl ReaderDriver for PcscDriver {
    async fn open(&self) -> Result<DriverEvents> {
        let context = Context::establish(Scope::User)?;
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let monitor = Monitor {
            context,
            tx,
            reader_filter: self.reader_filter.clone(),
            poll_interval: self.poll_interval,
        };

        std::thread::Builder::new()
            .name("pcsc-monitor".to_string())
            .spawn(move || monitor.run())?;

        info!(filter = ?self.reader_filter, "PC/SC context established");
        Ok(rx)
    }
}

struct ReaderInner {
    context: Context,
    reader: CString,
    card: Mutex<Option<Card>>,
}

impl ReaderInner {
    fn card(&self) -> MutexGuard<'_, Option<Card>> {
        self.card.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn connect(&self) -> Result<()> {
        let card = self
            .context
            .connect(&self.reader, ShareMode::Shared, Protocols::ANY)?;
        *self.card() = Some(card);
        Ok(())
    }

    fn disconnect(&self) {
        // Dropping the card releases it with SCARD_LEAVE_CARD.
        self.card().take();
    }

    fn transmit(&self, command: &[u8]) -> Result<Vec<u8>> {
        let guard = self.card();
        let card = guard.as_ref().ok_or(HardwareError::NoCard)?;
        let mut buffer = [0u8; MAX_BUFFER_SIZE];
        let response = card.transmit(command, &mut buffer)?;
        trace!(command = ?command, response = ?response, "APDU exchanged");
        Ok(response.to_vec())
    }
}

/// Reader handle delivered through [`DriverEvent::ReaderAppeared`].
pub struct PcscReader {
    name: String,
    inner: Arc<ReaderInner>,
}

impl fmt::Debug for PcscReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PcscReader")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl PcscReader {
    async fn exchange(&self, command: Vec<u8>) -> Result<Vec<u8>> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || inner.transmit(&command))
            .await
            .map_err(|e| HardwareError::other(format!("APDU task failed: {}", e)))?
    }

    /// APDU length byte for one block; zero and anything above 255 are rejected.
    fn block_length(block_size: usize) -> Result<u8> {
        match u8::try_from(block_size) {
            Ok(length) if length > 0 => Ok(length),
            _ => Err(HardwareError::unsupported(format!("block size {}", block_size))),
        }
    }
}

impl TagReader for PcscReader {
    fn name(&self) -> &str {
        &self.name
    }

    async fn authenticate(&self, block: u8, key_type: KeyType, key: &MifareKey) -> Result<()> {
        let response = self.exchange(apdu::load_key(KEY_SLOT, key)).await?;
        apdu::check_response(&response)?;

        let response = self
            .exchange(apdu::authenticate(block, key_type, KEY_SLOT))
            .await?;
        apdu::check_response(&response)
            .map_err(|e| HardwareError::authentication_rejected(block, e.to_string()))?;
        Ok(())
    }

    async fn read_block(&self, block: u8, length: usize, block_size: usize) -> Result<Vec<u8>> {
        let chunk = Self::block_length(block_size)?;
        let mut data = Vec::with_capacity(length);

        for offset in 0..length.div_ceil(block_size) {
            let index = block.wrapping_add(offset as u8);
            let response = self.exchange(apdu::read_binary(index, chunk)).await?;
            data.extend_from_slice(apdu::check_response(&response)?);
        }

        data.truncate(length);
        Ok(data)
    }

    async fn write_block(&self, block: u8, data: &[u8], block_size: usize) -> Result<()> {
        Self::block_length(block_size)?;
        if data.is_empty() || data.len() % block_size != 0 {
            return Err(HardwareError::invalid_data(format!(
                "data length {} is not a multiple of {}",
                data.len(),
                block_size
            )));
        }

        for (offset, chunk) in data.chunks(block_size).enumerate() {
            let index = block.wrapping_add(offset as u8);
            let response = self.exchange(apdu::update_binary(index, chunk)?).await?;
            apdu::check_response(&response)?;
        }
        Ok(())
    }
}

/// Reader currently tracked by the monitor.
struct Tracked {
    inner: Arc<ReaderInner>,
    card_reported: bool,
}

struct Monitor {
    context: Context,
    tx: mpsc::Sender<DriverEvent>,
    reader_filter: Option<String>,
    poll_interval: Duration,
}

impl Monitor {
    /// Returns `false` once the session side is gone.
    fn emit(&self, event: DriverEvent) -> bool {
        self.tx.blocking_send(event).is_ok()
    }

    fn accepts(&self, name: &CStr) -> bool {
        match &self.reader_filter {
            Some(filter) => name.to_string_lossy().contains(filter.as_str()),
            None => true,
        }
    }

    fn run(self) {
        let mut states = vec![ReaderState::new(PNP_NOTIFICATION(), State::UNAWARE)];
        let mut tracked: Option<Tracked> = None;

        while !self.tx.is_closed() {
            if let Some(current) = &tracked {
                let gone = states.iter().any(|rs| {
                    rs.name() == current.inner.reader.as_c_str()
                        && rs.event_state().intersects(State::UNKNOWN | State::IGNORE)
                });
                if gone {
                    info!(reader = ?current.inner.reader, "reader removed");
                    current.inner.disconnect();
                    tracked = None;
                    if !self.emit(DriverEvent::ReaderEnd) {
                        return;
                    }
                }
            }
            states.retain(|rs| {
                rs.name() == PNP_NOTIFICATION()
                    || !rs.event_state().intersects(State::UNKNOWN | State::IGNORE)
            });

            if tracked.is_none() {
                match self.context.list_readers_owned() {
                    Ok(names) => {
                        if let Some(name) = names.into_iter().find(|n| self.accepts(n)) {
                            info!(reader = ?name, "reader attached");
                            let inner = Arc::new(ReaderInner {
                                context: self.context.clone(),
                                reader: name.clone(),
                                card: Mutex::new(None),
                            });
                            let reader = PcscReader {
                                name: name.to_string_lossy().into_owned(),
                                inner: Arc::clone(&inner),
                            };
                            states.push(ReaderState::new(name, State::UNAWARE));
                            tracked = Some(Tracked {
                                inner,
                                card_reported: false,
                            });
                            if !self.emit(DriverEvent::ReaderAppeared(Arc::new(
                                AnyReader::Pcsc(reader),
                            ))) {
                                return;
                            }
                        }
                    }
                    Err(pcsc::Error::NoReadersAvailable) => {}
                    Err(e) => {
                        warn!(error = %e, "listing readers failed");
                        let _ = self.emit(DriverEvent::DriverError(e.into()));
                        return;
                    }
                }
            }

            for rs in &mut states {
                rs.sync_current_state();
            }

            match self
                .context
                .get_status_change(Some(self.poll_interval), &mut states)
            {
                Ok(()) => {}
                Err(pcsc::Error::Timeout) => continue,
                Err(e @ (pcsc::Error::NoService | pcsc::Error::ServiceStopped)) => {
                    warn!(error = %e, "PC/SC service went away");
                    let _ = self.emit(DriverEvent::DriverError(e.into()));
                    return;
                }
                Err(e) => {
                    debug!(error = %e, "status change wait failed");
                    if !self.emit(DriverEvent::ReaderError(e.into())) {
                        return;
                    }
                    std::thread::sleep(self.poll_interval);
                    continue;
                }
            }

            if let Some(current) = tracked.as_mut()
                && let Some(rs) = states
                    .iter()
                    .find(|rs| rs.name() == current.inner.reader.as_c_str())
            {
                let present = rs.event_state().contains(State::PRESENT);
                if present && !current.card_reported {
                    let atr = rs.atr().to_vec();
                    if !self.card_inserted(current, atr) {
                        return;
                    }
                } else if !present && current.card_reported {
                    debug!("card removed");
                    current.inner.disconnect();
                    current.card_reported = false;
                    if !self.emit(DriverEvent::CardRemoved) {
                        return;
                    }
                }
            }
        }
    }

    fn card_inserted(&self, current: &mut Tracked, atr: Vec<u8>) -> bool {
        if let Err(e) = current.inner.connect() {
            warn!(error = %e, "connecting to card failed");
            return self.emit(DriverEvent::ReaderError(e));
        }

        let uid = current
            .inner
            .transmit(&apdu::get_uid())
            .and_then(|response| apdu::check_response(&response).map(uid_hex))
            .map_err(|e| debug!(error = %e, "card did not report a UID"))
            .ok();

        debug!(uid = ?uid, "card inserted");
        current.card_reported = true;
        self.emit(DriverEvent::CardInserted {
            uid,
            card: CardInfo::from_atr(atr),
        })
    }
}
