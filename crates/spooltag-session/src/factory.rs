//! Lazy session construction with failure backoff.
//!
//! Opening the driver is deferred until something actually needs a reader.
//! A failed attempt is remembered: non-forced callers fail fast until the
//! retry window has passed, while forced callers (explicit user requests)
//! always try again.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use spooltag_core::constants::{DEFAULT_KEYS, INIT_RETRY_MS};
use spooltag_core::{MifareKey, Result, SessionError};
use spooltag_hardware::{AnyDriver, DriverEvents, ReaderDriver};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::classifier::LastError;
use crate::config::SessionConfig;
use crate::session::ReaderSession;

#[derive(Debug, Default)]
struct FactoryState {
    session: Option<Arc<ReaderSession>>,
    pump: Option<JoinHandle<()>>,
    last_failure: Option<Instant>,
    last_error: Option<LastError>,
}

type SharedState = Arc<Mutex<FactoryState>>;

fn lock(state: &SharedState) -> MutexGuard<'_, FactoryState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Builds the single [`ReaderSession`] on first use.
#[derive(Debug)]
pub struct SessionFactory {
    driver: AnyDriver,
    keys: Vec<MifareKey>,
    retry_after: Duration,
    state: SharedState,
    // Serializes construction so concurrent callers never open the driver twice.
    constructing: tokio::sync::Mutex<()>,
}

impl SessionFactory {
    /// Create a factory with default keys and retry window.
    pub fn new(driver: AnyDriver) -> Self {
        Self {
            driver,
            keys: DEFAULT_KEYS.to_vec(),
            retry_after: Duration::from_millis(INIT_RETRY_MS),
            state: SharedState::default(),
            constructing: tokio::sync::Mutex::new(()),
        }
    }

    pub fn from_config(driver: AnyDriver, config: &SessionConfig) -> Self {
        Self::new(driver)
            .with_keys(config.keys.clone())
            .with_retry_after(config.init_retry())
    }

    pub fn with_keys(mut self, keys: Vec<MifareKey>) -> Self {
        self.keys = keys;
        self
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = retry_after;
        self
    }

    /// Existing session, if any. Never constructs.
    pub fn try_session(&self) -> Option<Arc<ReaderSession>> {
        lock(&self.state).session.clone()
    }

    /// Error of the last failed construction, until one succeeds.
    pub fn last_init_error(&self) -> Option<LastError> {
        lock(&self.state).last_error.clone()
    }

    /// Return the session, constructing it if needed.
    ///
    /// An existing session is returned as is. Otherwise, unless `force_retry`
    /// is set, a failure younger than the retry window fails immediately
    /// without touching the driver.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotConnected`] if the driver cannot be opened
    /// or the retry window has not elapsed.
    pub async fn get_session(&self, force_retry: bool) -> Result<Arc<ReaderSession>> {
        if let Some(session) = self.try_session() {
            return Ok(session);
        }

        let _constructing = self.constructing.lock().await;

        {
            let state = lock(&self.state);
            if let Some(session) = &state.session {
                return Ok(Arc::clone(session));
            }

            if !force_retry
                && let Some(failed_at) = state.last_failure
                && failed_at.elapsed() < self.retry_after
            {
                let reason = state
                    .last_error
                    .as_ref()
                    .map(|e| e.message.clone())
                    .unwrap_or_else(|| "reader initialization failed recently".to_string());
                debug!(reason = %reason, "session construction backing off");
                return Err(SessionError::not_connected(reason));
            }
        }

        debug!(backend = self.driver.backend_name(), "opening reader driver");
        match self.driver.open().await {
            Ok(events) => {
                let session = Arc::new(ReaderSession::new(self.keys.clone()));
                let pump = tokio::spawn(pump_events(
                    Arc::clone(&session),
                    events,
                    Arc::clone(&self.state),
                ));

                let mut state = lock(&self.state);
                state.session = Some(Arc::clone(&session));
                state.pump = Some(pump);
                state.last_failure = None;
                state.last_error = None;

                info!(backend = self.driver.backend_name(), "reader session created");
                Ok(session)
            }
            Err(e) => {
                warn!(error = %e, "reader session construction failed");
                let mut state = lock(&self.state);
                state.last_failure = Some(Instant::now());
                state.last_error = Some(LastError::from_hardware(&e));
                Err(SessionError::not_connected(e.to_string()))
            }
        }
    }

    /// Stop applying driver events and drop the session.
    pub fn shutdown(&self) {
        let mut state = lock(&self.state);
        if let Some(pump) = state.pump.take() {
            pump.abort();
        }
        if state.session.take().is_some() {
            info!("reader session closed");
        }
    }
}

impl Drop for SessionFactory {
    fn drop(&mut self) {
        if let Some(pump) = lock(&self.state).pump.take() {
            pump.abort();
        }
    }
}

/// Apply driver events to `session` in order until the driver goes away.
///
/// When the stream ends the session is discarded so that the next
/// `get_session` reopens the driver.
async fn pump_events(session: Arc<ReaderSession>, mut events: DriverEvents, state: SharedState) {
    while let Some(event) = events.recv().await {
        session.apply_event(event);
    }

    warn!("driver event stream closed");
    let mut state = lock(&state);
    if state
        .session
        .as_ref()
        .is_some_and(|current| Arc::ptr_eq(current, &session))
    {
        state.session = None;
        state.pump = None;
        state.last_error = session.last_error();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spooltag_core::constants::FACTORY_DEFAULT_KEY;
    use spooltag_hardware::HardwareError;
    use spooltag_hardware::mock::{MockDriver, MockHandle, OpenFailure};

    use crate::classifier::ErrorCode;

    fn factory() -> (SessionFactory, MockHandle) {
        let (driver, handle) = MockDriver::new();
        (SessionFactory::new(AnyDriver::Mock(driver)), handle)
    }

    #[tokio::test]
    async fn test_try_session_never_constructs() {
        let (factory, handle) = factory();
        assert!(factory.try_session().is_none());
        assert_eq!(handle.open_attempts(), 0);
    }

    #[tokio::test]
    async fn test_existing_session_is_reused() {
        let (factory, handle) = factory();
        let first = factory.get_session(false).await.unwrap();
        let second = factory.get_session(true).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(handle.open_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_window() {
        let (factory, handle) = factory();
        handle.fail_open(Some(OpenFailure::ServiceUnavailable));

        assert!(matches!(
            factory.get_session(false).await,
            Err(SessionError::NotConnected(_))
        ));
        assert_eq!(handle.open_attempts(), 1);

        // Within the window: fail fast, no new attempt.
        tokio::time::advance(Duration::from_millis(4_999)).await;
        assert!(factory.get_session(false).await.is_err());
        assert_eq!(handle.open_attempts(), 1);

        // Window elapsed: a new attempt is made.
        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(factory.get_session(false).await.is_err());
        assert_eq!(handle.open_attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_forced_retry_ignores_backoff() {
        let (factory, handle) = factory();
        handle.fail_open(Some(OpenFailure::NoReaders));
        assert!(factory.get_session(false).await.is_err());

        handle.fail_open(None);
        let session = factory.get_session(true).await.unwrap();
        assert_eq!(handle.open_attempts(), 2);
        assert!(factory.last_init_error().is_none());
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn test_last_init_error_is_classified() {
        let (factory, handle) = factory();
        handle.fail_open(Some(OpenFailure::ServiceUnavailable));
        let _ = factory.get_session(true).await;

        let error = factory.last_init_error().unwrap();
        assert_eq!(error.code, ErrorCode::PcscServiceNotRunning);
        assert!(error.message.contains("SCARD_E_NO_SERVICE"));
    }

    #[tokio::test]
    async fn test_pump_applies_events_in_order() {
        let (factory, handle) = factory();
        handle.add_tag("04A1B2C3", vec![FACTORY_DEFAULT_KEY]);
        let session = factory.get_session(true).await.unwrap();

        handle.attach_reader().await.unwrap();
        handle.insert_tag("04A1B2C3").await.unwrap();
        handle.remove_tag().await.unwrap();
        handle.insert_tag("04A1B2C3").await.unwrap();

        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        assert_eq!(session.current_uid().as_deref(), Some("04A1B2C3"));
        assert!(session.is_connected());
    }

    #[tokio::test]
    async fn test_shutdown_drops_session() {
        let (factory, handle) = factory();
        factory.get_session(true).await.unwrap();

        factory.shutdown();
        assert!(factory.try_session().is_none());

        // The pump is gone, so the mock can no longer deliver events.
        tokio::task::yield_now().await;
        assert!(handle.attach_reader().await.is_err());
    }

    #[tokio::test]
    async fn test_closed_stream_discards_session() {
        let (factory, handle) = factory();
        let session = factory.get_session(true).await.unwrap();

        handle
            .emit_driver_error(HardwareError::service_unavailable(
                "SCardGetStatusChange: SCARD_E_NO_SERVICE",
            ))
            .await
            .unwrap();
        handle.close_events();
        while factory.try_session().is_some() {
            tokio::task::yield_now().await;
        }

        let error = factory.last_init_error().unwrap();
        assert_eq!(error.code, ErrorCode::PcscServiceNotRunning);
        assert_eq!(session.last_error(), Some(error));

        // No backoff: the stream ending is not a construction failure.
        let reopened = factory.get_session(false).await.unwrap();
        assert!(!Arc::ptr_eq(&session, &reopened));
        assert_eq!(handle.open_attempts(), 2);
        assert!(factory.last_init_error().is_none());
    }
}
