//! Periodic tag presence detection.
//!
//! While enabled, a Tokio task wakes every `interval`, compares the UID on the
//! reader with the last UID it reported and pushes an [`AutoStatus`] for each
//! transition:
//!
//! ```text
//! last seen   on reader   action
//! ---------   ---------   ------------------------------------------
//! any         new UID     read block, notify present (+ data/error)
//! some UID    nothing     notify removed
//! same UID    same UID    nothing
//! ```
//!
//! Reads take the shared [`BusyGate`]; a tick that finds it held is skipped.
//! Disabling is synchronous: once [`AutoDetector::disable`] returns no
//! further notification is delivered, even from a tick whose hardware call
//! was still in flight or whose notification was waiting for channel space.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use spooltag_core::constants::AUTO_DETECT_INTERVAL_MS;
use spooltag_core::{Result, TagRecord};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::factory::SessionFactory;
use crate::gate::BusyGate;
use crate::session::ReaderSession;

/// Notification pushed to the consumer on every presence transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoStatus {
    pub present: bool,
    pub tag_data: Option<TagRecord>,
    pub error: Option<String>,
}

impl AutoStatus {
    /// A tag arrived and was read.
    pub fn present(record: TagRecord) -> Self {
        Self {
            present: true,
            tag_data: Some(record),
            error: None,
        }
    }

    /// A tag arrived but could not be read.
    pub fn unreadable(error: impl Into<String>) -> Self {
        Self {
            present: true,
            tag_data: None,
            error: Some(error.into()),
        }
    }

    /// No tag on the reader.
    pub fn absent() -> Self {
        Self {
            present: false,
            tag_data: None,
            error: None,
        }
    }

    /// The tick itself failed; presence is unknown.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            present: false,
            tag_data: None,
            error: Some(error.into()),
        }
    }
}

/// What a delivered notification does to the last seen UID.
enum Seen {
    Keep,
    Set(String),
    Clear,
}

#[derive(Debug)]
struct Run {
    token: CancellationToken,
    task: JoinHandle<()>,
}

#[derive(Debug, Default)]
struct LoopState {
    last_seen_uid: Option<String>,
    run: Option<Run>,
}

#[derive(Debug)]
struct Shared {
    factory: Arc<SessionFactory>,
    gate: Arc<BusyGate>,
    notifier: mpsc::Sender<AutoStatus>,
    enabled: AtomicBool,
    // Never held across an await.
    state: Mutex<LoopState>,
    // Held while a notification is handed to the consumer.
    delivery: Arc<tokio::sync::Mutex<()>>,
}

/// Enable/disable state machine around the detection task.
#[derive(Debug)]
pub struct AutoDetector {
    shared: Arc<Shared>,
    interval: Duration,
}

impl AutoDetector {
    pub fn new(
        factory: Arc<SessionFactory>,
        gate: Arc<BusyGate>,
        notifier: mpsc::Sender<AutoStatus>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                factory,
                gate,
                notifier,
                enabled: AtomicBool::new(false),
                state: Mutex::new(LoopState::default()),
                delivery: Arc::new(tokio::sync::Mutex::new(())),
            }),
            interval: Duration::from_millis(AUTO_DETECT_INTERVAL_MS),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.enabled.load(Ordering::Acquire)
    }

    /// Start detection.
    ///
    /// Obtains the session with a forced retry. If a tag is already on the
    /// reader it is read and reported right away. Enabling while the task is
    /// running is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`spooltag_core::SessionError::NotConnected`] if no session can
    /// be obtained; detection stays disabled.
    pub async fn enable(&self) -> Result<()> {
        if self.shared.state().run.is_some() {
            trace!("auto-detect already running");
            return Ok(());
        }
        self.shared.enabled.store(true, Ordering::Release);

        let session = match self.shared.factory.get_session(true).await {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "auto-detect could not start");
                // A concurrent enable may have started the task meanwhile.
                if self.shared.state().run.is_none() {
                    self.shared.enabled.store(false, Ordering::Release);
                }
                return Err(e);
            }
        };

        let token = {
            let mut state = self.shared.state();
            if !self.is_enabled() {
                debug!("auto-detect disabled while starting");
                return Ok(());
            }
            if state.run.is_some() {
                trace!("auto-detect already running");
                return Ok(());
            }

            let token = CancellationToken::new();
            let task = tokio::spawn(Arc::clone(&self.shared).run(token.clone(), self.interval));
            state.run = Some(Run {
                token: token.clone(),
                task,
            });
            token
        };

        info!(interval_ms = self.interval.as_millis() as u64, "auto-detect enabled");
        if session.card_present() {
            self.shared.tick(&token).await;
        }
        Ok(())
    }

    /// Stop detection and report the tag as gone.
    ///
    /// The timer is cancelled before anything is awaited. If the consumer has
    /// fallen behind, the `absent` notification is queued behind what it has
    /// not read yet instead of blocking the caller.
    pub async fn disable(&self) {
        {
            let mut state = self.shared.state();
            if let Some(run) = state.run.take() {
                run.token.cancel();
                info!("auto-detect disabled");
            }
            state.last_seen_uid = None;
            self.shared.enabled.store(false, Ordering::Release);
        }

        // Waits out a delivery in progress; a cancelled one gives up at once.
        let delivery = Arc::clone(&self.shared.delivery).lock_owned().await;
        match self.shared.notifier.try_send(AutoStatus::absent()) {
            Ok(()) => {}
            Err(TrySendError::Full(status)) => {
                debug!("auto-detect consumer behind, queueing removal");
                let notifier = self.shared.notifier.clone();
                tokio::spawn(async move {
                    let _delivery = delivery;
                    if notifier.send(status).await.is_err() {
                        debug!("auto-detect consumer gone");
                    }
                });
            }
            Err(TrySendError::Closed(_)) => debug!("auto-detect consumer gone"),
        }
    }
}

impl Drop for AutoDetector {
    fn drop(&mut self) {
        if let Some(run) = self.shared.state().run.take() {
            run.token.cancel();
            run.task.abort();
        }
    }
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, LoopState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn run(self: Arc<Self>, token: CancellationToken, period: Duration) {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => self.tick(&token).await,
            }
        }
        debug!("auto-detect task stopped");
    }

    async fn tick(&self, token: &CancellationToken) {
        if token.is_cancelled() || !self.enabled.load(Ordering::Acquire) || self.gate.is_busy() {
            return;
        }
        let Some(session) = self.factory.try_session() else {
            trace!("no session yet");
            return;
        };

        let last_seen = self.state().last_seen_uid.clone();
        match (session.current_uid(), last_seen) {
            (Some(uid), last) if last.as_deref() != Some(uid.as_str()) => {
                self.read_and_report(token, &session, uid).await;
            }
            (None, Some(last)) => {
                debug!(uid = %last, "tag removed");
                self.deliver(token, AutoStatus::absent(), Seen::Clear).await;
            }
            _ => {}
        }
    }

    async fn read_and_report(
        &self,
        token: &CancellationToken,
        session: &Arc<ReaderSession>,
        uid: String,
    ) {
        let Some(_guard) = self.gate.try_acquire() else {
            return;
        };
        // Another tick may have reported this UID while we waited for the gate.
        if self.state().last_seen_uid.as_deref() == Some(uid.as_str()) {
            return;
        }

        debug!(uid = %uid, "new tag on reader");
        let reader = Arc::clone(session);
        let (status, seen) = match tokio::spawn(async move { reader.read_tag().await }).await {
            Ok(Ok(record)) => (AutoStatus::present(record), Seen::Set(uid)),
            Ok(Err(e)) => {
                warn!(uid = %uid, error = %e, "auto-detect read failed");
                (AutoStatus::unreadable(e.to_string()), Seen::Keep)
            }
            Err(e) => {
                warn!(error = %e, "auto-detect tick failed");
                (AutoStatus::failed(e.to_string()), Seen::Clear)
            }
        };
        self.deliver(token, status, seen).await;
    }

    async fn deliver(&self, token: &CancellationToken, status: AutoStatus, seen: Seen) {
        let _delivery = self.delivery.lock().await;
        {
            // Checked and applied under the lock `disable` cancels under.
            let mut state = self.state();
            if token.is_cancelled() {
                trace!("dropping notification after disable");
                return;
            }
            match seen {
                Seen::Keep => {}
                Seen::Set(uid) => state.last_seen_uid = Some(uid),
                Seen::Clear => state.last_seen_uid = None,
            }
        }

        tokio::select! {
            biased;
            _ = token.cancelled() => trace!("dropping notification after disable"),
            sent = self.notifier.send(status) => {
                if sent.is_err() {
                    debug!("auto-detect consumer gone");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spooltag_core::constants::{FACTORY_DEFAULT_KEY, TAG_BLOCK};
    use spooltag_hardware::AnyDriver;
    use spooltag_hardware::mock::{MockDriver, MockHandle, OpenFailure};

    const UID: &str = "04A1B2C3";

    struct Fixture {
        detector: AutoDetector,
        factory: Arc<SessionFactory>,
        handle: MockHandle,
        gate: Arc<BusyGate>,
        rx: mpsc::Receiver<AutoStatus>,
    }

    fn fixture() -> Fixture {
        let (driver, handle) = MockDriver::new();
        handle.add_tag(UID, vec![FACTORY_DEFAULT_KEY]);
        let factory = Arc::new(SessionFactory::new(AnyDriver::Mock(driver)));
        let gate = Arc::new(BusyGate::new());
        let (tx, rx) = mpsc::channel(16);
        let detector = AutoDetector::new(Arc::clone(&factory), Arc::clone(&gate), tx);
        Fixture {
            detector,
            factory,
            handle,
            gate,
            rx,
        }
    }

    #[test]
    fn test_auto_status_json() {
        let json = serde_json::to_value(AutoStatus::absent()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"present": false, "tagData": null, "error": null})
        );

        let record = TagRecord::from_block(&[5, 2, 1]);
        let json = serde_json::to_value(AutoStatus::present(record)).unwrap();
        assert_eq!(json["tagData"]["material"], 5);
        assert_eq!(json["tagData"]["rawBlock"].as_array().map(Vec::len), Some(16));
    }

    #[tokio::test(start_paused = true)]
    async fn test_enable_failure_stays_disabled() {
        let Fixture {
            detector,
            handle,
            mut rx,
            ..
        } = fixture();
        handle.fail_open(Some(OpenFailure::ServiceUnavailable));

        assert!(detector.enable().await.is_err());
        assert!(!detector.is_enabled());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_read_when_tag_present() {
        let Fixture {
            detector,
            factory,
            handle,
            mut rx,
            ..
        } = fixture();
        let session = factory.get_session(true).await.unwrap();
        handle.attach_reader().await.unwrap();
        handle.insert_tag(UID).await.unwrap();
        while !session.card_present() {
            tokio::task::yield_now().await;
        }

        detector.enable().await.unwrap();
        let status = rx.try_recv().expect("reported before the first tick");
        assert!(status.present);
        assert!(status.tag_data.is_some());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(rx.try_recv().is_err(), "unchanged ticks stay silent");
    }

    #[tokio::test(start_paused = true)]
    async fn test_enable_twice_keeps_one_task() {
        let Fixture {
            detector,
            factory,
            handle,
            mut rx,
            ..
        } = fixture();
        let session = factory.get_session(true).await.unwrap();
        handle.attach_reader().await.unwrap();
        handle.insert_tag(UID).await.unwrap();
        while !session.card_present() {
            tokio::task::yield_now().await;
        }

        detector.enable().await.unwrap();
        detector.enable().await.unwrap();
        assert!(detector.is_enabled());

        assert!(rx.recv().await.unwrap().present);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_skips_tick_while_gate_held() {
        let Fixture {
            detector,
            handle,
            gate,
            mut rx,
            ..
        } = fixture();
        detector.enable().await.unwrap();
        handle.attach_reader().await.unwrap();

        let guard = gate.try_acquire().unwrap();
        handle.insert_tag(UID).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(rx.try_recv().is_err());

        drop(guard);
        let status = rx.recv().await.unwrap();
        assert!(status.present);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_failure_reported_and_retried() {
        let Fixture {
            detector,
            handle,
            mut rx,
            ..
        } = fixture();
        detector.enable().await.unwrap();
        handle.attach_reader().await.unwrap();
        handle.fail_reads(Some("CRC error".to_string()));
        handle.insert_tag(UID).await.unwrap();

        let status = rx.recv().await.unwrap();
        assert!(status.present);
        assert!(status.tag_data.is_none());
        assert_eq!(status.error.as_deref(), Some("Communication error: CRC error"));

        // The UID was not recorded, so the next tick tries again.
        handle.fail_reads(None);
        let status = rx.recv().await.unwrap();
        assert!(status.tag_data.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disable_suppresses_in_flight_tick() {
        let Fixture {
            detector,
            handle,
            mut rx,
            ..
        } = fixture();
        detector.enable().await.unwrap();
        handle.attach_reader().await.unwrap();
        handle.set_latency(Duration::from_millis(500));
        handle.insert_tag(UID).await.unwrap();

        // Let a tick start its slow read, then disable mid-flight.
        tokio::time::sleep(Duration::from_millis(300)).await;
        detector.disable().await;
        assert!(!detector.is_enabled());

        assert_eq!(rx.recv().await.unwrap(), AutoStatus::absent());
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_enable_while_running_skips_reconnect() {
        let Fixture {
            detector,
            factory,
            handle,
            mut rx,
            ..
        } = fixture();
        detector.enable().await.unwrap();

        // The driver goes away and cannot be reopened.
        handle.close_events();
        while factory.try_session().is_some() {
            tokio::task::yield_now().await;
        }
        handle.fail_open(Some(OpenFailure::NoReaders));

        detector.enable().await.unwrap();
        assert!(detector.is_enabled());
        assert_eq!(handle.open_attempts(), 1);

        detector.disable().await;
        assert!(!detector.is_enabled());
        assert_eq!(rx.recv().await, Some(AutoStatus::absent()));

        // A later session is not picked up by the cancelled task.
        handle.fail_open(None);
        factory.get_session(true).await.unwrap();
        handle.attach_reader().await.unwrap();
        handle.insert_tag(UID).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_tick_does_nothing_when_disabled() {
        let Fixture {
            detector,
            factory,
            handle,
            mut rx,
            ..
        } = fixture();
        let session = factory.get_session(true).await.unwrap();
        handle.attach_reader().await.unwrap();
        handle.insert_tag(UID).await.unwrap();
        while !session.card_present() {
            tokio::task::yield_now().await;
        }

        detector.shared.tick(&CancellationToken::new()).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disable_with_full_channel() {
        let Fixture {
            detector,
            handle,
            mut rx,
            ..
        } = fixture();
        detector.enable().await.unwrap();
        handle.attach_reader().await.unwrap();
        handle.fail_reads(Some("CRC error".to_string()));
        handle.insert_tag(UID).await.unwrap();

        // The unreadable tag is reported on every tick; nobody drains.
        tokio::time::sleep(Duration::from_secs(10)).await;

        let disabled = tokio::time::timeout(Duration::from_secs(1), detector.disable()).await;
        assert!(disabled.is_ok());
        assert!(!detector.is_enabled());

        let mut unreadable = 0;
        loop {
            let status = rx.recv().await.unwrap();
            if status == AutoStatus::absent() {
                break;
            }
            assert!(status.present);
            assert!(status.error.is_some());
            unreadable += 1;
        }
        assert_eq!(unreadable, 16);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_failure_clears_last_seen() {
        let Fixture {
            detector,
            handle,
            mut rx,
            ..
        } = fixture();
        handle.add_tag("04D5E6F7", vec![FACTORY_DEFAULT_KEY]);
        handle.set_tag_block(UID, TAG_BLOCK, TagRecord::encode(5, 2, 1));
        detector.enable().await.unwrap();
        handle.attach_reader().await.unwrap();

        handle.insert_tag(UID).await.unwrap();
        assert!(rx.recv().await.unwrap().present);

        // Swap in a second tag whose read crashes the driver.
        handle.panic_reads(true);
        handle.remove_tag().await.unwrap();
        handle.insert_tag("04D5E6F7").await.unwrap();
        let status = rx.recv().await.unwrap();
        assert!(!status.present);
        assert!(status.tag_data.is_none());
        assert!(status.error.is_some());

        // The first tag is new again, since the failure forgot the last UID.
        handle.panic_reads(false);
        handle.remove_tag().await.unwrap();
        handle.insert_tag(UID).await.unwrap();
        let status = rx.recv().await.unwrap();
        assert!(status.present);
        assert_eq!(status.tag_data.map(|record| record.material), Some(5));
    }
}
