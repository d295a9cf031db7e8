//! Common test utilities for integration tests.
//!
//! Every test drives a [`RequestCoordinator`] backed by the mock reader. The
//! [`Bench`] fixture bundles the coordinator, the mock handle and the
//! notification receiver, and offers helpers that wait for the event pump to
//! catch up with what the mock just did.

#![allow(dead_code)]

use std::time::Duration;

use spooltag_core::MifareKey;
use spooltag_core::constants::{FACTORY_DEFAULT_KEY, VENDOR_KEY};
use spooltag_hardware::AnyDriver;
use spooltag_hardware::mock::{MockDriver, MockHandle};
use spooltag_session::{AutoStatus, RequestCoordinator, SessionConfig};
use tokio::sync::mpsc;

/// Test data shared by the integration tests.
pub mod test_data {
    /// Tag that only accepts the vendor key.
    pub const VENDOR_TAG: &str = "04A1B2C3";

    /// Tag that still has the factory default key.
    pub const BLANK_TAG: &str = "04D5E6F7";

    /// Tag that accepts neither key.
    pub const FOREIGN_TAG: &str = "0499AA55";
}

pub struct Bench {
    pub coordinator: RequestCoordinator,
    pub handle: MockHandle,
    pub notifications: mpsc::Receiver<AutoStatus>,
}

impl Bench {
    /// Coordinator over a mock reader that knows the three test tags.
    pub fn new() -> Self {
        Self::with_config(SessionConfig::default())
    }

    pub fn with_config(config: SessionConfig) -> Self {
        let (driver, handle) = MockDriver::with_name("ACS ACR122U PICC Interface");
        handle.add_tag(test_data::VENDOR_TAG, vec![VENDOR_KEY]);
        handle.add_tag(test_data::BLANK_TAG, vec![FACTORY_DEFAULT_KEY]);
        handle.add_tag(
            test_data::FOREIGN_TAG,
            vec![MifareKey::new([0xA0, 0xA1, 0xA2, 0xA3, 0xA4, 0xA5])],
        );

        let (coordinator, notifications) =
            RequestCoordinator::new(AnyDriver::Mock(driver), &config);
        Self {
            coordinator,
            handle,
            notifications,
        }
    }

    /// Construct the session and plug the reader in.
    pub async fn connect(&self) {
        self.coordinator
            .factory()
            .get_session(true)
            .await
            .expect("mock driver opens");
        self.handle.attach_reader().await.expect("reader attaches");
        self.settle(|status| status.connected).await;
    }

    pub async fn insert(&self, uid: &str) {
        self.handle.insert_tag(uid).await.expect("tag inserts");
        self.settle(|status| status.uid.as_deref() == Some(uid)).await;
    }

    pub async fn remove(&self) {
        self.handle.remove_tag().await.expect("tag removes");
        self.settle(|status| !status.card_present).await;
    }

    /// Yield until the coordinator status satisfies `done`.
    pub async fn settle(&self, done: impl Fn(&spooltag_session::StatusSnapshot) -> bool) {
        for _ in 0..1_000 {
            if done(&self.coordinator.status()) {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("status never settled: {:?}", self.coordinator.status());
    }

    /// Next notification, failing the test if none arrives in `within`.
    pub async fn next_notification(&mut self, within: Duration) -> AutoStatus {
        tokio::time::timeout(within, self.notifications.recv())
            .await
            .expect("notification in time")
            .expect("notification channel open")
    }

    /// Assert that nothing is delivered during `quiet`.
    pub async fn assert_silent(&mut self, quiet: Duration) {
        tokio::time::sleep(quiet).await;
        if let Ok(status) = self.notifications.try_recv() {
            panic!("unexpected notification: {:?}", status);
        }
    }
}
