//! Reader session manager for NFC filament spool tags.
//!
//! This crate owns the connection lifecycle of a single contactless reader
//! and everything built on top of it:
//!
//! - [`classifier`]: maps driver errors to `PCSC_SERVICE_NOT_RUNNING`,
//!   `NO_READERS` or `UNKNOWN` for status reporting
//! - [`session`]: connection state fed by driver events, key-fallback
//!   authentication, block read/write
//! - [`factory`]: lazy session construction with failure backoff
//! - [`auto_detect`]: timer-driven presence detection
//! - [`coordinator`]: request front door translating outcomes to message keys
//! - [`config`]: TOML configuration
//!
//! # Architecture
//!
//! ```text
//! ReaderDriver ──events──> pump task ──> ReaderSession
//!                                          ▲       ▲
//!                          AutoDetector ───┘       └─── RequestCoordinator
//!                               │    (shared BusyGate)          │
//!                               └──> AutoStatus channel         └──> CommandResponse
//! ```
//!
//! # Example
//!
//! ```
//! use spooltag_core::constants::FACTORY_DEFAULT_KEY;
//! use spooltag_hardware::AnyDriver;
//! use spooltag_hardware::mock::MockDriver;
//! use spooltag_session::{RequestCoordinator, SessionConfig};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let (driver, handle) = MockDriver::new();
//! handle.add_tag("04A1B2C3", vec![FACTORY_DEFAULT_KEY]);
//!
//! let (coordinator, mut notifications) =
//!     RequestCoordinator::new(AnyDriver::Mock(driver), &SessionConfig::default());
//! assert!(coordinator.set_auto_detect(true).await.enabled);
//!
//! handle.attach_reader().await.unwrap();
//! handle.insert_tag("04A1B2C3").await.unwrap();
//!
//! let status = notifications.recv().await.unwrap();
//! assert!(status.present);
//! # coordinator.shutdown().await;
//! # }
//! ```

pub mod auto_detect;
pub mod classifier;
pub mod config;
pub mod coordinator;
pub mod factory;
pub mod gate;
pub mod session;

// Re-export commonly used types for convenience
pub use auto_detect::{AutoDetector, AutoStatus};
pub use classifier::{ErrorCode, LastError};
pub use config::{ConfigError, PcscConfig, SessionConfig};
pub use coordinator::{AutoDetectResponse, CommandResponse, RequestCoordinator};
pub use factory::SessionFactory;
pub use gate::{BusyGate, BusyGuard};
pub use session::{PresentTag, ReaderSession, StatusSnapshot};
