//! Reader driver abstraction for the spool tag session manager.
//!
//! This crate hides the physical NFC reader behind two async traits so the
//! session layer never talks to a smart card stack directly:
//!
//! - [`ReaderDriver`] opens the transport and yields an ordered stream of
//!   [`DriverEvent`]s (reader appeared, card inserted, card removed, ...).
//! - [`TagReader`] authenticates, reads and writes Mifare Classic blocks on
//!   the tag currently in the field.
//!
//! # Backends
//!
//! | Backend | Feature | Notes |
//! |---------|---------|-------|
//! | [`mock::MockDriver`] | always | Scriptable through [`mock::MockHandle`] |
//! | `pcsc::PcscDriver` | `hardware-pcsc` | System PC/SC service (pcscd / WinSCard) |
//!
//! Backends are reached through the [`AnyDriver`] / [`AnyReader`] enums
//! because native `async fn` in traits is not object-safe.
//!
//! # Example
//!
//! ```
//! use spooltag_core::constants::FACTORY_DEFAULT_KEY;
//! use spooltag_hardware::mock::MockDriver;
//! use spooltag_hardware::{DriverEvent, ReaderDriver};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let (driver, handle) = MockDriver::new();
//! handle.add_tag("04A1B2C3", vec![FACTORY_DEFAULT_KEY]);
//!
//! let mut events = driver.open().await.unwrap();
//! handle.attach_reader().await.unwrap();
//! assert!(matches!(events.recv().await, Some(DriverEvent::ReaderAppeared(_))));
//! # }
//! ```
//!
//! # Error Handling
//!
//! All operations return [`Result<T>`][error::Result] with a [`HardwareError`].
//! Service and reader availability are reported as dedicated variants so
//! callers can classify them without matching on message text.

pub mod apdu;
pub mod devices;
pub mod error;
pub mod mock;
#[cfg(feature = "hardware-pcsc")]
pub mod pcsc;
pub mod traits;
pub mod types;

// Re-export commonly used types for convenience
pub use devices::{AnyDriver, AnyReader};
pub use error::{HardwareError, Result};
pub use traits::{DriverEvent, DriverEvents, ReaderDriver, TagReader};
pub use types::{CardInfo, CardType, uid_hex};
