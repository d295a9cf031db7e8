//! Enum wrappers for driver dispatch.
//!
//! Native `async fn` in traits (RPITIT) are not object-safe, so backends
//! cannot be stored as `Box<dyn ReaderDriver>`. These enums provide concrete
//! type dispatch instead, which keeps the returned futures concrete (and
//! `Send`) so the session can drive them from spawned Tokio tasks.
//!
//! # Examples
//!
//! ```
//! use spooltag_hardware::devices::AnyDriver;
//! use spooltag_hardware::mock::MockDriver;
//!
//! let (driver, _handle) = MockDriver::new();
//! let any_driver = AnyDriver::Mock(driver);
//! assert_eq!(any_driver.backend_name(), "mock");
//! ```

use spooltag_core::{KeyType, MifareKey};

use crate::error::Result;
use crate::mock::{MockDriver, MockReader};
#[cfg(feature = "hardware-pcsc")]
use crate::pcsc::{PcscDriver, PcscReader};
use crate::traits::{DriverEvents, ReaderDriver, TagReader};

/// Enum wrapper for driver dispatch.
#[derive(Debug)]
#[non_exhaustive]
pub enum AnyDriver {
    /// Mock driver for development and testing.
    Mock(MockDriver),

    /// System PC/SC service.
    #[cfg(feature = "hardware-pcsc")]
    Pcsc(PcscDriver),
}

impl AnyDriver {
    /// Short backend identifier for logs.
    pub fn backend_name(&self) -> &'static str {
        match self {
            Self::Mock(_) => "mock",
            #[cfg(feature = "hardware-pcsc")]
            Self::Pcsc(_) => "pcsc",
        }
    }
}

impl ReaderDriver for AnyDriver {
    async fn open(&self) -> Result<DriverEvents> {
        match self {
            Self::Mock(driver) => driver.open().await,
            #[cfg(feature = "hardware-pcsc")]
            Self::Pcsc(driver) => driver.open().await,
        }
    }
}

/// Enum wrapper for reader handle dispatch.
#[derive(Debug)]
#[non_exhaustive]
pub enum AnyReader {
    /// Mock reader for development and testing.
    Mock(MockReader),

    /// Reader attached to the system PC/SC service.
    #[cfg(feature = "hardware-pcsc")]
    Pcsc(PcscReader),
}

impl TagReader for AnyReader {
    fn name(&self) -> &str {
        match self {
            Self::Mock(reader) => reader.name(),
            #[cfg(feature = "hardware-pcsc")]
            Self::Pcsc(reader) => reader.name(),
        }
    }

    async fn authenticate(&self, block: u8, key_type: KeyType, key: &MifareKey) -> Result<()> {
        match self {
            Self::Mock(reader) => reader.authenticate(block, key_type, key).await,
            #[cfg(feature = "hardware-pcsc")]
            Self::Pcsc(reader) => reader.authenticate(block, key_type, key).await,
        }
    }

    async fn read_block(&self, block: u8, length: usize, block_size: usize) -> Result<Vec<u8>> {
        match self {
            Self::Mock(reader) => reader.read_block(block, length, block_size).await,
            #[cfg(feature = "hardware-pcsc")]
            Self::Pcsc(reader) => reader.read_block(block, length, block_size).await,
        }
    }

    async fn write_block(&self, block: u8, data: &[u8], block_size: usize) -> Result<()> {
        match self {
            Self::Mock(reader) => reader.write_block(block, data, block_size).await,
            #[cfg(feature = "hardware-pcsc")]
            Self::Pcsc(reader) => reader.write_block(block, data, block_size).await,
        }
    }
}
