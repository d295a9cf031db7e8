//! Reader driver trait definitions.
//!
//! A backend is split in two capabilities:
//!
//! - [`ReaderDriver`] opens the transport and yields an ordered stream of
//!   [`DriverEvent`]s (reader appeared, card inserted, ...).
//! - [`TagReader`] is the per-reader handle carried by
//!   [`DriverEvent::ReaderAppeared`]; it exposes the block-level
//!   authenticate/read/write primitives.
//!
//! All traits use native `async fn` methods (Rust 1.90 + Edition 2024 RPITIT),
//! eliminating the need for the `async_trait` macro.

#![allow(async_fn_in_trait)]

use std::sync::Arc;

use spooltag_core::{KeyType, MifareKey};
use tokio::sync::mpsc;

use crate::devices::AnyReader;
use crate::error::{HardwareError, Result};
use crate::types::CardInfo;

/// Event emitted by a driver, in the order the hardware produced it.
#[derive(Debug)]
#[non_exhaustive]
pub enum DriverEvent {
    /// A reader became available. The handle stays valid until
    /// [`DriverEvent::ReaderEnd`] or a global [`DriverEvent::DriverError`].
    ReaderAppeared(Arc<AnyReader>),

    /// A tag entered the field. `uid` is `None` when the reader could not
    /// report one.
    CardInserted { uid: Option<String>, card: CardInfo },

    /// The tag left the field.
    CardRemoved,

    /// Error scoped to the current reader; the reader stays attached.
    ReaderError(HardwareError),

    /// The reader was physically removed.
    ReaderEnd,

    /// Error of the driver as a whole; every reader is gone.
    DriverError(HardwareError),
}

/// Receiving side of a driver's event stream.
pub type DriverEvents = mpsc::Receiver<DriverEvent>;

/// Transport that can be opened to start receiving reader events.
///
/// # Object Safety and Dynamic Dispatch
///
/// **NOTE**: This trait is NOT object-safe because `async fn` methods return
/// `impl Future`. For dynamic dispatch use
/// [`AnyDriver`](crate::devices::AnyDriver).
pub trait ReaderDriver: Send + Sync {
    /// Open the transport.
    ///
    /// Readers and tags that are already present are reported as the first
    /// events of the returned stream.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The smart card service is not running
    /// - The transport cannot be initialized
    async fn open(&self) -> Result<DriverEvents>;
}

/// Block-level access to the tag currently on a reader.
///
/// # Examples
///
/// ```no_run
/// use spooltag_core::{KeyType, constants::{BLOCK_SIZE, FACTORY_DEFAULT_KEY, TAG_BLOCK}};
/// use spooltag_hardware::traits::TagReader;
/// use spooltag_hardware::error::Result;
///
/// async fn dump_block<R: TagReader>(reader: &R) -> Result<Vec<u8>> {
///     reader
///         .authenticate(TAG_BLOCK, KeyType::A, &FACTORY_DEFAULT_KEY)
///         .await?;
///     reader.read_block(TAG_BLOCK, BLOCK_SIZE, BLOCK_SIZE).await
/// }
/// ```
pub trait TagReader: Send + Sync {
    /// Reader name as reported by the driver.
    fn name(&self) -> &str;

    /// Authenticate `block` of the present tag with `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - No tag is present
    /// - The tag rejects the key ([`HardwareError::AuthenticationRejected`])
    /// - A communication error occurs
    async fn authenticate(&self, block: u8, key_type: KeyType, key: &MifareKey) -> Result<()>;

    /// Read `length` bytes starting at `block`, using `block_size` byte blocks.
    ///
    /// The block must have been authenticated first.
    ///
    /// # Errors
    ///
    /// Returns an error if the block is not authenticated, the tag left the
    /// field or a communication error occurs.
    async fn read_block(&self, block: u8, length: usize, block_size: usize) -> Result<Vec<u8>>;

    /// Write `data` starting at `block`, using `block_size` byte blocks.
    ///
    /// # Errors
    ///
    /// Returns an error if the block is not authenticated, `data` is not a
    /// whole number of blocks, the tag left the field or a communication
    /// error occurs.
    async fn write_block(&self, block: u8, data: &[u8], block_size: usize) -> Result<()>;
}
