//! Tag layout and session timing constants.
//!
//! The payload lives in a single 16-byte block of a Mifare Classic tag:
//!
//! ```text
//! block 4:  [material][color][manufacturer][ 13 reserved bytes (zero) ]
//!            byte 0    byte 1  byte 2        bytes 3..15
//! ```
//!
//! # Usage
//!
//! ```
//! use spooltag_core::constants::*;
//!
//! assert_eq!(TAG_BLOCK, 4);
//! assert_eq!(BLOCK_SIZE, 16);
//! assert!(MANUFACTURER_OFFSET < BLOCK_SIZE);
//! ```

use crate::types::MifareKey;

// ============================================================================
// Tag Memory Layout
// ============================================================================

/// Block index that stores the spool payload.
pub const TAG_BLOCK: u8 = 4;

/// Logical block length used for every read and write.
pub const BLOCK_SIZE: usize = 16;

/// Offset of the material code inside the payload block.
pub const MATERIAL_OFFSET: usize = 0;

/// Offset of the color code inside the payload block.
pub const COLOR_OFFSET: usize = 1;

/// Offset of the manufacturer code inside the payload block.
pub const MANUFACTURER_OFFSET: usize = 2;

/// Manufacturer code used when none is supplied or the tag returned a short block.
pub const DEFAULT_MANUFACTURER: u8 = 1;

// ============================================================================
// Authentication Keys
// ============================================================================

/// Vendor key programmed into spool tags at the factory.
///
/// Always tried first.
pub const VENDOR_KEY: MifareKey = MifareKey::new([0xD3, 0xF7, 0xD3, 0xF7, 0xD3, 0xF7]);

/// Transport key of blank Mifare Classic tags.
pub const FACTORY_DEFAULT_KEY: MifareKey = MifareKey::new([0xFF; 6]);

/// Ordered key candidates for authenticating [`TAG_BLOCK`].
///
/// # Examples
///
/// ```
/// use spooltag_core::constants::{DEFAULT_KEYS, FACTORY_DEFAULT_KEY, VENDOR_KEY};
///
/// assert_eq!(DEFAULT_KEYS[0], VENDOR_KEY);
/// assert_eq!(DEFAULT_KEYS[1], FACTORY_DEFAULT_KEY);
/// ```
pub const DEFAULT_KEYS: [MifareKey; 2] = [VENDOR_KEY, FACTORY_DEFAULT_KEY];

// ============================================================================
// Timing
// ============================================================================

/// Period of the auto-detect poll in milliseconds.
pub const AUTO_DETECT_INTERVAL_MS: u64 = 200;

/// Minimum delay between two unforced session construction attempts.
///
/// Protects a missing driver from being hammered by a polling caller.
pub const INIT_RETRY_MS: u64 = 5000;

/// Capacity of the auto-detect notification channel.
pub const NOTIFICATION_CHANNEL_CAPACITY: usize = 32;
