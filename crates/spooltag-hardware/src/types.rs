//! Card types reported by reader drivers.

use serde::{Deserialize, Serialize};

/// Contactless card type identification.
///
/// Identifies the type of tag that entered the field. Only Mifare Classic
/// tags carry the key-protected block the session reads and writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum CardType {
    /// Mifare Classic 1K (1024 bytes).
    MifareClassic1K,

    /// Mifare Classic 4K (4096 bytes).
    MifareClassic4K,

    /// Mifare Ultralight (64 bytes).
    MifareUltralight,

    /// Unknown card type with ATR bytes.
    Unknown(Vec<u8>),
}

/// PC/SC part 3 ATR prefix for storage cards (`3B 8F 80 01 80 4F 0C A0 00 00 03 06`).
const STORAGE_CARD_ATR_PREFIX: [u8; 12] = [
    0x3B, 0x8F, 0x80, 0x01, 0x80, 0x4F, 0x0C, 0xA0, 0x00, 0x00, 0x03, 0x06,
];

impl CardType {
    /// Identify the card from its answer-to-reset.
    ///
    /// Readers following PC/SC part 3 encode the card name in bytes 13-14 of
    /// a storage card ATR.
    ///
    /// # Examples
    ///
    /// ```
    /// use spooltag_hardware::types::CardType;
    ///
    /// let atr = [
    ///     0x3B, 0x8F, 0x80, 0x01, 0x80, 0x4F, 0x0C, 0xA0, 0x00, 0x00, 0x03, 0x06,
    ///     0x03, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x6A,
    /// ];
    /// assert_eq!(CardType::from_atr(&atr), CardType::MifareClassic1K);
    /// ```
    pub fn from_atr(atr: &[u8]) -> Self {
        if !atr.starts_with(&STORAGE_CARD_ATR_PREFIX) {
            return Self::Unknown(atr.to_vec());
        }

        match (atr.get(13), atr.get(14)) {
            (Some(0x00), Some(0x01)) => Self::MifareClassic1K,
            (Some(0x00), Some(0x02)) => Self::MifareClassic4K,
            (Some(0x00), Some(0x03)) => Self::MifareUltralight,
            _ => Self::Unknown(atr.to_vec()),
        }
    }

    /// Get a human-readable name for the card type.
    pub fn name(&self) -> &str {
        match self {
            Self::MifareClassic1K => "Mifare Classic 1K",
            Self::MifareClassic4K => "Mifare Classic 4K",
            Self::MifareUltralight => "Mifare Ultralight",
            Self::Unknown(_) => "Unknown",
        }
    }

    /// Check if this is a known card type.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }
}

/// Opaque handle describing the tag currently in the field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardInfo {
    /// Answer-to-reset bytes as reported by the reader.
    pub atr: Vec<u8>,

    /// Card type derived from the ATR.
    pub card_type: CardType,
}

impl CardInfo {
    /// Create a card handle from an ATR.
    pub fn from_atr(atr: Vec<u8>) -> Self {
        Self {
            card_type: CardType::from_atr(&atr),
            atr,
        }
    }
}

/// Format bytes as contiguous upper-case hex, the form used for tag UIDs.
///
/// # Examples
///
/// ```
/// use spooltag_hardware::types::uid_hex;
///
/// assert_eq!(uid_hex(&[0x04, 0xA1, 0x2B]), "04A12B");
/// ```
pub fn uid_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}
