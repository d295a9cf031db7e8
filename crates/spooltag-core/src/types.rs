//! Tag payload and authentication key types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::{
    BLOCK_SIZE, COLOR_OFFSET, DEFAULT_MANUFACTURER, MANUFACTURER_OFFSET, MATERIAL_OFFSET,
};

/// Mifare Classic key slot used for block authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyType {
    /// Key A (`0x60`).
    A,

    /// Key B (`0x61`).
    B,
}

impl KeyType {
    /// Authentication command code for this key slot.
    pub fn code(&self) -> u8 {
        match self {
            Self::A => 0x60,
            Self::B => 0x61,
        }
    }
}

/// Errors raised while parsing a [`MifareKey`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("Key must be {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("Key is not valid hex: {0}")]
    InvalidHex(String),
}

/// A 6-byte Mifare Classic sector key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MifareKey([u8; MifareKey::LEN]);

impl MifareKey {
    /// Key length in bytes.
    pub const LEN: usize = 6;

    pub const fn new(bytes: [u8; Self::LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; Self::LEN] {
        &self.0
    }

    /// Parse a key from hex text, ignoring spaces and colons.
    ///
    /// # Examples
    ///
    /// ```
    /// use spooltag_core::MifareKey;
    ///
    /// let key = MifareKey::from_hex("FF:FF:FF:FF:FF:FF").unwrap();
    /// assert_eq!(key.as_bytes(), &[0xFF; 6]);
    ///
    /// assert!(MifareKey::from_hex("FFFF").is_err());
    /// assert!(MifareKey::from_hex("GGGGGGGGGGGG").is_err());
    /// ```
    pub fn from_hex(text: &str) -> Result<Self, KeyError> {
        let digits: String = text
            .chars()
            .filter(|c| !c.is_whitespace() && *c != ':')
            .collect();

        if digits.len() % 2 != 0 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(KeyError::InvalidHex(text.to_string()));
        }

        let actual = digits.len() / 2;
        if actual != Self::LEN {
            return Err(KeyError::InvalidLength {
                expected: Self::LEN,
                actual,
            });
        }

        let mut bytes = [0u8; Self::LEN];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&digits[i * 2..i * 2 + 2], 16)
                .map_err(|_| KeyError::InvalidHex(text.to_string()))?;
        }
        Ok(Self(bytes))
    }

    /// Upper-case hex form, e.g. `FFFFFFFFFFFF`.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02X}", b)).collect()
    }
}

impl fmt::Debug for MifareKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MifareKey({})", self.to_hex())
    }
}

impl fmt::Display for MifareKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for MifareKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for MifareKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for MifareKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::from_hex(&text).map_err(serde::de::Error::custom)
    }
}

/// Decoded content of the payload block.
///
/// Produced by a read and never stored; `raw_block` keeps the full 16 bytes
/// exactly as returned (zero-padded on a short read).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagRecord {
    pub material: u8,
    pub color: u8,
    pub manufacturer: u8,
    pub raw_block: [u8; BLOCK_SIZE],
}

impl TagRecord {
    /// Decode a block as returned by the reader.
    ///
    /// A zero byte is kept as zero. Only bytes missing from a short read fall
    /// back to defaults: material and color to 0, manufacturer to
    /// [`DEFAULT_MANUFACTURER`].
    ///
    /// # Examples
    ///
    /// ```
    /// use spooltag_core::TagRecord;
    ///
    /// let record = TagRecord::from_block(&[5, 2, 0]);
    /// assert_eq!(record.manufacturer, 0);
    ///
    /// let short = TagRecord::from_block(&[5, 2]);
    /// assert_eq!(short.manufacturer, 1);
    /// ```
    pub fn from_block(data: &[u8]) -> Self {
        let mut raw_block = [0u8; BLOCK_SIZE];
        let len = data.len().min(BLOCK_SIZE);
        raw_block[..len].copy_from_slice(&data[..len]);

        Self {
            material: data.get(MATERIAL_OFFSET).copied().unwrap_or(0),
            color: data.get(COLOR_OFFSET).copied().unwrap_or(0),
            manufacturer: data
                .get(MANUFACTURER_OFFSET)
                .copied()
                .unwrap_or(DEFAULT_MANUFACTURER),
            raw_block,
        }
    }

    /// Build the block written to a tag: three codes followed by zeros.
    ///
    /// # Examples
    ///
    /// ```
    /// use spooltag_core::TagRecord;
    ///
    /// let block = TagRecord::encode(5, 2, 1);
    /// assert_eq!(&block[..4], &[5, 2, 1, 0]);
    /// ```
    pub fn encode(material: u8, color: u8, manufacturer: u8) -> [u8; BLOCK_SIZE] {
        let mut block = [0u8; BLOCK_SIZE];
        block[MATERIAL_OFFSET] = material;
        block[COLOR_OFFSET] = color;
        block[MANUFACTURER_OFFSET] = manufacturer;
        block
    }

    /// Coerce untyped user input into a code byte.
    ///
    /// Anything that is not an integer in `0..=255` yields `default`.
    ///
    /// # Examples
    ///
    /// ```
    /// use spooltag_core::TagRecord;
    ///
    /// assert_eq!(TagRecord::coerce_code(" 7 ", 0), 7);
    /// assert_eq!(TagRecord::coerce_code("pla", 0), 0);
    /// assert_eq!(TagRecord::coerce_code("", 1), 1);
    /// ```
    pub fn coerce_code(raw: &str, default: u8) -> u8 {
        raw.trim().parse::<u8>().unwrap_or(default)
    }
}
