//! PC/SC pseudo-APDUs for contactless storage cards.
//!
//! Readers such as the ACR122U expose Mifare Classic memory through the
//! PC/SC part 3 storage card commands (class `FF`). This module builds those
//! commands and checks their status words; it does no I/O.

use spooltag_core::{KeyType, MifareKey};

use crate::error::{HardwareError, Result};

/// Successful completion status word.
pub const SW_SUCCESS: (u8, u8) = (0x90, 0x00);

/// Volatile key slot used for loaded keys.
pub const KEY_SLOT: u8 = 0x00;

/// `GET DATA` for the card UID.
pub fn get_uid() -> Vec<u8> {
    vec![0xFF, 0xCA, 0x00, 0x00, 0x00]
}

/// `LOAD KEYS` into the reader's volatile slot.
///
/// # Examples
///
/// ```
/// use spooltag_core::constants::FACTORY_DEFAULT_KEY;
/// use spooltag_hardware::apdu;
///
/// let command = apdu::load_key(0, &FACTORY_DEFAULT_KEY);
/// assert_eq!(&command[..5], &[0xFF, 0x82, 0x00, 0x00, 0x06]);
/// assert_eq!(command.len(), 11);
/// ```
pub fn load_key(slot: u8, key: &MifareKey) -> Vec<u8> {
    let mut command = vec![0xFF, 0x82, 0x00, slot, MifareKey::LEN as u8];
    command.extend_from_slice(key.as_bytes());
    command
}

/// `GENERAL AUTHENTICATE` of `block` with the key stored in `slot`.
pub fn authenticate(block: u8, key_type: KeyType, slot: u8) -> Vec<u8> {
    vec![
        0xFF,
        0x86,
        0x00,
        0x00,
        0x05,
        0x01,
        0x00,
        block,
        key_type.code(),
        slot,
    ]
}

/// `READ BINARY` of `length` bytes from `block`.
pub fn read_binary(block: u8, length: u8) -> Vec<u8> {
    vec![0xFF, 0xB0, 0x00, block, length]
}

/// `UPDATE BINARY` of `block` with `data`.
///
/// # Errors
///
/// Returns an error if `data` is longer than a short APDU can carry.
pub fn update_binary(block: u8, data: &[u8]) -> Result<Vec<u8>> {
    let length = u8::try_from(data.len()).map_err(|_| {
        HardwareError::invalid_data(format!("{} bytes do not fit one APDU", data.len()))
    })?;

    let mut command = vec![0xFF, 0xD6, 0x00, block, length];
    command.extend_from_slice(data);
    Ok(command)
}

/// Split a response into payload and status word.
pub fn split_response(response: &[u8]) -> Option<(&[u8], (u8, u8))> {
    match response {
        [payload @ .., sw1, sw2] => Some((payload, (*sw1, *sw2))),
        _ => None,
    }
}

/// Return the payload of a successful response.
///
/// # Errors
///
/// Returns [`HardwareError::InvalidData`] for a truncated response and
/// [`HardwareError::CommunicationError`] for any status other than `90 00`.
///
/// # Examples
///
/// ```
/// use spooltag_hardware::apdu;
///
/// assert_eq!(apdu::check_response(&[0x04, 0xA1, 0x90, 0x00]).unwrap(), &[0x04, 0xA1]);
/// assert!(apdu::check_response(&[0x63, 0x00]).is_err());
/// ```
pub fn check_response(response: &[u8]) -> Result<&[u8]> {
    let (payload, status) = split_response(response)
        .ok_or_else(|| HardwareError::invalid_data("response shorter than a status word"))?;

    if status == SW_SUCCESS {
        Ok(payload)
    } else {
        Err(HardwareError::communication(format!(
            "status {:02X} {:02X}",
            status.0, status.1
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_load_key_layout() {
        let key = MifareKey::new([1, 2, 3, 4, 5, 6]);
        assert_eq!(
            load_key(KEY_SLOT, &key),
            vec![0xFF, 0x82, 0x00, 0x00, 0x06, 1, 2, 3, 4, 5, 6]
        );
    }

    #[rstest]
    #[case(KeyType::A, 0x60)]
    #[case(KeyType::B, 0x61)]
    fn test_authenticate_layout(#[case] key_type: KeyType, #[case] code: u8) {
        assert_eq!(
            authenticate(4, key_type, KEY_SLOT),
            vec![0xFF, 0x86, 0x00, 0x00, 0x05, 0x01, 0x00, 0x04, code, 0x00]
        );
    }

    #[test]
    fn test_read_and_update_layout() {
        assert_eq!(read_binary(4, 16), vec![0xFF, 0xB0, 0x00, 0x04, 0x10]);

        let command = update_binary(4, &[0xAA; 16]).unwrap();
        assert_eq!(&command[..5], &[0xFF, 0xD6, 0x00, 0x04, 0x10]);
        assert_eq!(command.len(), 21);

        assert!(update_binary(4, &[0u8; 300]).is_err());
    }

    #[test]
    fn test_check_response() {
        assert!(check_response(&[0x90, 0x00]).unwrap().is_empty());
        assert!(matches!(
            check_response(&[0x90]),
            Err(HardwareError::InvalidData { .. })
        ));

        let err = check_response(&[0x63, 0x00]).unwrap_err();
        assert_eq!(err.to_string(), "Communication error: status 63 00");
    }
}
