//! Base64 codec for binary fields at the storage boundary.
//!
//! Every key, nonce and ciphertext leaves the process as standard padded
//! base64. Fixed-size fields are length-checked on the way back in so a
//! truncated or padded value never reaches the cipher.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::WireError;

pub fn encode(data: &[u8]) -> String {
    STANDARD.encode(data)
}

pub fn decode(field: &'static str, s: &str) -> Result<Vec<u8>, WireError> {
    STANDARD
        .decode(s.trim())
        .map_err(|_| WireError::InvalidBase64 { field })
}

pub fn decode_fixed<const N: usize>(field: &'static str, s: &str) -> Result<[u8; N], WireError> {
    let bytes = decode(field, s)?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| WireError::InvalidLength {
            field,
            expected: N,
            actual: bytes.len(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_length_accepted() {
        let encoded = encode(&[7u8; 24]);
        let decoded: [u8; 24] = decode_fixed("nonce", &encoded).unwrap();
        assert_eq!(decoded, [7u8; 24]);
    }

    #[test]
    fn test_wrong_length_rejected() {
        let encoded = encode(&[7u8; 23]);
        let err = decode_fixed::<24>("nonce", &encoded).unwrap_err();
        assert_eq!(
            err,
            WireError::InvalidLength {
                field: "nonce",
                expected: 24,
                actual: 23
            }
        );
    }

    #[test]
    fn test_garbage_rejected() {
        assert_eq!(
            decode("ciphertext", "not base64!!").unwrap_err(),
            WireError::InvalidBase64 {
                field: "ciphertext"
            }
        );
    }
}
