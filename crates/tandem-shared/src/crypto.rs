//! At-rest sealing of device-local records.
//!
//! Each record is sealed under its own subkey of the device key, and the
//! record id is bound as associated data, so a sealed blob copied onto
//! another row fails to open. Message encryption lives in [`crate::envelope`].

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    Key, XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use zeroize::Zeroizing;

use crate::constants::{KDF_CONTEXT_AT_REST_KEY, NONCE_SIZE, SYMMETRIC_KEY_SIZE, TAG_SIZE};
use crate::error::CryptoError;

pub type SymmetricKey = [u8; SYMMETRIC_KEY_SIZE];

/// Fresh random device key.
pub fn generate_device_key() -> SymmetricKey {
    let mut key = [0u8; SYMMETRIC_KEY_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut key);
    key
}

pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

fn record_cipher(device_key: &SymmetricKey, record_id: &[u8]) -> XChaCha20Poly1305 {
    let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT_AT_REST_KEY);
    hasher.update(device_key);
    hasher.update(record_id);
    let subkey = Zeroizing::new(*hasher.finalize().as_bytes());
    XChaCha20Poly1305::new(Key::from_slice(subkey.as_slice()))
}

/// Seal `plaintext` for `record_id`. Output layout: nonce || ciphertext.
pub fn seal_record(
    device_key: &SymmetricKey,
    record_id: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let nonce = generate_nonce();
    let ciphertext = record_cipher(device_key, record_id)
        .encrypt(
            XNonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad: record_id,
            },
        )
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

pub fn open_record(
    device_key: &SymmetricKey,
    record_id: &[u8],
    sealed: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if sealed.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::DecryptionFailed);
    }
    let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);

    record_cipher(device_key, record_id)
        .decrypt(
            XNonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad: record_id,
            },
        )
        .map(Zeroizing::new)
        .map_err(|_| CryptoError::DecryptionFailed)
}
