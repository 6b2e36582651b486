//! Dual-recipient envelope cipher.
//!
//! A message is encrypted twice, once for each conversation participant.
//! Each copy uses authenticated public-key encryption:
//!
//! ```text
//! shared = X25519(sender_secret, recipient_public)
//! key    = BLAKE3-derive("tandem-envelope-v1", shared || lo(pk) || hi(pk))
//! ct     = XChaCha20-Poly1305(key, random_nonce, plaintext, aad = version)
//! ```
//!
//! `lo(pk)`/`hi(pk)` are the sender and recipient public keys in byte order,
//! so both ends derive the same key. The version tag is bound as associated
//! data.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    Key, XChaCha20Poly1305, XNonce,
};
use zeroize::Zeroizing;

use crate::constants::{
    ENCRYPTION_VERSION, KDF_CONTEXT_ENVELOPE_KEY, NONCE_SIZE, SYMMETRIC_KEY_SIZE, TAG_SIZE,
};
use crate::crypto::generate_nonce;
use crate::error::{CryptoError, DecryptFailure};
use crate::identity::MessagingIdentity;
use crate::types::PublicKey;

/// One ciphertext addressed to one participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedCopy {
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; NONCE_SIZE],
}

/// Both copies of a message, tagged with the protocol version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub for_a: SealedCopy,
    pub for_b: SealedCopy,
    pub version: &'static str,
}

/// Encrypt `plaintext` independently for participant A and participant B.
pub fn encrypt_for_both(
    plaintext: &[u8],
    key_a: &PublicKey,
    key_b: &PublicKey,
    sender: &MessagingIdentity,
) -> Result<Envelope, CryptoError> {
    Ok(Envelope {
        for_a: seal_for(plaintext, key_a, sender)?,
        for_b: seal_for(plaintext, key_b, sender)?,
        version: ENCRYPTION_VERSION,
    })
}

/// Encrypt `plaintext` for a single recipient with a fresh nonce.
pub fn seal_for(
    plaintext: &[u8],
    recipient: &PublicKey,
    sender: &MessagingIdentity,
) -> Result<SealedCopy, CryptoError> {
    let key = envelope_key(sender, recipient).ok_or(CryptoError::NonContributory)?;
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_slice()));
    let nonce = generate_nonce();

    let ciphertext = cipher
        .encrypt(
            XNonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad: ENCRYPTION_VERSION.as_bytes(),
            },
        )
        .map_err(|_| CryptoError::EncryptionFailed)?;

    Ok(SealedCopy { ciphertext, nonce })
}

/// Decrypt the copy addressed to `own`, sent by the holder of `sender_public`.
pub fn decrypt_one(
    ciphertext: &[u8],
    nonce: &[u8],
    sender_public: &PublicKey,
    own: &MessagingIdentity,
) -> Result<String, DecryptFailure> {
    if nonce.len() != NONCE_SIZE {
        return Err(DecryptFailure::MalformedNonce {
            expected: NONCE_SIZE,
            actual: nonce.len(),
        });
    }
    if ciphertext.len() < TAG_SIZE {
        return Err(DecryptFailure::MalformedCiphertext {
            len: ciphertext.len(),
        });
    }

    let key = envelope_key(own, sender_public).ok_or(DecryptFailure::NonContributory)?;
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_slice()));

    let plaintext = cipher
        .decrypt(
            XNonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad: ENCRYPTION_VERSION.as_bytes(),
            },
        )
        .map_err(|_| DecryptFailure::AuthenticationFailed)?;

    String::from_utf8(plaintext).map_err(|_| DecryptFailure::InvalidUtf8)
}

fn envelope_key(
    own: &MessagingIdentity,
    peer: &PublicKey,
) -> Option<Zeroizing<[u8; SYMMETRIC_KEY_SIZE]>> {
    let shared = own.diffie_hellman(peer);
    if !shared.was_contributory() {
        return None;
    }

    let own_public = own.public_key();
    let (lo, hi) = if own_public.0 <= peer.0 {
        (own_public, *peer)
    } else {
        (*peer, own_public)
    };

    let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT_ENVELOPE_KEY);
    hasher.update(shared.as_bytes());
    hasher.update(&lo.0);
    hasher.update(&hi.0);
    Some(Zeroizing::new(*hasher.finalize().as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UserId;

    fn pair() -> (MessagingIdentity, MessagingIdentity) {
        (
            MessagingIdentity::generate(UserId::new()),
            MessagingIdentity::generate(UserId::new()),
        )
    }

    #[test]
    fn test_both_slots_decrypt() {
        let (alice, bob) = pair();
        let env =
            encrypt_for_both(b"see you at 8", &alice.public_key(), &bob.public_key(), &alice)
                .unwrap();

        let for_alice =
            decrypt_one(&env.for_a.ciphertext, &env.for_a.nonce, &alice.public_key(), &alice)
                .unwrap();
        let for_bob =
            decrypt_one(&env.for_b.ciphertext, &env.for_b.nonce, &alice.public_key(), &bob)
                .unwrap();

        assert_eq!(for_alice, "see you at 8");
        assert_eq!(for_bob, "see you at 8");
        assert_eq!(env.version, ENCRYPTION_VERSION);
    }

    #[test]
    fn test_copies_are_independent() {
        let (alice, bob) = pair();
        let env = encrypt_for_both(b"hi", &alice.public_key(), &bob.public_key(), &alice).unwrap();

        assert_ne!(env.for_a.nonce, env.for_b.nonce);
        assert_ne!(env.for_a.ciphertext, env.for_b.ciphertext);
    }

    #[test]
    fn test_repeat_encryption_never_reuses_nonce() {
        let (alice, bob) = pair();
        let first = encrypt_for_both(b"same", &alice.public_key(), &bob.public_key(), &alice).unwrap();
        let second = encrypt_for_both(b"same", &alice.public_key(), &bob.public_key(), &alice).unwrap();

        assert_ne!(first.for_a.nonce, second.for_a.nonce);
        assert_ne!(first.for_b.nonce, second.for_b.nonce);
        assert_ne!(first.for_a.ciphertext, second.for_a.ciphertext);
        assert_ne!(first.for_b.ciphertext, second.for_b.ciphertext);
    }

    #[test]
    fn test_wrong_slot_fails() {
        let (alice, bob) = pair();
        let env = encrypt_for_both(b"hi", &alice.public_key(), &bob.public_key(), &alice).unwrap();

        // Bob reading Alice's copy
        let result = decrypt_one(&env.for_a.ciphertext, &env.for_a.nonce, &alice.public_key(), &bob);
        assert_eq!(result, Err(DecryptFailure::AuthenticationFailed));
    }

    #[test]
    fn test_third_party_cannot_read() {
        let (alice, bob) = pair();
        let (eve, _) = pair();
        let env = encrypt_for_both(b"hi", &alice.public_key(), &bob.public_key(), &alice).unwrap();

        let result = decrypt_one(&env.for_b.ciphertext, &env.for_b.nonce, &alice.public_key(), &eve);
        assert!(result.is_err());
    }

    #[test]
    fn test_wrong_sender_key_fails() {
        let (alice, bob) = pair();
        let (mallory, _) = pair();
        let env = encrypt_for_both(b"hi", &alice.public_key(), &bob.public_key(), &alice).unwrap();

        let result =
            decrypt_one(&env.for_b.ciphertext, &env.for_b.nonce, &mallory.public_key(), &bob);
        assert_eq!(result, Err(DecryptFailure::AuthenticationFailed));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let (alice, bob) = pair();
        let mut env =
            encrypt_for_both(b"hi", &alice.public_key(), &bob.public_key(), &alice).unwrap();
        env.for_b.ciphertext[0] ^= 0x01;

        let result = decrypt_one(&env.for_b.ciphertext, &env.for_b.nonce, &alice.public_key(), &bob);
        assert_eq!(result, Err(DecryptFailure::AuthenticationFailed));
    }

    #[test]
    fn test_malformed_inputs_are_typed() {
        let (alice, bob) = pair();

        let short_nonce = decrypt_one(&[0u8; 32], &[0u8; 12], &alice.public_key(), &bob);
        assert_eq!(
            short_nonce,
            Err(DecryptFailure::MalformedNonce {
                expected: NONCE_SIZE,
                actual: 12
            })
        );

        let short_ct = decrypt_one(&[0u8; 4], &[0u8; NONCE_SIZE], &alice.public_key(), &bob);
        assert_eq!(short_ct, Err(DecryptFailure::MalformedCiphertext { len: 4 }));
    }

    #[test]
    fn test_low_order_key_rejected() {
        let alice = MessagingIdentity::generate(UserId::new());
        let zero = PublicKey([0u8; 32]);

        assert!(matches!(
            seal_for(b"hi", &zero, &alice),
            Err(CryptoError::NonContributory)
        ));
        assert_eq!(
            decrypt_one(&[0u8; 32], &[0u8; NONCE_SIZE], &zero, &alice),
            Err(DecryptFailure::NonContributory)
        );
    }

    #[test]
    fn test_empty_plaintext_roundtrip() {
        let (alice, bob) = pair();
        let copy = seal_for(b"", &bob.public_key(), &alice).unwrap();
        assert_eq!(copy.ciphertext.len(), TAG_SIZE);
        assert_eq!(
            decrypt_one(&copy.ciphertext, &copy.nonce, &alice.public_key(), &bob).unwrap(),
            ""
        );
    }
}
