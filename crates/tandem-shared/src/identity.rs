use rand::rngs::OsRng;
use x25519_dalek::{SharedSecret, StaticSecret};
use zeroize::Zeroizing;

use crate::constants::SECRET_KEY_SIZE;
use crate::types::{PublicKey, UserId};

/// A user's messaging keypair on this device.
///
/// The secret half never leaves the process except through
/// [`MessagingIdentity::secret_bytes`], which exists for the local keystore
/// only. It has no `Serialize` impl.
pub struct MessagingIdentity {
    user_id: UserId,
    secret: StaticSecret,
    public_key: PublicKey,
}

impl MessagingIdentity {
    /// Generate a new random identity
    pub fn generate(user_id: UserId) -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        Self::from_static_secret(user_id, secret)
    }

    /// Restore identity from secret key bytes
    pub fn from_secret_bytes(user_id: UserId, secret: &[u8; SECRET_KEY_SIZE]) -> Self {
        Self::from_static_secret(user_id, StaticSecret::from(*secret))
    }

    fn from_static_secret(user_id: UserId, secret: StaticSecret) -> Self {
        let public_key = PublicKey(x25519_dalek::PublicKey::from(&secret).to_bytes());
        Self {
            user_id,
            secret,
            public_key,
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn public_key(&self) -> PublicKey {
        self.public_key
    }

    /// Raw secret bytes, for the device keystore.
    pub fn secret_bytes(&self) -> Zeroizing<[u8; SECRET_KEY_SIZE]> {
        Zeroizing::new(self.secret.to_bytes())
    }

    pub(crate) fn diffie_hellman(&self, peer: &PublicKey) -> SharedSecret {
        self.secret
            .diffie_hellman(&x25519_dalek::PublicKey::from(peer.0))
    }
}

impl std::fmt::Debug for MessagingIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessagingIdentity")
            .field("user_id", &self.user_id)
            .field("public_key", &self.public_key)
            .field("secret", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_generation() {
        let user = UserId::new();
        let id = MessagingIdentity::generate(user);
        assert_eq!(id.user_id(), user);
        assert_ne!(id.public_key().0, [0u8; 32]);
    }

    #[test]
    fn test_identity_roundtrip() {
        let user = UserId::new();
        let id = MessagingIdentity::generate(user);
        let restored = MessagingIdentity::from_secret_bytes(user, &id.secret_bytes());
        assert_eq!(id.public_key(), restored.public_key());
    }

    #[test]
    fn test_fresh_identities_differ() {
        let user = UserId::new();
        let a = MessagingIdentity::generate(user);
        let b = MessagingIdentity::generate(user);
        assert_ne!(a.public_key(), b.public_key());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let id = MessagingIdentity::generate(UserId::new());
        let rendered = format!("{id:?}");
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains(&hex::encode(*id.secret_bytes())));
    }

    #[test]
    fn test_agreement_is_symmetric() {
        let alice = MessagingIdentity::generate(UserId::new());
        let bob = MessagingIdentity::generate(UserId::new());
        let ab = alice.diffie_hellman(&bob.public_key());
        let ba = bob.diffie_hellman(&alice.public_key());
        assert_eq!(ab.as_bytes(), ba.as_bytes());
    }
}
