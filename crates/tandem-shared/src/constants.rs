/// Protocol tag written into every encrypted message. Compared by exact match.
pub const ENCRYPTION_VERSION: &str = "v1";

/// XChaCha20-Poly1305 nonce size in bytes
pub const NONCE_SIZE: usize = 24;

/// Poly1305 authentication tag size in bytes
pub const TAG_SIZE: usize = 16;

/// X25519 public key size in bytes
pub const PUBLIC_KEY_SIZE: usize = 32;

/// X25519 secret key size in bytes
pub const SECRET_KEY_SIZE: usize = 32;

/// Symmetric key size in bytes (for XChaCha20-Poly1305)
pub const SYMMETRIC_KEY_SIZE: usize = 32;

/// Largest plaintext body accepted for encryption (64 KiB)
pub const MAX_PLAINTEXT_BYTES: usize = 64 * 1024;

/// Key derivation contexts (BLAKE3)
pub const KDF_CONTEXT_ENVELOPE_KEY: &str = "tandem-envelope-v1";
pub const KDF_CONTEXT_AT_REST_KEY: &str = "tandem-at-rest-v1";
pub const KDF_CONTEXT_FINGERPRINT: &str = "tandem-key-fingerprint-v1";

/// Shown instead of a message whose sender key no longer matches the pin.
pub const PLACEHOLDER_KEY_CHANGED: &str =
    "\u{26a0} Message hidden: this contact's security key changed. Verify and re-trust to read it.";

/// Shown instead of a message that cannot be decrypted or is in an unknown format.
pub const PLACEHOLDER_UNAVAILABLE: &str =
    "Message unavailable: it could not be decrypted on this device.";
