use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed: invalid ciphertext or wrong key")]
    DecryptionFailed,

    #[error("Invalid key length")]
    InvalidKeyLength,

    #[error("Key agreement produced a non-contributory shared secret")]
    NonContributory,
}

/// Why a single message could not be opened. Never fatal to a conversation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecryptFailure {
    #[error("Unsupported encryption version: {found:?}")]
    VersionMismatch { found: String },

    #[error("Malformed nonce: expected {expected} bytes, got {actual}")]
    MalformedNonce { expected: usize, actual: usize },

    #[error("Malformed ciphertext: {len} bytes is shorter than the authentication tag")]
    MalformedCiphertext { len: usize },

    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("Key agreement produced a non-contributory shared secret")]
    NonContributory,

    #[error("Plaintext is not valid UTF-8")]
    InvalidUtf8,

    #[error("Encoding error: {0}")]
    Encoding(#[from] WireError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("Field `{field}` is not valid base64")]
    InvalidBase64 { field: &'static str },

    #[error("Field `{field}` has {actual} bytes, expected {expected}")]
    InvalidLength {
        field: &'static str,
        expected: usize,
        actual: usize,
    },
}
