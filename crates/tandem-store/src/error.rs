use tandem_shared::{CryptoError, WireError};
use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite / SQLCipher error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// A sealed secret could not be opened with the device key.
    #[error("Sealed record error: {0}")]
    Crypto(#[from] CryptoError),

    /// A stored key column failed to decode.
    #[error("Stored key is malformed: {0}")]
    Wire(#[from] WireError),

    /// A row exists but its contents are unusable.
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
