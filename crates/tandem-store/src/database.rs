//! Database connection management.
//!
//! The [`Database`] struct owns a [`rusqlite::Connection`] and guarantees that
//! migrations are run before any other operation.
//!
//! Note: SQLCipher (encrypted SQLite) requires OpenSSL at build time. Without
//! it we use plain SQLite and seal sensitive fields (identity secrets) at the
//! application layer with XChaCha20-Poly1305 under the device key.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use rusqlite::Connection;
use tandem_shared::crypto::SymmetricKey;

use crate::error::{Result, StoreError};
use crate::migrations;

/// Wrapper around a [`rusqlite::Connection`].
pub struct Database {
    conn: Connection,
    device_key: SymmetricKey,
}

impl Database {
    /// Open (or create) the default application database.
    ///
    /// The database file is placed in the platform-appropriate data directory:
    /// - Linux:   `~/.local/share/tandem/tandem.db`
    /// - macOS:   `~/Library/Application Support/app.tandem.tandem/tandem.db`
    /// - Windows: `{FOLDERID_RoamingAppData}\tandem\tandem\data\tandem.db`
    ///
    /// # Arguments
    /// * `device_key` -- 32-byte key from the platform keystore, used to seal
    ///   identity secrets.
    pub fn new(device_key: &SymmetricKey) -> Result<Self> {
        let project_dirs =
            ProjectDirs::from("app", "tandem", "tandem").ok_or(StoreError::NoDataDir)?;

        Self::open_in_dir(project_dirs.data_dir(), device_key)
    }

    /// Open (or create) `tandem.db` inside `dir`, creating the directory.
    pub fn open_in_dir(dir: &Path, device_key: &SymmetricKey) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let db_path = dir.join("tandem.db");

        tracing::info!(path = %db_path.display(), "opening database");

        Self::open_at(&db_path, device_key)
    }

    /// Open (or create) a database file at `path`, in WAL mode.
    pub fn open_at(path: &Path, device_key: &SymmetricKey) -> Result<Self> {
        let conn = Connection::open(path)?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init(conn, device_key)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory(device_key: &SymmetricKey) -> Result<Self> {
        Self::init(Connection::open_in_memory()?, device_key)
    }

    fn init(conn: Connection, device_key: &SymmetricKey) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;

        migrations::run_migrations(&conn)?;

        Ok(Self {
            conn,
            device_key: *device_key,
        })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub(crate) fn device_key(&self) -> &SymmetricKey {
        &self.device_key
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<PathBuf> {
        self.conn
            .path()
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
    }
}
