//! Device-local state: identity secrets, pinned keys, participant cache.
//!
//! Each concern is a small synchronous trait so a pipeline can be wired to
//! SQLite in production and to private in-memory maps in tests. Nothing here
//! is a process-wide singleton.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use tandem_shared::constants::SECRET_KEY_SIZE;
use tandem_shared::crypto::SymmetricKey;
use tandem_shared::{ConversationId, ParticipantPair, PublicKey, UserId};
use tandem_store::{Database, PinnedKey};
use zeroize::Zeroizing;

use crate::config::MessagingConfig;
use crate::error::BackendError;

pub type SecretBytes = Zeroizing<[u8; SECRET_KEY_SIZE]>;

pub trait SecretKeyStore: Send + Sync {
    fn load(&self, user: &UserId) -> Result<Option<SecretBytes>, BackendError>;

    /// Compare-and-set. Returns `true` if this call stored the secret.
    fn store_if_absent(
        &self,
        user: &UserId,
        secret: &[u8; SECRET_KEY_SIZE],
        public_key: &PublicKey,
    ) -> Result<bool, BackendError>;

    fn replace(
        &self,
        user: &UserId,
        secret: &[u8; SECRET_KEY_SIZE],
        public_key: &PublicKey,
    ) -> Result<(), BackendError>;
}

pub trait PinStore: Send + Sync {
    fn get(&self, viewer: &UserId, peer: &UserId) -> Result<Option<PinnedKey>, BackendError>;

    /// Compare-and-set. Returns `true` if this call created the pin.
    fn insert_if_absent(&self, pin: &PinnedKey) -> Result<bool, BackendError>;

    /// Explicit re-trust. The replaced key is kept as retired.
    fn replace(&self, pin: &PinnedKey) -> Result<(), BackendError>;

    /// Whether `key` was pinned for `peer` before a re-trust replaced it.
    fn is_retired(
        &self,
        viewer: &UserId,
        peer: &UserId,
        key: &PublicKey,
    ) -> Result<bool, BackendError>;

    /// Drops current and retired pins. Returns the number of current pins.
    fn clear(&self, viewer: &UserId) -> Result<usize, BackendError>;
}

/// Resolved participants, keyed by the local user who resolved them.
pub trait ParticipantCache: Send + Sync {
    fn get(
        &self,
        viewer: &UserId,
        conversation: &ConversationId,
    ) -> Result<Option<ParticipantPair>, BackendError>;

    /// Write-once. Returns `true` if this call cached the pair.
    fn insert_if_absent(
        &self,
        viewer: &UserId,
        conversation: &ConversationId,
        pair: &ParticipantPair,
    ) -> Result<bool, BackendError>;
}

fn lock<'a, T>(mutex: &'a Mutex<T>, what: &str) -> Result<MutexGuard<'a, T>, BackendError> {
    mutex
        .lock()
        .map_err(|_| BackendError::Unavailable(format!("{what} lock poisoned")))
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemorySecretStore {
    secrets: Mutex<HashMap<UserId, SecretBytes>>,
}

impl SecretKeyStore for MemorySecretStore {
    fn load(&self, user: &UserId) -> Result<Option<SecretBytes>, BackendError> {
        Ok(lock(&self.secrets, "secret store")?.get(user).cloned())
    }

    fn store_if_absent(
        &self,
        user: &UserId,
        secret: &[u8; SECRET_KEY_SIZE],
        _public_key: &PublicKey,
    ) -> Result<bool, BackendError> {
        let mut secrets = lock(&self.secrets, "secret store")?;
        if secrets.contains_key(user) {
            return Ok(false);
        }
        secrets.insert(*user, Zeroizing::new(*secret));
        Ok(true)
    }

    fn replace(
        &self,
        user: &UserId,
        secret: &[u8; SECRET_KEY_SIZE],
        _public_key: &PublicKey,
    ) -> Result<(), BackendError> {
        lock(&self.secrets, "secret store")?.insert(*user, Zeroizing::new(*secret));
        Ok(())
    }
}

#[derive(Default)]
struct PinTables {
    current: HashMap<(UserId, UserId), PinnedKey>,
    retired: HashSet<(UserId, UserId, PublicKey)>,
}

#[derive(Default)]
pub struct MemoryPinStore {
    tables: Mutex<PinTables>,
}

impl PinStore for MemoryPinStore {
    fn get(&self, viewer: &UserId, peer: &UserId) -> Result<Option<PinnedKey>, BackendError> {
        Ok(lock(&self.tables, "pin store")?
            .current
            .get(&(*viewer, *peer))
            .cloned())
    }

    fn insert_if_absent(&self, pin: &PinnedKey) -> Result<bool, BackendError> {
        let mut tables = lock(&self.tables, "pin store")?;
        let key = (pin.viewer_id, pin.peer_id);
        if tables.current.contains_key(&key) {
            return Ok(false);
        }
        tables.current.insert(key, pin.clone());
        Ok(true)
    }

    fn replace(&self, pin: &PinnedKey) -> Result<(), BackendError> {
        let mut tables = lock(&self.tables, "pin store")?;
        let previous = tables
            .current
            .insert((pin.viewer_id, pin.peer_id), pin.clone());
        if let Some(previous) = previous.filter(|p| p.public_key != pin.public_key) {
            tables
                .retired
                .insert((pin.viewer_id, pin.peer_id, previous.public_key));
        }
        tables
            .retired
            .remove(&(pin.viewer_id, pin.peer_id, pin.public_key));
        Ok(())
    }

    fn is_retired(
        &self,
        viewer: &UserId,
        peer: &UserId,
        key: &PublicKey,
    ) -> Result<bool, BackendError> {
        Ok(lock(&self.tables, "pin store")?
            .retired
            .contains(&(*viewer, *peer, *key)))
    }

    fn clear(&self, viewer: &UserId) -> Result<usize, BackendError> {
        let mut tables = lock(&self.tables, "pin store")?;
        tables.retired.retain(|(v, _, _)| v != viewer);
        let before = tables.current.len();
        tables.current.retain(|(v, _), _| v != viewer);
        Ok(before - tables.current.len())
    }
}

#[derive(Default)]
pub struct MemoryParticipantCache {
    pairs: Mutex<HashMap<(UserId, ConversationId), ParticipantPair>>,
}

impl ParticipantCache for MemoryParticipantCache {
    fn get(
        &self,
        viewer: &UserId,
        conversation: &ConversationId,
    ) -> Result<Option<ParticipantPair>, BackendError> {
        Ok(lock(&self.pairs, "participant cache")?
            .get(&(*viewer, *conversation))
            .copied())
    }

    fn insert_if_absent(
        &self,
        viewer: &UserId,
        conversation: &ConversationId,
        pair: &ParticipantPair,
    ) -> Result<bool, BackendError> {
        let mut pairs = lock(&self.pairs, "participant cache")?;
        let key = (*viewer, *conversation);
        if pairs.contains_key(&key) {
            return Ok(false);
        }
        pairs.insert(key, *pair);
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// SQLite
// ---------------------------------------------------------------------------

/// All three local stores backed by one [`Database`].
#[derive(Clone)]
pub struct SqliteLocalStore {
    db: Arc<Mutex<Database>>,
}

impl SqliteLocalStore {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    pub fn open_at(path: &Path, device_key: &SymmetricKey) -> Result<Self, BackendError> {
        Ok(Self::new(Database::open_at(path, device_key)?))
    }

    /// Open the database in `config.data_dir`, or the platform data directory.
    pub fn open_configured(
        config: &MessagingConfig,
        device_key: &SymmetricKey,
    ) -> Result<Self, BackendError> {
        let db = match &config.data_dir {
            Some(dir) => Database::open_in_dir(dir, device_key)?,
            None => Database::new(device_key)?,
        };
        Ok(Self::new(db))
    }

    fn db(&self) -> Result<MutexGuard<'_, Database>, BackendError> {
        lock(&self.db, "database")
    }
}

impl SecretKeyStore for SqliteLocalStore {
    fn load(&self, user: &UserId) -> Result<Option<SecretBytes>, BackendError> {
        Ok(self.db()?.load_identity_secret(user)?.map(Zeroizing::new))
    }

    fn store_if_absent(
        &self,
        user: &UserId,
        secret: &[u8; SECRET_KEY_SIZE],
        public_key: &PublicKey,
    ) -> Result<bool, BackendError> {
        Ok(self
            .db()?
            .insert_identity_secret_if_absent(user, secret, public_key)?)
    }

    fn replace(
        &self,
        user: &UserId,
        secret: &[u8; SECRET_KEY_SIZE],
        public_key: &PublicKey,
    ) -> Result<(), BackendError> {
        Ok(self.db()?.replace_identity_secret(user, secret, public_key)?)
    }
}

impl PinStore for SqliteLocalStore {
    fn get(&self, viewer: &UserId, peer: &UserId) -> Result<Option<PinnedKey>, BackendError> {
        Ok(self.db()?.get_pin(viewer, peer)?)
    }

    fn insert_if_absent(&self, pin: &PinnedKey) -> Result<bool, BackendError> {
        Ok(self.db()?.insert_pin_if_absent(pin)?)
    }

    fn replace(&self, pin: &PinnedKey) -> Result<(), BackendError> {
        Ok(self.db()?.replace_pin(pin)?)
    }

    fn is_retired(
        &self,
        viewer: &UserId,
        peer: &UserId,
        key: &PublicKey,
    ) -> Result<bool, BackendError> {
        Ok(self.db()?.is_retired_pin(viewer, peer, key)?)
    }

    fn clear(&self, viewer: &UserId) -> Result<usize, BackendError> {
        Ok(self.db()?.clear_pins(viewer)?)
    }
}

impl ParticipantCache for SqliteLocalStore {
    fn get(
        &self,
        viewer: &UserId,
        conversation: &ConversationId,
    ) -> Result<Option<ParticipantPair>, BackendError> {
        Ok(self
            .db()?
            .get_cached_participants(viewer, conversation)?
            .map(|cached| cached.pair))
    }

    fn insert_if_absent(
        &self,
        viewer: &UserId,
        conversation: &ConversationId,
        pair: &ParticipantPair,
    ) -> Result<bool, BackendError> {
        Ok(self
            .db()?
            .cache_participants_if_absent(viewer, conversation, pair)?)
    }
}

/// The local stores a pipeline needs.
#[derive(Clone)]
pub struct LocalStores {
    pub secrets: Arc<dyn SecretKeyStore>,
    pub pins: Arc<dyn PinStore>,
    pub participants: Arc<dyn ParticipantCache>,
}

impl LocalStores {
    /// Fresh, private in-memory stores.
    pub fn in_memory() -> Self {
        Self {
            secrets: Arc::new(MemorySecretStore::default()),
            pins: Arc::new(MemoryPinStore::default()),
            participants: Arc::new(MemoryParticipantCache::default()),
        }
    }

    pub fn sqlite(store: SqliteLocalStore) -> Self {
        Self {
            secrets: Arc::new(store.clone()),
            pins: Arc::new(store.clone()),
            participants: Arc::new(store),
        }
    }
}
