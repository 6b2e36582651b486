//! Key directory client: publish our public key, fetch peers' keys.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tandem_shared::{MessagingIdentity, PublicKey, UserId};
use tracing::{debug, info, warn};

use crate::backend::KeyDirectoryBackend;
use crate::error::BackendError;

/// Thin, cache-free wrapper over a [`KeyDirectoryBackend`].
///
/// Results are never cached, so a peer that publishes between two calls is
/// seen by the second one.
#[derive(Clone)]
pub struct KeyDirectory {
    backend: Arc<dyn KeyDirectoryBackend>,
}

impl KeyDirectory {
    pub fn new(backend: Arc<dyn KeyDirectoryBackend>) -> Self {
        Self { backend }
    }

    /// Look up the current public key of every id in `ids`.
    ///
    /// Ids without a usable key are absent from the result. Malformed,
    /// all-zero or conflicting entries count as absent.
    pub async fn fetch_public_keys(
        &self,
        ids: &HashSet<UserId>,
    ) -> Result<HashMap<UserId, PublicKey>, BackendError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut request: Vec<UserId> = ids.iter().copied().collect();
        request.sort();

        let rows = self.backend.get_public_keys(&request).await?;

        let mut keys = HashMap::new();
        let mut conflicted = HashSet::new();

        for row in rows {
            if !ids.contains(&row.id) {
                continue;
            }
            let Some(encoded) = row.public_key.as_deref().filter(|s| !s.trim().is_empty()) else {
                continue;
            };

            let key = match PublicKey::from_base64(encoded) {
                Ok(key) if key.0 != [0u8; 32] => key,
                Ok(_) => {
                    warn!(user = %row.id.short(), "Ignoring all-zero directory key");
                    continue;
                }
                Err(e) => {
                    warn!(user = %row.id.short(), error = %e, "Ignoring undecodable directory key");
                    continue;
                }
            };

            match keys.get(&row.id) {
                Some(existing) if *existing != key => {
                    warn!(user = %row.id.short(), "Directory returned conflicting keys");
                    conflicted.insert(row.id);
                }
                _ => {
                    keys.insert(row.id, key);
                }
            }
        }

        for id in &conflicted {
            keys.remove(id);
        }

        debug!(requested = ids.len(), found = keys.len(), "Fetched public keys");
        Ok(keys)
    }

    pub async fn fetch_public_key(&self, id: &UserId) -> Result<Option<PublicKey>, BackendError> {
        let ids = HashSet::from([*id]);
        Ok(self.fetch_public_keys(&ids).await?.remove(id))
    }

    /// Publish the public half of `identity`.
    pub async fn publish(&self, identity: &MessagingIdentity) -> Result<(), BackendError> {
        let key = identity.public_key();
        self.backend
            .put_public_key(&identity.user_id(), &key.to_base64())
            .await?;
        info!(
            user = %identity.user_id().short(),
            key = %key.fingerprint(),
            "Published public key"
        );
        Ok(())
    }
}
