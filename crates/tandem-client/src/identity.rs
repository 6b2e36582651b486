//! Identity store: one messaging keypair per local user.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tandem_shared::{MessagingIdentity, UserId};
use tracing::{info, warn};

use crate::error::{MessagingError, Result};
use crate::local::SecretKeyStore;

pub struct IdentityStore {
    secrets: Arc<dyn SecretKeyStore>,
    loaded: Mutex<HashMap<UserId, Arc<MessagingIdentity>>>,
}

impl IdentityStore {
    pub fn new(secrets: Arc<dyn SecretKeyStore>) -> Self {
        Self {
            secrets,
            loaded: Mutex::new(HashMap::new()),
        }
    }

    /// Return the identity of `user_id`, generating and persisting it on
    /// first use.
    ///
    /// Any keystore failure is [`MessagingError::IdentityUnavailable`].
    pub fn get_or_create(&self, user_id: &UserId) -> Result<Arc<MessagingIdentity>> {
        let mut loaded = self
            .loaded
            .lock()
            .map_err(|_| MessagingError::IdentityUnavailable("identity lock poisoned".into()))?;

        if let Some(identity) = loaded.get(user_id) {
            return Ok(identity.clone());
        }

        let identity = match self.secrets.load(user_id).map_err(unavailable)? {
            Some(secret) => MessagingIdentity::from_secret_bytes(*user_id, &secret),
            None => {
                let fresh = MessagingIdentity::generate(*user_id);
                let stored = self
                    .secrets
                    .store_if_absent(user_id, &fresh.secret_bytes(), &fresh.public_key())
                    .map_err(unavailable)?;

                if stored {
                    info!(
                        user = %user_id.short(),
                        key = %fresh.public_key().fingerprint(),
                        "Created messaging identity"
                    );
                    fresh
                } else {
                    // Another writer stored a secret first; use theirs.
                    let secret = self.secrets.load(user_id).map_err(unavailable)?.ok_or_else(
                        || MessagingError::IdentityUnavailable("stored secret disappeared".into()),
                    )?;
                    MessagingIdentity::from_secret_bytes(*user_id, &secret)
                }
            }
        };

        let identity = Arc::new(identity);
        loaded.insert(*user_id, identity.clone());
        Ok(identity)
    }

    /// Replace the keypair of `user_id`. Pins held by this user must be
    /// cleared by the caller.
    pub fn rotate(&self, user_id: &UserId) -> Result<Arc<MessagingIdentity>> {
        let mut loaded = self
            .loaded
            .lock()
            .map_err(|_| MessagingError::IdentityUnavailable("identity lock poisoned".into()))?;

        let fresh = MessagingIdentity::generate(*user_id);
        self.secrets
            .replace(user_id, &fresh.secret_bytes(), &fresh.public_key())
            .map_err(unavailable)?;

        warn!(
            user = %user_id.short(),
            key = %fresh.public_key().fingerprint(),
            "Rotated messaging identity"
        );

        let fresh = Arc::new(fresh);
        loaded.insert(*user_id, fresh.clone());
        Ok(fresh)
    }
}

fn unavailable(e: crate::error::BackendError) -> MessagingError {
    MessagingError::IdentityUnavailable(e.to_string())
}
