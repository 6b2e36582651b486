//! Sealed storage for identity secrets.
//!
//! Each secret is encrypted with a subkey derived from the device key and the
//! owning user id, with the user id as associated data, so a sealed blob
//! copied to another row fails to open.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use tandem_shared::constants::SECRET_KEY_SIZE;
use tandem_shared::crypto;
use tandem_shared::{PublicKey, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};

impl Database {
    /// Load and unseal the secret key stored for `user_id`.
    pub fn load_identity_secret(&self, user_id: &UserId) -> Result<Option<[u8; SECRET_KEY_SIZE]>> {
        let sealed: Option<Vec<u8>> = self
            .conn()
            .query_row(
                "SELECT sealed_secret FROM local_identity WHERE user_id = ?1",
                params![user_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;

        let Some(sealed) = sealed else {
            return Ok(None);
        };

        let secret = crypto::open_record(self.device_key(), user_id.0.as_bytes(), &sealed)?;

        let secret: [u8; SECRET_KEY_SIZE] = secret.as_slice().try_into().map_err(|_| {
            StoreError::Corrupt(format!(
                "identity secret for {} has {} bytes",
                user_id.short(),
                secret.len()
            ))
        })?;
        Ok(Some(secret))
    }

    /// Store a secret unless one already exists for `user_id`.
    ///
    /// Returns `true` if this call wrote the row.
    pub fn insert_identity_secret_if_absent(
        &self,
        user_id: &UserId,
        secret: &[u8; SECRET_KEY_SIZE],
        public_key: &PublicKey,
    ) -> Result<bool> {
        let sealed = self.seal_secret(user_id, secret)?;
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO local_identity (user_id, sealed_secret, public_key, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                user_id.to_string(),
                sealed,
                public_key.to_base64(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(affected > 0)
    }

    /// Overwrite the secret for `user_id` (key rotation).
    pub fn replace_identity_secret(
        &self,
        user_id: &UserId,
        secret: &[u8; SECRET_KEY_SIZE],
        public_key: &PublicKey,
    ) -> Result<()> {
        let sealed = self.seal_secret(user_id, secret)?;
        self.conn().execute(
            "INSERT OR REPLACE INTO local_identity (user_id, sealed_secret, public_key, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                user_id.to_string(),
                sealed,
                public_key.to_base64(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Public key recorded alongside the sealed secret.
    pub fn stored_public_key(&self, user_id: &UserId) -> Result<Option<PublicKey>> {
        let encoded: Option<String> = self
            .conn()
            .query_row(
                "SELECT public_key FROM local_identity WHERE user_id = ?1",
                params![user_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;

        Ok(encoded.map(|s| PublicKey::from_base64(&s)).transpose()?)
    }

    /// Delete the identity of `user_id`.  Returns `true` if a row was deleted.
    pub fn delete_identity(&self, user_id: &UserId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM local_identity WHERE user_id = ?1",
            params![user_id.to_string()],
        )?;
        Ok(affected > 0)
    }

    fn seal_secret(&self, user_id: &UserId, secret: &[u8; SECRET_KEY_SIZE]) -> Result<Vec<u8>> {
        Ok(crypto::seal_record(
            self.device_key(),
            user_id.0.as_bytes(),
            secret,
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_shared::MessagingIdentity;

    fn db() -> Database {
        Database::open_in_memory(&[7u8; 32]).unwrap()
    }

    #[test]
    fn missing_identity_is_none() {
        let db = db();
        assert!(db.load_identity_secret(&UserId::new()).unwrap().is_none());
    }

    #[test]
    fn secret_round_trip() {
        let db = db();
        let user = UserId::new();
        let id = MessagingIdentity::generate(user);

        assert!(db
            .insert_identity_secret_if_absent(&user, &id.secret_bytes(), &id.public_key())
            .unwrap());

        let secret = db.load_identity_secret(&user).unwrap().unwrap();
        let restored = MessagingIdentity::from_secret_bytes(user, &secret);
        assert_eq!(restored.public_key(), id.public_key());
        assert_eq!(db.stored_public_key(&user).unwrap(), Some(id.public_key()));
    }

    #[test]
    fn first_write_wins() {
        let db = db();
        let user = UserId::new();
        let first = MessagingIdentity::generate(user);
        let second = MessagingIdentity::generate(user);

        assert!(db
            .insert_identity_secret_if_absent(&user, &first.secret_bytes(), &first.public_key())
            .unwrap());
        assert!(!db
            .insert_identity_secret_if_absent(&user, &second.secret_bytes(), &second.public_key())
            .unwrap());

        let secret = db.load_identity_secret(&user).unwrap().unwrap();
        assert_eq!(secret, *first.secret_bytes());
    }

    #[test]
    fn secret_is_not_stored_in_clear() {
        let db = db();
        let user = UserId::new();
        let id = MessagingIdentity::generate(user);
        db.insert_identity_secret_if_absent(&user, &id.secret_bytes(), &id.public_key())
            .unwrap();

        let raw: Vec<u8> = db
            .conn()
            .query_row("SELECT sealed_secret FROM local_identity", [], |row| row.get(0))
            .unwrap();
        let secret = id.secret_bytes();
        assert!(!raw.windows(secret.len()).any(|w| w == &secret[..]));
    }

    #[test]
    fn wrong_device_key_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let user = UserId::new();
        let id = MessagingIdentity::generate(user);

        {
            let db = Database::open_at(&path, &[1u8; 32]).unwrap();
            db.insert_identity_secret_if_absent(&user, &id.secret_bytes(), &id.public_key())
                .unwrap();
        }

        let db = Database::open_at(&path, &[2u8; 32]).unwrap();
        assert!(matches!(
            db.load_identity_secret(&user),
            Err(StoreError::Crypto(_))
        ));
    }

    #[test]
    fn replace_and_delete() {
        let db = db();
        let user = UserId::new();
        let old = MessagingIdentity::generate(user);
        let new = MessagingIdentity::generate(user);

        db.insert_identity_secret_if_absent(&user, &old.secret_bytes(), &old.public_key())
            .unwrap();
        db.replace_identity_secret(&user, &new.secret_bytes(), &new.public_key())
            .unwrap();
        assert_eq!(db.load_identity_secret(&user).unwrap().unwrap(), *new.secret_bytes());

        assert!(db.delete_identity(&user).unwrap());
        assert!(!db.delete_identity(&user).unwrap());
        assert!(db.load_identity_secret(&user).unwrap().is_none());
    }
}
