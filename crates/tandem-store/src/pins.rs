//! CRUD operations for [`PinnedKey`] records.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use tandem_shared::{PublicKey, UserId};

use crate::database::Database;
use crate::error::Result;
use crate::models::PinnedKey;

impl Database {
    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch the key `viewer` pinned for `peer`, if any.
    pub fn get_pin(&self, viewer: &UserId, peer: &UserId) -> Result<Option<PinnedKey>> {
        Ok(self
            .conn()
            .query_row(
                "SELECT viewer_id, peer_id, public_key, pinned_at
                 FROM pinned_keys
                 WHERE viewer_id = ?1 AND peer_id = ?2",
                params![viewer.to_string(), peer.to_string()],
                row_to_pin,
            )
            .optional()?)
    }

    /// List every pin held by `viewer`, oldest first.
    pub fn list_pins(&self, viewer: &UserId) -> Result<Vec<PinnedKey>> {
        let mut stmt = self.conn().prepare(
            "SELECT viewer_id, peer_id, public_key, pinned_at
             FROM pinned_keys
             WHERE viewer_id = ?1
             ORDER BY pinned_at ASC",
        )?;

        let rows = stmt.query_map(params![viewer.to_string()], row_to_pin)?;

        let mut pins = Vec::new();
        for row in rows {
            pins.push(row?);
        }
        Ok(pins)
    }

    // ------------------------------------------------------------------
    // Write
    // ------------------------------------------------------------------

    /// Compare-and-set: store the pin only if none exists for the pair.
    ///
    /// Returns `true` if this call created the pin.
    pub fn insert_pin_if_absent(&self, pin: &PinnedKey) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO pinned_keys (viewer_id, peer_id, public_key, pinned_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                pin.viewer_id.to_string(),
                pin.peer_id.to_string(),
                pin.public_key.to_base64(),
                pin.pinned_at.to_rfc3339(),
            ],
        )?;
        Ok(affected > 0)
    }

    /// Overwrite a pin after an explicit re-trust.
    ///
    /// The key being replaced moves to `retired_pins`, so messages the viewer
    /// already accepted under it keep verifying.
    pub fn replace_pin(&self, pin: &PinnedKey) -> Result<()> {
        let tx = self.conn().unchecked_transaction()?;
        let viewer = pin.viewer_id.to_string();
        let peer = pin.peer_id.to_string();
        let key = pin.public_key.to_base64();

        tx.execute(
            "INSERT OR IGNORE INTO retired_pins (viewer_id, peer_id, public_key, retired_at)
             SELECT viewer_id, peer_id, public_key, ?4
             FROM pinned_keys
             WHERE viewer_id = ?1 AND peer_id = ?2 AND public_key <> ?3",
            params![viewer, peer, key, pin.pinned_at.to_rfc3339()],
        )?;
        tx.execute(
            "DELETE FROM retired_pins
             WHERE viewer_id = ?1 AND peer_id = ?2 AND public_key = ?3",
            params![viewer, peer, key],
        )?;
        tx.execute(
            "INSERT OR REPLACE INTO pinned_keys (viewer_id, peer_id, public_key, pinned_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![viewer, peer, key, pin.pinned_at.to_rfc3339()],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Whether `key` was pinned for `peer` before a re-trust replaced it.
    pub fn is_retired_pin(
        &self,
        viewer: &UserId,
        peer: &UserId,
        key: &PublicKey,
    ) -> Result<bool> {
        let found: Option<i64> = self
            .conn()
            .query_row(
                "SELECT 1 FROM retired_pins
                 WHERE viewer_id = ?1 AND peer_id = ?2 AND public_key = ?3",
                params![viewer.to_string(), peer.to_string(), key.to_base64()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Drop every pin held by `viewer`, retired ones included. Returns the
    /// number of current pins removed.
    pub fn clear_pins(&self, viewer: &UserId) -> Result<usize> {
        let tx = self.conn().unchecked_transaction()?;
        tx.execute(
            "DELETE FROM retired_pins WHERE viewer_id = ?1",
            params![viewer.to_string()],
        )?;
        let removed = tx.execute(
            "DELETE FROM pinned_keys WHERE viewer_id = ?1",
            params![viewer.to_string()],
        )?;
        tx.commit()?;
        Ok(removed)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map a `rusqlite::Row` to a [`PinnedKey`].
fn row_to_pin(row: &rusqlite::Row<'_>) -> rusqlite::Result<PinnedKey> {
    let viewer_str: String = row.get(0)?;
    let peer_str: String = row.get(1)?;
    let key_str: String = row.get(2)?;
    let pinned_str: String = row.get(3)?;

    let viewer_id = UserId::parse_str(&viewer_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let peer_id = UserId::parse_str(&peer_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let public_key = PublicKey::from_base64(&key_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let pinned_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&pinned_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(PinnedKey {
        viewer_id,
        peer_id,
        public_key,
        pinned_at,
    })
}
