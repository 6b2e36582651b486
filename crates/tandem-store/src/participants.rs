//! Cache of resolved conversation participants, per local user.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use tandem_shared::{ConversationId, ParticipantPair, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::CachedParticipants;

/// A cache row before its participants are validated as a pair.
struct CacheRow {
    viewer_id: UserId,
    conversation_id: ConversationId,
    participant_a: UserId,
    participant_b: UserId,
    resolved_at: DateTime<Utc>,
}

impl Database {
    pub fn get_cached_participants(
        &self,
        viewer: &UserId,
        conversation_id: &ConversationId,
    ) -> Result<Option<CachedParticipants>> {
        let row = self
            .conn()
            .query_row(
                "SELECT viewer_id, conversation_id, participant_a, participant_b, resolved_at
                 FROM participant_cache
                 WHERE viewer_id = ?1 AND conversation_id = ?2",
                params![viewer.to_string(), conversation_id.to_string()],
                row_to_cache_row,
            )
            .optional()?;

        row.map(into_cached).transpose()
    }

    /// Cache `viewer`'s resolution unless one is already stored. Returns
    /// `true` if this call wrote it.
    pub fn cache_participants_if_absent(
        &self,
        viewer: &UserId,
        conversation_id: &ConversationId,
        pair: &ParticipantPair,
    ) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO participant_cache
                 (viewer_id, conversation_id, participant_a, participant_b, resolved_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                viewer.to_string(),
                conversation_id.to_string(),
                pair.participant_a().to_string(),
                pair.participant_b().to_string(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(affected > 0)
    }

    /// Drop every viewer's cached resolution of a conversation.
    pub fn forget_participants(&self, conversation_id: &ConversationId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM participant_cache WHERE conversation_id = ?1",
            params![conversation_id.to_string()],
        )?;
        Ok(affected > 0)
    }
}

fn into_cached(row: CacheRow) -> Result<CachedParticipants> {
    let pair = ParticipantPair::new(row.participant_a, row.participant_b).ok_or_else(|| {
        StoreError::Corrupt(format!(
            "conversation {} cached with identical participants",
            row.conversation_id
        ))
    })?;

    Ok(CachedParticipants {
        viewer_id: row.viewer_id,
        conversation_id: row.conversation_id,
        pair,
        resolved_at: row.resolved_at,
    })
}

fn row_to_cache_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CacheRow> {
    let viewer_str: String = row.get(0)?;
    let conv_str: String = row.get(1)?;
    let a_str: String = row.get(2)?;
    let b_str: String = row.get(3)?;
    let ts_str: String = row.get(4)?;

    let viewer_id = UserId::parse_str(&viewer_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let conversation_id = ConversationId::parse_str(&conv_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let participant_a = UserId::parse_str(&a_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let participant_b = UserId::parse_str(&b_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let resolved_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&ts_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(CacheRow {
        viewer_id,
        conversation_id,
        participant_a,
        participant_b,
        resolved_at,
    })
}
