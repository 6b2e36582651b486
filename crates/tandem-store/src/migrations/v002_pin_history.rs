//! v002 -- Retired pins and per-viewer participant resolution.
//!
//! Adds `retired_pins`, which keeps every key a viewer trusted before an
//! explicit re-trust, and rebuilds `participant_cache` keyed by viewer. The
//! old cache rows are dropped; they are re-derived on the next resolve.

use rusqlite::Connection;

const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Keys that were pinned and later replaced by an explicit re-trust
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS retired_pins (
    viewer_id  TEXT NOT NULL,
    peer_id    TEXT NOT NULL,
    public_key TEXT NOT NULL,                 -- base64 X25519 public key
    retired_at TEXT NOT NULL,

    PRIMARY KEY (viewer_id, peer_id, public_key)
);

-- ----------------------------------------------------------------
-- Resolved conversation participants, per local user
-- ----------------------------------------------------------------
DROP TABLE IF EXISTS participant_cache;

CREATE TABLE participant_cache (
    viewer_id       TEXT NOT NULL,
    conversation_id TEXT NOT NULL,
    participant_a   TEXT NOT NULL,
    participant_b   TEXT NOT NULL,
    resolved_at     TEXT NOT NULL,

    PRIMARY KEY (viewer_id, conversation_id),
    CHECK (participant_a <> participant_b)
);
"#;

/// Apply the second migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
