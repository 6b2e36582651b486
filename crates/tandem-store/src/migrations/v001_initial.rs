//! v001 -- Initial schema creation.
//!
//! Creates the three local tables: `local_identity`, `pinned_keys` and
//! `participant_cache`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Local identities (one keypair per user on this device)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS local_identity (
    user_id       TEXT PRIMARY KEY NOT NULL,  -- UUID
    sealed_secret BLOB NOT NULL,              -- nonce || XChaCha20-Poly1305(secret)
    public_key    TEXT NOT NULL,              -- base64 X25519 public key
    created_at    TEXT NOT NULL               -- RFC-3339
);

-- ----------------------------------------------------------------
-- Pinned peer keys (trust on first use)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS pinned_keys (
    viewer_id  TEXT NOT NULL,                 -- UUID of the local user
    peer_id    TEXT NOT NULL,                 -- UUID of the peer
    public_key TEXT NOT NULL,                 -- base64 X25519 public key
    pinned_at  TEXT NOT NULL,

    PRIMARY KEY (viewer_id, peer_id)
);

-- ----------------------------------------------------------------
-- Resolved conversation participants
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS participant_cache (
    conversation_id TEXT PRIMARY KEY NOT NULL,
    participant_a   TEXT NOT NULL,
    participant_b   TEXT NOT NULL,
    resolved_at     TEXT NOT NULL,

    CHECK (participant_a <> participant_b)
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
