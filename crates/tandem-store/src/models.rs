//! Records persisted in the local database.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tandem_shared::{ConversationId, ParticipantPair, PublicKey, UserId};

// ---------------------------------------------------------------------------
// Pinned key
// ---------------------------------------------------------------------------

/// The first public key a viewer observed for a peer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PinnedKey {
    /// The local user who holds the pin.
    pub viewer_id: UserId,
    /// The peer whose key is pinned.
    pub peer_id: UserId,
    /// X25519 public key, stored as base64 in SQLite.
    pub public_key: PublicKey,
    /// When the key was first pinned (or last explicitly re-trusted).
    pub pinned_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Participant cache
// ---------------------------------------------------------------------------

/// A conversation's resolved participants, as seen by one local user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CachedParticipants {
    pub viewer_id: UserId,
    pub conversation_id: ConversationId,
    pub pair: ParticipantPair,
    pub resolved_at: DateTime<Utc>,
}
