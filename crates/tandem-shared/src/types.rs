use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::constants::{KDF_CONTEXT_FINGERPRINT, PUBLIC_KEY_SIZE};
use crate::error::WireError;
use crate::wire;

// Backend row id of a user (profile)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse_str(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s.trim()).map(Self)
    }

    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ConversationId(pub Uuid);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse_str(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An X25519 public key. Travels as base64 at the storage boundary.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey(pub [u8; PUBLIC_KEY_SIZE]);

impl PublicKey {
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        wire::encode(&self.0)
    }

    pub fn from_base64(s: &str) -> Result<Self, WireError> {
        wire::decode_fixed::<PUBLIC_KEY_SIZE>("public_key", s).map(Self)
    }

    /// Short, log-safe identifier for the key (BLAKE3, first 8 bytes as hex).
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT_FINGERPRINT);
        hasher.update(&self.0);
        hex::encode(&hasher.finalize().as_bytes()[..8])
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({})", self.fingerprint())
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        PublicKey::from_base64(&s).map_err(serde::de::Error::custom)
    }
}

/// Which of the two ciphertext slots of a message a participant reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Slot {
    A,
    B,
}

/// The two distinct members of a direct conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawPair")]
pub struct ParticipantPair {
    participant_a: UserId,
    participant_b: UserId,
}

#[derive(Deserialize)]
struct RawPair {
    participant_a: UserId,
    participant_b: UserId,
}

impl TryFrom<RawPair> for ParticipantPair {
    type Error = &'static str;

    fn try_from(raw: RawPair) -> Result<Self, Self::Error> {
        Self::new(raw.participant_a, raw.participant_b)
            .ok_or("participant_a and participant_b must differ")
    }
}

impl ParticipantPair {
    /// Returns `None` when both ids are the same user.
    pub fn new(participant_a: UserId, participant_b: UserId) -> Option<Self> {
        if participant_a == participant_b {
            return None;
        }
        Some(Self {
            participant_a,
            participant_b,
        })
    }

    pub fn participant_a(&self) -> UserId {
        self.participant_a
    }

    pub fn participant_b(&self) -> UserId {
        self.participant_b
    }

    pub fn contains(&self, user: &UserId) -> bool {
        self.participant_a == *user || self.participant_b == *user
    }

    pub fn slot_of(&self, user: &UserId) -> Option<Slot> {
        if self.participant_a == *user {
            Some(Slot::A)
        } else if self.participant_b == *user {
            Some(Slot::B)
        } else {
            None
        }
    }

    pub fn other(&self, user: &UserId) -> Option<UserId> {
        match self.slot_of(user)? {
            Slot::A => Some(self.participant_b),
            Slot::B => Some(self.participant_a),
        }
    }

    /// Order-insensitive equality.
    pub fn same_members(&self, other: &ParticipantPair) -> bool {
        self.contains(&other.participant_a) && self.contains(&other.participant_b)
    }
}
