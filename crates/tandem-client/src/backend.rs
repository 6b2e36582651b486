//! Collaborators the messaging core consumes but does not implement.
//!
//! The remote side (key directory, conversation/message store, realtime
//! feed) is `async`; every call is a potential suspension point and may fail
//! or stall without leaving partial state in the core.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tandem_shared::protocol::MessageRow;
use tandem_shared::{ConversationId, MessageId, UserId};

use crate::error::BackendError;

// ---------------------------------------------------------------------------
// Key directory
// ---------------------------------------------------------------------------

/// One directory entry. `public_key` is base64, absent until the user first
/// opens messaging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyRow {
    pub id: UserId,
    #[serde(default)]
    pub public_key: Option<String>,
}

#[async_trait]
pub trait KeyDirectoryBackend: Send + Sync {
    async fn get_public_keys(&self, ids: &[UserId]) -> Result<Vec<PublicKeyRow>, BackendError>;

    async fn put_public_key(&self, id: &UserId, public_key: &str) -> Result<(), BackendError>;
}

// ---------------------------------------------------------------------------
// Conversation / message store
// ---------------------------------------------------------------------------

/// A conversation record exactly as the backend returns it.
///
/// Column names vary between schema generations; only
/// [`crate::resolver::ParticipantProbe`] interprets them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRow {
    pub id: ConversationId,
    #[serde(flatten)]
    pub columns: Map<String, Value>,
}

impl ConversationRow {
    pub fn new(id: ConversationId) -> Self {
        Self {
            id,
            columns: Map::new(),
        }
    }

    pub fn with_column(mut self, name: &str, user: UserId) -> Self {
        self.columns
            .insert(name.to_string(), Value::String(user.to_string()));
        self
    }

    /// Read `name` as a user id. Missing, null, empty or unparsable values
    /// all yield `None`.
    pub fn user_column(&self, name: &str) -> Option<UserId> {
        match self.columns.get(name)? {
            Value::String(s) if !s.trim().is_empty() => UserId::parse_str(s).ok(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A message with the same id already exists. Treated as success.
    Duplicate,
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn get_conversation(
        &self,
        id: &ConversationId,
    ) -> Result<Option<ConversationRow>, BackendError>;

    /// Find the conversation between two users, in either order.
    async fn find_conversation(
        &self,
        a: &UserId,
        b: &UserId,
    ) -> Result<Option<ConversationRow>, BackendError>;

    /// Create the conversation between two users, or return the existing one.
    async fn create_conversation(
        &self,
        a: &UserId,
        b: &UserId,
    ) -> Result<ConversationRow, BackendError>;

    /// All messages of a conversation, oldest first.
    async fn list_messages(&self, id: &ConversationId) -> Result<Vec<MessageRow>, BackendError>;

    async fn insert_message(&self, row: &MessageRow) -> Result<InsertOutcome, BackendError>;

    async fn mark_read(&self, id: &MessageId) -> Result<(), BackendError>;
}

// ---------------------------------------------------------------------------
// Realtime feed
// ---------------------------------------------------------------------------

pub trait ChangeFeed: Send + Sync {
    /// Rows inserted into `conversation` after the call.
    fn subscribe(&self, conversation: &ConversationId) -> BoxStream<'static, MessageRow>;
}
