//! In-process implementation of every remote collaborator.
//!
//! Backs demos and tests. Conversations are stored with configurable
//! participant column names so schema-probing paths can be exercised.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::Value;
use tandem_shared::protocol::MessageRow;
use tandem_shared::{ConversationId, MessageId, UserId};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::backend::{
    ChangeFeed, ConversationRow, ConversationStore, InsertOutcome, KeyDirectoryBackend,
    PublicKeyRow,
};
use crate::error::BackendError;

const FEED_CAPACITY: usize = 256;

#[derive(Default)]
struct State {
    keys: HashMap<UserId, String>,
    conversations: Vec<ConversationRow>,
    messages: Vec<MessageRow>,
    fail_inserts: bool,
}

pub struct MemoryBackend {
    state: Mutex<State>,
    feed: broadcast::Sender<MessageRow>,
    columns: (String, String),
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_participant_columns("participant_a", "participant_b")
    }

    /// Store new conversations under `a`/`b` instead of the default columns.
    pub fn with_participant_columns(a: &str, b: &str) -> Self {
        let (feed, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            state: Mutex::new(State::default()),
            feed,
            columns: (a.to_string(), b.to_string()),
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, State>, BackendError> {
        self.state
            .lock()
            .map_err(|_| BackendError::Unavailable("memory backend lock poisoned".into()))
    }

    /// Make every subsequent `insert_message` fail.
    pub fn set_fail_inserts(&self, fail: bool) -> Result<(), BackendError> {
        self.state()?.fail_inserts = fail;
        Ok(())
    }

    /// Store a conversation row as-is, replacing any row with the same id.
    pub fn put_conversation_row(&self, row: ConversationRow) -> Result<(), BackendError> {
        let mut state = self.state()?;
        state.conversations.retain(|c| c.id != row.id);
        state.conversations.push(row);
        Ok(())
    }

    /// Store a message row without any checks and announce it on the feed.
    pub fn insert_raw_message(&self, row: MessageRow) -> Result<(), BackendError> {
        self.state()?.messages.push(row.clone());
        let _ = self.feed.send(row);
        Ok(())
    }

    pub fn remove_public_key(&self, id: &UserId) -> Result<(), BackendError> {
        self.state()?.keys.remove(id);
        Ok(())
    }

    pub fn message_count(&self) -> Result<usize, BackendError> {
        Ok(self.state()?.messages.len())
    }

    pub fn stored_message(&self, id: &MessageId) -> Result<Option<MessageRow>, BackendError> {
        Ok(self.state()?.messages.iter().find(|m| m.id == *id).cloned())
    }

    fn is_between(&self, row: &ConversationRow, a: &UserId, b: &UserId) -> bool {
        let first = row.user_column(&self.columns.0);
        let second = row.user_column(&self.columns.1);
        (first == Some(*a) && second == Some(*b)) || (first == Some(*b) && second == Some(*a))
    }
}

#[async_trait]
impl KeyDirectoryBackend for MemoryBackend {
    async fn get_public_keys(&self, ids: &[UserId]) -> Result<Vec<PublicKeyRow>, BackendError> {
        let state = self.state()?;
        Ok(ids
            .iter()
            .filter_map(|id| {
                state.keys.get(id).map(|key| PublicKeyRow {
                    id: *id,
                    public_key: Some(key.clone()),
                })
            })
            .collect())
    }

    async fn put_public_key(&self, id: &UserId, public_key: &str) -> Result<(), BackendError> {
        self.state()?.keys.insert(*id, public_key.to_string());
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for MemoryBackend {
    async fn get_conversation(
        &self,
        id: &ConversationId,
    ) -> Result<Option<ConversationRow>, BackendError> {
        Ok(self
            .state()?
            .conversations
            .iter()
            .find(|c| c.id == *id)
            .cloned())
    }

    async fn find_conversation(
        &self,
        a: &UserId,
        b: &UserId,
    ) -> Result<Option<ConversationRow>, BackendError> {
        Ok(self
            .state()?
            .conversations
            .iter()
            .find(|c| self.is_between(c, a, b))
            .cloned())
    }

    async fn create_conversation(
        &self,
        a: &UserId,
        b: &UserId,
    ) -> Result<ConversationRow, BackendError> {
        let mut state = self.state()?;
        if let Some(existing) = state.conversations.iter().find(|c| self.is_between(c, a, b)) {
            return Ok(existing.clone());
        }

        let mut row = ConversationRow::new(ConversationId::new())
            .with_column(&self.columns.0, *a)
            .with_column(&self.columns.1, *b);
        row.columns.insert(
            "created_at".into(),
            Value::String(Utc::now().to_rfc3339()),
        );
        state.conversations.push(row.clone());
        debug!(conversation = %row.id, "Created conversation");
        Ok(row)
    }

    async fn list_messages(&self, id: &ConversationId) -> Result<Vec<MessageRow>, BackendError> {
        let mut messages: Vec<MessageRow> = self
            .state()?
            .messages
            .iter()
            .filter(|m| m.conversation_id == *id)
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.created_at);
        Ok(messages)
    }

    async fn insert_message(&self, row: &MessageRow) -> Result<InsertOutcome, BackendError> {
        {
            let mut state = self.state()?;
            if state.fail_inserts {
                return Err(BackendError::Unavailable("insert rejected".into()));
            }
            if state.messages.iter().any(|m| m.id == row.id) {
                return Ok(InsertOutcome::Duplicate);
            }
            state.messages.push(row.clone());
        }
        // No receivers is fine.
        let _ = self.feed.send(row.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn mark_read(&self, id: &MessageId) -> Result<(), BackendError> {
        let mut state = self.state()?;
        if let Some(message) = state.messages.iter_mut().find(|m| m.id == *id) {
            message.is_read = true;
        }
        Ok(())
    }
}

impl ChangeFeed for MemoryBackend {
    fn subscribe(&self, conversation: &ConversationId) -> BoxStream<'static, MessageRow> {
        let conversation = *conversation;
        stream::unfold(self.feed.subscribe(), move |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(row) if row.conversation_id == conversation => return Some((row, rx)),
                    Ok(_) => continue,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(%conversation, skipped, "Change feed lagged");
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        })
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(conversation: ConversationId, seconds: i64) -> MessageRow {
        MessageRow {
            id: MessageId::new(),
            conversation_id: conversation,
            sender_id: UserId::new(),
            ciphertext_for_a: String::new(),
            nonce_for_a: String::new(),
            ciphertext_for_b: String::new(),
            nonce_for_b: String::new(),
            sender_public_key: String::new(),
            encryption_version: "v1".into(),
            created_at: chrono::DateTime::from_timestamp(seconds, 0).unwrap(),
            is_read: false,
        }
    }

    #[tokio::test]
    async fn create_conversation_is_idempotent_per_pair() {
        let backend = MemoryBackend::new();
        let (a, b) = (UserId::new(), UserId::new());

        let first = backend.create_conversation(&a, &b).await.unwrap();
        let second = backend.create_conversation(&b, &a).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(
            backend.find_conversation(&b, &a).await.unwrap().map(|c| c.id),
            Some(first.id)
        );
        assert_eq!(first.user_column("participant_a"), Some(a));
    }

    #[tokio::test]
    async fn custom_columns_are_used() {
        let backend = MemoryBackend::with_participant_columns("client_id", "companion_id");
        let (a, b) = (UserId::new(), UserId::new());

        let conv = backend.create_conversation(&a, &b).await.unwrap();
        assert_eq!(conv.user_column("client_id"), Some(a));
        assert_eq!(conv.user_column("participant_a"), None);
    }

    #[tokio::test]
    async fn duplicate_insert_is_reported() {
        let backend = MemoryBackend::new();
        let message = row(ConversationId::new(), 1);

        assert_eq!(
            backend.insert_message(&message).await.unwrap(),
            InsertOutcome::Inserted
        );
        assert_eq!(
            backend.insert_message(&message).await.unwrap(),
            InsertOutcome::Duplicate
        );
        assert_eq!(backend.message_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn failing_inserts_store_nothing() {
        let backend = MemoryBackend::new();
        backend.set_fail_inserts(true).unwrap();

        assert!(backend.insert_message(&row(ConversationId::new(), 1)).await.is_err());
        assert_eq!(backend.message_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn messages_listed_oldest_first() {
        let backend = MemoryBackend::new();
        let conv = ConversationId::new();
        let late = row(conv, 20);
        let early = row(conv, 10);
        backend.insert_message(&late).await.unwrap();
        backend.insert_message(&early).await.unwrap();
        backend.insert_message(&row(ConversationId::new(), 5)).await.unwrap();

        let ids: Vec<MessageId> = backend
            .list_messages(&conv)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec![early.id, late.id]);
    }

    #[tokio::test]
    async fn feed_delivers_only_subscribed_conversation() {
        let backend = MemoryBackend::new();
        let conv = ConversationId::new();
        let mut feed = backend.subscribe(&conv);

        let other = row(ConversationId::new(), 1);
        let mine = row(conv, 2);
        backend.insert_message(&other).await.unwrap();
        backend.insert_message(&mine).await.unwrap();

        assert_eq!(feed.next().await.map(|m| m.id), Some(mine.id));
    }

    #[tokio::test]
    async fn mark_read_flips_flag() {
        let backend = MemoryBackend::new();
        let message = row(ConversationId::new(), 1);
        backend.insert_message(&message).await.unwrap();

        backend.mark_read(&message.id).await.unwrap();
        assert!(backend.stored_message(&message.id).unwrap().unwrap().is_read);
    }
}
