//! Message pipeline: send and read direct messages for one local user.
//!
//! ```text
//! send:  resolve ─▶ fetch keys ─▶ check peer pin ─▶ encrypt for both ─▶ persist
//! read:  resolve ─▶ per row: version ─▶ sender pin ─▶ decrypt own slot
//! ```
//!
//! A sender with no pin yet is the exception: the row is decrypted first and
//! its key is pinned only if the ciphertext authenticates under it.
//!
//! Reads never fail per message. Anything that cannot be shown safely
//! becomes a [`MessageBody`] placeholder.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, StreamExt};
use serde::Serialize;
use tandem_shared::constants::{PLACEHOLDER_KEY_CHANGED, PLACEHOLDER_UNAVAILABLE};
use tandem_shared::envelope::encrypt_for_both;
use tandem_shared::protocol::MessageRow;
use tandem_shared::{
    ConversationId, MessageId, MessagingIdentity, ParticipantPair, PublicKey, Slot, UserId,
};
use tracing::{debug, info, warn};

use crate::backend::{ChangeFeed, ConversationStore, InsertOutcome, KeyDirectoryBackend};
use crate::config::MessagingConfig;
use crate::directory::KeyDirectory;
use crate::error::{MessagingError, Result};
use crate::identity::IdentityStore;
use crate::local::LocalStores;
use crate::memory::MemoryBackend;
use crate::resolver::{ConversationResolver, ParticipantProbe};
use crate::trust::{TrustEngine, TrustState};

/// What the UI shows for one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum MessageBody {
    Plaintext(String),
    /// Sender key no longer matches the pin.
    KeyChanged,
    /// Unknown version, tampered, or not decryptable here.
    Unavailable,
}

impl MessageBody {
    pub fn display_text(&self) -> &str {
        match self {
            MessageBody::Plaintext(text) => text,
            MessageBody::KeyChanged => PLACEHOLDER_KEY_CHANGED,
            MessageBody::Unavailable => PLACEHOLDER_UNAVAILABLE,
        }
    }

    pub fn plaintext(&self) -> Option<&str> {
        match self {
            MessageBody::Plaintext(text) => Some(text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecryptedMessage {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub body: MessageBody,
    pub created_at: DateTime<Utc>,
    pub is_read: bool,
    pub is_own: bool,
}

/// The remote collaborators a pipeline talks to.
#[derive(Clone)]
pub struct RemoteCollaborators {
    pub directory: Arc<dyn KeyDirectoryBackend>,
    pub conversations: Arc<dyn ConversationStore>,
    pub feed: Arc<dyn ChangeFeed>,
}

impl RemoteCollaborators {
    /// All three roles served by one in-process backend.
    pub fn from_memory(backend: Arc<MemoryBackend>) -> Self {
        Self {
            directory: backend.clone(),
            conversations: backend.clone(),
            feed: backend,
        }
    }
}

/// State the read path needs, shared with live subscriptions.
struct Reader {
    viewer: UserId,
    identities: IdentityStore,
    trust: TrustEngine,
    resolver: ConversationResolver,
}

impl Reader {
    /// Turn one stored row into what the viewer may see.
    fn open(
        &self,
        row: &MessageRow,
        pair: &ParticipantPair,
        own: &MessagingIdentity,
    ) -> MessageBody {
        let Some(slot) = pair.slot_of(&self.viewer) else {
            return MessageBody::Unavailable;
        };
        if !pair.contains(&row.sender_id) {
            warn!(message = %row.id, "Sender is not a participant");
            return MessageBody::Unavailable;
        }
        if !row.is_current_version() {
            debug!(message = %row.id, version = %row.encryption_version, "Unsupported version");
            return MessageBody::Unavailable;
        }
        let sender_key = match row.sender_key() {
            Ok(key) => key,
            Err(e) => {
                debug!(message = %row.id, error = %e, "Undecodable sender key");
                return MessageBody::Unavailable;
            }
        };

        if row.sender_id == self.viewer {
            // Own messages must carry our own key; anything else was not sent by us.
            if sender_key != own.public_key() {
                debug!(message = %row.id, "Own message under a different key");
                return MessageBody::Unavailable;
            }
            return Self::decrypt(row, slot, own);
        }

        match self.trust.pinned_key(&row.sender_id) {
            Ok(Some(_)) => match self.refusal(row, &sender_key) {
                Some(placeholder) => placeholder,
                None => Self::decrypt(row, slot, own),
            },
            // Unpinned: a row that fails to authenticate must not pin its key.
            Ok(None) => match Self::decrypt(row, slot, own) {
                MessageBody::Plaintext(text) => self
                    .refusal(row, &sender_key)
                    .unwrap_or(MessageBody::Plaintext(text)),
                placeholder => placeholder,
            },
            Err(e) => {
                warn!(message = %row.id, error = %e, "Pin store failed, hiding message");
                MessageBody::Unavailable
            }
        }
    }

    /// The placeholder to show instead of the row, or `None` if its sender
    /// key is trusted. Pins the key if the sender has no pin yet.
    fn refusal(&self, row: &MessageRow, sender_key: &PublicKey) -> Option<MessageBody> {
        match self.trust.evaluate_received(&row.sender_id, sender_key) {
            Ok(TrustState::Trusted) => None,
            Ok(TrustState::Changed { .. }) => Some(MessageBody::KeyChanged),
            Ok(TrustState::Unverified) => Some(MessageBody::Unavailable),
            Err(e) => {
                warn!(message = %row.id, error = %e, "Pin store failed, hiding message");
                Some(MessageBody::Unavailable)
            }
        }
    }

    fn decrypt(row: &MessageRow, slot: Slot, own: &MessagingIdentity) -> MessageBody {
        match row.open_slot(slot, own) {
            Ok(text) => MessageBody::Plaintext(text),
            Err(e) => {
                debug!(message = %row.id, error = %e, "Decryption failed");
                MessageBody::Unavailable
            }
        }
    }

    fn decrypted(
        &self,
        row: &MessageRow,
        pair: &ParticipantPair,
        own: &MessagingIdentity,
    ) -> DecryptedMessage {
        DecryptedMessage {
            id: row.id,
            conversation_id: row.conversation_id,
            sender_id: row.sender_id,
            body: self.open(row, pair, own),
            created_at: row.created_at,
            is_read: row.is_read,
            is_own: row.sender_id == self.viewer,
        }
    }

    async fn participants(&self, conversation: &ConversationId) -> Result<ParticipantPair> {
        let pair = self.resolver.resolve(conversation, &self.viewer).await?;
        if !pair.contains(&self.viewer) {
            return Err(MessagingError::NotAParticipant {
                conversation: *conversation,
                user: self.viewer,
            });
        }
        Ok(pair)
    }
}

/// Messaging for one local user.
///
/// Every store is injected: two pipelines never share pins or caches unless
/// handed the same [`LocalStores`].
pub struct MessagePipeline {
    reader: Arc<Reader>,
    directory: KeyDirectory,
    conversations: Arc<dyn ConversationStore>,
    feed: Arc<dyn ChangeFeed>,
    max_message_bytes: usize,
}

impl MessagePipeline {
    pub fn new(
        viewer: UserId,
        remote: RemoteCollaborators,
        local: LocalStores,
        config: &MessagingConfig,
    ) -> Self {
        Self::with_probe(viewer, remote, local, config, ParticipantProbe::default())
    }

    /// Like [`MessagePipeline::new`] with custom participant column candidates.
    pub fn with_probe(
        viewer: UserId,
        remote: RemoteCollaborators,
        local: LocalStores,
        config: &MessagingConfig,
        probe: ParticipantProbe,
    ) -> Self {
        let reader = Reader {
            viewer,
            identities: IdentityStore::new(local.secrets),
            trust: TrustEngine::new(viewer, local.pins),
            resolver: ConversationResolver::new(
                remote.conversations.clone(),
                local.participants,
                probe,
            ),
        };

        Self {
            reader: Arc::new(reader),
            directory: KeyDirectory::new(remote.directory),
            conversations: remote.conversations,
            feed: remote.feed,
            max_message_bytes: config.max_message_bytes,
        }
    }

    pub fn viewer(&self) -> UserId {
        self.reader.viewer
    }

    pub fn get_or_create_identity(&self) -> Result<Arc<MessagingIdentity>> {
        self.reader.identities.get_or_create(&self.reader.viewer)
    }

    /// Publish the local public key to the directory.
    pub async fn publish_identity(&self) -> Result<Arc<MessagingIdentity>> {
        let identity = self.get_or_create_identity()?;
        self.directory.publish(&identity).await?;
        Ok(identity)
    }

    /// Replace the local keypair, forget every pin and publish the new key.
    pub async fn rotate_identity(&self) -> Result<Arc<MessagingIdentity>> {
        let identity = self.reader.identities.rotate(&self.reader.viewer)?;
        let cleared = self.reader.trust.forget_all()?;
        info!(cleared, "Cleared pinned keys after rotation");
        self.directory.publish(&identity).await?;
        Ok(identity)
    }

    /// Find or create the conversation with `peer`.
    pub async fn open_conversation(&self, peer: &UserId) -> Result<ConversationId> {
        self.reader
            .resolver
            .open_conversation(&self.reader.viewer, peer)
            .await
    }

    pub async fn send(
        &self,
        conversation: &ConversationId,
        plaintext: &str,
    ) -> Result<DecryptedMessage> {
        self.send_with_id(MessageId::new(), conversation, plaintext)
            .await
    }

    /// Send with a caller-chosen id. Re-running with the same id after an
    /// abandoned attempt never creates a second message.
    pub async fn send_with_id(
        &self,
        id: MessageId,
        conversation: &ConversationId,
        plaintext: &str,
    ) -> Result<DecryptedMessage> {
        if plaintext.trim().is_empty() {
            return Err(MessagingError::InvalidMessage("message is empty".into()));
        }
        if plaintext.len() > self.max_message_bytes {
            return Err(MessagingError::InvalidMessage(format!(
                "message is {} bytes, limit is {}",
                plaintext.len(),
                self.max_message_bytes
            )));
        }

        let identity = self.get_or_create_identity()?;
        let viewer = self.reader.viewer;
        let pair = self.reader.participants(conversation).await?;
        let peer = pair
            .other(&viewer)
            .ok_or(MessagingError::ResolutionFailed(*conversation))?;

        let keys = self
            .directory
            .fetch_public_keys(&HashSet::from([viewer, peer]))
            .await?;

        let mut missing: Vec<UserId> = [viewer, peer]
            .into_iter()
            .filter(|id| !keys.contains_key(id))
            .collect();
        missing.sort();
        if !missing.is_empty() {
            return Err(MessagingError::RecipientKeyUnavailable { missing });
        }

        let peer_key = keys[&peer];
        let own_key = identity.public_key();
        if keys[&viewer] != own_key {
            warn!(user = %viewer.short(), "Directory holds a stale own key, republishing");
            if let Err(e) = self.directory.publish(&identity).await {
                warn!(error = %e, "Republishing own key failed");
            }
        }

        if let TrustState::Changed { pinned, observed } =
            self.reader.trust.pin_and_evaluate(&peer, &peer_key)?
        {
            return Err(MessagingError::PeerKeyChanged {
                peer,
                pinned,
                observed,
            });
        }

        let (key_a, key_b): (PublicKey, PublicKey) = match pair.slot_of(&viewer) {
            Some(Slot::A) => (own_key, peer_key),
            _ => (peer_key, own_key),
        };
        let envelope = encrypt_for_both(plaintext.as_bytes(), &key_a, &key_b, &identity)?;
        let row = MessageRow::from_envelope(id, *conversation, &identity, &envelope, Utc::now());

        match self.conversations.insert_message(&row).await? {
            InsertOutcome::Inserted => debug!(message = %id, %conversation, "Message sent"),
            InsertOutcome::Duplicate => info!(message = %id, "Message already stored"),
        }

        Ok(DecryptedMessage {
            id,
            conversation_id: *conversation,
            sender_id: viewer,
            body: MessageBody::Plaintext(plaintext.to_string()),
            created_at: row.created_at,
            is_read: false,
            is_own: true,
        })
    }

    /// Every message of the conversation, oldest first.
    pub async fn fetch_and_decrypt(
        &self,
        conversation: &ConversationId,
    ) -> Result<Vec<DecryptedMessage>> {
        let identity = self.get_or_create_identity()?;
        let pair = self.reader.participants(conversation).await?;

        let mut rows = self.conversations.list_messages(conversation).await?;
        let mut seen = HashSet::new();
        rows.retain(|row| seen.insert(row.id));
        rows.sort_by_key(|row| row.created_at);

        Ok(rows
            .iter()
            .map(|row| self.reader.decrypted(row, &pair, &identity))
            .collect())
    }

    /// Live messages of the conversation, decrypted as they arrive.
    pub async fn subscribe(
        &self,
        conversation: &ConversationId,
    ) -> Result<BoxStream<'static, DecryptedMessage>> {
        self.get_or_create_identity()?;
        let pair = self.reader.participants(conversation).await?;
        let reader = self.reader.clone();

        Ok(self
            .feed
            .subscribe(conversation)
            .map(move |row| match reader.identities.get_or_create(&reader.viewer) {
                Ok(identity) => reader.decrypted(&row, &pair, &identity),
                Err(e) => {
                    warn!(error = %e, "Identity unavailable for live message");
                    DecryptedMessage {
                        id: row.id,
                        conversation_id: row.conversation_id,
                        sender_id: row.sender_id,
                        body: MessageBody::Unavailable,
                        created_at: row.created_at,
                        is_read: row.is_read,
                        is_own: row.sender_id == reader.viewer,
                    }
                }
            })
            .boxed())
    }

    pub async fn mark_read(&self, message: &MessageId) -> Result<()> {
        Ok(self.conversations.mark_read(message).await?)
    }

    /// Compare the peer's current directory key with its pin.
    pub async fn evaluate_peer_trust(&self, peer: &UserId) -> Result<TrustState> {
        match self.directory.fetch_public_key(peer).await? {
            Some(key) => Ok(self.reader.trust.pin_and_evaluate(peer, &key)?),
            None => Ok(TrustState::Unverified),
        }
    }

    /// Accept `acknowledged` as the peer's key after the user verified it.
    pub fn acknowledge_key_change(&self, peer: &UserId, acknowledged: &PublicKey) -> Result<()> {
        Ok(self.reader.trust.retrust(peer, acknowledged)?)
    }
}
