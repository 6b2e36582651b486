//! Maps a conversation handle to its two participants.
//!
//! Conversation records have gone through several schema generations, so the
//! participant columns are probed rather than assumed. Everything past this
//! module only sees a [`ParticipantPair`].

use std::sync::Arc;

use tandem_shared::{ConversationId, ParticipantPair, Slot, UserId};
use tracing::{debug, info, warn};

use crate::backend::{ConversationRow, ConversationStore};
use crate::error::{MessagingError, Result};
use crate::local::ParticipantCache;

/// Candidate participant column pairs, in priority order.
pub const DEFAULT_PARTICIPANT_COLUMNS: &[(&str, &str)] = &[
    ("participant_a", "participant_b"),
    ("user1_id", "user2_id"),
    ("client_id", "companion_id"),
    ("sender_id", "receiver_id"),
    ("user_id", "other_user_id"),
];

/// What the record alone says about its participants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probed {
    Complete(ParticipantPair),
    /// One participant known, sitting in `slot`.
    Partial { known: UserId, slot: Slot },
    Empty,
}

#[derive(Debug, Clone)]
pub struct ParticipantProbe {
    candidates: Vec<(String, String)>,
}

impl Default for ParticipantProbe {
    fn default() -> Self {
        Self::new(DEFAULT_PARTICIPANT_COLUMNS)
    }
}

impl ParticipantProbe {
    pub fn new(candidates: &[(&str, &str)]) -> Self {
        Self {
            candidates: candidates
                .iter()
                .map(|(a, b)| (a.to_string(), b.to_string()))
                .collect(),
        }
    }

    pub fn probe(&self, row: &ConversationRow, viewer: &UserId) -> Probed {
        let mut complete = Vec::new();
        let mut partial = None;

        for (col_a, col_b) in &self.candidates {
            match (row.user_column(col_a), row.user_column(col_b)) {
                (Some(a), Some(b)) => match ParticipantPair::new(a, b) {
                    Some(pair) => complete.push(pair),
                    None => {
                        partial.get_or_insert(Probed::Partial {
                            known: a,
                            slot: Slot::A,
                        });
                    }
                },
                (Some(a), None) => {
                    partial.get_or_insert(Probed::Partial {
                        known: a,
                        slot: Slot::A,
                    });
                }
                (None, Some(b)) => {
                    partial.get_or_insert(Probed::Partial {
                        known: b,
                        slot: Slot::B,
                    });
                }
                (None, None) => {}
            }
        }

        if let Some(pair) = complete
            .iter()
            .find(|pair| pair.contains(viewer))
            .or_else(|| complete.first())
        {
            return Probed::Complete(*pair);
        }
        partial.unwrap_or(Probed::Empty)
    }
}

pub struct ConversationResolver {
    store: Arc<dyn ConversationStore>,
    cache: Arc<dyn ParticipantCache>,
    probe: ParticipantProbe,
}

impl ConversationResolver {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        cache: Arc<dyn ParticipantCache>,
        probe: ParticipantProbe,
    ) -> Self {
        Self {
            store,
            cache,
            probe,
        }
    }

    /// Participants of `conversation`, resolved once and cached for good.
    pub async fn resolve(
        &self,
        conversation: &ConversationId,
        viewer: &UserId,
    ) -> Result<ParticipantPair> {
        if let Some(pair) = self.cache.get(viewer, conversation)? {
            return Ok(pair);
        }

        let pair = self.resolve_uncached(conversation, viewer).await?;

        if self.cache.insert_if_absent(viewer, conversation, &pair)? {
            debug!(%conversation, "Cached conversation participants");
            return Ok(pair);
        }
        // A concurrent resolution cached first; its answer is the answer.
        Ok(self.cache.get(viewer, conversation)?.unwrap_or(pair))
    }

    async fn resolve_uncached(
        &self,
        conversation: &ConversationId,
        viewer: &UserId,
    ) -> Result<ParticipantPair> {
        let row = self
            .store
            .get_conversation(conversation)
            .await?
            .ok_or(MessagingError::ResolutionFailed(*conversation))?;

        let (known, slot) = match self.probe.probe(&row, viewer) {
            Probed::Complete(pair) => return Ok(pair),
            Probed::Partial { known, slot } => (Some(known), slot),
            Probed::Empty => (None, Slot::A),
        };

        warn!(%conversation, "Conversation record incomplete, deriving participants");

        let mut senders: Vec<UserId> = Vec::new();
        for message in self.store.list_messages(conversation).await? {
            if !senders.contains(&message.sender_id) {
                senders.push(message.sender_id);
            }
        }

        let pair = match known {
            Some(known) => senders
                .iter()
                .copied()
                .find(|s| *s != known)
                .or_else(|| (*viewer != known).then_some(*viewer))
                .and_then(|other| match slot {
                    Slot::A => ParticipantPair::new(known, other),
                    Slot::B => ParticipantPair::new(other, known),
                }),
            None => {
                let first = senders.first().copied().unwrap_or(*viewer);
                senders
                    .iter()
                    .copied()
                    .find(|s| *s != first)
                    .or_else(|| (*viewer != first).then_some(*viewer))
                    .and_then(|second| ParticipantPair::new(first, second))
            }
        };

        match pair {
            Some(pair) => {
                info!(%conversation, "Derived participants from messages");
                Ok(pair)
            }
            None => Err(MessagingError::ResolutionFailed(*conversation)),
        }
    }

    /// Find or create the conversation between `viewer` and `peer`.
    pub async fn open_conversation(&self, viewer: &UserId, peer: &UserId) -> Result<ConversationId> {
        if viewer == peer {
            return Err(MessagingError::InvalidMessage(
                "cannot open a conversation with oneself".into(),
            ));
        }

        let row = match self.store.find_conversation(viewer, peer).await? {
            Some(row) => row,
            None => self.store.create_conversation(viewer, peer).await?,
        };

        // Seed the cache in storage order when the row is readable.
        let pair = match self.probe.probe(&row, viewer) {
            Probed::Complete(pair) if pair.contains(viewer) && pair.contains(peer) => pair,
            _ => ParticipantPair::new(*viewer, *peer)
                .ok_or(MessagingError::ResolutionFailed(row.id))?,
        };
        self.cache.insert_if_absent(viewer, &row.id, &pair)?;

        Ok(row.id)
    }
}
