use tandem_shared::{ConversationId, CryptoError, PublicKey, UserId};
use thiserror::Error;

/// Failure of an external or local collaborator (directory, store, keystore).
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Backend responded with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Local store error: {0}")]
    Store(#[from] tandem_store::StoreError),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

/// Errors surfaced by the messaging core.
///
/// Per-message decryption problems are not errors: they become placeholders
/// in [`crate::pipeline::MessageBody`].
#[derive(Error, Debug)]
pub enum MessagingError {
    /// The device keystore could not produce the local identity. Fatal for
    /// the session.
    #[error("Messaging identity unavailable: {0}")]
    IdentityUnavailable(String),

    /// At least one participant has not published a public key yet.
    #[error("No published key for: {}", format_users(.missing))]
    RecipientKeyUnavailable { missing: Vec<UserId> },

    /// The peer's directory key differs from the pinned one. Requires an
    /// explicit re-trust before sending again.
    #[error("Security key of {peer} changed (pinned {}, now {})", .pinned.fingerprint(), .observed.fingerprint())]
    PeerKeyChanged {
        peer: UserId,
        pinned: PublicKey,
        observed: PublicKey,
    },

    /// The participants of the conversation could not be determined.
    #[error("Could not resolve the participants of conversation {0}")]
    ResolutionFailed(ConversationId),

    #[error("User {user} is not a participant of conversation {conversation}")]
    NotAParticipant {
        conversation: ConversationId,
        user: UserId,
    },

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Encryption failed: {0}")]
    Encryption(#[from] CryptoError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
}

fn format_users(users: &[UserId]) -> String {
    users
        .iter()
        .map(|u| u.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub type Result<T> = std::result::Result<T, MessagingError>;
