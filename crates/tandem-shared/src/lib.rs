//! # tandem-shared
//!
//! Types and cryptography shared by every Tandem crate: identifiers, the
//! X25519 messaging identity, the dual-recipient envelope cipher, at-rest
//! sealing for device-local secrets and the base64 storage codec.

pub mod constants;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod identity;
pub mod protocol;
pub mod types;
pub mod wire;

pub use error::{CryptoError, DecryptFailure, WireError};
pub use identity::MessagingIdentity;
pub use types::{ConversationId, MessageId, ParticipantPair, PublicKey, Slot, UserId};
