//! # tandem-client
//!
//! End-to-end encrypted direct messaging for one local user.
//!
//! [`MessagePipeline`] ties the pieces together: the device identity
//! ([`identity`]), the public key directory ([`directory`]), trust-on-first-use
//! pinning ([`trust`]), conversation participant resolution ([`resolver`])
//! and the dual-recipient envelope from `tandem-shared`. Remote services are
//! reached through the traits in [`backend`]; [`http`] and [`memory`] provide
//! implementations.

pub mod backend;
pub mod config;
pub mod directory;
pub mod error;
pub mod http;
pub mod identity;
pub mod local;
pub mod memory;
pub mod pipeline;
pub mod resolver;
pub mod trust;

pub use config::MessagingConfig;
pub use error::{BackendError, MessagingError, Result};
pub use local::{LocalStores, SqliteLocalStore};
pub use pipeline::{DecryptedMessage, MessageBody, MessagePipeline, RemoteCollaborators};
pub use trust::TrustState;
