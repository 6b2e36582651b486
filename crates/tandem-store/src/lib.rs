//! # tandem-store
//!
//! Device-local storage for the Tandem messaging core, backed by SQLite.
//!
//! Holds the three pieces of state that must never live on the backend:
//! identity secrets (sealed with a device key), the pinned public key of
//! every peer, and the resolved participant pair of each conversation.
//! The crate exposes a synchronous [`Database`] handle wrapping a
//! `rusqlite::Connection` with typed helpers for each table.

pub mod database;
pub mod identity;
pub mod migrations;
pub mod models;
pub mod participants;
pub mod pins;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::*;
