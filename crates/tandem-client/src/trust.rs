//! Trust-on-first-use pinning of peer public keys.
//!
//! ```text
//! Unpinned ──first key──▶ Pinned(k) ──same k──▶ Pinned(k)
//!                             │
//!                             └──other k'──▶ Changed(k, k')   (pin untouched)
//! ```
//!
//! A pin only moves through [`TrustEngine::retrust`], which the caller
//! invokes after the user has acknowledged the new key. The replaced key is
//! retired, not forgotten: [`TrustEngine::evaluate_received`] still accepts it
//! so messages read under it stay readable. Sending only ever uses the
//! current pin.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use serde::Serialize;
use tandem_shared::{PublicKey, UserId};
use tandem_store::PinnedKey;
use tracing::{debug, info, warn};

use crate::error::BackendError;
use crate::local::PinStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TrustState {
    /// The observed key matches the pin (or was just pinned).
    Trusted,
    /// The observed key differs from the pin.
    Changed {
        pinned: PublicKey,
        observed: PublicKey,
    },
    /// The peer has no published key to evaluate.
    Unverified,
}

/// Pin table of one local user.
pub struct TrustEngine {
    viewer: UserId,
    pins: Arc<dyn PinStore>,
    // Serializes pin-and-evaluate; guards no data, never held across an await.
    op_lock: Mutex<()>,
}

impl TrustEngine {
    pub fn new(viewer: UserId, pins: Arc<dyn PinStore>) -> Self {
        Self {
            viewer,
            pins,
            op_lock: Mutex::new(()),
        }
    }

    /// Pin `observed` if `peer` is unpinned, then compare it with the pin.
    pub fn pin_and_evaluate(
        &self,
        peer: &UserId,
        observed: &PublicKey,
    ) -> Result<TrustState, BackendError> {
        self.evaluate(peer, observed, false)
    }

    /// Like [`pin_and_evaluate`](Self::pin_and_evaluate), for the sender key
    /// of a received message: a key retired by an earlier re-trust is
    /// `Trusted`.
    pub fn evaluate_received(
        &self,
        peer: &UserId,
        observed: &PublicKey,
    ) -> Result<TrustState, BackendError> {
        self.evaluate(peer, observed, true)
    }

    fn evaluate(
        &self,
        peer: &UserId,
        observed: &PublicKey,
        accept_retired: bool,
    ) -> Result<TrustState, BackendError> {
        let _guard = self.op_lock.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(pin) = self.pins.get(&self.viewer, peer)? {
            return self.compare(peer, &pin.public_key, observed, accept_retired);
        }

        let candidate = PinnedKey {
            viewer_id: self.viewer,
            peer_id: *peer,
            public_key: *observed,
            pinned_at: Utc::now(),
        };

        if self.pins.insert_if_absent(&candidate)? {
            info!(
                peer = %peer.short(),
                key = %observed.fingerprint(),
                "Pinned peer key on first use"
            );
            return Ok(TrustState::Trusted);
        }

        // Someone else pinned between our read and write: evaluate against theirs.
        let winner = self
            .pins
            .get(&self.viewer, peer)?
            .ok_or_else(|| BackendError::Unavailable("pin vanished after write conflict".into()))?;
        self.compare(peer, &winner.public_key, observed, accept_retired)
    }

    /// Current pin for `peer`, if any.
    pub fn pinned_key(&self, peer: &UserId) -> Result<Option<PinnedKey>, BackendError> {
        self.pins.get(&self.viewer, peer)
    }

    /// Replace the pin for `peer` with a key the user explicitly accepted.
    /// The previous key is retired.
    pub fn retrust(&self, peer: &UserId, acknowledged: &PublicKey) -> Result<(), BackendError> {
        let _guard = self.op_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let previous = self.pins.get(&self.viewer, peer)?;
        self.pins.replace(&PinnedKey {
            viewer_id: self.viewer,
            peer_id: *peer,
            public_key: *acknowledged,
            pinned_at: Utc::now(),
        })?;

        info!(
            peer = %peer.short(),
            previous = ?previous.map(|p| p.public_key.fingerprint()),
            key = %acknowledged.fingerprint(),
            "Peer key re-trusted"
        );
        Ok(())
    }

    /// Drop every pin (after rotating the local identity).
    pub fn forget_all(&self) -> Result<usize, BackendError> {
        let _guard = self.op_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.pins.clear(&self.viewer)
    }

    fn compare(
        &self,
        peer: &UserId,
        pinned: &PublicKey,
        observed: &PublicKey,
        accept_retired: bool,
    ) -> Result<TrustState, BackendError> {
        if pinned == observed {
            return Ok(TrustState::Trusted);
        }
        if accept_retired && self.pins.is_retired(&self.viewer, peer, observed)? {
            debug!(
                peer = %peer.short(),
                key = %observed.fingerprint(),
                "Message key was trusted before a re-trust"
            );
            return Ok(TrustState::Trusted);
        }
        warn!(
            peer = %peer.short(),
            pinned = %pinned.fingerprint(),
            observed = %observed.fingerprint(),
            "Peer key does not match pin"
        );
        Ok(TrustState::Changed {
            pinned: *pinned,
            observed: *observed,
        })
    }
}
