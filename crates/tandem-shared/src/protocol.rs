use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{ENCRYPTION_VERSION, NONCE_SIZE};
use crate::envelope::{decrypt_one, Envelope};
use crate::error::{DecryptFailure, WireError};
use crate::identity::MessagingIdentity;
use crate::types::{ConversationId, MessageId, PublicKey, Slot, UserId};
use crate::wire;

/// An encrypted direct message as persisted by the backend.
///
/// Binary fields are base64 strings. Rows are immutable once inserted except
/// for `is_read`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageRow {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub ciphertext_for_a: String,
    pub nonce_for_a: String,
    pub ciphertext_for_b: String,
    pub nonce_for_b: String,
    pub sender_public_key: String,
    pub encryption_version: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_read: bool,
}

impl MessageRow {
    /// Build the row for a freshly encrypted envelope.
    pub fn from_envelope(
        id: MessageId,
        conversation_id: ConversationId,
        sender: &MessagingIdentity,
        envelope: &Envelope,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            conversation_id,
            sender_id: sender.user_id(),
            ciphertext_for_a: wire::encode(&envelope.for_a.ciphertext),
            nonce_for_a: wire::encode(&envelope.for_a.nonce),
            ciphertext_for_b: wire::encode(&envelope.for_b.ciphertext),
            nonce_for_b: wire::encode(&envelope.for_b.nonce),
            sender_public_key: sender.public_key().to_base64(),
            encryption_version: envelope.version.to_string(),
            created_at,
            is_read: false,
        }
    }

    pub fn is_current_version(&self) -> bool {
        self.encryption_version == ENCRYPTION_VERSION
    }

    pub fn sender_key(&self) -> Result<PublicKey, WireError> {
        PublicKey::from_base64(&self.sender_public_key)
    }

    /// Decrypt the copy stored in `slot` for `own`.
    ///
    /// Rows tagged with any other version are rejected before any field is
    /// decoded.
    pub fn open_slot(&self, slot: Slot, own: &MessagingIdentity) -> Result<String, DecryptFailure> {
        if !self.is_current_version() {
            return Err(DecryptFailure::VersionMismatch {
                found: self.encryption_version.clone(),
            });
        }

        let (ciphertext, nonce) = match slot {
            Slot::A => (&self.ciphertext_for_a, &self.nonce_for_a),
            Slot::B => (&self.ciphertext_for_b, &self.nonce_for_b),
        };

        let sender_key = self.sender_key()?;
        let nonce = wire::decode_fixed::<NONCE_SIZE>("nonce", nonce)?;
        let ciphertext = wire::decode("ciphertext", ciphertext)?;

        decrypt_one(&ciphertext, &nonce, &sender_key, own)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::encrypt_for_both;

    fn sealed_row(
        alice: &MessagingIdentity,
        bob: &MessagingIdentity,
        text: &str,
    ) -> MessageRow {
        let env =
            encrypt_for_both(text.as_bytes(), &alice.public_key(), &bob.public_key(), alice)
                .unwrap();
        MessageRow::from_envelope(
            MessageId::new(),
            ConversationId::new(),
            alice,
            &env,
            Utc::now(),
        )
    }

    #[test]
    fn test_row_opens_for_both_slots() {
        let alice = MessagingIdentity::generate(UserId::new());
        let bob = MessagingIdentity::generate(UserId::new());
        let row = sealed_row(&alice, &bob, "hello");

        assert_eq!(row.open_slot(Slot::A, &alice).unwrap(), "hello");
        assert_eq!(row.open_slot(Slot::B, &bob).unwrap(), "hello");
        assert_eq!(row.sender_id, alice.user_id());
        assert!(!row.is_read);
    }

    #[test]
    fn test_old_version_never_decoded() {
        let alice = MessagingIdentity::generate(UserId::new());
        let bob = MessagingIdentity::generate(UserId::new());
        let mut row = sealed_row(&alice, &bob, "hello");
        row.encryption_version = "v0".to_string();
        // Garbage that would fail decoding if it were ever touched
        row.nonce_for_b = "%%%".to_string();

        assert_eq!(
            row.open_slot(Slot::B, &bob),
            Err(DecryptFailure::VersionMismatch {
                found: "v0".to_string()
            })
        );
    }

    #[test]
    fn test_version_compared_exactly() {
        let alice = MessagingIdentity::generate(UserId::new());
        let bob = MessagingIdentity::generate(UserId::new());
        let mut row = sealed_row(&alice, &bob, "hello");
        row.encryption_version = "v1.0".to_string();
        assert!(!row.is_current_version());
        assert!(row.open_slot(Slot::B, &bob).is_err());
    }

    #[test]
    fn test_bad_encoding_is_a_decrypt_failure() {
        let alice = MessagingIdentity::generate(UserId::new());
        let bob = MessagingIdentity::generate(UserId::new());
        let mut row = sealed_row(&alice, &bob, "hello");
        row.nonce_for_b = wire::encode(&[0u8; 8]);

        assert!(matches!(
            row.open_slot(Slot::B, &bob),
            Err(DecryptFailure::Encoding(WireError::InvalidLength { .. }))
        ));
    }

    #[test]
    fn test_row_json_shape() {
        let alice = MessagingIdentity::generate(UserId::new());
        let bob = MessagingIdentity::generate(UserId::new());
        let row = sealed_row(&alice, &bob, "hello");

        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["encryption_version"], "v1");
        assert_eq!(json["sender_id"], alice.user_id().to_string());

        let back: MessageRow = serde_json::from_value(json).unwrap();
        assert_eq!(back, row);
    }
}
