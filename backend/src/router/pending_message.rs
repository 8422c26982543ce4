// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use whispertypes::identifiers::{MessageId, WhisperId};
use whispertypes::messages::client_message::MessageEnvelope;
use whispertypes::time::TimeStamp;

/// Undelivered messages are dropped after this many days.
pub const PENDING_RETENTION_DAYS: i64 = 30;

/// A persisted offline message. The envelope is stored verbatim; the
/// server adds its own receive stamp for tie-breaking and retention.
#[derive(Clone, Debug)]
pub struct PendingMessageRecord {
    pub envelope: MessageEnvelope,
    /// Server-assigned, monotonic within the recipient's queue.
    pub received_at: TimeStamp,
    pub created_at: TimeStamp,
    /// Set once written to a live connection; cleared rows await a
    /// `delivery_receipt` before deletion.
    pub delivered_at: Option<TimeStamp>,
}

impl PendingMessageRecord {
    pub fn recipient(&self) -> &WhisperId {
        &self.envelope.to
    }

    pub fn sender(&self) -> &WhisperId {
        &self.envelope.from
    }

    pub fn message_id(&self) -> MessageId {
        self.envelope.message_id
    }

    /// Sort key of the recipient queue: `(timestamp, messageId)`.
    pub fn sort_key(&self) -> (i64, String) {
        (
            self.envelope.timestamp.as_millis(),
            self.envelope.message_id.to_string(),
        )
    }
}

/// Opaque pagination cursor: base64 of the last `(timestamp, messageId)`
/// key of the previous page.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingCursor {
    pub timestamp: TimeStamp,
    pub message_id: MessageId,
}

impl PendingCursor {
    pub fn encode(&self) -> String {
        URL_SAFE_NO_PAD.encode(format!(
            "{}:{}",
            self.timestamp.as_millis(),
            self.message_id
        ))
    }

    pub fn decode(cursor: &str) -> Option<Self> {
        let bytes = URL_SAFE_NO_PAD.decode(cursor).ok()?;
        let decoded = String::from_utf8(bytes).ok()?;
        let (millis, id) = decoded.split_once(':')?;
        Some(Self {
            timestamp: TimeStamp::from_millis(millis.parse().ok()?)?,
            message_id: id.parse().ok()?,
        })
    }

    /// Whether a record lies strictly after this cursor.
    pub fn precedes(&self, record: &PendingMessageRecord) -> bool {
        let key = (self.timestamp.as_millis(), self.message_id.to_string());
        record.sort_key() > key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_round_trip() {
        let cursor = PendingCursor {
            timestamp: TimeStamp::from_millis(1_700_000_000_000).unwrap(),
            message_id: MessageId::random(),
        };
        let decoded = PendingCursor::decode(&cursor.encode()).unwrap();
        assert_eq!(decoded, cursor);
    }

    #[test]
    fn garbage_cursors_decode_to_none() {
        assert!(PendingCursor::decode("???").is_none());
        assert!(PendingCursor::decode("bm9jb2xvbg").is_none());
    }
}
