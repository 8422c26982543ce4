// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Payloads of the direct-messaging frames.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::crypto::{self, CanonicalEnvelope, SignatureBytes, NONCE_LEN};
use crate::identifiers::{GroupId, MessageId, SessionToken, WhisperId};
use crate::time::TimeStamp;

/// Upper bound on a serialized attachment pointer (the pointer, not the
/// blob), in bytes.
pub const MAX_ATTACHMENT_POINTER_BYTES: usize = 65_536;

/// Upper bound on `fetch_pending.limit`.
pub const MAX_FETCH_LIMIT: u32 = 100;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("nonce is not base64 of {NONCE_LEN} bytes")]
    Nonce,
    #[error("ciphertext is not strict base64")]
    Ciphertext,
    #[error("msgType is empty or too long")]
    MsgType,
    #[error("attachment pointer exceeds {MAX_ATTACHMENT_POINTER_BYTES} bytes")]
    AttachmentTooLarge,
    #[error("limit exceeds {MAX_FETCH_LIMIT}")]
    LimitTooLarge,
    #[error("recipients list is empty or too large")]
    Recipients,
    #[error("title must be 1 to 64 characters")]
    Title,
}

/// The end-to-end encrypted message envelope: everything the server
/// persists and relays verbatim. Also the body of `message_received`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEnvelope {
    pub message_id: MessageId,
    pub from: WhisperId,
    pub to: WhisperId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<GroupId>,
    pub msg_type: String,
    pub timestamp: TimeStamp,
    /// base64 of the 24-byte nonce.
    pub nonce: String,
    /// base64 ciphertext; the server never opens it.
    pub ciphertext: String,
    pub sig: SignatureBytes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<MessageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reactions: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Value>,
}

impl MessageEnvelope {
    pub fn validate(&self) -> Result<(), PayloadError> {
        if crypto::decode_exact(&self.nonce, NONCE_LEN).is_err() {
            return Err(PayloadError::Nonce);
        }
        if crypto::decode_base64(&self.ciphertext).is_err() {
            return Err(PayloadError::Ciphertext);
        }
        if self.msg_type.is_empty() || self.msg_type.len() > 64 {
            return Err(PayloadError::MsgType);
        }
        if let Some(attachment) = &self.attachment {
            let serialized =
                serde_json::to_vec(attachment).map_err(|_| PayloadError::AttachmentTooLarge)?;
            if serialized.len() > MAX_ATTACHMENT_POINTER_BYTES {
                return Err(PayloadError::AttachmentTooLarge);
            }
        }
        Ok(())
    }

    /// The canonical string this envelope's signature binds. For direct
    /// messages `toOrGroupId` is always the recipient.
    pub fn canonical(&self) -> CanonicalEnvelope<'_> {
        CanonicalEnvelope {
            message_type: &self.msg_type,
            message_id: self.message_id.to_string(),
            from: self.from.as_str(),
            to_or_group_id: self.to.as_str(),
            timestamp: self.timestamp,
            nonce_b64: &self.nonce,
            ciphertext_b64: &self.ciphertext,
        }
    }
}

/// `send_message`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageParams {
    pub protocol_version: u16,
    pub crypto_version: u16,
    pub session_token: SessionToken,
    #[serde(flatten)]
    pub message: MessageEnvelope,
}

/// `message_accepted` ack to the sender.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageAccepted {
    pub message_id: MessageId,
    pub status: String,
}

impl MessageAccepted {
    pub fn sent(message_id: MessageId) -> Self {
        Self {
            message_id,
            status: "sent".to_owned(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptStatus {
    Delivered,
    Read,
}

/// `delivery_receipt`. `from` is the party issuing the receipt, `to` the
/// original sender.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReceiptParams {
    pub protocol_version: u16,
    pub crypto_version: u16,
    pub session_token: SessionToken,
    pub message_id: MessageId,
    pub from: WhisperId,
    pub to: WhisperId,
    pub status: ReceiptStatus,
    pub timestamp: TimeStamp,
}

/// `message_delivered`, forwarded to the original sender.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDelivered {
    pub message_id: MessageId,
    pub status: ReceiptStatus,
    pub timestamp: TimeStamp,
}

/// `fetch_pending`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchPendingParams {
    pub protocol_version: u16,
    pub crypto_version: u16,
    pub session_token: SessionToken,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

impl FetchPendingParams {
    pub fn validate(&self) -> Result<(), PayloadError> {
        match self.limit {
            Some(limit) if limit > MAX_FETCH_LIMIT => Err(PayloadError::LimitTooLarge),
            _ => Ok(()),
        }
    }

    pub fn effective_limit(&self) -> u32 {
        self.limit.unwrap_or(MAX_FETCH_LIMIT).min(MAX_FETCH_LIMIT)
    }
}

/// `pending_messages` page.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingMessagesPage {
    pub messages: Vec<MessageEnvelope>,
    pub next_cursor: Option<String>,
}
