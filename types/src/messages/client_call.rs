// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Payloads of the call signaling frames.
//!
//! Call SDP offers/answers and ICE candidates travel end-to-end encrypted
//! in `nonce`/`ciphertext`; the server verifies the actor's signature and
//! relays. In the canonical signing string the `messageId` slot carries
//! the `callId`.

use serde::{Deserialize, Serialize};

use crate::crypto::{self, CanonicalEnvelope, SignatureBytes, NONCE_LEN};
use crate::identifiers::{CallId, SessionToken, WhisperId};
use crate::messages::MsgType;
use crate::time::TimeStamp;

use super::client_message::PayloadError;

/// Reasons a call can end with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallEndReason {
    Ended,
    Declined,
    Busy,
    Timeout,
    Failed,
    Cancelled,
}

impl CallEndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallEndReason::Ended => "ended",
            CallEndReason::Declined => "declined",
            CallEndReason::Busy => "busy",
            CallEndReason::Timeout => "timeout",
            CallEndReason::Failed => "failed",
            CallEndReason::Cancelled => "cancelled",
        }
    }
}

/// Inbound body shared by all signed call frames (`call_initiate`,
/// `call_ringing`, `call_answer`, `call_ice_candidate`, `call_end`).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSignalParams {
    pub protocol_version: u16,
    pub crypto_version: u16,
    pub session_token: SessionToken,
    pub call_id: CallId,
    pub from: WhisperId,
    pub to: WhisperId,
    /// Present on `call_initiate` only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_video: Option<bool>,
    /// Present on `call_end` only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<CallEndReason>,
    pub timestamp: TimeStamp,
    pub nonce: String,
    pub ciphertext: String,
    pub sig: SignatureBytes,
}

impl CallSignalParams {
    pub fn validate(&self, frame_type: MsgType) -> Result<(), PayloadError> {
        if crypto::decode_exact(&self.nonce, NONCE_LEN).is_err() {
            return Err(PayloadError::Nonce);
        }
        if crypto::decode_base64(&self.ciphertext).is_err() {
            return Err(PayloadError::Ciphertext);
        }
        match frame_type {
            MsgType::CallInitiate if self.is_video.is_none() => Err(PayloadError::MsgType),
            MsgType::CallEnd if self.reason.is_none() => Err(PayloadError::MsgType),
            _ => Ok(()),
        }
    }

    /// The canonical string bound by `sig` for the given frame type.
    pub fn canonical(&self, frame_type: MsgType) -> CanonicalEnvelope<'_> {
        CanonicalEnvelope {
            message_type: frame_type.as_str(),
            message_id: self.call_id.to_string(),
            from: self.from.as_str(),
            to_or_group_id: self.to.as_str(),
            timestamp: self.timestamp,
            nonce_b64: &self.nonce,
            ciphertext_b64: &self.ciphertext,
        }
    }

    /// Strip transport fields for relay to the peer.
    pub fn relay_body(&self) -> CallSignalBody {
        CallSignalBody {
            call_id: self.call_id.clone(),
            from: self.from.clone(),
            to: self.to.clone(),
            is_video: self.is_video,
            reason: self.reason,
            timestamp: self.timestamp,
            nonce: self.nonce.clone(),
            ciphertext: self.ciphertext.clone(),
            sig: self.sig.clone(),
        }
    }
}

/// Outbound body relayed to the peer (`call_incoming`, `call_ringing`,
/// `call_answer`, `call_ice_candidate`, `call_end`).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSignalBody {
    pub call_id: CallId,
    pub from: WhisperId,
    pub to: WhisperId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_video: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<CallEndReason>,
    pub timestamp: TimeStamp,
    pub nonce: String,
    pub ciphertext: String,
    pub sig: SignatureBytes,
}

/// Server-synthesized `call_end` (timeouts). Carries no signature; `from`
/// is the literal string `server`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallEndNotice {
    pub call_id: CallId,
    pub from: String,
    pub reason: CallEndReason,
    pub timestamp: TimeStamp,
}

impl CallEndNotice {
    pub fn timeout(call_id: CallId, timestamp: TimeStamp) -> Self {
        Self {
            call_id,
            from: "server".to_owned(),
            reason: CallEndReason::Timeout,
            timestamp,
        }
    }
}

/// `get_turn_credentials`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetTurnCredentialsParams {
    pub protocol_version: u16,
    pub crypto_version: u16,
    pub session_token: SessionToken,
}

/// `turn_credentials` response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnCredentials {
    pub urls: Vec<String>,
    pub username: String,
    pub credential: String,
    pub ttl: u32,
}

#[cfg(test)]
mod tests {
    use crate::crypto::encode_base64;

    use super::*;

    fn params() -> CallSignalParams {
        CallSignalParams {
            protocol_version: 1,
            crypto_version: 1,
            session_token: SessionToken::new("tok".into()),
            call_id: CallId::from("k1"),
            from: WhisperId::derive_from_key(&[1u8; 32]),
            to: WhisperId::derive_from_key(&[2u8; 32]),
            is_video: Some(false),
            reason: None,
            timestamp: TimeStamp::from_millis(1_700_000_000_000).unwrap(),
            nonce: encode_base64(&[0u8; NONCE_LEN]),
            ciphertext: encode_base64(b"sdp"),
            sig: SignatureBytes::from_bytes([0u8; 64]),
        }
    }

    #[test]
    fn initiate_requires_is_video() {
        let mut p = params();
        assert!(p.validate(MsgType::CallInitiate).is_ok());
        p.is_video = None;
        assert!(p.validate(MsgType::CallInitiate).is_err());
        // But a ringing frame does not need it.
        assert!(p.validate(MsgType::CallRinging).is_ok());
    }

    #[test]
    fn end_requires_reason() {
        let mut p = params();
        assert!(p.validate(MsgType::CallEnd).is_err());
        p.reason = Some(CallEndReason::Declined);
        assert!(p.validate(MsgType::CallEnd).is_ok());
    }

    #[test]
    fn canonical_uses_call_id_and_frame_type() {
        let p = params();
        let s = p.canonical(MsgType::CallInitiate).to_signing_string();
        assert!(s.starts_with("v1\ncall_initiate\nk1\n"));
    }
}
