// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Typed payloads of the wire protocol, grouped by service domain.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub mod client_auth;
pub mod client_call;
pub mod client_group;
pub mod client_message;
pub mod presence;
pub mod push_token;

/// The exhaustive set of frame types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MsgType {
    RegisterBegin,
    RegisterChallenge,
    RegisterProof,
    RegisterAck,
    SessionRefresh,
    SessionRefreshAck,
    Logout,
    UpdateTokens,
    TokensUpdated,
    SendMessage,
    MessageAccepted,
    MessageReceived,
    DeliveryReceipt,
    MessageDelivered,
    FetchPending,
    PendingMessages,
    GroupCreate,
    GroupUpdate,
    GroupEvent,
    GroupSendMessage,
    GetTurnCredentials,
    TurnCredentials,
    CallInitiate,
    CallIncoming,
    CallRinging,
    CallAnswer,
    CallIceCandidate,
    CallEnd,
    PresenceUpdate,
    Typing,
    TypingNotification,
    Ping,
    Pong,
    Error,
    ForceLogout,
}

impl MsgType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MsgType::RegisterBegin => "register_begin",
            MsgType::RegisterChallenge => "register_challenge",
            MsgType::RegisterProof => "register_proof",
            MsgType::RegisterAck => "register_ack",
            MsgType::SessionRefresh => "session_refresh",
            MsgType::SessionRefreshAck => "session_refresh_ack",
            MsgType::Logout => "logout",
            MsgType::UpdateTokens => "update_tokens",
            MsgType::TokensUpdated => "tokens_updated",
            MsgType::SendMessage => "send_message",
            MsgType::MessageAccepted => "message_accepted",
            MsgType::MessageReceived => "message_received",
            MsgType::DeliveryReceipt => "delivery_receipt",
            MsgType::MessageDelivered => "message_delivered",
            MsgType::FetchPending => "fetch_pending",
            MsgType::PendingMessages => "pending_messages",
            MsgType::GroupCreate => "group_create",
            MsgType::GroupUpdate => "group_update",
            MsgType::GroupEvent => "group_event",
            MsgType::GroupSendMessage => "group_send_message",
            MsgType::GetTurnCredentials => "get_turn_credentials",
            MsgType::TurnCredentials => "turn_credentials",
            MsgType::CallInitiate => "call_initiate",
            MsgType::CallIncoming => "call_incoming",
            MsgType::CallRinging => "call_ringing",
            MsgType::CallAnswer => "call_answer",
            MsgType::CallIceCandidate => "call_ice_candidate",
            MsgType::CallEnd => "call_end",
            MsgType::PresenceUpdate => "presence_update",
            MsgType::Typing => "typing",
            MsgType::TypingNotification => "typing_notification",
            MsgType::Ping => "ping",
            MsgType::Pong => "pong",
            MsgType::Error => "error",
            MsgType::ForceLogout => "force_logout",
        }
    }

    /// Frame types a client is allowed to send.
    pub fn is_client_to_server(&self) -> bool {
        matches!(
            self,
            MsgType::RegisterBegin
                | MsgType::RegisterProof
                | MsgType::SessionRefresh
                | MsgType::Logout
                | MsgType::UpdateTokens
                | MsgType::SendMessage
                | MsgType::DeliveryReceipt
                | MsgType::FetchPending
                | MsgType::GroupCreate
                | MsgType::GroupUpdate
                | MsgType::GroupSendMessage
                | MsgType::GetTurnCredentials
                | MsgType::CallInitiate
                | MsgType::CallRinging
                | MsgType::CallAnswer
                | MsgType::CallIceCandidate
                | MsgType::CallEnd
                | MsgType::Typing
                | MsgType::Ping
        )
    }

    /// Whether the auth gate must resolve `payload.sessionToken` to a live
    /// session before the handler runs.
    pub fn requires_auth(&self) -> bool {
        self.is_client_to_server()
            && !matches!(
                self,
                MsgType::RegisterBegin | MsgType::RegisterProof | MsgType::Ping
            )
    }

    /// Rate-limit class this frame type is accounted under.
    pub fn rate_class(&self) -> RateClass {
        match self {
            MsgType::RegisterBegin | MsgType::RegisterProof => RateClass::Register,
            MsgType::SendMessage | MsgType::GroupSendMessage => RateClass::Messaging,
            MsgType::DeliveryReceipt | MsgType::FetchPending => RateClass::Receipts,
            MsgType::GetTurnCredentials
            | MsgType::CallInitiate
            | MsgType::CallRinging
            | MsgType::CallAnswer
            | MsgType::CallIceCandidate
            | MsgType::CallEnd => RateClass::Calls,
            MsgType::Typing | MsgType::Ping => RateClass::Light,
            _ => RateClass::Control,
        }
    }
}

impl FromStr for MsgType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_owned())).map_err(|_| ())
    }
}

impl std::fmt::Display for MsgType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Buckets of the rate limiter. `Connect` is accounted on the socket
/// upgrade, before any frame exists.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RateClass {
    Connect,
    Register,
    Messaging,
    Receipts,
    Calls,
    Light,
    Control,
}

impl RateClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateClass::Connect => "ws_connect",
            RateClass::Register => "register",
            RateClass::Messaging => "messaging",
            RateClass::Receipts => "receipts",
            RateClass::Calls => "calls",
            RateClass::Light => "light",
            RateClass::Control => "control",
        }
    }
}

/// Fields common to every authenticated client frame.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientVersions {
    pub protocol_version: u16,
    pub crypto_version: u16,
}

impl ClientVersions {
    pub fn current() -> Self {
        Self {
            protocol_version: crate::PROTOCOL_VERSION,
            crypto_version: crate::CRYPTO_VERSION,
        }
    }

    pub fn is_supported(&self) -> bool {
        self.protocol_version == crate::PROTOCOL_VERSION
            && self.crypto_version == crate::CRYPTO_VERSION
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_round_trip() {
        for (s, t) in [
            ("register_begin", MsgType::RegisterBegin),
            ("group_send_message", MsgType::GroupSendMessage),
            ("call_ice_candidate", MsgType::CallIceCandidate),
            ("force_logout", MsgType::ForceLogout),
        ] {
            assert_eq!(s.parse::<MsgType>().unwrap(), t);
            assert_eq!(t.as_str(), s);
        }
    }

    #[test]
    fn auth_classification() {
        assert!(!MsgType::RegisterBegin.requires_auth());
        assert!(!MsgType::RegisterProof.requires_auth());
        assert!(!MsgType::Ping.requires_auth());
        assert!(MsgType::SendMessage.requires_auth());
        assert!(MsgType::SessionRefresh.requires_auth());
        // Server-to-client frames are never accepted inbound.
        assert!(!MsgType::MessageReceived.is_client_to_server());
        assert!(!MsgType::Error.is_client_to_server());
    }
}
