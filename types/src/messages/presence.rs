// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Presence, typing and application-level keepalive payloads.

use serde::{Deserialize, Serialize};

use crate::identifiers::{GroupId, SessionToken, WhisperId};
use crate::time::TimeStamp;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

/// `presence_update`, emitted to recent contacts on online/offline
/// transitions.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceUpdate {
    pub whisper_id: WhisperId,
    pub status: PresenceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<TimeStamp>,
}

/// `typing`. Either a direct peer or a group is addressed.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingParams {
    pub protocol_version: u16,
    pub crypto_version: u16,
    pub session_token: SessionToken,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<WhisperId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<GroupId>,
}

impl TypingParams {
    /// Exactly one of `to` / `group_id` must be present.
    pub fn is_well_formed(&self) -> bool {
        self.to.is_some() != self.group_id.is_some()
    }
}

/// `typing_notification` relayed to the peer(s).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingNotification {
    pub from: WhisperId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<GroupId>,
}

/// `ping`. The session token is optional: unauthenticated connections may
/// keep alive during registration, presence is only refreshed when bound.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token: Option<SessionToken>,
}

/// `pong`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pong {
    pub server_time: TimeStamp,
}
