// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Wake-push payloads handed to the vendor providers.
//!
//! A wake payload carries only what the dormant client needs to
//! re-establish its websocket and route the event; never message content
//! or counterparty metadata beyond that.

use serde::{Deserialize, Serialize};

use crate::identifiers::{CallId, WhisperId};
use crate::messages::client_auth::Platform;

/// Hint strings are truncated to this many bytes before dispatch.
pub const MAX_HINT_BYTES: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WakeReason {
    Message,
    Call,
    System,
}

impl WakeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            WakeReason::Message => "message",
            WakeReason::Call => "call",
            WakeReason::System => "system",
        }
    }
}

/// Which vendor channel a wake travels over.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushChannel {
    Fcm,
    Apns,
    /// iOS VoIP pushes for incoming calls.
    ApnsVoip,
}

/// A registered push target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PushTarget {
    pub platform: Platform,
    pub push_token: Option<String>,
    pub voip_token: Option<String>,
}

impl PushTarget {
    /// Channel selection: VoIP for call wakes on iOS when a voip token is
    /// registered, the platform default otherwise.
    pub fn channel_for(&self, reason: WakeReason) -> Option<(PushChannel, &str)> {
        if reason == WakeReason::Call && self.platform == Platform::Ios {
            if let Some(voip) = self.voip_token.as_deref() {
                return Some((PushChannel::ApnsVoip, voip));
            }
        }
        let token = self.push_token.as_deref()?;
        match self.platform {
            Platform::Android => Some((PushChannel::Fcm, token)),
            Platform::Ios => Some((PushChannel::Apns, token)),
            // Browsers reconnect on their own; no wake channel.
            Platform::Web => None,
        }
    }
}

/// The vendor-agnostic wake payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WakePayload {
    #[serde(rename = "type")]
    pub payload_type: String,
    pub reason: WakeReason,
    pub whisper_id: WhisperId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<CallId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<WhisperId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_video: Option<bool>,
}

impl WakePayload {
    pub fn new(reason: WakeReason, whisper_id: WhisperId) -> Self {
        Self {
            payload_type: "wake".to_owned(),
            reason,
            whisper_id,
            call_id: None,
            from: None,
            caller_name: None,
            is_video: None,
        }
    }

    pub fn with_call(
        mut self,
        call_id: CallId,
        from: WhisperId,
        caller_name: Option<String>,
        is_video: bool,
    ) -> Self {
        self.call_id = Some(call_id);
        self.from = Some(from);
        self.caller_name = caller_name.map(|name| truncate_hint(&name));
        self.is_video = Some(is_video);
        self
    }
}

/// Truncate a hint to [`MAX_HINT_BYTES`] on a char boundary.
pub fn truncate_hint(hint: &str) -> String {
    if hint.len() <= MAX_HINT_BYTES {
        return hint.to_owned();
    }
    let mut end = MAX_HINT_BYTES;
    while !hint.is_char_boundary(end) {
        end -= 1;
    }
    hint[..end].to_owned()
}
