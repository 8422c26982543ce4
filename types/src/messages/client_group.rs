// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Payloads of the group membership and group fan-out frames.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::crypto::{self, CanonicalEnvelope, SignatureBytes, NONCE_LEN};
use crate::identifiers::{GroupId, MessageId, SessionToken, WhisperId};
use crate::time::TimeStamp;

use super::client_message::{PayloadError, MAX_ATTACHMENT_POINTER_BYTES};

/// Maximum number of active members in a group.
pub const MAX_GROUP_MEMBERS: usize = 256;

pub const MAX_TITLE_CHARS: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupRole {
    Owner,
    Admin,
    Member,
}

impl GroupRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupRole::Owner => "owner",
            GroupRole::Admin => "admin",
            GroupRole::Member => "member",
        }
    }

    /// Owners and admins may mutate membership and metadata.
    pub fn can_manage(&self) -> bool {
        matches!(self, GroupRole::Owner | GroupRole::Admin)
    }
}

impl std::str::FromStr for GroupRole {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "owner" => Ok(GroupRole::Owner),
            "admin" => Ok(GroupRole::Admin),
            "member" => Ok(GroupRole::Member),
            _ => Err(()),
        }
    }
}

pub fn validate_title(title: &str) -> Result<(), PayloadError> {
    let chars = title.chars().count();
    if chars == 0 || chars > MAX_TITLE_CHARS {
        return Err(PayloadError::Title);
    }
    Ok(())
}

/// `group_create`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupCreateParams {
    pub protocol_version: u16,
    pub crypto_version: u16,
    pub session_token: SessionToken,
    pub title: String,
    /// Members added at creation time, in addition to the creator.
    #[serde(default)]
    pub members: Vec<WhisperId>,
}

impl GroupCreateParams {
    pub fn validate(&self) -> Result<(), PayloadError> {
        validate_title(&self.title)?;
        if self.members.len() + 1 > MAX_GROUP_MEMBERS {
            return Err(PayloadError::Recipients);
        }
        Ok(())
    }
}

/// Membership / metadata mutations carried by `group_update`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "action")]
pub enum GroupAction {
    AddMember { member: WhisperId },
    RemoveMember { member: WhisperId },
    ChangeRole { member: WhisperId, role: GroupRole },
    UpdateTitle { title: String },
}

/// `group_update`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupUpdateParams {
    pub protocol_version: u16,
    pub crypto_version: u16,
    pub session_token: SessionToken,
    pub group_id: GroupId,
    #[serde(flatten)]
    pub action: GroupAction,
}

impl GroupUpdateParams {
    pub fn validate(&self) -> Result<(), PayloadError> {
        if let GroupAction::UpdateTitle { title } = &self.action {
            validate_title(title)?;
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupEventKind {
    Created,
    Updated,
    MemberAdded,
    MemberRemoved,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMemberInfo {
    pub whisper_id: WhisperId,
    pub role: GroupRole,
    pub joined_at: TimeStamp,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupInfo {
    pub group_id: GroupId,
    pub title: String,
    pub owner_id: WhisperId,
    pub created_at: TimeStamp,
    pub updated_at: TimeStamp,
    pub members: Vec<GroupMemberInfo>,
}

/// `group_event`, fanned out to current (and newly removed) members.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupEvent {
    pub event: GroupEventKind,
    pub group: GroupInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affected_members: Option<Vec<WhisperId>>,
}

/// One per-recipient envelope inside `group_send_message`. The signature
/// binds the canonical string with `toOrGroupId = to`, not the group id.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipientEnvelope {
    pub to: WhisperId,
    pub nonce: String,
    pub ciphertext: String,
    pub sig: SignatureBytes,
}

impl RecipientEnvelope {
    pub fn validate(&self) -> Result<(), PayloadError> {
        if crypto::decode_exact(&self.nonce, NONCE_LEN).is_err() {
            return Err(PayloadError::Nonce);
        }
        if crypto::decode_base64(&self.ciphertext).is_err() {
            return Err(PayloadError::Ciphertext);
        }
        Ok(())
    }
}

/// `group_send_message`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSendParams {
    pub protocol_version: u16,
    pub crypto_version: u16,
    pub session_token: SessionToken,
    pub group_id: GroupId,
    pub message_id: MessageId,
    pub from: WhisperId,
    pub msg_type: String,
    pub timestamp: TimeStamp,
    pub recipients: Vec<RecipientEnvelope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<MessageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reactions: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Value>,
}

impl GroupSendParams {
    pub fn validate(&self) -> Result<(), PayloadError> {
        if self.msg_type.is_empty() || self.msg_type.len() > 64 {
            return Err(PayloadError::MsgType);
        }
        if self.recipients.is_empty() || self.recipients.len() > MAX_GROUP_MEMBERS {
            return Err(PayloadError::Recipients);
        }
        for envelope in &self.recipients {
            envelope.validate()?;
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

    /// Canonical string for one of the envelopes.
    pub fn canonical<'a>(&'a self, envelope: &'a RecipientEnvelope) -> CanonicalEnvelope<'a> {
        CanonicalEnvelope {
            message_type: &self.msg_type,
            message_id: self.message_id.to_string(),
            from: self.from.as_str(),
            to_or_group_id: envelope.to.as_str(),
            timestamp: self.timestamp,
            nonce_b64: &envelope.nonce,
            ciphertext_b64: &envelope.ciphertext,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_action_wire_format() {
        let action = GroupAction::ChangeRole {
            member: WhisperId::derive_from_key(&[5u8; 32]),
            role: GroupRole::Admin,
        };
        let value = serde_json::to_value(&action).unwrap();
        assert_eq!(value["action"], "change_role");
        assert_eq!(value["role"], "admin");
        let back: GroupAction = serde_json::from_value(value).unwrap();
        assert_eq!(back, action);
    }

    #[test]
    fn title_bounds() {
        assert!(validate_title("a").is_ok());
        assert!(validate_title(&"x".repeat(MAX_TITLE_CHARS)).is_ok());
        assert!(validate_title("").is_err());
        assert!(validate_title(&"x".repeat(MAX_TITLE_CHARS + 1)).is_err());
    }

    #[test]
    fn role_permissions() {
        assert!(GroupRole::Owner.can_manage());
        assert!(GroupRole::Admin.can_manage());
        assert!(!GroupRole::Member.can_manage());
    }
}
