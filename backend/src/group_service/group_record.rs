// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use whispertypes::identifiers::{GroupId, WhisperId};
use whispertypes::messages::client_group::{GroupInfo, GroupMemberInfo, GroupRole};
use whispertypes::time::TimeStamp;

#[derive(Clone, Debug)]
#[cfg_attr(test, derive(PartialEq))]
pub struct GroupRecord {
    pub group_id: GroupId,
    pub title: String,
    pub owner_id: WhisperId,
    pub created_at: TimeStamp,
    pub updated_at: TimeStamp,
}

/// One membership row. Removal is a soft delete; re-adding creates a new
/// row so history is preserved. A member is active iff `removed_at` is
/// null.
#[derive(Clone, Debug)]
#[cfg_attr(test, derive(PartialEq))]
pub struct GroupMemberRecord {
    pub group_id: GroupId,
    pub whisper_id: WhisperId,
    pub role: GroupRole,
    pub joined_at: TimeStamp,
    pub removed_at: Option<TimeStamp>,
}

impl GroupMemberRecord {
    pub fn is_active(&self) -> bool {
        self.removed_at.is_none()
    }

    pub fn info(&self) -> GroupMemberInfo {
        GroupMemberInfo {
            whisper_id: self.whisper_id.clone(),
            role: self.role,
            joined_at: self.joined_at,
        }
    }
}

impl GroupRecord {
    pub fn info(&self, members: &[GroupMemberRecord]) -> GroupInfo {
        GroupInfo {
            group_id: self.group_id.clone(),
            title: self.title.clone(),
            owner_id: self.owner_id.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            members: members.iter().map(GroupMemberRecord::info).collect(),
        }
    }
}
