// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Group membership and per-recipient envelope fan-out.
//!
//! Groups have exactly one owner; owners and admins mutate membership and
//! metadata. Removal is a soft delete so history survives re-adds. A group
//! send carries one end-to-end encrypted envelope per recipient; the
//! server verifies each envelope signature independently, drops envelopes
//! for non-members and the sender itself, and persists/delivers the rest
//! exactly like direct messages.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use whispertypes::codec::OutboundFrame;
use whispertypes::identifiers::{GroupId, WhisperId};
use whispertypes::messages::client_group::{
    GroupAction, GroupCreateParams, GroupEvent, GroupEventKind, GroupRole, GroupSendParams,
    GroupUpdateParams, MAX_GROUP_MEMBERS,
};
use whispertypes::messages::client_message::{MessageAccepted, MessageEnvelope};
use whispertypes::messages::{ClientVersions, MsgType};
use whispertypes::time::MAX_TIMESTAMP_SKEW_MS;

pub mod errors;
pub mod group_record;

use errors::GroupServiceError;
use group_record::{GroupMemberRecord, GroupRecord};

use crate::clock::Clock;
use crate::notifier::ConnectionNotifier;
use crate::router::pending_message::PendingMessageRecord;
use crate::router::MessageRouter;
use crate::store::DurableStore;

pub struct GroupService {
    store: Arc<dyn DurableStore>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn ConnectionNotifier>,
    router: Arc<MessageRouter>,
}

impl GroupService {
    pub fn new(
        store: Arc<dyn DurableStore>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn ConnectionNotifier>,
        router: Arc<MessageRouter>,
    ) -> Self {
        Self {
            store,
            clock,
            notifier,
            router,
        }
    }

    fn check_versions(protocol: u16, crypto: u16) -> Result<(), GroupServiceError> {
        let versions = ClientVersions {
            protocol_version: protocol,
            crypto_version: crypto,
        };
        if !versions.is_supported() {
            return Err(GroupServiceError::VersionMismatch);
        }
        Ok(())
    }

    async fn require_active_account(
        &self,
        id: &WhisperId,
    ) -> Result<(), GroupServiceError> {
        self.store
            .load_account(id)
            .await?
            .filter(|account| account.is_active())
            .map(|_| ())
            .ok_or(GroupServiceError::UnknownAccount)
    }

    /// Create a group with the creator as owner. Returns the `created`
    /// event, which is also fanned out to every initial member.
    #[instrument(skip_all, fields(creator = %creator))]
    pub async fn create(
        &self,
        params: GroupCreateParams,
        creator: &WhisperId,
    ) -> Result<GroupEvent, GroupServiceError> {
        Self::check_versions(params.protocol_version, params.crypto_version)?;
        params.validate()?;
        let now = self.clock.now();

        let mut members = vec![GroupMemberRecord {
            group_id: GroupId::random(),
            whisper_id: creator.clone(),
            role: GroupRole::Owner,
            joined_at: now,
            removed_at: None,
        }];
        let group_id = members[0].group_id.clone();

        for member in &params.members {
            if member == creator || members.iter().any(|m| &m.whisper_id == member) {
                continue;
            }
            self.require_active_account(member).await?;
            members.push(GroupMemberRecord {
                group_id: group_id.clone(),
                whisper_id: member.clone(),
                role: GroupRole::Member,
                joined_at: now,
                removed_at: None,
            });
        }

        let group = GroupRecord {
            group_id,
            title: params.title,
            owner_id: creator.clone(),
            created_at: now,
            updated_at: now,
        };
        self.store.insert_group(&group, &members).await?;
        info!(group_id = %group.group_id, members = members.len(), "group created");

        let event = GroupEvent {
            event: GroupEventKind::Created,
            group: group.info(&members),
            affected_members: None,
        };
        self.fan_out_event(&event, members.iter().map(|m| &m.whisper_id), creator)
            .await;
        Ok(event)
    }

    /// Membership and metadata mutations. Only owners and admins may
    /// mutate; the sole owner can neither be removed nor demoted.
    #[instrument(skip_all, fields(group_id = %params.group_id, actor = %actor))]
    pub async fn update(
        &self,
        params: GroupUpdateParams,
        actor: &WhisperId,
    ) -> Result<GroupEvent, GroupServiceError> {
        Self::check_versions(params.protocol_version, params.crypto_version)?;
        params.validate()?;
        let now = self.clock.now();

        let group = self
            .store
            .load_group(&params.group_id)
            .await?
            .ok_or(GroupServiceError::GroupNotFound)?;
        let acting_member = self
            .store
            .active_member(&params.group_id, actor)
            .await?
            .ok_or(GroupServiceError::NotMember)?;
        if !acting_member.role.can_manage() {
            return Err(GroupServiceError::NotAllowed);
        }

        let (kind, affected, notify_removed) = match &params.action {
            GroupAction::AddMember { member } => {
                self.require_active_account(member).await?;
                let record = GroupMemberRecord {
                    group_id: params.group_id.clone(),
                    whisper_id: member.clone(),
                    role: GroupRole::Member,
                    joined_at: now,
                    removed_at: None,
                };
                self.store
                    .add_member_checked(&record, MAX_GROUP_MEMBERS, now)
                    .await
                    .map_err(|e| match e {
                        crate::errors::StorageError::Constraint("group is full") => {
                            GroupServiceError::GroupFull
                        }
                        crate::errors::StorageError::Constraint("already an active member") => {
                            GroupServiceError::AlreadyMember
                        }
                        other => other.into(),
                    })?;
                (GroupEventKind::MemberAdded, vec![member.clone()], None)
            }
            GroupAction::RemoveMember { member } => {
                if member == &group.owner_id {
                    return Err(GroupServiceError::SoleOwner);
                }
                let removed = self
                    .store
                    .remove_member(&params.group_id, member, now)
                    .await?;
                if !removed {
                    return Err(GroupServiceError::UnknownAccount);
                }
                (
                    GroupEventKind::MemberRemoved,
                    vec![member.clone()],
                    Some(member.clone()),
                )
            }
            GroupAction::ChangeRole { member, role } => {
                // Ownership transfer is not exposed; the owner's role is
                // fixed and nobody else can become owner.
                if member == &group.owner_id || *role == GroupRole::Owner {
                    return Err(GroupServiceError::SoleOwner);
                }
                let changed = self
                    .store
                    .change_member_role(&params.group_id, member, *role, now)
                    .await?;
                if !changed {
                    return Err(GroupServiceError::UnknownAccount);
                }
                (GroupEventKind::Updated, vec![member.clone()], None)
            }
            GroupAction::UpdateTitle { title } => {
                self.store
                    .update_group_title(&params.group_id, title, now)
                    .await?;
                (GroupEventKind::Updated, vec![], None)
            }
        };

        let group = self
            .store
            .load_group(&params.group_id)
            .await?
            .ok_or(GroupServiceError::GroupNotFound)?;
        let members = self.store.active_members(&params.group_id).await?;

        let event = GroupEvent {
            event: kind,
            group: group.info(&members),
            affected_members: (!affected.is_empty()).then_some(affected),
        };

        // Current members plus the member that was just removed.
        let mut targets: Vec<&WhisperId> = members.iter().map(|m| &m.whisper_id).collect();
        if let Some(removed) = &notify_removed {
            targets.push(removed);
        }
        self.fan_out_event(&event, targets.into_iter(), actor).await;
        Ok(event)
    }

    /// Per-recipient envelope fan-out. Envelopes addressed to the sender
    /// or to non-members are dropped; every accepted envelope is persisted
    /// and delivered (or woken) independently. One ack for the whole send.
    #[instrument(skip_all, fields(group_id = %params.group_id, message_id = %params.message_id))]
    pub async fn send(
        &self,
        params: GroupSendParams,
        sender: &WhisperId,
    ) -> Result<MessageAccepted, GroupServiceError> {
        Self::check_versions(params.protocol_version, params.crypto_version)?;
        params.validate()?;

        if &params.from != sender {
            return Err(GroupServiceError::SenderMismatch);
        }

        let now = self.clock.now();
        if !params.timestamp.is_within_skew_of(&now, MAX_TIMESTAMP_SKEW_MS) {
            return Err(GroupServiceError::TimestampSkew);
        }

        self.store
            .active_member(&params.group_id, sender)
            .await?
            .ok_or(GroupServiceError::NotMember)?;

        let sender_account = self
            .store
            .load_account(sender)
            .await?
            .ok_or(GroupServiceError::SenderMismatch)?;

        let members = self.store.active_members(&params.group_id).await?;
        let mut accepted = Vec::new();
        let mut dropped = 0usize;
        for envelope in &params.recipients {
            if &envelope.to == sender {
                dropped += 1;
                continue;
            }
            if !members.iter().any(|m| m.whisper_id == envelope.to) {
                dropped += 1;
                continue;
            }
            // Every envelope is signed over its own canonical string with
            // the recipient (not the group) in the address slot.
            params
                .canonical(envelope)
                .verify(&sender_account.sign_public_key, &envelope.sig)
                .map_err(|_| GroupServiceError::BadSignature)?;
            accepted.push(envelope);
        }
        if dropped > 0 {
            warn!(dropped, "dropped self or non-member envelopes");
        }

        let ack = MessageAccepted::sent(params.message_id);
        for envelope in accepted {
            let record = PendingMessageRecord {
                envelope: MessageEnvelope {
                    message_id: params.message_id,
                    from: params.from.clone(),
                    to: envelope.to.clone(),
                    group_id: Some(params.group_id.clone()),
                    msg_type: params.msg_type.clone(),
                    timestamp: params.timestamp,
                    nonce: envelope.nonce.clone(),
                    ciphertext: envelope.ciphertext.clone(),
                    sig: envelope.sig.clone(),
                    reply_to: params.reply_to,
                    reactions: params.reactions.clone(),
                    attachment: params.attachment.clone(),
                },
                received_at: now,
                created_at: now,
                delivered_at: None,
            };
            match self.store.insert_pending(&record).await {
                Ok(()) => {}
                Err(crate::errors::StorageError::Constraint(_)) => {
                    info!(to = %record.envelope.to, "duplicate envelope, skipping");
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
            self.store.note_contact(sender, &record.envelope.to, now).await?;
            self.router.deliver_or_wake(record).await?;
        }

        Ok(ack)
    }

    async fn fan_out_event<'a>(
        &self,
        event: &GroupEvent,
        targets: impl Iterator<Item = &'a WhisperId>,
        actor: &WhisperId,
    ) {
        let frame = OutboundFrame::new(MsgType::GroupEvent, event);
        for target in targets {
            // The actor gets the event as the direct response instead.
            if target == actor {
                continue;
            }
            // Offline members learn the new state on their next fetch;
            // group events are not queued.
            let _ = self.notifier.notify(target, frame.clone()).await;
        }
    }
}
