// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Group membership, role checks, event fan-out and per-recipient
//! envelope dispatch.

mod common;

use whisperbackend::clock::Clock;
use whisperbackend::group_service::errors::GroupServiceError;
use whisperbackend::store::DurableStore;
use whispertypes::crypto::encode_base64;
use whispertypes::identifiers::{GroupId, MessageId, WhisperId};
use whispertypes::messages::client_auth::Platform;
use whispertypes::messages::client_group::{
    GroupAction, GroupCreateParams, GroupEventKind, GroupRole, GroupSendParams,
    GroupUpdateParams, RecipientEnvelope, MAX_GROUP_MEMBERS,
};
use whispertypes::messages::MsgType;

use common::{register_user, test_bed, TestBed, User};

async fn create_group(bed: &TestBed, owner: &User, members: &[&User]) -> GroupId {
    let event = bed
        .groups
        .create(
            GroupCreateParams {
                protocol_version: 1,
                crypto_version: 1,
                session_token: owner.session_token.clone(),
                title: "the group".to_owned(),
                members: members.iter().map(|u| u.whisper_id.clone()).collect(),
            },
            &owner.whisper_id,
        )
        .await
        .expect("group create");
    assert_eq!(event.event, GroupEventKind::Created);
    event.group.group_id
}

fn update(
    actor: &User,
    group_id: &GroupId,
    action: GroupAction,
) -> GroupUpdateParams {
    GroupUpdateParams {
        protocol_version: 1,
        crypto_version: 1,
        session_token: actor.session_token.clone(),
        group_id: group_id.clone(),
        action,
    }
}

fn envelope_for(sender: &User, params: &GroupSendParams, to: &WhisperId, body: &str) -> RecipientEnvelope {
    let mut envelope = RecipientEnvelope {
        to: to.clone(),
        nonce: encode_base64(&[3u8; 24]),
        ciphertext: encode_base64(body.as_bytes()),
        sig: whispertypes::crypto::SignatureBytes::from_bytes([0u8; 64]),
    };
    let sig = sender.sign(&params.canonical(&envelope));
    envelope.sig = sig;
    envelope
}

/// Signed group send from `sender` with one envelope per target.
fn group_send(
    bed: &TestBed,
    sender: &User,
    group_id: &GroupId,
    targets: &[&WhisperId],
) -> GroupSendParams {
    let mut params = GroupSendParams {
        protocol_version: 1,
        crypto_version: 1,
        session_token: sender.session_token.clone(),
        group_id: group_id.clone(),
        message_id: MessageId::random(),
        from: sender.whisper_id.clone(),
        msg_type: "text".to_owned(),
        timestamp: bed.clock.now(),
        recipients: Vec::new(),
        reply_to: None,
        reactions: None,
        attachment: None,
    };
    let recipients = targets
        .iter()
        .map(|to| envelope_for(sender, &params, to, "group body"))
        .collect();
    params.recipients = recipients;
    params
}

#[tokio::test]
async fn fan_out_reaches_each_member_once() {
    let bed = test_bed();
    let alice = register_user(&bed, Platform::Android).await;
    let bob = register_user(&bed, Platform::Android).await;
    let carol = register_user(&bed, Platform::Android).await;
    let group_id = create_group(&bed, &alice, &[&bob, &carol]).await;

    bed.notifier.set_online(&bob.whisper_id);
    bed.notifier.set_online(&carol.whisper_id);

    let params = group_send(&bed, &alice, &group_id, &[&bob.whisper_id, &carol.whisper_id]);
    let message_id = params.message_id;
    let accepted = bed.groups.send(params, &alice.whisper_id).await.unwrap();
    assert_eq!(accepted.message_id, message_id);

    for user in [&bob, &carol] {
        let received: Vec<_> = bed
            .notifier
            .frames_for(&user.whisper_id)
            .into_iter()
            .filter(|f| f.frame_type == MsgType::MessageReceived)
            .collect();
        assert_eq!(received.len(), 1);
        let payload = received[0].payload.clone().unwrap();
        assert_eq!(payload["groupId"], group_id.as_str());
        assert_eq!(payload["to"], user.whisper_id.as_str());
    }
}

#[tokio::test]
async fn self_and_non_member_envelopes_are_dropped() {
    let bed = test_bed();
    let alice = register_user(&bed, Platform::Android).await;
    let bob = register_user(&bed, Platform::Android).await;
    let outsider = register_user(&bed, Platform::Android).await;
    let group_id = create_group(&bed, &alice, &[&bob]).await;

    bed.notifier.set_online(&bob.whisper_id);
    bed.notifier.set_online(&outsider.whisper_id);

    let params = group_send(
        &bed,
        &alice,
        &group_id,
        &[&bob.whisper_id, &alice.whisper_id, &outsider.whisper_id],
    );
    bed.groups.send(params, &alice.whisper_id).await.unwrap();

    // Exactly one delivery: to bob.
    assert_eq!(
        bed.notifier
            .frames_for(&bob.whisper_id)
            .iter()
            .filter(|f| f.frame_type == MsgType::MessageReceived)
            .count(),
        1
    );
    assert!(bed
        .notifier
        .frames_for(&outsider.whisper_id)
        .iter()
        .all(|f| f.frame_type != MsgType::MessageReceived));
    assert!(bed
        .notifier
        .frames_for(&alice.whisper_id)
        .iter()
        .all(|f| f.frame_type != MsgType::MessageReceived));
}

#[tokio::test]
async fn non_member_sender_is_rejected() {
    let bed = test_bed();
    let alice = register_user(&bed, Platform::Android).await;
    let bob = register_user(&bed, Platform::Android).await;
    let outsider = register_user(&bed, Platform::Android).await;
    let group_id = create_group(&bed, &alice, &[&bob]).await;

    let params = group_send(&bed, &outsider, &group_id, &[&bob.whisper_id]);
    assert!(matches!(
        bed.groups.send(params, &outsider.whisper_id).await.unwrap_err(),
        GroupServiceError::NotMember
    ));
}

#[tokio::test]
async fn membership_permissions() {
    let bed = test_bed();
    let owner = register_user(&bed, Platform::Android).await;
    let member = register_user(&bed, Platform::Android).await;
    let newcomer = register_user(&bed, Platform::Android).await;
    let group_id = create_group(&bed, &owner, &[&member]).await;

    // A plain member may not add.
    let err = bed
        .groups
        .update(
            update(&member, &group_id, GroupAction::AddMember {
                member: newcomer.whisper_id.clone(),
            }),
            &member.whisper_id,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, GroupServiceError::NotAllowed));

    // Promote the member to admin; now the add succeeds.
    bed.groups
        .update(
            update(&owner, &group_id, GroupAction::ChangeRole {
                member: member.whisper_id.clone(),
                role: GroupRole::Admin,
            }),
            &owner.whisper_id,
        )
        .await
        .unwrap();
    let event = bed
        .groups
        .update(
            update(&member, &group_id, GroupAction::AddMember {
                member: newcomer.whisper_id.clone(),
            }),
            &member.whisper_id,
        )
        .await
        .unwrap();
    assert_eq!(event.event, GroupEventKind::MemberAdded);
    assert_eq!(event.group.members.len(), 3);
}

#[tokio::test]
async fn sole_owner_cannot_be_removed_or_demoted() {
    let bed = test_bed();
    let owner = register_user(&bed, Platform::Android).await;
    let admin = register_user(&bed, Platform::Android).await;
    let group_id = create_group(&bed, &owner, &[&admin]).await;
    bed.groups
        .update(
            update(&owner, &group_id, GroupAction::ChangeRole {
                member: admin.whisper_id.clone(),
                role: GroupRole::Admin,
            }),
            &owner.whisper_id,
        )
        .await
        .unwrap();

    for action in [
        GroupAction::RemoveMember {
            member: owner.whisper_id.clone(),
        },
        GroupAction::ChangeRole {
            member: owner.whisper_id.clone(),
            role: GroupRole::Member,
        },
        // Promoting someone else to owner is ownership transfer.
        GroupAction::ChangeRole {
            member: admin.whisper_id.clone(),
            role: GroupRole::Owner,
        },
    ] {
        let err = bed
            .groups
            .update(update(&admin, &group_id, action), &admin.whisper_id)
            .await
            .unwrap_err();
        assert!(matches!(err, GroupServiceError::SoleOwner));
    }
}

#[tokio::test]
async fn removed_member_gets_the_event_and_loses_access() {
    let bed = test_bed();
    let owner = register_user(&bed, Platform::Android).await;
    let member = register_user(&bed, Platform::Android).await;
    let group_id = create_group(&bed, &owner, &[&member]).await;
    bed.notifier.set_online(&member.whisper_id);

    let event = bed
        .groups
        .update(
            update(&owner, &group_id, GroupAction::RemoveMember {
                member: member.whisper_id.clone(),
            }),
            &owner.whisper_id,
        )
        .await
        .unwrap();
    assert_eq!(event.event, GroupEventKind::MemberRemoved);

    // The removed member was notified even though they are out.
    assert!(bed
        .notifier
        .frames_for(&member.whisper_id)
        .iter()
        .any(|f| f.frame_type == MsgType::GroupEvent));

    // And can no longer send.
    let params = group_send(&bed, &member, &group_id, &[&owner.whisper_id]);
    assert!(matches!(
        bed.groups.send(params, &member.whisper_id).await.unwrap_err(),
        GroupServiceError::NotMember
    ));
}

#[tokio::test]
async fn title_update_emits_updated_event() {
    let bed = test_bed();
    let owner = register_user(&bed, Platform::Android).await;
    let member = register_user(&bed, Platform::Android).await;
    let group_id = create_group(&bed, &owner, &[&member]).await;
    bed.notifier.set_online(&member.whisper_id);

    let event = bed
        .groups
        .update(
            update(&owner, &group_id, GroupAction::UpdateTitle {
                title: "renamed".to_owned(),
            }),
            &owner.whisper_id,
        )
        .await
        .unwrap();
    assert_eq!(event.event, GroupEventKind::Updated);
    assert_eq!(event.group.title, "renamed");

    // Members hear about the rename.
    assert!(bed
        .notifier
        .frames_for(&member.whisper_id)
        .iter()
        .any(|f| f.frame_type == MsgType::GroupEvent));
}

#[tokio::test]
async fn member_cap_boundary() {
    let bed = test_bed();
    let owner = register_user(&bed, Platform::Android).await;
    let group_id = create_group(&bed, &owner, &[]).await;

    // Fill the group up to exactly the cap. Members beyond the owner are
    // provisioned directly in the store to keep the test fast.
    for i in 1..MAX_GROUP_MEMBERS {
        use sha2::Digest;
        let key: [u8; 32] = sha2::Sha256::digest((i as u64).to_be_bytes()).into();
        let whisper_id = WhisperId::derive_from_key(&key);
        seed_account(&bed, &whisper_id).await;
        bed.groups
            .update(
                update(&owner, &group_id, GroupAction::AddMember {
                    member: whisper_id,
                }),
                &owner.whisper_id,
            )
            .await
            .unwrap_or_else(|e| panic!("add {i} failed: {e}"));
    }

    // The 257th active member is rejected.
    let overflow = {
        use sha2::Digest;
        let key: [u8; 32] = sha2::Sha256::digest(u64::MAX.to_be_bytes()).into();
        WhisperId::derive_from_key(&key)
    };
    seed_account(&bed, &overflow).await;
    let err = bed
        .groups
        .update(
            update(&owner, &group_id, GroupAction::AddMember { member: overflow }),
            &owner.whisper_id,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, GroupServiceError::GroupFull));
}

async fn seed_account(bed: &TestBed, whisper_id: &WhisperId) {
    use whisperbackend::auth_service::account_record::{AccountRecord, AccountStatus};
    use whispertypes::crypto::{EncPublicKey, SignPublicKey};

    let mut key = [0u8; 32];
    let bytes = whisper_id.as_str().as_bytes();
    for (i, b) in key.iter_mut().enumerate() {
        *b = bytes[i % bytes.len()];
    }
    bed.store
        .insert_account(&AccountRecord {
            whisper_id: whisper_id.clone(),
            enc_public_key: EncPublicKey::from_bytes(key),
            sign_public_key: SignPublicKey::from_bytes(key),
            created_at: bed.clock.now(),
            status: AccountStatus::Active,
        })
        .await
        .expect("seed account");
}
