// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Call signaling: the state machine, timeout behavior, relay framing and
//! TURN credential minting.

mod common;

use whisperbackend::call_service::errors::CallServiceError;
use whisperbackend::clock::Clock;
use whisperbackend::store::VolatileStore;
use whispertypes::crypto::encode_base64;
use whispertypes::identifiers::CallId;
use whispertypes::messages::client_auth::Platform;
use whispertypes::messages::client_call::{CallEndReason, CallSignalParams};
use whispertypes::messages::push_token::WakeReason;
use whispertypes::messages::MsgType;

use common::{register_user, test_bed, TestBed, User};

fn signal(
    bed: &TestBed,
    frame_type: MsgType,
    actor: &User,
    peer: &User,
    call_id: &str,
) -> CallSignalParams {
    let mut params = CallSignalParams {
        protocol_version: 1,
        crypto_version: 1,
        session_token: actor.session_token.clone(),
        call_id: CallId::from(call_id),
        from: actor.whisper_id.clone(),
        to: peer.whisper_id.clone(),
        is_video: matches!(frame_type, MsgType::CallInitiate).then_some(false),
        reason: matches!(frame_type, MsgType::CallEnd).then_some(CallEndReason::Ended),
        timestamp: bed.clock.now(),
        nonce: encode_base64(&[9u8; 24]),
        ciphertext: encode_base64(b"sdp-or-candidate"),
        sig: whispertypes::crypto::SignatureBytes::from_bytes([0u8; 64]),
    };
    let sig = actor.sign(&params.canonical(frame_type));
    params.sig = sig;
    params
}

#[tokio::test]
async fn full_call_flow() {
    let bed = test_bed();
    let caller = register_user(&bed, Platform::Android).await;
    let callee = register_user(&bed, Platform::Android).await;
    bed.notifier.set_online(&caller.whisper_id);
    bed.notifier.set_online(&callee.whisper_id);

    bed.calls
        .initiate(signal(&bed, MsgType::CallInitiate, &caller, &callee, "k1"), &caller.whisper_id)
        .await
        .unwrap();
    assert!(bed
        .notifier
        .frames_for(&callee.whisper_id)
        .iter()
        .any(|f| f.frame_type == MsgType::CallIncoming));

    bed.calls
        .ringing(signal(&bed, MsgType::CallRinging, &callee, &caller, "k1"), &callee.whisper_id)
        .await
        .unwrap();
    bed.calls
        .answer(signal(&bed, MsgType::CallAnswer, &callee, &caller, "k1"), &callee.whisper_id)
        .await
        .unwrap();
    bed.calls
        .ice_candidate(
            signal(&bed, MsgType::CallIceCandidate, &caller, &callee, "k1"),
            &caller.whisper_id,
        )
        .await
        .unwrap();
    bed.calls
        .end(signal(&bed, MsgType::CallEnd, &caller, &callee, "k1"), &caller.whisper_id)
        .await
        .unwrap();

    let caller_frames = bed.notifier.frames_for(&caller.whisper_id);
    assert!(caller_frames.iter().any(|f| f.frame_type == MsgType::CallRinging));
    assert!(caller_frames.iter().any(|f| f.frame_type == MsgType::CallAnswer));
    let callee_frames = bed.notifier.frames_for(&callee.whisper_id);
    assert!(callee_frames.iter().any(|f| f.frame_type == MsgType::CallIceCandidate));
    assert!(callee_frames.iter().any(|f| f.frame_type == MsgType::CallEnd));

    // Terminal state wrote the history row.
    let history = bed.store.call_history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].end_reason, Some(CallEndReason::Ended));
    assert!(history[0].answered_at.is_some());
}

#[tokio::test]
async fn offline_callee_gets_call_wake() {
    let bed = test_bed();
    let caller = register_user(&bed, Platform::Ios).await;
    let callee = register_user(&bed, Platform::Ios).await;

    bed.calls
        .initiate(signal(&bed, MsgType::CallInitiate, &caller, &callee, "k2"), &caller.whisper_id)
        .await
        .unwrap();

    let wakes = bed.pushes.wakes();
    assert_eq!(wakes.len(), 1);
    assert_eq!(wakes[0].reason, WakeReason::Call);
    assert_eq!(wakes[0].call_id.as_ref().map(|c| c.as_str()), Some("k2"));
    assert_eq!(wakes[0].from.as_ref(), Some(&caller.whisper_id));
}

#[tokio::test]
async fn second_call_between_same_parties_is_rejected() {
    let bed = test_bed();
    let caller = register_user(&bed, Platform::Android).await;
    let callee = register_user(&bed, Platform::Android).await;

    bed.calls
        .initiate(signal(&bed, MsgType::CallInitiate, &caller, &callee, "k3"), &caller.whisper_id)
        .await
        .unwrap();
    // Same pair, opposite direction, new id: still refused.
    let err = bed
        .calls
        .initiate(signal(&bed, MsgType::CallInitiate, &callee, &caller, "k4"), &callee.whisper_id)
        .await
        .unwrap_err();
    assert!(matches!(err, CallServiceError::CallExists));
}

#[tokio::test]
async fn answer_requires_callee() {
    let bed = test_bed();
    let caller = register_user(&bed, Platform::Android).await;
    let callee = register_user(&bed, Platform::Android).await;

    bed.calls
        .initiate(signal(&bed, MsgType::CallInitiate, &caller, &callee, "k5"), &caller.whisper_id)
        .await
        .unwrap();
    // The caller cannot answer their own call.
    let err = bed
        .calls
        .answer(signal(&bed, MsgType::CallAnswer, &caller, &callee, "k5"), &caller.whisper_id)
        .await
        .unwrap_err();
    assert!(matches!(err, CallServiceError::NotParty));
}

#[tokio::test]
async fn ended_call_rejects_further_signaling() {
    let bed = test_bed();
    let caller = register_user(&bed, Platform::Android).await;
    let callee = register_user(&bed, Platform::Android).await;

    bed.calls
        .initiate(signal(&bed, MsgType::CallInitiate, &caller, &callee, "k6"), &caller.whisper_id)
        .await
        .unwrap();
    bed.calls
        .end(signal(&bed, MsgType::CallEnd, &caller, &callee, "k6"), &caller.whisper_id)
        .await
        .unwrap();

    let err = bed
        .calls
        .answer(signal(&bed, MsgType::CallAnswer, &callee, &caller, "k6"), &callee.whisper_id)
        .await
        .unwrap_err();
    assert!(matches!(err, CallServiceError::CallNotFound));
}

#[tokio::test]
async fn unanswered_call_times_out_to_both_parties() {
    let bed = test_bed();
    let caller = register_user(&bed, Platform::Android).await;
    let callee = register_user(&bed, Platform::Android).await;
    bed.notifier.set_online(&caller.whisper_id);
    bed.notifier.set_online(&callee.whisper_id);

    bed.calls
        .initiate(signal(&bed, MsgType::CallInitiate, &caller, &callee, "k7"), &caller.whisper_id)
        .await
        .unwrap();

    // The wheel fires at the 180 s deadline.
    bed.clock.advance(179_000);
    bed.calls.handle_timeout(&CallId::from("k7")).await;
    assert!(bed.store.call_history().is_empty());

    bed.clock.advance(1_000);
    bed.calls.handle_timeout(&CallId::from("k7")).await;

    let history = bed.store.call_history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].end_reason, Some(CallEndReason::Timeout));

    for user in [&caller, &callee] {
        let end_frames: Vec<_> = bed
            .notifier
            .frames_for(&user.whisper_id)
            .into_iter()
            .filter(|f| f.frame_type == MsgType::CallEnd)
            .collect();
        assert_eq!(end_frames.len(), 1);
        let payload = end_frames[0].payload.clone().unwrap();
        assert_eq!(payload["reason"], "timeout");
        assert_eq!(payload["from"], "server");
    }
}

#[tokio::test]
async fn sweeper_does_not_preempt_call_timeout() {
    let bed = test_bed();
    let caller = register_user(&bed, Platform::Android).await;
    let callee = register_user(&bed, Platform::Android).await;
    bed.notifier.set_online(&caller.whisper_id);
    bed.notifier.set_online(&callee.whisper_id);

    bed.calls
        .initiate(signal(&bed, MsgType::CallInitiate, &caller, &callee, "k9"), &caller.whisper_id)
        .await
        .unwrap();

    // A periodic sweep lands after the deadline but before the wheel
    // fires. The call must still end with a timeout, not vanish.
    bed.clock.advance(240_000);
    bed.volatile.sweep(bed.clock.now()).await;
    bed.calls.handle_timeout(&CallId::from("k9")).await;

    let history = bed.store.call_history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].end_reason, Some(CallEndReason::Timeout));
    for user in [&caller, &callee] {
        assert_eq!(
            bed.notifier
                .frames_for(&user.whisper_id)
                .iter()
                .filter(|f| f.frame_type == MsgType::CallEnd)
                .count(),
            1
        );
    }
}

#[tokio::test]
async fn turn_credentials_follow_the_rest_scheme() {
    let bed = test_bed();
    let user = register_user(&bed, Platform::Android).await;

    let credentials = bed.calls.turn_credentials(&user.whisper_id).await.unwrap();
    assert_eq!(credentials.ttl, 3600);
    assert_eq!(credentials.urls, vec!["turn:turn.test:3478".to_owned()]);

    // username = "<expiryUnix>:<whisperId>"
    let (expiry, id) = credentials.username.split_once(':').unwrap();
    assert_eq!(id, user.whisper_id.as_str());
    let expiry: i64 = expiry.parse().unwrap();
    assert_eq!(expiry, bed.clock.now().as_millis() / 1000 + 3600);

    // Deterministic for a frozen clock.
    let again = bed.calls.turn_credentials(&user.whisper_id).await.unwrap();
    assert_eq!(again, credentials);
}

#[tokio::test]
async fn tampered_signal_is_rejected() {
    let bed = test_bed();
    let caller = register_user(&bed, Platform::Android).await;
    let callee = register_user(&bed, Platform::Android).await;

    let mut params = signal(&bed, MsgType::CallInitiate, &caller, &callee, "k8");
    params.ciphertext = encode_base64(b"tampered");
    let err = bed
        .calls
        .initiate(params, &caller.whisper_id)
        .await
        .unwrap_err();
    assert!(matches!(err, CallServiceError::BadSignature));
}
