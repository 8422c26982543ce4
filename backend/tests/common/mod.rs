// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Shared test bed: all services wired against the in-memory stores, a
//! settable clock, a recording notifier and a recording push provider.

use std::sync::Arc;

use ed25519_dalek::{Signer, SigningKey};

use whisperbackend::auth_service::AuthService;
use whisperbackend::call_service::timeout::TimeoutWheel;
use whisperbackend::call_service::CallService;
use whisperbackend::clock::{Clock, ManualClock, OsRandom};
use whisperbackend::group_service::GroupService;
use whisperbackend::notifier::recording::RecordingNotifier;
use whisperbackend::push_dispatcher::{PushDispatcher, RecordingPushProvider, WakeSink};
use whisperbackend::router::MessageRouter;
use whisperbackend::settings::TurnSettings;
use whisperbackend::store::memory::{MemDurableStore, MemVolatileStore};

use whispertypes::crypto::{encode_base64, sha256, CanonicalEnvelope, EncPublicKey,
    SignPublicKey, SignatureBytes,
};
use whispertypes::identifiers::{SessionToken, WhisperId};
use whispertypes::messages::client_auth::{Platform, RegisterBeginParams, RegisterProofParams};
use whispertypes::messages::client_message::{MessageEnvelope, SendMessageParams};
use whispertypes::time::TimeStamp;

pub const T0: i64 = 1_700_000_000_000;

pub struct TestBed {
    pub store: Arc<MemDurableStore>,
    pub volatile: Arc<MemVolatileStore>,
    pub clock: Arc<ManualClock>,
    pub notifier: Arc<RecordingNotifier>,
    pub pushes: Arc<RecordingPushProvider>,
    pub auth: AuthService,
    pub router: Arc<MessageRouter>,
    pub groups: GroupService,
    pub calls: CallService,
}

pub fn test_bed() -> TestBed {
    let store = Arc::new(MemDurableStore::new());
    let volatile = Arc::new(MemVolatileStore::new());
    let clock = ManualClock::at(T0);
    let notifier = Arc::new(RecordingNotifier::new());
    let pushes = Arc::new(RecordingPushProvider::default());

    let push: Arc<dyn WakeSink> = Arc::new(PushDispatcher::new(
        store.clone(),
        volatile.clone(),
        clock.clone(),
        pushes.clone(),
    ));

    let auth = AuthService::new(
        store.clone(),
        volatile.clone(),
        clock.clone(),
        Arc::new(OsRandom),
        notifier.clone(),
    );
    let router = Arc::new(MessageRouter::new(
        store.clone(),
        clock.clone(),
        notifier.clone(),
        push.clone(),
    ));
    let groups = GroupService::new(
        store.clone(),
        clock.clone(),
        notifier.clone(),
        router.clone(),
    );

    // The runner half of the wheel is dropped: tests drive timeouts
    // through `handle_timeout` against the manual clock.
    let (wheel, _runner) = TimeoutWheel::new();
    let calls = CallService::new(
        store.clone(),
        volatile.clone(),
        clock.clone(),
        notifier.clone(),
        push,
        wheel,
        TurnSettings {
            urls: vec!["turn:turn.test:3478".to_owned()],
            shared_secret: "test-secret".to_owned(),
            credential_ttl_secs: 3600,
        },
    );

    TestBed {
        store,
        volatile,
        clock,
        notifier,
        pushes,
        auth,
        router,
        groups,
        calls,
    }
}

pub struct User {
    pub whisper_id: WhisperId,
    pub session_token: SessionToken,
    pub signing_key: SigningKey,
}

impl User {
    /// Sign the canonical string the way a client would.
    pub fn sign(&self, canonical: &CanonicalEnvelope<'_>) -> SignatureBytes {
        let digest = sha256(canonical.to_signing_string().as_bytes());
        SignatureBytes::from_bytes(self.signing_key.sign(&digest).to_bytes())
    }
}

/// Run the full registration handshake for a fresh keypair.
pub async fn register_user(bed: &TestBed, platform: Platform) -> User {
    let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
    let challenge = bed
        .auth
        .register_begin(RegisterBeginParams {
            protocol_version: 1,
            crypto_version: 1,
            device_id: "device".into(),
            platform,
            whisper_id: None,
        })
        .await
        .expect("register_begin");

    let challenge_bytes =
        whispertypes::crypto::decode_base64(&challenge.challenge).expect("challenge b64");
    let signature = signing_key.sign(&sha256(&challenge_bytes));

    let ack = bed
        .auth
        .register_proof(RegisterProofParams {
            protocol_version: 1,
            crypto_version: 1,
            challenge_id: challenge.challenge_id,
            device_id: "device".into(),
            platform,
            whisper_id: None,
            enc_public_key: EncPublicKey::from_bytes([1u8; 32]),
            sign_public_key: SignPublicKey::from_bytes(signing_key.verifying_key().to_bytes()),
            signature: SignatureBytes::from_bytes(signature.to_bytes()),
            push_token: Some("push-token".into()),
            voip_token: (platform == Platform::Ios).then(|| "voip-token".to_owned()),
        })
        .await
        .expect("register_proof");

    User {
        whisper_id: ack.whisper_id,
        session_token: ack.session_token,
        signing_key,
    }
}

/// Build a signed `send_message` payload from `sender` to `to`.
pub fn signed_send(
    bed: &TestBed,
    sender: &User,
    to: &WhisperId,
    body: &str,
) -> SendMessageParams {
    signed_send_at(bed.clock.now(), sender, to, body)
}

pub fn signed_send_at(
    timestamp: TimeStamp,
    sender: &User,
    to: &WhisperId,
    body: &str,
) -> SendMessageParams {
    let mut envelope = MessageEnvelope {
        message_id: whispertypes::identifiers::MessageId::random(),
        from: sender.whisper_id.clone(),
        to: to.clone(),
        group_id: None,
        msg_type: "text".to_owned(),
        timestamp,
        nonce: encode_base64(&[7u8; 24]),
        ciphertext: encode_base64(body.as_bytes()),
        sig: SignatureBytes::from_bytes([0u8; 64]),
        reply_to: None,
        reactions: None,
        attachment: None,
    };
    let sig = sender.sign(&envelope.canonical());
    envelope.sig = sig;
    SendMessageParams {
        protocol_version: 1,
        crypto_version: 1,
        session_token: sender.session_token.clone(),
        message: envelope,
    }
}
