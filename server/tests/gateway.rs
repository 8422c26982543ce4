// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Frame-pipeline tests: parse → validate → auth gate → rate limit →
//! handler, driven through `process_frame` exactly as the websocket actor
//! drives it.

use std::sync::Arc;

use ed25519_dalek::{Signer, SigningKey};
use serde_json::{json, Value};

use whisperbackend::clock::Clock;
use whisperbackend::push_dispatcher::NullPushProvider;
use whisperbackend::store::memory::{MemDurableStore, MemVolatileStore};
use whisperserver::configurations::get_configuration_from_str;
use whisperserver::core::AppCore;
use whisperserver::pipeline::{process_frame, Outcome};

const BASE_CONFIG: &str = r#"
application:
  host: 127.0.0.1
  port: 0
  domain: localhost
database:
  username: whisper
  password: whisper
  host: ""
  port: 5432
  name: whisper
turn:
  urls:
    - turn:turn.test:3478
  shared_secret: test-secret
"#;

fn sha256(bytes: &[u8]) -> [u8; 32] {
    use sha2::Digest;
    sha2::Sha256::digest(bytes).into()
}

fn b64(bytes: &[u8]) -> String {
    use base64::Engine as _;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

fn build() -> Arc<AppCore> {
    let settings = get_configuration_from_str(BASE_CONFIG, "{}").expect("settings");
    let store = Arc::new(MemDurableStore::new());
    let volatile = Arc::new(MemVolatileStore::new());
    let (core, _dispatch) =
        whisperserver::build_core(&settings, store, volatile, NullPushProvider);
    core
}

fn payload_of(outcome: &Outcome) -> Value {
    assert_eq!(outcome.frames.len(), 1, "expected one frame: {outcome:?}");
    serde_json::to_value(&outcome.frames[0]).unwrap()
}

async fn send(core: &Arc<AppCore>, ip: &str, frame: Value) -> Outcome {
    process_frame(core, ip, &frame.to_string()).await
}

/// Full registration over the wire, returning (whisperId, sessionToken).
async fn register(core: &Arc<AppCore>, ip: &str, key: &SigningKey) -> (String, String) {
    let outcome = send(
        core,
        ip,
        json!({
            "type": "register_begin",
            "requestId": "r1",
            "payload": {
                "protocolVersion": 1,
                "cryptoVersion": 1,
                "deviceId": "d1",
                "platform": "android"
            }
        }),
    )
    .await;
    let challenge = payload_of(&outcome);
    assert_eq!(challenge["type"], "register_challenge");
    assert_eq!(challenge["requestId"], "r1");

    use base64::Engine as _;
    let challenge_bytes = base64::engine::general_purpose::STANDARD
        .decode(challenge["payload"]["challenge"].as_str().unwrap())
        .unwrap();
    let signature = key.sign(&sha256(&challenge_bytes));

    let outcome = send(
        core,
        ip,
        json!({
            "type": "register_proof",
            "requestId": "r2",
            "payload": {
                "protocolVersion": 1,
                "cryptoVersion": 1,
                "challengeId": challenge["payload"]["challengeId"],
                "deviceId": "d1",
                "platform": "android",
                "encPublicKey": b64(&[2u8; 32]),
                "signPublicKey": b64(&key.verifying_key().to_bytes()),
                "signature": b64(&signature.to_bytes()),
            }
        }),
    )
    .await;
    let ack = payload_of(&outcome);
    assert_eq!(ack["type"], "register_ack", "unexpected: {ack}");
    assert_eq!(ack["payload"]["success"], true);
    assert!(outcome.bind.is_some());

    (
        ack["payload"]["whisperId"].as_str().unwrap().to_owned(),
        ack["payload"]["sessionToken"].as_str().unwrap().to_owned(),
    )
}

#[actix_rt::test]
async fn registration_round_trip() {
    let core = build();
    let key = SigningKey::generate(&mut rand::rngs::OsRng);
    let (whisper_id, _token) = register(&core, "10.1.0.1", &key).await;
    assert!(whisper_id.starts_with("WSP-"));
}

#[actix_rt::test]
async fn malformed_frames_yield_invalid_payload() {
    let core = build();

    for raw in ["not json", "{}", r#"{"type":""}"#, r#"{"type":"teleport"}"#] {
        let outcome = process_frame(&core, "10.1.0.2", raw).await;
        let frame = payload_of(&outcome);
        assert_eq!(frame["type"], "error");
        assert_eq!(frame["payload"]["code"], "INVALID_PAYLOAD", "for {raw}");
    }

    // Server-to-client types are rejected inbound.
    let outcome = send(
        &core,
        "10.1.0.2",
        json!({"type": "message_received", "requestId": "x"}),
    )
    .await;
    let frame = payload_of(&outcome);
    assert_eq!(frame["payload"]["code"], "INVALID_PAYLOAD");
    assert_eq!(frame["payload"]["requestId"], "x");
}

#[actix_rt::test]
async fn auth_gate_rejects_missing_and_bogus_tokens() {
    let core = build();

    let outcome = send(
        &core,
        "10.1.0.3",
        json!({"type": "fetch_pending", "requestId": "f1", "payload": {
            "protocolVersion": 1, "cryptoVersion": 1
        }}),
    )
    .await;
    let frame = payload_of(&outcome);
    assert_eq!(frame["payload"]["code"], "NOT_REGISTERED");

    let outcome = send(
        &core,
        "10.1.0.3",
        json!({"type": "fetch_pending", "requestId": "f2", "payload": {
            "protocolVersion": 1, "cryptoVersion": 1, "sessionToken": "bogus"
        }}),
    )
    .await;
    let frame = payload_of(&outcome);
    assert_eq!(frame["payload"]["code"], "AUTH_FAILED");
    assert_eq!(frame["payload"]["requestId"], "f2");
}

#[actix_rt::test]
async fn ping_pong_works_unauthenticated() {
    let core = build();
    let outcome = send(&core, "10.1.0.4", json!({"type": "ping", "requestId": "p1"})).await;
    let frame = payload_of(&outcome);
    assert_eq!(frame["type"], "pong");
    assert_eq!(frame["requestId"], "p1");
    assert!(frame["payload"]["serverTime"].is_i64());
}

#[actix_rt::test]
async fn register_rate_limit_applies_per_ip() {
    let core = build();
    let begin = json!({
        "type": "register_begin",
        "payload": {
            "protocolVersion": 1,
            "cryptoVersion": 1,
            "deviceId": "d1",
            "platform": "android"
        }
    });

    // Burst of 10 register frames per IP.
    for _ in 0..10 {
        let outcome = send(&core, "10.9.9.9", begin.clone()).await;
        assert_eq!(payload_of(&outcome)["type"], "register_challenge");
    }
    let outcome = send(&core, "10.9.9.9", begin.clone()).await;
    assert_eq!(payload_of(&outcome)["payload"]["code"], "RATE_LIMITED");

    // A different IP is unaffected.
    let outcome = send(&core, "10.9.9.10", begin).await;
    assert_eq!(payload_of(&outcome)["type"], "register_challenge");
}

#[actix_rt::test]
async fn direct_message_flow_over_frames() {
    let core = build();
    let alice_key = SigningKey::generate(&mut rand::rngs::OsRng);
    let bob_key = SigningKey::generate(&mut rand::rngs::OsRng);
    let (alice_id, alice_token) = register(&core, "10.2.0.1", &alice_key).await;
    let (bob_id, bob_token) = register(&core, "10.2.0.2", &bob_key).await;

    // Alice signs the canonical string and sends.
    let message_id = uuid::Uuid::new_v4().to_string();
    let timestamp = core.clock.now().as_millis();
    let nonce = b64(&[5u8; 24]);
    let ciphertext = b64(b"sealed");
    let canonical = format!(
        "v1\ntext\n{message_id}\n{alice_id}\n{bob_id}\n{timestamp}\n{nonce}\n{ciphertext}\n"
    );
    let sig = alice_key.sign(&sha256(canonical.as_bytes()));

    let outcome = send(
        &core,
        "10.2.0.1",
        json!({
            "type": "send_message",
            "requestId": "m1",
            "payload": {
                "protocolVersion": 1,
                "cryptoVersion": 1,
                "sessionToken": alice_token,
                "messageId": message_id,
                "from": alice_id,
                "to": bob_id,
                "msgType": "text",
                "timestamp": timestamp,
                "nonce": nonce,
                "ciphertext": ciphertext,
                "sig": b64(&sig.to_bytes()),
            }
        }),
    )
    .await;
    let accepted = payload_of(&outcome);
    assert_eq!(accepted["type"], "message_accepted", "unexpected: {accepted}");
    assert_eq!(accepted["payload"]["status"], "sent");
    assert_eq!(accepted["payload"]["messageId"], message_id);

    // Bob (offline during the send) fetches his queue.
    let outcome = send(
        &core,
        "10.2.0.2",
        json!({"type": "fetch_pending", "requestId": "f1", "payload": {
            "protocolVersion": 1, "cryptoVersion": 1, "sessionToken": bob_token,
            "limit": 50
        }}),
    )
    .await;
    let page = payload_of(&outcome);
    assert_eq!(page["type"], "pending_messages");
    let messages = page["payload"]["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["messageId"], message_id);
    assert_eq!(messages[0]["ciphertext"], ciphertext);
    assert!(page["payload"]["nextCursor"].is_null());

    // Bob acknowledges delivery; his queue drains.
    let outcome = send(
        &core,
        "10.2.0.2",
        json!({"type": "delivery_receipt", "payload": {
            "protocolVersion": 1, "cryptoVersion": 1, "sessionToken": bob_token,
            "messageId": message_id,
            "from": bob_id,
            "to": alice_id,
            "status": "delivered",
            "timestamp": timestamp + 50,
        }}),
    )
    .await;
    assert!(outcome.frames.is_empty());

    let outcome = send(
        &core,
        "10.2.0.2",
        json!({"type": "fetch_pending", "payload": {
            "protocolVersion": 1, "cryptoVersion": 1, "sessionToken": bob_token
        }}),
    )
    .await;
    let page = payload_of(&outcome);
    assert_eq!(page["payload"]["messages"].as_array().unwrap().len(), 0);
}

#[actix_rt::test]
async fn session_refresh_and_logout() {
    let core = build();
    let key = SigningKey::generate(&mut rand::rngs::OsRng);
    let (_id, token) = register(&core, "10.3.0.1", &key).await;

    let outcome = send(
        &core,
        "10.3.0.1",
        json!({"type": "session_refresh", "requestId": "s1", "payload": {
            "protocolVersion": 1, "cryptoVersion": 1, "sessionToken": token
        }}),
    )
    .await;
    let ack = payload_of(&outcome);
    assert_eq!(ack["type"], "session_refresh_ack");
    let rotated = ack["payload"]["sessionToken"].as_str().unwrap().to_owned();
    assert_ne!(rotated, token);

    // The old token no longer authenticates.
    let outcome = send(
        &core,
        "10.3.0.1",
        json!({"type": "fetch_pending", "payload": {
            "protocolVersion": 1, "cryptoVersion": 1, "sessionToken": token
        }}),
    )
    .await;
    assert_eq!(payload_of(&outcome)["payload"]["code"], "AUTH_FAILED");

    // Logout closes the connection with 1000.
    let outcome = send(
        &core,
        "10.3.0.1",
        json!({"type": "logout", "payload": {
            "protocolVersion": 1, "cryptoVersion": 1, "sessionToken": rotated
        }}),
    )
    .await;
    assert_eq!(outcome.close, Some((1000, "logout".to_owned())));
}

#[actix_rt::test]
async fn turn_credentials_over_frames() {
    let core = build();
    let key = SigningKey::generate(&mut rand::rngs::OsRng);
    let (whisper_id, token) = register(&core, "10.4.0.1", &key).await;

    let outcome = send(
        &core,
        "10.4.0.1",
        json!({"type": "get_turn_credentials", "requestId": "t1", "payload": {
            "protocolVersion": 1, "cryptoVersion": 1, "sessionToken": token
        }}),
    )
    .await;
    let frame = payload_of(&outcome);
    assert_eq!(frame["type"], "turn_credentials");
    assert_eq!(frame["payload"]["ttl"], 3600);
    let username = frame["payload"]["username"].as_str().unwrap();
    assert!(username.ends_with(&whisper_id));
}

#[actix_rt::test]
async fn version_mismatch_is_invalid_payload() {
    let core = build();
    let outcome = send(
        &core,
        "10.5.0.1",
        json!({"type": "register_begin", "requestId": "v1", "payload": {
            "protocolVersion": 2, "cryptoVersion": 1,
            "deviceId": "d1", "platform": "android"
        }}),
    )
    .await;
    let frame = payload_of(&outcome);
    assert_eq!(frame["payload"]["code"], "INVALID_PAYLOAD");
    assert_eq!(frame["payload"]["requestId"], "v1");
}
