// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Registration and session lifecycle.
//!
//! Registration is a two-step challenge/response: `register_begin` mints a
//! 32-byte challenge with a 60 second TTL, `register_proof` consumes it
//! atomically and verifies `Ed25519(SHA-256(challenge))` under the
//! presented signing key. Accounts are provisioned lazily on first proof;
//! public keys are immutable from then on. Minting a session displaces
//! every prior session of the account (single active device).

use std::sync::Arc;

use tracing::{info, instrument};

use whispertypes::identifiers::{ChallengeId, SessionToken, WhisperId};
use whispertypes::messages::client_auth::{
    RegisterAck, RegisterBeginParams, RegisterChallenge, RegisterProofParams, SessionRefreshAck,
    TokensUpdated, UpdateTokensParams,
};
use whispertypes::messages::ClientVersions;
use whispertypes::time::{Duration, TimeStamp};

pub mod account_record;
pub mod challenge;
pub mod errors;
pub mod push_token_record;
pub mod session_record;

use account_record::{AccountRecord, AccountStatus};
use challenge::{ChallengeRecord, CHALLENGE_LEN, CHALLENGE_TTL_SECS};
use errors::AuthServiceError;
use push_token_record::PushTokenRecord;
use session_record::{SessionRecord, SESSION_TTL_DAYS};

use crate::clock::{Clock, RandomSource};
use crate::notifier::ConnectionNotifier;
use crate::store::{DurableStore, VolatileStore};

/// Attempts at deriving a collision-free whisper id before giving up.
const MAX_ID_DERIVATION_ATTEMPTS: u32 = 32;

pub struct AuthService {
    store: Arc<dyn DurableStore>,
    volatile: Arc<dyn VolatileStore>,
    clock: Arc<dyn Clock>,
    rng: Arc<dyn RandomSource>,
    notifier: Arc<dyn ConnectionNotifier>,
}

impl AuthService {
    pub fn new(
        store: Arc<dyn DurableStore>,
        volatile: Arc<dyn VolatileStore>,
        clock: Arc<dyn Clock>,
        rng: Arc<dyn RandomSource>,
        notifier: Arc<dyn ConnectionNotifier>,
    ) -> Self {
        Self {
            store,
            volatile,
            clock,
            rng,
            notifier,
        }
    }

    fn check_versions(protocol: u16, crypto: u16) -> Result<(), AuthServiceError> {
        let versions = ClientVersions {
            protocol_version: protocol,
            crypto_version: crypto,
        };
        if !versions.is_supported() {
            return Err(AuthServiceError::VersionMismatch);
        }
        Ok(())
    }

    /// First half of the handshake.
    #[instrument(skip_all, fields(recovery = params.whisper_id.is_some()))]
    pub async fn register_begin(
        &self,
        params: RegisterBeginParams,
    ) -> Result<RegisterChallenge, AuthServiceError> {
        Self::check_versions(params.protocol_version, params.crypto_version)?;

        // The recovery path must reference an existing account.
        if let Some(whisper_id) = &params.whisper_id {
            if self.store.load_account(whisper_id).await?.is_none() {
                return Err(AuthServiceError::NotRegistered);
            }
        }

        let now = self.clock.now();
        let record = ChallengeRecord {
            challenge_id: ChallengeId::random(),
            whisper_id: params.whisper_id.clone(),
            challenge_bytes: self.rng.random_bytes(CHALLENGE_LEN),
            expires_at: now
                .checked_add(Duration::seconds(CHALLENGE_TTL_SECS))
                .ok_or(AuthServiceError::ChallengeInvalid)?,
        };

        let response = RegisterChallenge {
            challenge_id: record.challenge_id.clone(),
            challenge: whispertypes::crypto::encode_base64(&record.challenge_bytes),
            expires_at: record.expires_at,
        };
        self.volatile.put_challenge(record).await;
        Ok(response)
    }

    /// Second half of the handshake: consume the challenge, verify the
    /// proof, provision or recover the account, displace prior sessions
    /// and mint a fresh one.
    #[instrument(skip_all, fields(challenge_id = %params.challenge_id))]
    pub async fn register_proof(
        &self,
        params: RegisterProofParams,
    ) -> Result<RegisterAck, AuthServiceError> {
        Self::check_versions(params.protocol_version, params.crypto_version)?;
        let now = self.clock.now();

        // Compare-and-delete: a second proof attempt finds nothing.
        let challenge = self
            .volatile
            .consume_challenge(&params.challenge_id, now)
            .await
            .ok_or(AuthServiceError::ChallengeInvalid)?;

        params
            .sign_public_key
            .verify_digest_of(&challenge.challenge_bytes, &params.signature)
            .map_err(|_| AuthServiceError::ProofFailed)?;

        // The whisper id bound at register_begin and the one presented now
        // must agree.
        if let (Some(bound), Some(presented)) = (&challenge.whisper_id, &params.whisper_id) {
            if bound != presented {
                return Err(AuthServiceError::ProofFailed);
            }
        }

        let account = self.resolve_account(&params, now).await?;
        if !account.is_active() {
            return Err(AuthServiceError::Banned);
        }

        self.store
            .upsert_push_token(&PushTokenRecord {
                whisper_id: account.whisper_id.clone(),
                device_id: params.device_id.clone(),
                platform: params.platform,
                push_token: params.push_token.clone(),
                voip_token: params.voip_token.clone(),
                updated_at: now,
            })
            .await?;

        let session = SessionRecord {
            session_token: self.rng.session_token(),
            whisper_id: account.whisper_id.clone(),
            device_id: params.device_id.clone(),
            platform: params.platform,
            created_at: now,
            expires_at: now
                .checked_add(Duration::days(SESSION_TTL_DAYS))
                .ok_or(AuthServiceError::ChallengeInvalid)?,
        };
        let revoked = self.store.displace_sessions(&session).await?;

        // Side effects only after the displacement committed.
        if !revoked.is_empty() {
            info!(count = revoked.len(), "displacing prior sessions");
            self.notifier
                .force_logout(&account.whisper_id, "new_device")
                .await;
        }

        Ok(RegisterAck {
            success: true,
            whisper_id: account.whisper_id,
            session_token: session.session_token,
            session_expires_at: session.expires_at,
            server_time: now,
        })
    }

    async fn resolve_account(
        &self,
        params: &RegisterProofParams,
        now: TimeStamp,
    ) -> Result<AccountRecord, AuthServiceError> {
        // Recovery: the presented whisper id must be bound to the
        // presented signing key.
        if let Some(whisper_id) = &params.whisper_id {
            let account = self
                .store
                .load_account(whisper_id)
                .await?
                .ok_or(AuthServiceError::NotRegistered)?;
            if account.sign_public_key != params.sign_public_key
                || account.enc_public_key != params.enc_public_key
            {
                return Err(AuthServiceError::KeyMismatch);
            }
            return Ok(account);
        }

        // Re-registration with a known key resolves to the same account.
        if let Some(account) = self
            .store
            .load_account_by_sign_key(&params.sign_public_key)
            .await?
        {
            if account.enc_public_key != params.enc_public_key {
                return Err(AuthServiceError::KeyMismatch);
            }
            return Ok(account);
        }

        // Fresh registration: derive the id from the signing key, retrying
        // with the SHA-256 extension on uniqueness collisions.
        for attempt in 0..MAX_ID_DERIVATION_ATTEMPTS {
            let whisper_id =
                WhisperId::derive_nth(params.sign_public_key.as_bytes(), attempt);
            if self.store.load_account(&whisper_id).await?.is_some() {
                continue;
            }
            let account = AccountRecord {
                whisper_id,
                enc_public_key: params.enc_public_key.clone(),
                sign_public_key: params.sign_public_key.clone(),
                created_at: now,
                status: AccountStatus::Active,
            };
            match self.store.insert_account(&account).await {
                Ok(()) => return Ok(account),
                // Lost a race for this id; derive the next candidate.
                Err(crate::errors::StorageError::Constraint(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(AuthServiceError::IdExhausted)
    }

    /// Rotate the token and extend expiry by the session TTL. Presenting
    /// the current token is the required proof of ownership.
    pub async fn refresh_session(
        &self,
        token: &SessionToken,
    ) -> Result<SessionRefreshAck, AuthServiceError> {
        let now = self.clock.now();
        let session = self
            .store
            .load_session(token)
            .await?
            .filter(|s| s.is_live_at(now))
            .ok_or(AuthServiceError::SessionInvalid)?;

        let rotated = SessionRecord {
            session_token: self.rng.session_token(),
            created_at: now,
            expires_at: now
                .checked_add(Duration::days(SESSION_TTL_DAYS))
                .ok_or(AuthServiceError::SessionInvalid)?,
            ..session
        };
        if !self.store.rotate_session(token, &rotated).await? {
            // Concurrent refresh or logout won the race.
            return Err(AuthServiceError::SessionInvalid);
        }

        Ok(SessionRefreshAck {
            session_token: rotated.session_token,
            session_expires_at: rotated.expires_at,
            server_time: now,
        })
    }

    pub async fn logout(&self, token: &SessionToken) -> Result<(), AuthServiceError> {
        self.store.delete_session(token).await?;
        Ok(())
    }

    /// Idempotent push-token upsert for an authenticated session.
    pub async fn update_tokens(
        &self,
        session: &SessionRecord,
        params: &UpdateTokensParams,
    ) -> Result<TokensUpdated, AuthServiceError> {
        Self::check_versions(params.protocol_version, params.crypto_version)?;
        self.store
            .upsert_push_token(&PushTokenRecord {
                whisper_id: session.whisper_id.clone(),
                device_id: session.device_id.clone(),
                platform: session.platform,
                push_token: params.push_token.clone(),
                voip_token: params.voip_token.clone(),
                updated_at: self.clock.now(),
            })
            .await?;
        Ok(TokensUpdated { success: true })
    }

    /// The auth gate of the frame pipeline.
    pub async fn validate_session(
        &self,
        token: &SessionToken,
    ) -> Result<Option<SessionRecord>, AuthServiceError> {
        let now = self.clock.now();
        Ok(self
            .store
            .load_session(token)
            .await?
            .filter(|s| s.is_live_at(now)))
    }
}

#[cfg(test)]
mod tests {
    use ed25519_dalek::{Signer, SigningKey};
    use whispertypes::crypto::{
        decode_base64, sha256, EncPublicKey, SignPublicKey, SignatureBytes,
    };
    use whispertypes::messages::client_auth::Platform;

    use crate::clock::{ManualClock, OsRandom};
    use crate::notifier::recording::RecordingNotifier;
    use crate::store::memory::{MemDurableStore, MemVolatileStore};

    use super::*;

    struct Harness {
        auth: AuthService,
        clock: Arc<ManualClock>,
        notifier: Arc<RecordingNotifier>,
        store: Arc<MemDurableStore>,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemDurableStore::new());
        let clock = ManualClock::at(1_700_000_000_000);
        let notifier = Arc::new(RecordingNotifier::new());
        let auth = AuthService::new(
            store.clone(),
            Arc::new(MemVolatileStore::new()),
            clock.clone(),
            Arc::new(OsRandom),
            notifier.clone(),
        );
        Harness {
            auth,
            clock,
            notifier,
            store,
        }
    }

    fn begin_params() -> RegisterBeginParams {
        RegisterBeginParams {
            protocol_version: 1,
            crypto_version: 1,
            device_id: "d1".into(),
            platform: Platform::Android,
            whisper_id: None,
        }
    }

    fn proof_for(
        challenge: &RegisterChallenge,
        signing_key: &SigningKey,
    ) -> RegisterProofParams {
        let challenge_bytes = decode_base64(&challenge.challenge).unwrap();
        let signature = signing_key.sign(&sha256(&challenge_bytes));
        RegisterProofParams {
            protocol_version: 1,
            crypto_version: 1,
            challenge_id: challenge.challenge_id.clone(),
            device_id: "d1".into(),
            platform: Platform::Android,
            whisper_id: None,
            enc_public_key: EncPublicKey::from_bytes([5u8; 32]),
            sign_public_key: SignPublicKey::from_bytes(signing_key.verifying_key().to_bytes()),
            signature: SignatureBytes::from_bytes(signature.to_bytes()),
            push_token: Some("fcm-token".into()),
            voip_token: None,
        }
    }

    #[tokio::test]
    async fn fresh_registration_mints_account_and_session() {
        let h = harness();
        let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);

        let challenge = h.auth.register_begin(begin_params()).await.unwrap();
        let ack = h
            .auth
            .register_proof(proof_for(&challenge, &signing_key))
            .await
            .unwrap();

        assert!(ack.success);
        // The id is the deterministic derivation from the signing key.
        assert_eq!(
            ack.whisper_id,
            WhisperId::derive_from_key(&signing_key.verifying_key().to_bytes())
        );
        let session = h
            .auth
            .validate_session(&ack.session_token)
            .await
            .unwrap()
            .expect("session is live");
        assert_eq!(session.whisper_id, ack.whisper_id);
        // 7 day TTL.
        assert_eq!(
            ack.session_expires_at.as_millis() - ack.server_time.as_millis(),
            7 * 24 * 3600 * 1000
        );
    }

    #[tokio::test]
    async fn challenge_cannot_be_consumed_twice() {
        let h = harness();
        let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);

        let challenge = h.auth.register_begin(begin_params()).await.unwrap();
        let proof = proof_for(&challenge, &signing_key);
        h.auth.register_proof(proof.clone()).await.unwrap();

        let second = h.auth.register_proof(proof).await.unwrap_err();
        assert!(matches!(second, AuthServiceError::ChallengeInvalid));
    }

    #[tokio::test]
    async fn expired_challenge_is_rejected() {
        let h = harness();
        let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);

        let challenge = h.auth.register_begin(begin_params()).await.unwrap();
        h.clock.advance((CHALLENGE_TTL_SECS + 1) * 1000);

        let err = h
            .auth
            .register_proof(proof_for(&challenge, &signing_key))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthServiceError::ChallengeInvalid));
    }

    #[tokio::test]
    async fn wrong_key_proof_fails() {
        let h = harness();
        let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
        let other_key = SigningKey::generate(&mut rand::rngs::OsRng);

        let challenge = h.auth.register_begin(begin_params()).await.unwrap();
        let mut proof = proof_for(&challenge, &signing_key);
        // Signature from a different key than the presented public key.
        proof.sign_public_key = SignPublicKey::from_bytes(other_key.verifying_key().to_bytes());

        let err = h.auth.register_proof(proof).await.unwrap_err();
        assert!(matches!(err, AuthServiceError::ProofFailed));
    }

    #[tokio::test]
    async fn second_device_displaces_first_session() {
        let h = harness();
        let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);

        let challenge = h.auth.register_begin(begin_params()).await.unwrap();
        let first = h
            .auth
            .register_proof(proof_for(&challenge, &signing_key))
            .await
            .unwrap();

        let challenge = h.auth.register_begin(begin_params()).await.unwrap();
        let second = h
            .auth
            .register_proof(proof_for(&challenge, &signing_key))
            .await
            .unwrap();

        // Same account, new session; the old token is dead.
        assert_eq!(first.whisper_id, second.whisper_id);
        assert!(h
            .auth
            .validate_session(&first.session_token)
            .await
            .unwrap()
            .is_none());
        assert!(h
            .auth
            .validate_session(&second.session_token)
            .await
            .unwrap()
            .is_some());
        // Exactly one force_logout fan-out.
        let logouts = h.notifier.logouts.lock().unwrap();
        assert_eq!(logouts.len(), 1);
        assert_eq!(logouts[0], (first.whisper_id, "new_device".to_owned()));
    }

    #[tokio::test]
    async fn key_immutability_is_enforced() {
        let h = harness();
        let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);

        let challenge = h.auth.register_begin(begin_params()).await.unwrap();
        let ack = h
            .auth
            .register_proof(proof_for(&challenge, &signing_key))
            .await
            .unwrap();

        // Recovery with the right key but a different enc key must fail.
        let challenge = h.auth.register_begin(begin_params()).await.unwrap();
        let mut proof = proof_for(&challenge, &signing_key);
        proof.whisper_id = Some(ack.whisper_id);
        proof.enc_public_key = EncPublicKey::from_bytes([6u8; 32]);
        let err = h.auth.register_proof(proof).await.unwrap_err();
        assert!(matches!(err, AuthServiceError::KeyMismatch));
    }

    #[tokio::test]
    async fn refresh_rotates_token() {
        let h = harness();
        let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
        let challenge = h.auth.register_begin(begin_params()).await.unwrap();
        let ack = h
            .auth
            .register_proof(proof_for(&challenge, &signing_key))
            .await
            .unwrap();

        h.clock.advance(1_000);
        let refreshed = h.auth.refresh_session(&ack.session_token).await.unwrap();
        assert_ne!(refreshed.session_token, ack.session_token);
        assert!(h
            .auth
            .validate_session(&ack.session_token)
            .await
            .unwrap()
            .is_none());
        assert!(h
            .auth
            .validate_session(&refreshed.session_token)
            .await
            .unwrap()
            .is_some());
        // A second refresh with the dead token fails.
        assert!(matches!(
            h.auth.refresh_session(&ack.session_token).await.unwrap_err(),
            AuthServiceError::SessionInvalid
        ));
    }

    #[tokio::test]
    async fn session_expires_after_ttl() {
        let h = harness();
        let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
        let challenge = h.auth.register_begin(begin_params()).await.unwrap();
        let ack = h
            .auth
            .register_proof(proof_for(&challenge, &signing_key))
            .await
            .unwrap();

        h.clock.advance(SESSION_TTL_DAYS * 24 * 3600 * 1000 + 1);
        assert!(h
            .auth
            .validate_session(&ack.session_token)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn update_tokens_upserts_target() {
        let h = harness();
        let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
        let challenge = h.auth.register_begin(begin_params()).await.unwrap();
        let ack = h
            .auth
            .register_proof(proof_for(&challenge, &signing_key))
            .await
            .unwrap();
        let session = h
            .auth
            .validate_session(&ack.session_token)
            .await
            .unwrap()
            .unwrap();

        h.auth
            .update_tokens(
                &session,
                &UpdateTokensParams {
                    protocol_version: 1,
                    crypto_version: 1,
                    session_token: ack.session_token.clone(),
                    push_token: Some("fcm-2".into()),
                    voip_token: None,
                },
            )
            .await
            .unwrap();

        let stored = h
            .store
            .load_push_token(&ack.whisper_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.push_token.as_deref(), Some("fcm-2"));
    }
}
