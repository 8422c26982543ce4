// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Call signaling.
//!
//! State machine per call id: initiated → ringing → answered → ended, with
//! `ended` terminal. Live state sits in the volatile store (TTL 180 s) and
//! transitions via compare-and-set; the durable history row is written on
//! the terminal transition. Every inbound signal is signed by its actor
//! and verified before relay. A timeout wheel ends unanswered calls after
//! 180 s.

use std::sync::Arc;

use tracing::{info, instrument};

use whispertypes::codec::OutboundFrame;
use whispertypes::crypto::turn::mint_turn_credentials;
use whispertypes::identifiers::{CallId, WhisperId};
use whispertypes::messages::client_call::{
    CallEndNotice, CallEndReason, CallSignalParams, TurnCredentials,
};
use whispertypes::messages::push_token::WakeReason;
use whispertypes::messages::{ClientVersions, MsgType};
use whispertypes::time::{Duration, MAX_TIMESTAMP_SKEW_MS};

pub mod call_record;
pub mod errors;
pub mod timeout;

use call_record::{CallState, LiveCall, CALL_TTL_SECS};
use errors::CallServiceError;
use timeout::TimeoutWheel;

use crate::clock::Clock;
use crate::notifier::{ConnectionNotifier, NotifierError};
use crate::push_dispatcher::{CallWake, WakeHints, WakeSink};
use crate::settings::TurnSettings;
use crate::store::{DurableStore, VolatileStore};

pub struct CallService {
    store: Arc<dyn DurableStore>,
    volatile: Arc<dyn VolatileStore>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn ConnectionNotifier>,
    push: Arc<dyn WakeSink>,
    timeouts: TimeoutWheel,
    turn: TurnSettings,
}

impl CallService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn DurableStore>,
        volatile: Arc<dyn VolatileStore>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn ConnectionNotifier>,
        push: Arc<dyn WakeSink>,
        timeouts: TimeoutWheel,
        turn: TurnSettings,
    ) -> Self {
        Self {
            store,
            volatile,
            clock,
            notifier,
            push,
            timeouts,
            turn,
        }
    }

    fn check_versions(protocol: u16, crypto: u16) -> Result<(), CallServiceError> {
        let versions = ClientVersions {
            protocol_version: protocol,
            crypto_version: crypto,
        };
        if !versions.is_supported() {
            return Err(CallServiceError::VersionMismatch);
        }
        Ok(())
    }

    /// Common gate for every signed call frame: version, schema, actor,
    /// timestamp window and signature.
    async fn verify_signal(
        &self,
        params: &CallSignalParams,
        frame_type: MsgType,
        actor: &WhisperId,
    ) -> Result<(), CallServiceError> {
        Self::check_versions(params.protocol_version, params.crypto_version)?;
        params.validate(frame_type)?;

        if &params.from != actor {
            return Err(CallServiceError::SenderMismatch);
        }

        let now = self.clock.now();
        if !params.timestamp.is_within_skew_of(&now, MAX_TIMESTAMP_SKEW_MS) {
            return Err(CallServiceError::TimestampSkew);
        }

        let account = self
            .store
            .load_account(actor)
            .await?
            .ok_or(CallServiceError::SenderMismatch)?;
        params
            .canonical(frame_type)
            .verify(&account.sign_public_key, &params.sig)
            .map_err(|_| CallServiceError::BadSignature)?;
        Ok(())
    }

    async fn relay(&self, target: &WhisperId, frame_type: MsgType, params: &CallSignalParams) {
        let frame = OutboundFrame::new(frame_type, &params.relay_body());
        if self.notifier.notify(target, frame).await.is_err() {
            info!(%target, frame_type = %frame_type, "call signal target offline");
        }
    }

    /// `call_initiate`: register the call, ring the callee (push wake when
    /// offline) and arm the timeout.
    #[instrument(skip_all, fields(call_id = %params.call_id))]
    pub async fn initiate(
        &self,
        params: CallSignalParams,
        actor: &WhisperId,
    ) -> Result<(), CallServiceError> {
        self.verify_signal(&params, MsgType::CallInitiate, actor).await?;
        let now = self.clock.now();

        let callee = self
            .store
            .load_account(&params.to)
            .await?
            .filter(|account| account.is_active())
            .ok_or(CallServiceError::PeerNotFound)?;

        if self
            .volatile
            .find_live_call_between(actor, &callee.whisper_id, now)
            .await
            .is_some()
        {
            return Err(CallServiceError::CallExists);
        }

        let call = LiveCall {
            call_id: params.call_id.clone(),
            caller_id: actor.clone(),
            callee_id: callee.whisper_id.clone(),
            state: CallState::Initiated,
            is_video: params.is_video.unwrap_or(false),
            created_at: now,
            answered_at: None,
        };
        if !self.volatile.put_live_call(call, now, CALL_TTL_SECS).await {
            return Err(CallServiceError::CallExists);
        }

        let deadline = now
            .checked_add(Duration::seconds(CALL_TTL_SECS))
            .ok_or(CallServiceError::BadState)?;
        self.timeouts.schedule(params.call_id.clone(), deadline);

        let frame = OutboundFrame::new(MsgType::CallIncoming, &params.relay_body());
        match self.notifier.notify(&callee.whisper_id, frame).await {
            Ok(()) => {}
            Err(NotifierError::ClientNotFound) => {
                self.push
                    .wake(
                        &callee.whisper_id,
                        WakeReason::Call,
                        WakeHints {
                            correlation_id: Some(params.call_id.to_string()),
                            call: Some(CallWake {
                                call_id: params.call_id.clone(),
                                from: actor.clone(),
                                caller_name: None,
                                is_video: params.is_video.unwrap_or(false),
                            }),
                        },
                    )
                    .await;
            }
        }
        Ok(())
    }

    /// `call_ringing` from the callee while the call is `initiated`.
    #[instrument(skip_all, fields(call_id = %params.call_id))]
    pub async fn ringing(
        &self,
        params: CallSignalParams,
        actor: &WhisperId,
    ) -> Result<(), CallServiceError> {
        self.verify_signal(&params, MsgType::CallRinging, actor).await?;
        let now = self.clock.now();

        let call = self
            .volatile
            .get_live_call(&params.call_id, now)
            .await
            .ok_or(CallServiceError::CallNotFound)?;
        if &call.callee_id != actor {
            return Err(CallServiceError::NotParty);
        }

        let call = self
            .volatile
            .cas_call_state(&params.call_id, &[CallState::Initiated], CallState::Ringing, now)
            .await
            .ok_or(CallServiceError::BadState)?;

        self.relay(&call.caller_id, MsgType::CallRinging, &params).await;
        Ok(())
    }

    /// `call_answer` from the callee while `initiated` or `ringing`.
    #[instrument(skip_all, fields(call_id = %params.call_id))]
    pub async fn answer(
        &self,
        params: CallSignalParams,
        actor: &WhisperId,
    ) -> Result<(), CallServiceError> {
        self.verify_signal(&params, MsgType::CallAnswer, actor).await?;
        let now = self.clock.now();

        let call = self
            .volatile
            .get_live_call(&params.call_id, now)
            .await
            .ok_or(CallServiceError::CallNotFound)?;
        if &call.callee_id != actor {
            return Err(CallServiceError::NotParty);
        }

        let call = self
            .volatile
            .cas_call_state(
                &params.call_id,
                &[CallState::Initiated, CallState::Ringing],
                CallState::Answered,
                now,
            )
            .await
            .ok_or(CallServiceError::BadState)?;

        self.relay(&call.caller_id, MsgType::CallAnswer, &params).await;
        Ok(())
    }

    /// `call_ice_candidate` from either party while the call is live.
    #[instrument(skip_all, fields(call_id = %params.call_id))]
    pub async fn ice_candidate(
        &self,
        params: CallSignalParams,
        actor: &WhisperId,
    ) -> Result<(), CallServiceError> {
        self.verify_signal(&params, MsgType::CallIceCandidate, actor).await?;
        let now = self.clock.now();

        let call = self
            .volatile
            .get_live_call(&params.call_id, now)
            .await
            .filter(|call| !call.state.is_terminal())
            .ok_or(CallServiceError::CallNotFound)?;
        let peer = call
            .peer_of(actor)
            .ok_or(CallServiceError::NotParty)?
            .clone();

        self.relay(&peer, MsgType::CallIceCandidate, &params).await;
        Ok(())
    }

    /// `call_end` from either party. Writes the history row and relays the
    /// reason to the peer.
    #[instrument(skip_all, fields(call_id = %params.call_id))]
    pub async fn end(
        &self,
        params: CallSignalParams,
        actor: &WhisperId,
    ) -> Result<(), CallServiceError> {
        self.verify_signal(&params, MsgType::CallEnd, actor).await?;
        let now = self.clock.now();

        let call = self
            .volatile
            .get_live_call(&params.call_id, now)
            .await
            .ok_or(CallServiceError::CallNotFound)?;
        let peer = call
            .peer_of(actor)
            .ok_or(CallServiceError::NotParty)?
            .clone();

        let reason = params.reason.unwrap_or(CallEndReason::Ended);
        if let Some(call) = self.volatile.remove_live_call(&params.call_id).await {
            self.store.insert_call(&call.into_record(now, reason)).await?;
        }

        self.relay(&peer, MsgType::CallEnd, &params).await;
        Ok(())
    }

    /// Fired by the timeout wheel. Ends the call with `reason: timeout`
    /// towards both parties if it is still in a non-terminal state.
    #[instrument(skip(self))]
    pub async fn handle_timeout(&self, call_id: &CallId) {
        let now = self.clock.now();
        let Some(call) = self.volatile.remove_live_call(call_id).await else {
            return;
        };
        if call.state.is_terminal() {
            return;
        }
        // Fired ahead of the deadline (clock drift): put the entry back
        // and let the wheel retry.
        let deadline_ms = call.created_at.as_millis() + CALL_TTL_SECS * 1000;
        if now.as_millis() < deadline_ms {
            self.volatile.put_live_call(call, now, CALL_TTL_SECS).await;
            return;
        }
        info!(%call_id, state = call.state.as_str(), "call timed out");

        if let Err(e) = self
            .store
            .insert_call(&call.clone().into_record(now, CallEndReason::Timeout))
            .await
        {
            tracing::error!(error = %e, "failed to write call history row");
        }

        let notice = CallEndNotice::timeout(call.call_id.clone(), now);
        let frame = OutboundFrame::new(MsgType::CallEnd, &notice);
        let _ = self.notifier.notify(&call.caller_id, frame.clone()).await;
        let _ = self.notifier.notify(&call.callee_id, frame).await;
    }

    /// Mint time-bound TURN credentials for the authenticated user.
    /// Nothing is stored.
    pub async fn turn_credentials(
        &self,
        user: &WhisperId,
    ) -> Result<TurnCredentials, CallServiceError> {
        Ok(mint_turn_credentials(
            &self.turn.shared_secret,
            &self.turn.urls,
            user,
            self.clock.now(),
            self.turn.credential_ttl_secs,
        ))
    }
}
