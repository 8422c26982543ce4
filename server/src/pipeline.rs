// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The per-frame pipeline: parse → validate → auth gate → rate limit →
//! handler, short-circuiting on the first failure. Every failure becomes
//! a single `error` frame echoing the inbound `requestId`.

use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use whisperbackend::auth_service::session_record::SessionRecord;
use whispertypes::codec::{CodecError, InboundFrame, OutboundFrame};
use whispertypes::errors::{close_codes, ErrorCode, WireError};
use whispertypes::identifiers::{SessionToken, WhisperId};
use whispertypes::messages::client_auth::{
    LogoutParams, RegisterBeginParams, RegisterProofParams, SessionRefreshParams,
    UpdateTokensParams,
};
use whispertypes::messages::client_call::{CallSignalParams, GetTurnCredentialsParams};
use whispertypes::messages::client_group::{GroupCreateParams, GroupSendParams, GroupUpdateParams};
use whispertypes::messages::client_message::{
    DeliveryReceiptParams, FetchPendingParams, SendMessageParams,
};
use whispertypes::messages::presence::{PingParams, Pong, TypingNotification, TypingParams};
use whispertypes::messages::{ClientVersions, MsgType};

use crate::core::AppCore;

/// Handlers answer within this deadline or the frame fails with
/// INTERNAL_ERROR.
const HANDLER_DEADLINE: Duration = Duration::from_secs(2);

/// Registration proof involves the displacement fan-out and gets a wider
/// deadline.
const PROOF_DEADLINE: Duration = Duration::from_secs(10);

/// What the connection actor should do after a frame was processed.
#[derive(Debug, Default)]
pub struct Outcome {
    /// Direct responses for this connection, in order.
    pub frames: Vec<OutboundFrame>,
    /// Bind the connection to this account (auth succeeded).
    pub bind: Option<WhisperId>,
    /// Close the connection with (code, reason) after flushing.
    pub close: Option<(u16, String)>,
}

impl Outcome {
    fn error(code: ErrorCode, message: impl Into<String>, request_id: Option<String>) -> Self {
        let error = WireError::new(code, message).with_request_id(request_id.clone());
        Outcome {
            frames: vec![OutboundFrame::new(MsgType::Error, &error).with_request_id(request_id)],
            ..Default::default()
        }
    }

    fn reply(frame: OutboundFrame) -> Self {
        Outcome {
            frames: vec![frame],
            ..Default::default()
        }
    }
}

/// Minimal probe to pull the session token out of any authenticated
/// payload before the full per-type decode runs.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionProbe {
    #[serde(default)]
    session_token: Option<SessionToken>,
}

pub async fn process_frame(core: &AppCore, ip: &str, raw: &str) -> Outcome {
    // 1/2/3: size cap, JSON parse, envelope structure, known type.
    let (msg_type, frame) = match InboundFrame::decode(raw) {
        Ok(decoded) => decoded,
        Err(CodecError::UnknownType(t)) => {
            return Outcome::error(
                ErrorCode::InvalidPayload,
                format!("unknown frame type `{t}`"),
                None,
            );
        }
        Err(e) => {
            return Outcome::error(ErrorCode::InvalidPayload, e.to_string(), None);
        }
    };
    let request_id = frame.request_id.clone();

    if !msg_type.is_client_to_server() {
        return Outcome::error(
            ErrorCode::InvalidPayload,
            "frame type is not accepted from clients",
            request_id,
        );
    }

    // 5: auth gate.
    let session = if msg_type.requires_auth() {
        let probe: SessionProbe = match frame.payload_as() {
            Ok(probe) => probe,
            Err(_) => {
                return Outcome::error(ErrorCode::InvalidPayload, "malformed payload", request_id)
            }
        };
        let Some(token) = probe.session_token else {
            return Outcome::error(ErrorCode::NotRegistered, "session token missing", request_id);
        };
        match core.auth.validate_session(&token).await {
            Ok(Some(session)) => Some(session),
            Ok(None) => {
                return Outcome::error(
                    ErrorCode::AuthFailed,
                    "session unknown or expired",
                    request_id,
                );
            }
            Err(e) => {
                warn!(error = %e, "session validation failed");
                return Outcome::error(ErrorCode::InternalError, "internal error", request_id);
            }
        }
    } else {
        None
    };

    // 6: composite rate limit.
    let now = core.clock.now();
    let user = session.as_ref().map(|s| &s.whisper_id);
    if !core
        .limiter
        .allow(ip, user, msg_type.rate_class(), now)
        .await
    {
        return Outcome::error(ErrorCode::RateLimited, "rate limit exceeded", request_id);
    }

    // Any authenticated frame refreshes presence.
    if let Some(session) = &session {
        core.presence.on_activity(&session.whisper_id).await;
    }

    // 7: handler dispatch, under a deadline.
    let deadline = match msg_type {
        MsgType::RegisterProof => PROOF_DEADLINE,
        _ => HANDLER_DEADLINE,
    };
    match tokio::time::timeout(deadline, dispatch(core, msg_type, &frame, session)).await {
        Ok(outcome) => outcome,
        Err(_) => {
            warn!(frame_type = %msg_type, "handler deadline exceeded");
            Outcome::error(ErrorCode::InternalError, "handler timed out", request_id)
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(
    frame: &InboundFrame,
) -> Result<T, WireError> {
    frame
        .payload_as()
        .map_err(|_| WireError::new(ErrorCode::InvalidPayload, "malformed payload"))
}

fn reply_to(request_id: &Option<String>, frame_type: MsgType, payload: &impl serde::Serialize) -> OutboundFrame {
    OutboundFrame::new(frame_type, payload).with_request_id(request_id.clone())
}

async fn dispatch(
    core: &AppCore,
    msg_type: MsgType,
    frame: &InboundFrame,
    session: Option<SessionRecord>,
) -> Outcome {
    let request_id = frame.request_id.clone();
    match run_handler(core, msg_type, frame, session).await {
        Ok(outcome) => outcome,
        Err(error) => {
            let code = error.code;
            Outcome::error(code, error.message, request_id)
        }
    }
}

async fn run_handler(
    core: &AppCore,
    msg_type: MsgType,
    frame: &InboundFrame,
    session: Option<SessionRecord>,
) -> Result<Outcome, WireError> {
    let request_id = &frame.request_id;

    match msg_type {
        MsgType::RegisterBegin => {
            let params: RegisterBeginParams = decode(frame)?;
            let challenge = core
                .auth
                .register_begin(params)
                .await
                .map_err(|e| WireError::new(e.error_code(), e.to_string()))?;
            Ok(Outcome::reply(reply_to(
                request_id,
                MsgType::RegisterChallenge,
                &challenge,
            )))
        }
        MsgType::RegisterProof => {
            let params: RegisterProofParams = decode(frame)?;
            let ack = core
                .auth
                .register_proof(params)
                .await
                .map_err(|e| WireError::new(e.error_code(), e.to_string()))?;
            core.presence.on_activity(&ack.whisper_id).await;
            let whisper_id = ack.whisper_id.clone();
            let mut outcome =
                Outcome::reply(reply_to(request_id, MsgType::RegisterAck, &ack));
            outcome.bind = Some(whisper_id);
            Ok(outcome)
        }
        MsgType::SessionRefresh => {
            let params: SessionRefreshParams = decode(frame)?;
            check_versions(params.protocol_version, params.crypto_version)?;
            let ack = core
                .auth
                .refresh_session(&params.session_token)
                .await
                .map_err(|e| WireError::new(e.error_code(), e.to_string()))?;
            Ok(Outcome::reply(reply_to(
                request_id,
                MsgType::SessionRefreshAck,
                &ack,
            )))
        }
        MsgType::Logout => {
            let params: LogoutParams = decode(frame)?;
            check_versions(params.protocol_version, params.crypto_version)?;
            core.auth
                .logout(&params.session_token)
                .await
                .map_err(|e| WireError::new(e.error_code(), e.to_string()))?;
            Ok(Outcome {
                close: Some((close_codes::NORMAL, "logout".to_owned())),
                ..Default::default()
            })
        }
        MsgType::UpdateTokens => {
            let params: UpdateTokensParams = decode(frame)?;
            let session = session.expect("auth gate ran");
            let updated = core
                .auth
                .update_tokens(&session, &params)
                .await
                .map_err(|e| WireError::new(e.error_code(), e.to_string()))?;
            Ok(Outcome::reply(reply_to(
                request_id,
                MsgType::TokensUpdated,
                &updated,
            )))
        }
        MsgType::SendMessage => {
            let params: SendMessageParams = decode(frame)?;
            let session = session.expect("auth gate ran");
            let accepted = core
                .router
                .route_direct(params, &session.whisper_id)
                .await
                .map_err(|e| WireError::new(e.error_code(), e.to_string()))?;
            Ok(Outcome::reply(reply_to(
                request_id,
                MsgType::MessageAccepted,
                &accepted,
            )))
        }
        MsgType::DeliveryReceipt => {
            let params: DeliveryReceiptParams = decode(frame)?;
            let session = session.expect("auth gate ran");
            core.router
                .handle_receipt(params, &session.whisper_id)
                .await
                .map_err(|e| WireError::new(e.error_code(), e.to_string()))?;
            Ok(Outcome::default())
        }
        MsgType::FetchPending => {
            let params: FetchPendingParams = decode(frame)?;
            let session = session.expect("auth gate ran");
            let page = core
                .router
                .fetch_pending(params, &session.whisper_id)
                .await
                .map_err(|e| WireError::new(e.error_code(), e.to_string()))?;
            Ok(Outcome::reply(reply_to(
                request_id,
                MsgType::PendingMessages,
                &page,
            )))
        }
        MsgType::GroupCreate => {
            let params: GroupCreateParams = decode(frame)?;
            let session = session.expect("auth gate ran");
            let event = core
                .groups
                .create(params, &session.whisper_id)
                .await
                .map_err(|e| WireError::new(e.error_code(), e.to_string()))?;
            Ok(Outcome::reply(reply_to(request_id, MsgType::GroupEvent, &event)))
        }
        MsgType::GroupUpdate => {
            let params: GroupUpdateParams = decode(frame)?;
            let session = session.expect("auth gate ran");
            let event = core
                .groups
                .update(params, &session.whisper_id)
                .await
                .map_err(|e| WireError::new(e.error_code(), e.to_string()))?;
            Ok(Outcome::reply(reply_to(request_id, MsgType::GroupEvent, &event)))
        }
        MsgType::GroupSendMessage => {
            let params: GroupSendParams = decode(frame)?;
            let session = session.expect("auth gate ran");
            let accepted = core
                .groups
                .send(params, &session.whisper_id)
                .await
                .map_err(|e| WireError::new(e.error_code(), e.to_string()))?;
            Ok(Outcome::reply(reply_to(
                request_id,
                MsgType::MessageAccepted,
                &accepted,
            )))
        }
        MsgType::GetTurnCredentials => {
            let params: GetTurnCredentialsParams = decode(frame)?;
            check_versions(params.protocol_version, params.crypto_version)?;
            let session = session.expect("auth gate ran");
            let credentials = core
                .calls
                .turn_credentials(&session.whisper_id)
                .await
                .map_err(|e| WireError::new(e.error_code(), e.to_string()))?;
            Ok(Outcome::reply(reply_to(
                request_id,
                MsgType::TurnCredentials,
                &credentials,
            )))
        }
        MsgType::CallInitiate
        | MsgType::CallRinging
        | MsgType::CallAnswer
        | MsgType::CallIceCandidate
        | MsgType::CallEnd => {
            let params: CallSignalParams = decode(frame)?;
            let session = session.expect("auth gate ran");
            let actor = &session.whisper_id;
            let result = match msg_type {
                MsgType::CallInitiate => core.calls.initiate(params, actor).await,
                MsgType::CallRinging => core.calls.ringing(params, actor).await,
                MsgType::CallAnswer => core.calls.answer(params, actor).await,
                MsgType::CallIceCandidate => core.calls.ice_candidate(params, actor).await,
                MsgType::CallEnd => core.calls.end(params, actor).await,
                _ => unreachable!(),
            };
            result.map_err(|e| WireError::new(e.error_code(), e.to_string()))?;
            Ok(Outcome::default())
        }
        MsgType::Typing => {
            let params: TypingParams = decode(frame)?;
            let session = session.expect("auth gate ran");
            handle_typing(core, params, &session.whisper_id).await?;
            Ok(Outcome::default())
        }
        MsgType::Ping => {
            let params: PingParams = decode(frame)?;
            // Pre-auth connections may keep alive; presence only refreshes
            // for a live session.
            if let Some(token) = &params.session_token {
                if let Ok(Some(session)) = core.auth.validate_session(token).await {
                    core.presence.on_activity(&session.whisper_id).await;
                }
            }
            Ok(Outcome::reply(reply_to(
                request_id,
                MsgType::Pong,
                &Pong {
                    server_time: core.clock.now(),
                },
            )))
        }
        // Remaining types are server-to-client and were rejected above.
        _ => Err(WireError::new(
            ErrorCode::InvalidPayload,
            "frame type is not accepted from clients",
        )),
    }
}

fn check_versions(protocol: u16, crypto: u16) -> Result<(), WireError> {
    let versions = ClientVersions {
        protocol_version: protocol,
        crypto_version: crypto,
    };
    if !versions.is_supported() {
        return Err(WireError::new(
            ErrorCode::InvalidPayload,
            "unsupported protocol or crypto version",
        ));
    }
    Ok(())
}

async fn handle_typing(
    core: &AppCore,
    params: TypingParams,
    sender: &WhisperId,
) -> Result<(), WireError> {
    check_versions(params.protocol_version, params.crypto_version)?;
    if !params.is_well_formed() {
        return Err(WireError::new(
            ErrorCode::InvalidPayload,
            "typing addresses exactly one of `to` or `groupId`",
        ));
    }

    let notification = TypingNotification {
        from: sender.clone(),
        group_id: params.group_id.clone(),
    };
    let frame = OutboundFrame::new(MsgType::TypingNotification, &notification);

    if let Some(to) = &params.to {
        // Typing indicators are fire-and-forget.
        let _ = core.notifier.notify(to, frame).await;
        return Ok(());
    }

    let group_id = params.group_id.as_ref().expect("well-formed");
    let member = core
        .store
        .active_member(group_id, sender)
        .await
        .map_err(|_| WireError::new(ErrorCode::InternalError, "internal error"))?;
    if member.is_none() {
        return Err(WireError::new(
            ErrorCode::Forbidden,
            "not an active member of the group",
        ));
    }
    let members = core
        .store
        .active_members(group_id)
        .await
        .map_err(|_| WireError::new(ErrorCode::InternalError, "internal error"))?;
    for member in members {
        if &member.whisper_id == sender {
            continue;
        }
        let _ = core.notifier.notify(&member.whisper_id, frame.clone()).await;
    }
    Ok(())
}
