// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The websocket gateway.
//!
//! One actor per connection: the actor mailbox is the reader, a bounded
//! mpsc channel drained into the socket is the writer. Frames are handed
//! to the pipeline as spawned futures, so handler completion may
//! interleave across connections while outbound delivery per connection
//! stays FIFO.

pub mod dispatch;
pub(crate) mod messages;

use std::sync::Arc;

use actix::clock::Instant;
use actix::prelude::*;
use actix_web::{
    web::{self, Data},
    HttpRequest, HttpResponse, Responder,
};
use actix_web_actors::ws::{self, CloseCode, CloseReason};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio::time::Duration;
use tracing::{info, warn};

use whispertypes::codec::OutboundFrame;
use whispertypes::errors::{close_codes, ErrorCode, WireError};
use whispertypes::identifiers::{ConnectionId, WhisperId};
use whispertypes::messages::{MsgType, RateClass};

use crate::core::AppCore;
use crate::pipeline::{process_frame, Outcome};
use dispatch::Dispatch;
use messages::{Bind, CloseConnection, Connect, Disconnect, OutboundMessage};

/// Low-level ping cadence.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Grace period for the pong after a ping.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

fn close_reason(code: u16, description: String) -> CloseReason {
    let code = match code {
        close_codes::NORMAL => CloseCode::Normal,
        close_codes::POLICY_VIOLATION => CloseCode::Policy,
        close_codes::MESSAGE_TOO_BIG => CloseCode::Size,
        close_codes::INTERNAL => CloseCode::Error,
        other => CloseCode::Other(other),
    };
    CloseReason {
        code,
        description: Some(description),
    }
}

/// The websocket actor. It owns the socket and its outbound queue for the
/// whole connection lifetime.
pub struct WsConnection {
    conn_id: ConnectionId,
    ip: String,
    heartbeat: Instant,
    core: Arc<AppCore>,
    dispatch_addr: Addr<Dispatch>,
    bound: Option<WhisperId>,
}

impl WsConnection {
    pub(crate) fn new(ip: String, core: Arc<AppCore>, dispatch_addr: Addr<Dispatch>) -> Self {
        WsConnection {
            conn_id: ConnectionId::random(),
            ip,
            heartbeat: Instant::now(),
            core,
            dispatch_addr,
            bound: None,
        }
    }

    fn heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.heartbeat) > HEARTBEAT_INTERVAL + CLIENT_TIMEOUT {
                info!("disconnecting websocket because heartbeat failed");
                ctx.close(Some(close_reason(
                    close_codes::INTERNAL,
                    "heartbeat timeout".to_owned(),
                )));
                ctx.stop();
                return;
            }
            ctx.ping(b"whisper");
        });
    }

    fn send_error_frame(
        ctx: &mut ws::WebsocketContext<Self>,
        code: ErrorCode,
        message: &str,
    ) {
        let error = WireError::new(code, message);
        ctx.text(OutboundFrame::new(MsgType::Error, &error).encode());
    }

    fn process(&self, raw: String, ctx: &mut ws::WebsocketContext<Self>) {
        let core = self.core.clone();
        let ip = self.ip.clone();
        let fut = async move { process_frame(&core, &ip, &raw).await }
            .into_actor(self)
            .map(|outcome, act, ctx| act.apply_outcome(outcome, ctx));
        ctx.spawn(fut);
    }

    fn apply_outcome(&mut self, outcome: Outcome, ctx: &mut ws::WebsocketContext<Self>) {
        if let Some(whisper_id) = outcome.bind {
            if self.bound.as_ref() != Some(&whisper_id) {
                self.bound = Some(whisper_id.clone());
                self.dispatch_addr.do_send(Bind {
                    conn_id: self.conn_id,
                    whisper_id,
                });
            }
        }
        for frame in outcome.frames {
            ctx.text(frame.encode());
        }
        if let Some((code, reason)) = outcome.close {
            ctx.close(Some(close_reason(code, reason)));
            ctx.stop();
        }
    }
}

impl Actor for WsConnection {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.heartbeat(ctx);

        // Writer half: a bounded queue drained into the socket.
        let (tx, rx) = mpsc::channel(self.core.limits.outbound_queue_frames);
        ctx.add_stream(ReceiverStream::new(rx));
        self.dispatch_addr
            .send(Connect {
                conn_id: self.conn_id,
                tx,
                close_addr: ctx.address().recipient(),
            })
            .into_actor(self)
            .then(|res, _, ctx| {
                if res.is_err() {
                    warn!("error registering connection with dispatch");
                    ctx.stop();
                }
                actix::fut::ready(())
            })
            .wait(ctx);

        // Per-IP connection rate limit; refusal sends one error frame and
        // closes with 4029.
        let core = self.core.clone();
        let ip = self.ip.clone();
        async move {
            let now = core.clock.now();
            core.limiter.allow_ip(&ip, RateClass::Connect, now).await
        }
        .into_actor(self)
        .map(|allowed, _, ctx| {
            if !allowed {
                Self::send_error_frame(ctx, ErrorCode::RateLimited, "connection rate exceeded");
                ctx.close(Some(close_reason(
                    close_codes::RATE_LIMITED,
                    "rate limited".to_owned(),
                )));
                ctx.stop();
            }
        })
        .wait(ctx);
    }

    fn stopping(&mut self, _: &mut Self::Context) -> Running {
        self.dispatch_addr.do_send(Disconnect {
            conn_id: self.conn_id,
        });
        Running::Stop
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsConnection {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        let Ok(ws_msg) = msg else {
            ctx.stop();
            return;
        };
        match ws_msg {
            ws::Message::Text(text) => self.process(text.to_string(), ctx),
            ws::Message::Binary(bytes) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => self.process(text, ctx),
                Err(_) => {
                    Self::send_error_frame(ctx, ErrorCode::InvalidPayload, "frame is not UTF-8");
                }
            },
            ws::Message::Ping(bytes) => {
                self.heartbeat = Instant::now();
                ctx.pong(&bytes);
            }
            ws::Message::Pong(_) => {
                self.heartbeat = Instant::now();
            }
            ws::Message::Close(reason) => {
                tracing::trace!(?reason, "received close");
                ctx.close(reason);
                ctx.stop();
            }
            ws::Message::Continuation(_) => {
                tracing::trace!("continuation frames are not supported");
                ctx.stop();
            }
            ws::Message::Nop => {}
        }
    }
}

/// Outbound frames fanned in from the registry.
impl StreamHandler<OutboundMessage> for WsConnection {
    fn handle(&mut self, msg: OutboundMessage, ctx: &mut Self::Context) {
        match msg {
            OutboundMessage::Frame(frame) => ctx.text(frame.encode()),
            OutboundMessage::Close { code, reason } => {
                ctx.close(Some(close_reason(code, reason)));
                ctx.stop();
            }
        }
    }
}

impl Handler<CloseConnection> for WsConnection {
    type Result = ();

    fn handle(&mut self, msg: CloseConnection, ctx: &mut Self::Context) {
        ctx.close(Some(close_reason(msg.code, msg.reason)));
        ctx.stop();
    }
}

/// Upgrade a HTTP connection to a websocket connection.
#[tracing::instrument(name = "Upgrade connection to web socket", skip_all)]
pub(crate) async fn upgrade_connection(
    req: HttpRequest,
    stream: web::Payload,
    core: Data<Arc<AppCore>>,
    dispatch_addr: Data<Addr<Dispatch>>,
) -> impl Responder {
    let ip = req
        .connection_info()
        .realip_remote_addr()
        .map(|addr| addr.split(':').next().unwrap_or(addr).to_owned())
        .unwrap_or_else(|| "unknown".to_owned());

    let connection = WsConnection::new(ip, core.get_ref().clone(), dispatch_addr.get_ref().clone());
    // The protocol-level frame cap sits above the 512 KB payload cap so
    // oversized frames are answered with INVALID_PAYLOAD instead of a
    // codec-level close.
    match ws::WsResponseBuilder::new(connection, &req, stream)
        .frame_size(2 * whispertypes::codec::MAX_FRAME_BYTES)
        .start()
    {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, "error upgrading connection");
            HttpResponse::InternalServerError().finish()
        }
    }
}
