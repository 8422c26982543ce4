// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The connection registry.
//!
//! A single actor owns the `connId → writer` and `whisperId → connIds`
//! maps. Map writes serialize through the actor mailbox; the backend
//! services reach it through [`DispatchNotifier`], which implements the
//! backend's `ConnectionNotifier` seam. During session displacement both
//! the old and the new socket may be registered briefly; the old one is
//! closed right after its `force_logout` frame.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use actix::prelude::*;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{info, warn};

use whisperbackend::notifier::{ConnectionNotifier, NotifierError};
use whispertypes::codec::OutboundFrame;
use whispertypes::errors::close_codes;
use whispertypes::identifiers::{ConnectionId, WhisperId};
use whispertypes::messages::client_auth::ForceLogout as ForceLogoutPayload;
use whispertypes::messages::MsgType;

use super::messages::{
    Bind, CloseConnection, Connect, Disconnect, ForceLogout, OutboundMessage, SendToUser,
    SetOfflineHook,
};

struct Registration {
    tx: mpsc::Sender<OutboundMessage>,
    close_addr: Recipient<CloseConnection>,
}

/// Dispatch for all connections.
#[derive(Default)]
pub struct Dispatch {
    connections: HashMap<ConnectionId, Registration>,
    users: HashMap<WhisperId, HashSet<ConnectionId>>,
    bound: HashMap<ConnectionId, WhisperId>,
    offline_hook: Option<Arc<dyn Fn(WhisperId) + Send + Sync>>,
}

impl Dispatch {
    /// Push a frame into one connection's bounded writer queue. Overflow
    /// closes the connection (backpressure) and drops it from the maps.
    fn push(&mut self, conn_id: &ConnectionId, message: OutboundMessage) -> bool {
        let Some(registration) = self.connections.get(conn_id) else {
            return false;
        };
        match registration.tx.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(%conn_id, "outbound queue full, closing connection");
                registration.close_addr.do_send(CloseConnection {
                    code: close_codes::MESSAGE_TOO_BIG,
                    reason: "backpressure".to_owned(),
                });
                self.drop_and_hook(conn_id);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.drop_and_hook(conn_id);
                false
            }
        }
    }

    fn drop_and_hook(&mut self, conn_id: &ConnectionId) {
        if let Some(whisper_id) = self.drop_connection(conn_id) {
            if let Some(hook) = &self.offline_hook {
                hook(whisper_id);
            }
        }
    }

    fn drop_connection(&mut self, conn_id: &ConnectionId) -> Option<WhisperId> {
        self.connections.remove(conn_id);
        let whisper_id = self.bound.remove(conn_id)?;
        let Some(conns) = self.users.get_mut(&whisper_id) else {
            return None;
        };
        conns.remove(conn_id);
        if conns.is_empty() {
            self.users.remove(&whisper_id);
            return Some(whisper_id);
        }
        None
    }
}

impl Actor for Dispatch {
    type Context = Context<Self>;
}

impl Handler<Connect> for Dispatch {
    type Result = ();

    fn handle(&mut self, msg: Connect, _: &mut Self::Context) {
        self.connections.insert(
            msg.conn_id,
            Registration {
                tx: msg.tx,
                close_addr: msg.close_addr,
            },
        );
    }
}

impl Handler<Bind> for Dispatch {
    type Result = ();

    fn handle(&mut self, msg: Bind, _: &mut Self::Context) {
        self.bound.insert(msg.conn_id, msg.whisper_id.clone());
        self.users
            .entry(msg.whisper_id)
            .or_default()
            .insert(msg.conn_id);
    }
}

impl Handler<Disconnect> for Dispatch {
    type Result = Option<WhisperId>;

    fn handle(&mut self, msg: Disconnect, _: &mut Self::Context) -> Option<WhisperId> {
        let went_offline = self.drop_connection(&msg.conn_id);
        if let (Some(whisper_id), Some(hook)) = (&went_offline, &self.offline_hook) {
            hook(whisper_id.clone());
        }
        went_offline
    }
}

impl Handler<SendToUser> for Dispatch {
    type Result = bool;

    fn handle(&mut self, msg: SendToUser, _: &mut Self::Context) -> bool {
        let Some(conns) = self.users.get(&msg.whisper_id) else {
            return false;
        };
        let conns: Vec<ConnectionId> = conns.iter().copied().collect();
        let mut delivered = false;
        for conn_id in conns {
            delivered |= self.push(&conn_id, OutboundMessage::Frame(msg.frame.clone()));
        }
        delivered
    }
}

impl Handler<ForceLogout> for Dispatch {
    type Result = ();

    fn handle(&mut self, msg: ForceLogout, _: &mut Self::Context) {
        let Some(conns) = self.users.remove(&msg.whisper_id) else {
            return;
        };
        info!(whisper_id = %msg.whisper_id, connections = conns.len(), "forcing logout");
        let frame = OutboundFrame::new(
            MsgType::ForceLogout,
            &ForceLogoutPayload {
                reason: msg.reason.clone(),
            },
        );
        for conn_id in conns {
            self.push(&conn_id, OutboundMessage::Frame(frame.clone()));
            self.push(
                &conn_id,
                OutboundMessage::Close {
                    code: close_codes::NORMAL,
                    reason: msg.reason.clone(),
                },
            );
            self.bound.remove(&conn_id);
        }
    }
}

impl Handler<SetOfflineHook> for Dispatch {
    type Result = ();

    fn handle(&mut self, msg: SetOfflineHook, _: &mut Self::Context) {
        self.offline_hook = Some(msg.hook);
    }
}

/// Wrapper around the dispatch address implementing the backend's
/// notifier seam.
#[derive(Clone)]
pub struct DispatchNotifier {
    pub dispatch_addr: Addr<Dispatch>,
}

impl DispatchNotifier {
    pub fn new(dispatch_addr: Addr<Dispatch>) -> Self {
        DispatchNotifier { dispatch_addr }
    }
}

#[async_trait]
impl ConnectionNotifier for DispatchNotifier {
    async fn notify(
        &self,
        whisper_id: &WhisperId,
        frame: OutboundFrame,
    ) -> Result<(), NotifierError> {
        let delivered = self
            .dispatch_addr
            .send(SendToUser {
                whisper_id: whisper_id.clone(),
                frame,
            })
            .await
            // A MailboxError means the registry is gone (shutdown).
            .map_err(|_| NotifierError::ClientNotFound)?;
        if delivered {
            Ok(())
        } else {
            Err(NotifierError::ClientNotFound)
        }
    }

    async fn force_logout(&self, whisper_id: &WhisperId, reason: &str) {
        let _ = self
            .dispatch_addr
            .send(ForceLogout {
                whisper_id: whisper_id.clone(),
                reason: reason.to_owned(),
            })
            .await;
    }
}
