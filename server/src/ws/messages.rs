// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Actor messages exchanged between the connection actors and the
//! dispatch (connection registry) actor.

use actix::prelude::*;
use tokio::sync::mpsc;

use whispertypes::codec::OutboundFrame;
use whispertypes::identifiers::{ConnectionId, WhisperId};

/// Frames and control messages travelling towards one connection's
/// writer. The channel is bounded; overflow closes the connection.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    Frame(OutboundFrame),
    Close { code: u16, reason: String },
}

/// Out-of-band close, used when the outbound queue itself is full.
#[derive(Message, Debug, Clone)]
#[rtype(result = "()")]
pub struct CloseConnection {
    pub code: u16,
    pub reason: String,
}

/// Register a freshly upgraded, still unauthenticated connection.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Connect {
    pub conn_id: ConnectionId,
    pub tx: mpsc::Sender<OutboundMessage>,
    pub close_addr: Recipient<CloseConnection>,
}

/// Associate a connection with the account its session resolved to.
#[derive(Message, Debug)]
#[rtype(result = "()")]
pub struct Bind {
    pub conn_id: ConnectionId,
    pub whisper_id: WhisperId,
}

/// Remove a connection. The reply names the user that just lost their
/// last live connection, if any.
#[derive(Message, Debug)]
#[rtype(result = "Option<WhisperId>")]
pub struct Disconnect {
    pub conn_id: ConnectionId,
}

/// Deliver a frame to every live connection of a user. Replies whether at
/// least one connection accepted it.
#[derive(Message, Debug)]
#[rtype(result = "bool")]
pub struct SendToUser {
    pub whisper_id: WhisperId,
    pub frame: OutboundFrame,
}

/// Send `force_logout` to the user's connections and close them with
/// code 1000.
#[derive(Message, Debug)]
#[rtype(result = "()")]
pub struct ForceLogout {
    pub whisper_id: WhisperId,
    pub reason: String,
}

/// Late-bound hook invoked when a user loses their last connection.
/// Breaks the construction cycle between the registry and the presence
/// broker.
#[derive(Message)]
#[rtype(result = "()")]
pub struct SetOfflineHook {
    pub hook: std::sync::Arc<dyn Fn(WhisperId) + Send + Sync>,
}
