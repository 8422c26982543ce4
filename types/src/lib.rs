// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Shared types of the whisper homeserver: identifiers, timestamps, the
//! JSON wire protocol and the crypto seams (canonical signing strings,
//! Ed25519 verification, TURN credential minting).
//!
//! This crate performs no I/O. Everything here is used by both the backend
//! services and the websocket gateway.

pub mod codec;
pub mod crypto;
pub mod errors;
pub mod identifiers;
pub mod messages;
pub mod time;

/// Version of the client<->server framing protocol.
pub const PROTOCOL_VERSION: u16 = 1;

/// Version of the client-side crypto suite the server is able to relay.
pub const CRYPTO_VERSION: u16 = 1;
