// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Services of the whisper homeserver.
//!
//! Each service exposes a narrow async API over the [`store::DurableStore`]
//! and [`store::VolatileStore`] seams; side effects towards live
//! connections go through the [`notifier::ConnectionNotifier`] seam which
//! the websocket gateway implements. Nothing in this crate touches a
//! socket.

pub mod auth_service;
pub mod call_service;
pub mod clock;
pub mod errors;
pub mod group_service;
pub mod notifier;
pub mod push_dispatcher;
pub mod rate_limiter;
pub mod router;
pub mod settings;
pub mod store;
