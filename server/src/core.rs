// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The bundle of services the gateway dispatches into. Plain constructor
//! wiring; no service reaches into another's internals.

use std::sync::Arc;

use whisperbackend::auth_service::AuthService;
use whisperbackend::call_service::CallService;
use whisperbackend::clock::Clock;
use whisperbackend::group_service::GroupService;
use whisperbackend::notifier::ConnectionNotifier;
use whisperbackend::rate_limiter::RateLimiter;
use whisperbackend::router::MessageRouter;
use whisperbackend::settings::LimitSettings;
use whisperbackend::store::{DurableStore, VolatileStore};

use crate::presence::PresenceBroker;

pub struct AppCore {
    pub auth: Arc<AuthService>,
    pub router: Arc<MessageRouter>,
    pub groups: Arc<GroupService>,
    pub calls: Arc<CallService>,
    pub limiter: Arc<RateLimiter>,
    pub presence: Arc<PresenceBroker>,
    pub store: Arc<dyn DurableStore>,
    pub volatile: Arc<dyn VolatileStore>,
    pub clock: Arc<dyn Clock>,
    pub notifier: Arc<dyn ConnectionNotifier>,
    pub limits: LimitSettings,
}
