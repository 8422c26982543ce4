// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use whispertypes::identifiers::{DeviceId, SessionToken, WhisperId};
use whispertypes::messages::client_auth::Platform;
use whispertypes::time::TimeStamp;

/// Sessions live for seven days; at most one is active per account.
pub const SESSION_TTL_DAYS: i64 = 7;

/// A refresh without a full re-proof is allowed once less than this much
/// lifetime remains.
pub const REFRESH_WINDOW_HOURS: i64 = 24;

#[derive(Clone, Debug)]
#[cfg_attr(test, derive(PartialEq))]
pub struct SessionRecord {
    pub session_token: SessionToken,
    pub whisper_id: WhisperId,
    pub device_id: DeviceId,
    pub platform: Platform,
    pub created_at: TimeStamp,
    pub expires_at: TimeStamp,
}

impl SessionRecord {
    pub fn is_live_at(&self, now: TimeStamp) -> bool {
        !self.expires_at.has_expired_at(now)
    }
}
