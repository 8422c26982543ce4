// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use whispertypes::identifiers::{DeviceId, WhisperId};
use whispertypes::messages::client_auth::Platform;
use whispertypes::messages::push_token::PushTarget;
use whispertypes::time::TimeStamp;

/// Push routing material for one device. Upserts are idempotent; clients
/// may re-send the same tokens at any frequency within rate limits.
#[derive(Clone, Debug)]
#[cfg_attr(test, derive(PartialEq))]
pub struct PushTokenRecord {
    pub whisper_id: WhisperId,
    pub device_id: DeviceId,
    pub platform: Platform,
    pub push_token: Option<String>,
    /// iOS only.
    pub voip_token: Option<String>,
    pub updated_at: TimeStamp,
}

impl PushTokenRecord {
    pub fn as_target(&self) -> PushTarget {
        PushTarget {
            platform: self.platform,
            push_token: self.push_token.clone(),
            voip_token: self.voip_token.clone(),
        }
    }
}
