// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use whispertypes::identifiers::{ChallengeId, WhisperId};
use whispertypes::time::TimeStamp;

pub const CHALLENGE_TTL_SECS: i64 = 60;

pub const CHALLENGE_LEN: usize = 32;

/// A registration challenge. Lives in the volatile store under
/// `challenge:<id>` and is consumed atomically on proof; a second proof
/// attempt finds nothing.
#[derive(Clone, Debug)]
#[cfg_attr(test, derive(PartialEq))]
pub struct ChallengeRecord {
    pub challenge_id: ChallengeId,
    /// Present on the account recovery path only.
    pub whisper_id: Option<WhisperId>,
    pub challenge_bytes: Vec<u8>,
    pub expires_at: TimeStamp,
}

impl ChallengeRecord {
    pub fn is_live_at(&self, now: TimeStamp) -> bool {
        !self.expires_at.has_expired_at(now)
    }
}
