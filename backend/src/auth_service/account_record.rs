// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use serde::{Deserialize, Serialize};
use whispertypes::crypto::{EncPublicKey, SignPublicKey};
use whispertypes::identifiers::WhisperId;
use whispertypes::time::TimeStamp;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Banned,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Banned => "banned",
        }
    }
}

impl std::str::FromStr for AccountStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(AccountStatus::Active),
            "banned" => Ok(AccountStatus::Banned),
            _ => Err(()),
        }
    }
}

/// One registered account. Public keys are immutable once stored; a second
/// registration must present the same signing key.
#[derive(Clone, Debug)]
#[cfg_attr(test, derive(PartialEq))]
pub struct AccountRecord {
    pub whisper_id: WhisperId,
    pub enc_public_key: EncPublicKey,
    pub sign_public_key: SignPublicKey,
    pub created_at: TimeStamp,
    pub status: AccountStatus,
}

impl AccountRecord {
    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }
}
