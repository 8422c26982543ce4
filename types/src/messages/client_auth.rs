// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Payloads of the registration and session lifecycle frames.

use serde::{Deserialize, Serialize};

use crate::crypto::{EncPublicKey, SignPublicKey, SignatureBytes};
use crate::identifiers::{ChallengeId, DeviceId, SessionToken, WhisperId};
use crate::time::TimeStamp;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Android,
    Ios,
    Web,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Android => "android",
            Platform::Ios => "ios",
            Platform::Web => "web",
        }
    }
}

impl std::str::FromStr for Platform {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "android" => Ok(Platform::Android),
            "ios" => Ok(Platform::Ios),
            "web" => Ok(Platform::Web),
            _ => Err(()),
        }
    }
}

/// `register_begin`, the first half of the challenge/response handshake.
/// `whisper_id` is only present on the account recovery path.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterBeginParams {
    pub protocol_version: u16,
    pub crypto_version: u16,
    pub device_id: DeviceId,
    pub platform: Platform,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub whisper_id: Option<WhisperId>,
}

/// `register_challenge` response.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterChallenge {
    pub challenge_id: ChallengeId,
    /// base64 of 32 random bytes.
    pub challenge: String,
    pub expires_at: TimeStamp,
}

/// `register_proof`, the second half of the handshake. The signature is
/// `Ed25519(SHA-256(challengeBytes))` under `sign_public_key`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterProofParams {
    pub protocol_version: u16,
    pub crypto_version: u16,
    pub challenge_id: ChallengeId,
    pub device_id: DeviceId,
    pub platform: Platform,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub whisper_id: Option<WhisperId>,
    pub enc_public_key: EncPublicKey,
    pub sign_public_key: SignPublicKey,
    pub signature: SignatureBytes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voip_token: Option<String>,
}

/// `register_ack` on proof success.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterAck {
    pub success: bool,
    pub whisper_id: WhisperId,
    pub session_token: SessionToken,
    pub session_expires_at: TimeStamp,
    pub server_time: TimeStamp,
}

/// `session_refresh`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRefreshParams {
    pub protocol_version: u16,
    pub crypto_version: u16,
    pub session_token: SessionToken,
}

/// `session_refresh_ack` with the rotated token.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRefreshAck {
    pub session_token: SessionToken,
    pub session_expires_at: TimeStamp,
    pub server_time: TimeStamp,
}

/// `logout`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogoutParams {
    pub protocol_version: u16,
    pub crypto_version: u16,
    pub session_token: SessionToken,
}

/// `update_tokens`, an idempotent push-token upsert.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTokensParams {
    pub protocol_version: u16,
    pub crypto_version: u16,
    pub session_token: SessionToken,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voip_token: Option<String>,
}

/// `tokens_updated` ack.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokensUpdated {
    pub success: bool,
}

/// `force_logout`, pushed to a connection whose session was displaced or
/// revoked.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForceLogout {
    pub reason: String,
}
