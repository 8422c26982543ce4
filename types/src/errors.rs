// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use serde::{Deserialize, Serialize};

/// Wire-level error codes.
///
/// Transient codes may be retried with backoff, permanent codes must not be
/// retried with the same frame, auth-lifecycle codes should trigger a
/// session refresh or re-registration on the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NotRegistered,
    AuthFailed,
    InvalidPayload,
    InvalidTimestamp,
    RateLimited,
    UserBanned,
    NotFound,
    Forbidden,
    InternalError,
    InvalidSignature,
    RecipientNotFound,
    Unauthorized,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NotRegistered => "NOT_REGISTERED",
            ErrorCode::AuthFailed => "AUTH_FAILED",
            ErrorCode::InvalidPayload => "INVALID_PAYLOAD",
            ErrorCode::InvalidTimestamp => "INVALID_TIMESTAMP",
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::UserBanned => "USER_BANNED",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::Forbidden => "FORBIDDEN",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::InvalidSignature => "INVALID_SIGNATURE",
            ErrorCode::RecipientNotFound => "RECIPIENT_NOT_FOUND",
            ErrorCode::Unauthorized => "UNAUTHORIZED",
        }
    }

    /// Whether a client may retry the same frame after backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorCode::InternalError | ErrorCode::RateLimited)
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Body of an `error` frame. Echoes the `requestId` of the offending frame
/// when one was present.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl WireError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id;
        self
    }
}

/// Websocket close codes used by the gateway.
pub mod close_codes {
    /// Normal closure (logout, displacement).
    pub const NORMAL: u16 = 1000;
    /// Policy violation (bad auth).
    pub const POLICY_VIOLATION: u16 = 1008;
    /// Frame or outbound queue overflow.
    pub const MESSAGE_TOO_BIG: u16 = 1009;
    /// Internal error, including missed heartbeats.
    pub const INTERNAL: u16 = 1011;
    /// Connection-level rate limit hit.
    pub const RATE_LIMITED: u16 = 4029;
}
