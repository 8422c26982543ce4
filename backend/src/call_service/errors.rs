// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use thiserror::Error;
use whispertypes::errors::ErrorCode;
use whispertypes::messages::client_message::PayloadError;

use crate::errors::StorageError;

#[derive(Debug, Error)]
pub enum CallServiceError {
    #[error("unsupported protocol or crypto version")]
    VersionMismatch,
    #[error(transparent)]
    Payload(#[from] PayloadError),
    #[error("timestamp outside the tolerated window")]
    TimestampSkew,
    #[error("signature verification failed")]
    BadSignature,
    #[error("actor does not match the authenticated session")]
    SenderMismatch,
    #[error("callee unknown or banned")]
    PeerNotFound,
    #[error("an active call already exists between the parties")]
    CallExists,
    #[error("no such call")]
    CallNotFound,
    #[error("call is not in a state that permits this transition")]
    BadState,
    #[error("actor is not a party of this call")]
    NotParty,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl CallServiceError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            CallServiceError::VersionMismatch
            | CallServiceError::Payload(_)
            | CallServiceError::BadState => ErrorCode::InvalidPayload,
            CallServiceError::TimestampSkew => ErrorCode::InvalidTimestamp,
            CallServiceError::BadSignature => ErrorCode::InvalidSignature,
            CallServiceError::SenderMismatch
            | CallServiceError::CallExists
            | CallServiceError::NotParty => ErrorCode::Forbidden,
            CallServiceError::PeerNotFound => ErrorCode::RecipientNotFound,
            CallServiceError::CallNotFound => ErrorCode::NotFound,
            CallServiceError::Storage(_) => ErrorCode::InternalError,
        }
    }
}
