// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use thiserror::Error;
use whispertypes::errors::ErrorCode;
use whispertypes::messages::client_message::PayloadError;

use crate::errors::StorageError;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("unsupported protocol or crypto version")]
    VersionMismatch,
    #[error(transparent)]
    Payload(#[from] PayloadError),
    #[error("timestamp outside the tolerated window")]
    TimestampSkew,
    #[error("signature verification failed")]
    BadSignature,
    #[error("sender does not match the authenticated session")]
    SenderMismatch,
    #[error("recipient unknown or banned")]
    RecipientNotFound,
    #[error("malformed cursor")]
    BadCursor,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl RouterError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            RouterError::VersionMismatch | RouterError::Payload(_) | RouterError::BadCursor => {
                ErrorCode::InvalidPayload
            }
            RouterError::TimestampSkew => ErrorCode::InvalidTimestamp,
            RouterError::BadSignature => ErrorCode::InvalidSignature,
            RouterError::SenderMismatch => ErrorCode::Forbidden,
            RouterError::RecipientNotFound => ErrorCode::RecipientNotFound,
            RouterError::Storage(_) => ErrorCode::InternalError,
        }
    }
}
