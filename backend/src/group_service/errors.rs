// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use thiserror::Error;
use whispertypes::errors::ErrorCode;
use whispertypes::messages::client_message::PayloadError;

use crate::errors::StorageError;

#[derive(Debug, Error)]
pub enum GroupServiceError {
    #[error("unsupported protocol or crypto version")]
    VersionMismatch,
    #[error(transparent)]
    Payload(#[from] PayloadError),
    #[error("group not found")]
    GroupNotFound,
    #[error("not an active member of the group")]
    NotMember,
    #[error("role does not permit this operation")]
    NotAllowed,
    #[error("group member limit reached")]
    GroupFull,
    #[error("already an active member")]
    AlreadyMember,
    #[error("the sole owner cannot be removed or demoted")]
    SoleOwner,
    #[error("member account unknown or banned")]
    UnknownAccount,
    #[error("timestamp outside the tolerated window")]
    TimestampSkew,
    #[error("signature verification failed")]
    BadSignature,
    #[error("sender does not match the authenticated session")]
    SenderMismatch,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl GroupServiceError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            GroupServiceError::VersionMismatch
            | GroupServiceError::Payload(_)
            | GroupServiceError::AlreadyMember => ErrorCode::InvalidPayload,
            GroupServiceError::GroupNotFound => ErrorCode::NotFound,
            GroupServiceError::NotMember
            | GroupServiceError::NotAllowed
            | GroupServiceError::GroupFull
            | GroupServiceError::SoleOwner
            | GroupServiceError::SenderMismatch => ErrorCode::Forbidden,
            GroupServiceError::UnknownAccount => ErrorCode::RecipientNotFound,
            GroupServiceError::TimestampSkew => ErrorCode::InvalidTimestamp,
            GroupServiceError::BadSignature => ErrorCode::InvalidSignature,
            GroupServiceError::Storage(_) => ErrorCode::InternalError,
        }
    }
}
