// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use thiserror::Error;
use whispertypes::errors::ErrorCode;

use crate::errors::StorageError;

#[derive(Debug, Error)]
pub enum AuthServiceError {
    #[error("unsupported protocol or crypto version")]
    VersionMismatch,
    #[error("invalid, expired or already consumed challenge")]
    ChallengeInvalid,
    #[error("challenge proof failed")]
    ProofFailed,
    #[error("account not found")]
    NotRegistered,
    #[error("presented keys do not match the registered account")]
    KeyMismatch,
    #[error("account is banned")]
    Banned,
    #[error("session not found or expired")]
    SessionInvalid,
    #[error("could not derive a unique whisper id")]
    IdExhausted,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl AuthServiceError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            AuthServiceError::VersionMismatch | AuthServiceError::ChallengeInvalid => {
                ErrorCode::InvalidPayload
            }
            AuthServiceError::ProofFailed | AuthServiceError::KeyMismatch => ErrorCode::AuthFailed,
            AuthServiceError::NotRegistered => ErrorCode::NotRegistered,
            AuthServiceError::Banned => ErrorCode::UserBanned,
            AuthServiceError::SessionInvalid => ErrorCode::AuthFailed,
            AuthServiceError::IdExhausted | AuthServiceError::Storage(_) => {
                ErrorCode::InternalError
            }
        }
    }
}
