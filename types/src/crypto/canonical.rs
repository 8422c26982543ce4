// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The canonical signing string.
//!
//! Senders bind every relayed payload to their signing key over a fixed
//! line layout. The server recomputes the string bit-exactly and verifies
//! the signature before persisting or relaying anything.

use crate::time::TimeStamp;

use super::{SignPublicKey, SignatureBytes, SignatureError};

/// The fields entering the canonical string, in line order.
///
/// Layout (every line, including the last, ends in a single `\n`):
///
/// ```text
/// v1\n
/// <messageType>\n
/// <messageId>\n
/// <from>\n
/// <toOrGroupId>\n
/// <timestamp>\n
/// <base64(nonce)>\n
/// <base64(ciphertext)>\n
/// ```
#[derive(Debug, Clone)]
pub struct CanonicalEnvelope<'a> {
    pub message_type: &'a str,
    pub message_id: String,
    pub from: &'a str,
    pub to_or_group_id: &'a str,
    pub timestamp: TimeStamp,
    pub nonce_b64: &'a str,
    pub ciphertext_b64: &'a str,
}

impl CanonicalEnvelope<'_> {
    pub fn to_signing_string(&self) -> String {
        format!(
            "v1\n{}\n{}\n{}\n{}\n{}\n{}\n{}\n",
            self.message_type,
            self.message_id,
            self.from,
            self.to_or_group_id,
            self.timestamp.as_millis(),
            self.nonce_b64,
            self.ciphertext_b64,
        )
    }

    /// Verify `signature` over `SHA-256(UTF-8(canonical string))` with the
    /// sender's stored signing key.
    pub fn verify(
        &self,
        key: &SignPublicKey,
        signature: &SignatureBytes,
    ) -> Result<(), SignatureError> {
        key.verify_digest_of(self.to_signing_string().as_bytes(), signature)
    }
}
