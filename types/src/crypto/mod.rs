// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Crypto seams of the protocol.
//!
//! The server never decrypts anything. What it does do: verify Ed25519
//! signatures over challenge digests and canonical signing strings, and
//! mint time-bound TURN credentials. The primitives come from the
//! RustCrypto/dalek ecosystem.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub mod canonical;
pub mod turn;

pub use canonical::CanonicalEnvelope;

/// Expected length of an XSalsa20-Poly1305 nonce, in bytes.
pub const NONCE_LEN: usize = 24;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("value is not strict base64")]
    Base64,
    #[error("expected {expected} bytes, got {actual}")]
    Length { expected: usize, actual: usize },
    #[error("not a valid Ed25519 public key")]
    MalformedKey,
    #[error("signature verification failed")]
    Invalid,
}

/// Decode a strict-base64 field and require an exact byte length.
pub fn decode_exact(b64: &str, expected: usize) -> Result<Vec<u8>, SignatureError> {
    let bytes = BASE64.decode(b64).map_err(|_| SignatureError::Base64)?;
    if bytes.len() != expected {
        return Err(SignatureError::Length {
            expected,
            actual: bytes.len(),
        });
    }
    Ok(bytes)
}

/// Decode a strict-base64 field of any length (ciphertexts).
pub fn decode_base64(b64: &str) -> Result<Vec<u8>, SignatureError> {
    BASE64.decode(b64).map_err(|_| SignatureError::Base64)
}

pub fn encode_base64(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

macro_rules! base64_fixed_bytes {
    ($(#[$doc:meta])* $name:ident, $len:expr) => {
        $(#[$doc])*
        #[derive(Clone, PartialEq, Eq, Hash)]
        pub struct $name([u8; $len]);

        impl $name {
            pub const LEN: usize = $len;

            pub fn from_bytes(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            pub fn from_slice(bytes: &[u8]) -> Result<Self, SignatureError> {
                let array: [u8; $len] =
                    bytes.try_into().map_err(|_| SignatureError::Length {
                        expected: $len,
                        actual: bytes.len(),
                    })?;
                Ok(Self(array))
            }

            pub fn from_base64(b64: &str) -> Result<Self, SignatureError> {
                Self::from_slice(&decode_exact(b64, $len)?)
            }

            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            pub fn to_base64(&self) -> String {
                encode_base64(&self.0)
            }
        }

        // Key material renders as base64, never as raw bytes.
        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.to_base64())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_base64())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let b64 = String::deserialize(deserializer)?;
                Self::from_base64(&b64).map_err(serde::de::Error::custom)
            }
        }
    };
}

base64_fixed_bytes!(
    /// X25519 public key used by peers to seal message envelopes.
    EncPublicKey,
    32
);
base64_fixed_bytes!(
    /// Ed25519 public key the account signs protocol frames with.
    SignPublicKey,
    32
);
base64_fixed_bytes!(
    /// A detached Ed25519 signature.
    SignatureBytes,
    64
);

impl SignPublicKey {
    fn verifying_key(&self) -> Result<VerifyingKey, SignatureError> {
        VerifyingKey::from_bytes(&self.0).map_err(|_| SignatureError::MalformedKey)
    }

    /// Verify a signature over `SHA-256(message)`, the convention used for
    /// both challenge proofs and canonical signing strings.
    pub fn verify_digest_of(
        &self,
        message: &[u8],
        signature: &SignatureBytes,
    ) -> Result<(), SignatureError> {
        let digest = Sha256::digest(message);
        let key = self.verifying_key()?;
        key.verify(&digest, &Signature::from_bytes(signature.as_bytes()))
            .map_err(|_| SignatureError::Invalid)
    }
}

pub fn sha256(bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(bytes).into()
}

#[cfg(test)]
mod tests {
    use ed25519_dalek::{Signer, SigningKey};
    use rand::rngs::OsRng;

    use super::*;

    #[test]
    fn challenge_proof_round_trip() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let public = SignPublicKey::from_bytes(signing_key.verifying_key().to_bytes());

        let challenge = [7u8; 32];
        let signature = SignatureBytes::from_bytes(
            signing_key.sign(&sha256(&challenge)).to_bytes(),
        );

        assert!(public.verify_digest_of(&challenge, &signature).is_ok());

        let mut tampered = challenge;
        tampered[0] ^= 1;
        assert_eq!(
            public.verify_digest_of(&tampered, &signature),
            Err(SignatureError::Invalid)
        );
    }

    #[test]
    fn base64_fields_are_strict() {
        assert!(SignPublicKey::from_base64("not base64!").is_err());
        // Embedded whitespace is rejected.
        let valid = encode_base64(&[1u8; 32]);
        let with_space = format!("{} ", valid);
        assert!(SignPublicKey::from_base64(&with_space).is_err());
        assert!(SignPublicKey::from_base64(&valid).is_ok());
    }

    #[test]
    fn wrong_lengths_are_rejected() {
        let short = encode_base64(&[1u8; 16]);
        assert_eq!(
            SignPublicKey::from_base64(&short),
            Err(SignatureError::Length {
                expected: 32,
                actual: 16
            })
        );
    }
}
