// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

/// Alphabet used for the data and checksum characters of a [`WhisperId`].
pub const WHISPER_ID_ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

const DATA_CHARS: usize = 10;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WhisperIdError {
    #[error("whisper id has an invalid format")]
    InvalidFormat,
    #[error("whisper id contains a character outside the alphabet")]
    InvalidCharacter,
    #[error("whisper id checksum mismatch")]
    ChecksumMismatch,
}

/// Canonical user identifier: `WSP-XXXX-XXXX-XXXX`.
///
/// The twelve `X` characters are 10 data characters followed by two
/// checksum characters, all drawn from [`WHISPER_ID_ALPHABET`]. Checksum 1
/// is the XOR of the data character indices, checksum 2 the sum of the
/// underlying byte values mod 32. Since every sampled byte is congruent to
/// its character index mod 32, both checksums recompute from the canonical
/// string alone.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WhisperId(String);

impl WhisperId {
    /// Derive the identifier bound to an Ed25519 public key.
    ///
    /// Bytes are drawn from the key with rejection sampling (reject
    /// `b >= 256 - 256 % 32`) to avoid modulo bias, extending the stream
    /// via `SHA-256(key || counter_be32)` once the key bytes are
    /// exhausted.
    pub fn derive_from_key(sign_public_key: &[u8]) -> Self {
        Self::derive_nth(sign_public_key, 0)
    }

    /// Derivation for the `attempt`-th candidate: skips `attempt * 10`
    /// accepted bytes first. Used to resolve uniqueness collisions.
    pub fn derive_nth(sign_public_key: &[u8], attempt: u32) -> Self {
        let mut stream = KeyByteStream::new(sign_public_key);
        let reject_above = 256u16 - (256 % WHISPER_ID_ALPHABET.len() as u16);

        let mut accepted = 0u64;
        let skip = attempt as u64 * DATA_CHARS as u64;
        let mut indices = [0u8; DATA_CHARS];
        let mut filled = 0;
        while filled < DATA_CHARS {
            let b = stream.next_byte();
            if (b as u16) >= reject_above {
                continue;
            }
            if accepted >= skip {
                indices[filled] = b % WHISPER_ID_ALPHABET.len() as u8;
                filled += 1;
            }
            accepted += 1;
        }
        Self::from_indices(&indices)
    }

    fn from_indices(indices: &[u8; DATA_CHARS]) -> Self {
        let checksum1 = indices.iter().fold(0u8, |acc, i| acc ^ i) % 32;
        let checksum2 =
            (indices.iter().map(|&i| i as u32).sum::<u32>() % 32) as u8;

        let mut chars = Vec::with_capacity(DATA_CHARS + 2);
        for &i in indices {
            chars.push(WHISPER_ID_ALPHABET[i as usize]);
        }
        chars.push(WHISPER_ID_ALPHABET[checksum1 as usize]);
        chars.push(WHISPER_ID_ALPHABET[checksum2 as usize]);

        let body = String::from_utf8(chars).expect("alphabet is ascii");
        Self(format!(
            "WSP-{}-{}-{}",
            &body[0..4],
            &body[4..8],
            &body[8..12]
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn alphabet_index(c: u8) -> Result<u8, WhisperIdError> {
        WHISPER_ID_ALPHABET
            .iter()
            .position(|&a| a == c)
            .map(|i| i as u8)
            .ok_or(WhisperIdError::InvalidCharacter)
    }
}

impl FromStr for WhisperId {
    type Err = WhisperIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('-');
        if parts.next() != Some("WSP") {
            return Err(WhisperIdError::InvalidFormat);
        }
        let mut body = Vec::with_capacity(12);
        for _ in 0..3 {
            let group = parts.next().ok_or(WhisperIdError::InvalidFormat)?;
            if group.len() != 4 {
                return Err(WhisperIdError::InvalidFormat);
            }
            body.extend_from_slice(group.as_bytes());
        }
        if parts.next().is_some() {
            return Err(WhisperIdError::InvalidFormat);
        }

        let mut indices = [0u8; DATA_CHARS];
        for (i, &c) in body[..DATA_CHARS].iter().enumerate() {
            indices[i] = Self::alphabet_index(c)?;
        }
        let checksum1 = Self::alphabet_index(body[DATA_CHARS])?;
        let checksum2 = Self::alphabet_index(body[DATA_CHARS + 1])?;

        let expected1 = indices.iter().fold(0u8, |acc, i| acc ^ i) % 32;
        let expected2 = (indices.iter().map(|&i| i as u32).sum::<u32>() % 32) as u8;
        if checksum1 != expected1 || checksum2 != expected2 {
            return Err(WhisperIdError::ChecksumMismatch);
        }

        Ok(Self(s.to_owned()))
    }
}

impl TryFrom<String> for WhisperId {
    type Error = WhisperIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<WhisperId> for String {
    fn from(id: WhisperId) -> Self {
        id.0
    }
}

impl Display for WhisperId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Byte stream over a public key, extended with SHA-256 blocks keyed by a
/// big-endian counter once the key bytes run out.
struct KeyByteStream {
    key: Vec<u8>,
    buffer: Vec<u8>,
    position: usize,
    counter: u32,
}

impl KeyByteStream {
    fn new(key: &[u8]) -> Self {
        Self {
            key: key.to_vec(),
            buffer: key.to_vec(),
            position: 0,
            counter: 0,
        }
    }

    fn next_byte(&mut self) -> u8 {
        if self.position >= self.buffer.len() {
            let mut hasher = Sha256::new();
            hasher.update(&self.key);
            hasher.update(self.counter.to_be_bytes());
            self.buffer = hasher.finalize().to_vec();
            self.position = 0;
            self.counter += 1;
        }
        let b = self.buffer[self.position];
        self.position += 1;
        b
    }
}

macro_rules! opaque_string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: String) -> Self {
                Self(value)
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

opaque_string_id!(
    /// Client-chosen opaque device identifier.
    DeviceId
);
opaque_string_id!(
    /// Server-issued identifier of a registration challenge.
    ChallengeId
);
opaque_string_id!(
    /// Client-chosen opaque call identifier.
    CallId
);
opaque_string_id!(
    /// Server-issued group identifier.
    GroupId
);
opaque_string_id!(
    /// Opaque bearer token identifying a session.
    SessionToken
);

impl ChallengeId {
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl GroupId {
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

/// Message identifier; clients mint these as UUIDs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Display for MessageId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Identifier of a single live websocket connection (random 128 bit).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Display for ConnectionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
