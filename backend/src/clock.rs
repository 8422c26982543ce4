// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Wall time and randomness behind narrow seams so service logic stays
//! deterministic under test.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::RngCore;
use whispertypes::identifiers::SessionToken;
use whispertypes::time::TimeStamp;

pub trait Clock: Send + Sync {
    fn now(&self) -> TimeStamp;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> TimeStamp {
        TimeStamp::now()
    }
}

/// Settable clock for tests.
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    pub fn at(millis: i64) -> Arc<Self> {
        Arc::new(Self {
            millis: AtomicI64::new(millis),
        })
    }

    pub fn set(&self, millis: i64) {
        self.millis.store(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: i64) {
        self.millis.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> TimeStamp {
        TimeStamp::from_millis(self.millis.load(Ordering::SeqCst)).expect("manual clock in range")
    }
}

pub trait RandomSource: Send + Sync {
    fn fill_bytes(&self, buf: &mut [u8]);

    fn random_bytes(&self, n: usize) -> Vec<u8> {
        let mut buf = vec![0u8; n];
        self.fill_bytes(&mut buf);
        buf
    }

    /// Mint an opaque url-safe bearer token from 32 random bytes.
    fn session_token(&self) -> SessionToken {
        let bytes = self.random_bytes(32);
        SessionToken::new(URL_SAFE_NO_PAD.encode(bytes))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct OsRandom;

impl RandomSource for OsRandom {
    fn fill_bytes(&self, buf: &mut [u8]) {
        rand::rngs::OsRng.fill_bytes(buf);
    }
}

/// Counter-based byte source for deterministic tests.
#[derive(Debug)]
pub struct SeededRandom {
    counter: AtomicI64,
}

impl SeededRandom {
    pub fn new(seed: i64) -> Arc<Self> {
        Arc::new(Self {
            counter: AtomicI64::new(seed),
        })
    }
}

impl RandomSource for SeededRandom {
    fn fill_bytes(&self, buf: &mut [u8]) {
        use sha2::Digest;
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let digest: [u8; 32] = sha2::Sha256::digest(n.to_be_bytes()).into();
        for (i, b) in buf.iter_mut().enumerate() {
            *b = digest[i % digest.len()];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::at(1_000);
        assert_eq!(clock.now().as_millis(), 1_000);
        clock.advance(500);
        assert_eq!(clock.now().as_millis(), 1_500);
    }

    #[test]
    fn session_tokens_are_url_safe_and_unique() {
        let rng = OsRandom;
        let a = rng.session_token();
        let b = rng.session_token();
        assert_ne!(a, b);
        assert!(a.as_str().len() >= 43); // 32 bytes, unpadded base64
        assert!(!a.as_str().contains('+') && !a.as_str().contains('/'));
    }

    #[test]
    fn seeded_random_is_deterministic() {
        let a = SeededRandom::new(7).random_bytes(16);
        let b = SeededRandom::new(7).random_bytes(16);
        assert_eq!(a, b);
    }
}
