// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Token-bucket rate limiting.
//!
//! Buckets are keyed per (scope, key, class) where scope is `ip` or
//! `user`. Keys are SHA-256 hashes over length-prefixed parts so raw
//! addresses never sit in the volatile store. Refill is lazy:
//! `tokens = min(capacity, tokens + rate * elapsed_ms / 1000)`.

use std::sync::Arc;

use sha2::{Digest, Sha256};

use whispertypes::identifiers::WhisperId;
use whispertypes::messages::RateClass;
use whispertypes::time::TimeStamp;

use crate::store::VolatileStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scope {
    Ip,
    User,
}

impl Scope {
    fn as_bytes(&self) -> &'static [u8] {
        match self {
            Scope::Ip => b"ip",
            Scope::User => b"user",
        }
    }
}

/// Hashed bucket key.
#[derive(Debug, Clone)]
pub struct RlKey {
    key: [u8; 32],
}

impl RlKey {
    pub fn new(scope: Scope, key: &[u8], class: RateClass) -> Self {
        let key = {
            let mut hasher = Sha256::new();
            for part in [scope.as_bytes(), key, class.as_str().as_bytes()] {
                hasher.update((part.len() as u32).to_be_bytes());
                hasher.update(part);
            }
            hasher.finalize().into()
        };
        RlKey { key }
    }

    fn serialize(&self) -> Vec<u8> {
        self.key.to_vec()
    }
}

/// Per-class limits: sustained rate (tokens per second) and burst
/// capacity.
#[derive(Clone, Copy, Debug)]
pub struct RlConfig {
    pub rate_per_sec: f64,
    pub burst: f64,
}

impl RlConfig {
    const fn per_second(rate: f64, burst: f64) -> Self {
        Self {
            rate_per_sec: rate,
            burst,
        }
    }

    const fn per_minute(rate: f64, burst: f64) -> Self {
        Self {
            rate_per_sec: rate / 60.0,
            burst,
        }
    }
}

/// Default limits per class and scope. `None` means the scope is not
/// limited for this class (registration frames have no user identity
/// yet).
pub fn default_config(class: RateClass, scope: Scope) -> Option<RlConfig> {
    match (class, scope) {
        (RateClass::Connect, Scope::Ip) => Some(RlConfig::per_minute(10.0, 20.0)),
        (RateClass::Connect, Scope::User) => None,
        (RateClass::Register, Scope::Ip) => Some(RlConfig::per_minute(5.0, 10.0)),
        (RateClass::Register, Scope::User) => None,
        (RateClass::Messaging, Scope::Ip) => Some(RlConfig::per_second(60.0, 120.0)),
        (RateClass::Messaging, Scope::User) => Some(RlConfig::per_second(30.0, 60.0)),
        (RateClass::Receipts, Scope::Ip) => Some(RlConfig::per_second(120.0, 240.0)),
        (RateClass::Receipts, Scope::User) => Some(RlConfig::per_second(60.0, 120.0)),
        (RateClass::Calls, Scope::Ip) => Some(RlConfig::per_second(10.0, 20.0)),
        (RateClass::Calls, Scope::User) => Some(RlConfig::per_second(5.0, 10.0)),
        (RateClass::Light, Scope::Ip) => Some(RlConfig::per_second(20.0, 40.0)),
        (RateClass::Light, Scope::User) => Some(RlConfig::per_second(20.0, 40.0)),
        (RateClass::Control, Scope::Ip) => Some(RlConfig::per_second(10.0, 20.0)),
        (RateClass::Control, Scope::User) => Some(RlConfig::per_second(5.0, 10.0)),
    }
}

pub struct RateLimiter {
    volatile: Arc<dyn VolatileStore>,
}

impl RateLimiter {
    pub fn new(volatile: Arc<dyn VolatileStore>) -> Self {
        Self { volatile }
    }

    async fn allowed_scoped(
        &self,
        scope: Scope,
        key: &[u8],
        class: RateClass,
        now: TimeStamp,
    ) -> bool {
        let Some(config) = default_config(class, scope) else {
            return true;
        };
        let key = RlKey::new(scope, key, class);
        self.volatile
            .allow_rate(
                key.serialize(),
                config.burst,
                config.rate_per_sec,
                now.as_millis(),
            )
            .await
    }

    /// Per-IP check used on socket upgrade and for unauthenticated
    /// frames.
    pub async fn allow_ip(&self, ip: &str, class: RateClass, now: TimeStamp) -> bool {
        self.allowed_scoped(Scope::Ip, ip.as_bytes(), class, now).await
    }

    /// The composite check of the frame pipeline: the IP bucket plus,
    /// when the frame is authenticated, the user bucket. Denial by either
    /// is authoritative.
    pub async fn allow(
        &self,
        ip: &str,
        user: Option<&WhisperId>,
        class: RateClass,
        now: TimeStamp,
    ) -> bool {
        if !self.allow_ip(ip, class, now).await {
            return false;
        }
        match user {
            Some(user) => {
                self.allowed_scoped(Scope::User, user.as_str().as_bytes(), class, now)
                    .await
            }
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::store::memory::MemVolatileStore;

    use super::*;

    fn ts(millis: i64) -> TimeStamp {
        TimeStamp::from_millis(millis).unwrap()
    }

    #[tokio::test]
    async fn burst_then_deny() {
        let limiter = RateLimiter::new(Arc::new(MemVolatileStore::new()));
        // Calls allow a burst of 10 per user.
        let user = WhisperId::derive_from_key(&[1u8; 32]);
        for _ in 0..10 {
            assert!(limiter.allow("10.0.0.1", Some(&user), RateClass::Calls, ts(0)).await);
        }
        assert!(!limiter.allow("10.0.0.1", Some(&user), RateClass::Calls, ts(0)).await);
    }

    #[tokio::test]
    async fn refill_restores_tokens() {
        let limiter = RateLimiter::new(Arc::new(MemVolatileStore::new()));
        let user = WhisperId::derive_from_key(&[2u8; 32]);
        for _ in 0..10 {
            assert!(limiter.allow("10.0.0.2", Some(&user), RateClass::Calls, ts(0)).await);
        }
        // 5 tokens/s for the user bucket: one second restores five.
        for _ in 0..5 {
            assert!(limiter.allow("10.0.0.2", Some(&user), RateClass::Calls, ts(1_000)).await);
        }
        assert!(!limiter.allow("10.0.0.2", Some(&user), RateClass::Calls, ts(1_000)).await);
    }

    #[tokio::test]
    async fn ip_bucket_is_shared_across_users() {
        let limiter = RateLimiter::new(Arc::new(MemVolatileStore::new()));
        // Register class has only an IP bucket: burst 10.
        for _ in 0..10 {
            assert!(limiter.allow_ip("10.0.0.3", RateClass::Register, ts(0)).await);
        }
        assert!(!limiter.allow_ip("10.0.0.3", RateClass::Register, ts(0)).await);
        // A different address is unaffected.
        assert!(limiter.allow_ip("10.0.0.4", RateClass::Register, ts(0)).await);
    }
}
