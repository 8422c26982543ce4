// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub use chrono::Duration;

/// Maximum tolerated skew between a client-supplied timestamp and the
/// server wall clock, in milliseconds.
pub const MAX_TIMESTAMP_SKEW_MS: i64 = 600_000;

/// A point in time with millisecond precision.
///
/// On the wire this is always a signed integer of milliseconds since the
/// Unix epoch, which is also how clients stamp their payloads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeStamp {
    time: DateTime<Utc>,
}

impl From<DateTime<Utc>> for TimeStamp {
    fn from(time: DateTime<Utc>) -> Self {
        Self { time }
    }
}

impl TimeStamp {
    pub fn now() -> Self {
        let time = Utc::now();
        Self { time }
    }

    pub fn from_millis(millis: i64) -> Option<Self> {
        DateTime::<Utc>::from_timestamp_millis(millis).map(|time| Self { time })
    }

    pub fn as_millis(&self) -> i64 {
        self.time.timestamp_millis()
    }

    pub fn in_days(days_in_the_future: i64) -> Self {
        let time = Utc::now() + Duration::days(days_in_the_future);
        Self { time }
    }

    pub fn time(&self) -> DateTime<Utc> {
        self.time
    }

    pub fn checked_add(&self, duration: Duration) -> Option<Self> {
        self.time.checked_add_signed(duration).map(Into::into)
    }

    /// Whether this time stamp lies in the past relative to `now`.
    pub fn has_expired_at(&self, now: TimeStamp) -> bool {
        self.time <= now.time
    }

    pub fn has_expired(&self) -> bool {
        self.has_expired_at(TimeStamp::now())
    }

    pub fn is_between(&self, start: &Self, end: &Self) -> bool {
        self.time >= start.time && self.time <= end.time
    }

    /// Whether `self` lies within `max_skew_ms` of `reference` in either
    /// direction. Used to gate client-supplied payload timestamps.
    pub fn is_within_skew_of(&self, reference: &Self, max_skew_ms: i64) -> bool {
        (self.as_millis() - reference.as_millis()).abs() <= max_skew_ms
    }
}

impl Serialize for TimeStamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.as_millis())
    }
}

impl<'de> Deserialize<'de> for TimeStamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let millis = i64::deserialize(deserializer)?;
        TimeStamp::from_millis(millis)
            .ok_or_else(|| serde::de::Error::custom("timestamp out of range"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skew_window_boundaries() {
        let now = TimeStamp::now();
        let at_edge = TimeStamp::from_millis(now.as_millis() + MAX_TIMESTAMP_SKEW_MS).unwrap();
        let past_edge =
            TimeStamp::from_millis(now.as_millis() - MAX_TIMESTAMP_SKEW_MS - 1).unwrap();
        assert!(at_edge.is_within_skew_of(&now, MAX_TIMESTAMP_SKEW_MS));
        assert!(!past_edge.is_within_skew_of(&now, MAX_TIMESTAMP_SKEW_MS));
    }

    #[test]
    fn millis_round_trip() {
        let ts = TimeStamp::from_millis(1_700_000_000_123).unwrap();
        assert_eq!(ts.as_millis(), 1_700_000_000_123);
        let json = serde_json::to_string(&ts).unwrap();
        assert_eq!(json, "1700000000123");
        let back: TimeStamp = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ts);
    }
}
