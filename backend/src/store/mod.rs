// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Storage seams.
//!
//! [`DurableStore`] is the transactional record store (accounts, sessions,
//! groups, offline messages, call history). [`VolatileStore`] is the
//! TTL/counter store (challenges, presence, live calls, rate buckets, push
//! dedup). Production uses Postgres + the in-process volatile store; tests
//! and local development run entirely on the in-memory implementations.
//!
//! Multi-row invariants (session displacement, membership changes) are
//! single methods here so each implementation can make them atomic; side
//! effects towards live connections happen in the services, after the
//! store call returns.

use async_trait::async_trait;

use whispertypes::crypto::SignPublicKey;
use whispertypes::identifiers::{CallId, ChallengeId, GroupId, MessageId, SessionToken, WhisperId};
use whispertypes::messages::client_group::GroupRole;
use whispertypes::time::TimeStamp;

use crate::auth_service::account_record::AccountRecord;
use crate::auth_service::challenge::ChallengeRecord;
use crate::auth_service::push_token_record::PushTokenRecord;
use crate::auth_service::session_record::SessionRecord;
use crate::call_service::call_record::{CallRecord, CallState, LiveCall};
use crate::errors::StorageError;
use crate::group_service::group_record::{GroupMemberRecord, GroupRecord};
use crate::router::pending_message::{PendingCursor, PendingMessageRecord};

pub mod memory;
pub mod postgres;

#[async_trait]
pub trait DurableStore: Send + Sync {
    // === Accounts ===

    async fn load_account(&self, id: &WhisperId) -> Result<Option<AccountRecord>, StorageError>;

    async fn load_account_by_sign_key(
        &self,
        key: &SignPublicKey,
    ) -> Result<Option<AccountRecord>, StorageError>;

    /// Insert a new account. Fails with a constraint error if the
    /// whisper id is already taken.
    async fn insert_account(&self, account: &AccountRecord) -> Result<(), StorageError>;

    // === Sessions ===

    async fn load_session(
        &self,
        token: &SessionToken,
    ) -> Result<Option<SessionRecord>, StorageError>;

    /// Atomically revoke every session of the account and insert the new
    /// one. Returns the revoked sessions so the caller can fan out
    /// `force_logout` after commit.
    async fn displace_sessions(
        &self,
        session: &SessionRecord,
    ) -> Result<Vec<SessionRecord>, StorageError>;

    /// Atomically replace `old` with the rotated `new` session. Returns
    /// false if `old` no longer exists.
    async fn rotate_session(
        &self,
        old: &SessionToken,
        new: &SessionRecord,
    ) -> Result<bool, StorageError>;

    async fn delete_session(&self, token: &SessionToken) -> Result<bool, StorageError>;

    // === Push tokens ===

    async fn upsert_push_token(&self, record: &PushTokenRecord) -> Result<(), StorageError>;

    async fn load_push_token(
        &self,
        id: &WhisperId,
    ) -> Result<Option<PushTokenRecord>, StorageError>;

    // === Pending messages ===

    async fn insert_pending(&self, record: &PendingMessageRecord) -> Result<(), StorageError>;

    /// Stamp `delivered_at` after the envelope was written to a live
    /// connection. The row stays until the recipient acknowledges.
    async fn mark_pending_delivered(
        &self,
        recipient: &WhisperId,
        message_id: &MessageId,
        at: TimeStamp,
    ) -> Result<(), StorageError>;

    /// Remove an acknowledged message. Idempotent: returns whether a row
    /// was actually deleted.
    async fn delete_pending(
        &self,
        recipient: &WhisperId,
        message_id: &MessageId,
    ) -> Result<bool, StorageError>;

    /// Page through a recipient's queue in `(timestamp, messageId)` order,
    /// strictly after `cursor` when one is given.
    async fn fetch_pending_page(
        &self,
        recipient: &WhisperId,
        cursor: Option<PendingCursor>,
        limit: u32,
    ) -> Result<Vec<PendingMessageRecord>, StorageError>;

    /// Drop rows older than the retention horizon. Returns the number of
    /// rows removed.
    async fn purge_expired_pending(&self, before: TimeStamp) -> Result<u64, StorageError>;

    // === Groups ===

    /// Create a group together with its initial membership rows.
    async fn insert_group(
        &self,
        group: &GroupRecord,
        members: &[GroupMemberRecord],
    ) -> Result<(), StorageError>;

    async fn load_group(&self, id: &GroupId) -> Result<Option<GroupRecord>, StorageError>;

    async fn update_group_title(
        &self,
        id: &GroupId,
        title: &str,
        at: TimeStamp,
    ) -> Result<(), StorageError>;

    async fn active_members(&self, id: &GroupId) -> Result<Vec<GroupMemberRecord>, StorageError>;

    async fn active_member(
        &self,
        id: &GroupId,
        whisper_id: &WhisperId,
    ) -> Result<Option<GroupMemberRecord>, StorageError>;

    /// Add a member, enforcing the active-member cap atomically. Fails
    /// with a constraint error when the cap is reached or the member is
    /// already active.
    async fn add_member_checked(
        &self,
        member: &GroupMemberRecord,
        max_members: usize,
        at: TimeStamp,
    ) -> Result<(), StorageError>;

    /// Soft-delete a membership row. Returns whether the member was
    /// active.
    async fn remove_member(
        &self,
        id: &GroupId,
        whisper_id: &WhisperId,
        at: TimeStamp,
    ) -> Result<bool, StorageError>;

    async fn change_member_role(
        &self,
        id: &GroupId,
        whisper_id: &WhisperId,
        role: GroupRole,
        at: TimeStamp,
    ) -> Result<bool, StorageError>;

    // === Calls ===

    /// Write the history row of a terminated call.
    async fn insert_call(&self, record: &CallRecord) -> Result<(), StorageError>;

    // === Contact edges ===

    /// Note that `a` messaged `b`. Maintained on every accepted send and
    /// used for presence fan-out.
    async fn note_contact(
        &self,
        a: &WhisperId,
        b: &WhisperId,
        at: TimeStamp,
    ) -> Result<(), StorageError>;

    /// Peers the user exchanged at least one message with since `since`.
    async fn recent_contacts(
        &self,
        id: &WhisperId,
        since: TimeStamp,
    ) -> Result<Vec<WhisperId>, StorageError>;
}

/// Presence refresh outcome; `CameOnline` triggers a broadcast.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresenceTransition {
    CameOnline,
    StillOnline,
}

#[async_trait]
pub trait VolatileStore: Send + Sync {
    // === Challenges ===

    async fn put_challenge(&self, record: ChallengeRecord);

    /// Atomically remove and return the challenge. Expired entries are
    /// treated as absent. A second call for the same id returns `None`.
    async fn consume_challenge(
        &self,
        id: &ChallengeId,
        now: TimeStamp,
    ) -> Option<ChallengeRecord>;

    // === Presence ===

    async fn refresh_presence(
        &self,
        id: &WhisperId,
        now: TimeStamp,
        ttl_secs: i64,
    ) -> PresenceTransition;

    /// Last-seen stamp if the user is currently online.
    async fn presence(&self, id: &WhisperId, now: TimeStamp) -> Option<TimeStamp>;

    /// Drop the presence entry, returning the last-seen stamp.
    async fn clear_presence(&self, id: &WhisperId) -> Option<TimeStamp>;

    // === Live calls ===

    /// Register a fresh call. Returns false when a live entry already
    /// exists for this id.
    async fn put_live_call(&self, call: LiveCall, now: TimeStamp, ttl_secs: i64) -> bool;

    async fn get_live_call(&self, id: &CallId, now: TimeStamp) -> Option<LiveCall>;

    /// Compare-and-set a state transition. Succeeds only when the current
    /// state is one of `expected`; returns the updated entry.
    async fn cas_call_state(
        &self,
        id: &CallId,
        expected: &[CallState],
        next: CallState,
        now: TimeStamp,
    ) -> Option<LiveCall>;

    async fn remove_live_call(&self, id: &CallId) -> Option<LiveCall>;

    /// An in-flight (non-terminal) call between the two parties, if any.
    async fn find_live_call_between(
        &self,
        a: &WhisperId,
        b: &WhisperId,
        now: TimeStamp,
    ) -> Option<LiveCall>;

    // === Rate buckets ===

    /// Take one token from the bucket, lazily refilled at
    /// `refill_per_sec` up to `capacity`. Returns whether the request is
    /// allowed.
    async fn allow_rate(
        &self,
        key: Vec<u8>,
        capacity: f64,
        refill_per_sec: f64,
        now_ms: i64,
    ) -> bool;

    // === Dedup sets ===

    /// Claim a dedup key. Returns true when the key was not seen within
    /// `window_ms` (the caller should proceed), false when suppressed.
    async fn dedup_claim(&self, key: String, now: TimeStamp, window_ms: i64) -> bool;

    /// Evict expired challenges, presence entries, idle rate buckets and
    /// stale dedup keys. Called periodically by the sweeper task.
    ///
    /// Live calls are deliberately not swept: ending a call, timeout
    /// included, is the call service's job (driven by the timeout wheel),
    /// and it must still find the entry to write the history row and emit
    /// `call_end` to both parties.
    async fn sweep(&self, now: TimeStamp);
}
