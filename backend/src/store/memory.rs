// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! In-memory store implementations: the volatile store used in every
//! deployment, and the durable fake used by tests and database-less local
//! runs.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use dashmap::DashMap;

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

use super::{DurableStore, PresenceTransition, VolatileStore};

#[derive(Default)]
struct MemInner {
    accounts: HashMap<WhisperId, AccountRecord>,
    sessions: HashMap<SessionToken, SessionRecord>,
    push_tokens: HashMap<WhisperId, PushTokenRecord>,
    pending: HashMap<WhisperId, Vec<PendingMessageRecord>>,
    groups: HashMap<GroupId, GroupRecord>,
    /// Full membership history, soft-deleted rows included.
    members: Vec<GroupMemberRecord>,
    calls: Vec<CallRecord>,
    contacts: HashMap<(WhisperId, WhisperId), TimeStamp>,
}

/// Durable store backed by process memory. Not persistent across
/// restarts; used by tests and `--in-memory` local runs.
#[derive(Default)]
pub struct MemDurableStore {
    inner: Mutex<MemInner>,
}

impl MemDurableStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DurableStore for MemDurableStore {
    async fn load_account(&self, id: &WhisperId) -> Result<Option<AccountRecord>, StorageError> {
        Ok(self.inner.lock().unwrap().accounts.get(id).cloned())
    }

    async fn load_account_by_sign_key(
        &self,
        key: &SignPublicKey,
    ) -> Result<Option<AccountRecord>, StorageError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .accounts
            .values()
            .find(|a| &a.sign_public_key == key)
            .cloned())
    }

    async fn insert_account(&self, account: &AccountRecord) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.accounts.contains_key(&account.whisper_id) {
            return Err(StorageError::Constraint("whisper id already registered"));
        }
        inner
            .accounts
            .insert(account.whisper_id.clone(), account.clone());
        Ok(())
    }

    async fn load_session(
        &self,
        token: &SessionToken,
    ) -> Result<Option<SessionRecord>, StorageError> {
        Ok(self.inner.lock().unwrap().sessions.get(token).cloned())
    }

    async fn displace_sessions(
        &self,
        session: &SessionRecord,
    ) -> Result<Vec<SessionRecord>, StorageError> {
        let mut inner = self.inner.lock().unwrap();
        let revoked: Vec<SessionRecord> = inner
            .sessions
            .values()
            .filter(|s| s.whisper_id == session.whisper_id)
            .cloned()
            .collect();
        for s in &revoked {
            inner.sessions.remove(&s.session_token);
        }
        inner
            .sessions
            .insert(session.session_token.clone(), session.clone());
        Ok(revoked)
    }

    async fn rotate_session(
        &self,
        old: &SessionToken,
        new: &SessionRecord,
    ) -> Result<bool, StorageError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.sessions.remove(old).is_none() {
            return Ok(false);
        }
        inner
            .sessions
            .insert(new.session_token.clone(), new.clone());
        Ok(true)
    }

    async fn delete_session(&self, token: &SessionToken) -> Result<bool, StorageError> {
        Ok(self.inner.lock().unwrap().sessions.remove(token).is_some())
    }

    async fn upsert_push_token(&self, record: &PushTokenRecord) -> Result<(), StorageError> {
        self.inner
            .lock()
            .unwrap()
            .push_tokens
            .insert(record.whisper_id.clone(), record.clone());
        Ok(())
    }

    async fn load_push_token(
        &self,
        id: &WhisperId,
    ) -> Result<Option<PushTokenRecord>, StorageError> {
        Ok(self.inner.lock().unwrap().push_tokens.get(id).cloned())
    }

    async fn insert_pending(&self, record: &PendingMessageRecord) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().unwrap();
        let queue = inner
            .pending
            .entry(record.recipient().clone())
            .or_default();
        if queue
            .iter()
            .any(|r| r.message_id() == record.message_id())
        {
            return Err(StorageError::Constraint("message id already queued"));
        }
        queue.push(record.clone());
        Ok(())
    }

    async fn mark_pending_delivered(
        &self,
        recipient: &WhisperId,
        message_id: &MessageId,
        at: TimeStamp,
    ) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(queue) = inner.pending.get_mut(recipient) {
            for record in queue.iter_mut() {
                if record.message_id() == *message_id {
                    record.delivered_at = Some(at);
                }
            }
        }
        Ok(())
    }

    async fn delete_pending(
        &self,
        recipient: &WhisperId,
        message_id: &MessageId,
    ) -> Result<bool, StorageError> {
        let mut inner = self.inner.lock().unwrap();
        let Some(queue) = inner.pending.get_mut(recipient) else {
            return Ok(false);
        };
        let before = queue.len();
        queue.retain(|r| r.message_id() != *message_id);
        Ok(queue.len() < before)
    }

    async fn fetch_pending_page(
        &self,
        recipient: &WhisperId,
        cursor: Option<PendingCursor>,
        limit: u32,
    ) -> Result<Vec<PendingMessageRecord>, StorageError> {
        let inner = self.inner.lock().unwrap();
        let mut records: Vec<PendingMessageRecord> = inner
            .pending
            .get(recipient)
            .map(|queue| {
                queue
                    .iter()
                    .filter(|r| cursor.map_or(true, |c| c.precedes(r)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        records.sort_by_key(|r| r.sort_key());
        records.truncate(limit as usize);
        Ok(records)
    }

    async fn purge_expired_pending(&self, before: TimeStamp) -> Result<u64, StorageError> {
        let mut inner = self.inner.lock().unwrap();
        let mut purged = 0;
        for queue in inner.pending.values_mut() {
            let len = queue.len();
            queue.retain(|r| r.created_at > before);
            purged += (len - queue.len()) as u64;
        }
        Ok(purged)
    }

    async fn insert_group(
        &self,
        group: &GroupRecord,
        members: &[GroupMemberRecord],
    ) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.groups.contains_key(&group.group_id) {
            return Err(StorageError::Constraint("group id already exists"));
        }
        inner.groups.insert(group.group_id.clone(), group.clone());
        inner.members.extend_from_slice(members);
        Ok(())
    }

    async fn load_group(&self, id: &GroupId) -> Result<Option<GroupRecord>, StorageError> {
        Ok(self.inner.lock().unwrap().groups.get(id).cloned())
    }

    async fn update_group_title(
        &self,
        id: &GroupId,
        title: &str,
        at: TimeStamp,
    ) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().unwrap();
        let group = inner
            .groups
            .get_mut(id)
            .ok_or(StorageError::Constraint("no such group"))?;
        group.title = title.to_owned();
        group.updated_at = at;
        Ok(())
    }

    async fn active_members(&self, id: &GroupId) -> Result<Vec<GroupMemberRecord>, StorageError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .members
            .iter()
            .filter(|m| &m.group_id == id && m.is_active())
            .cloned()
            .collect())
    }

    async fn active_member(
        &self,
        id: &GroupId,
        whisper_id: &WhisperId,
    ) -> Result<Option<GroupMemberRecord>, StorageError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .members
            .iter()
            .find(|m| &m.group_id == id && &m.whisper_id == whisper_id && m.is_active())
            .cloned())
    }

    async fn add_member_checked(
        &self,
        member: &GroupMemberRecord,
        max_members: usize,
        at: TimeStamp,
    ) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().unwrap();
        let active = inner
            .members
            .iter()
            .filter(|m| m.group_id == member.group_id && m.is_active())
            .count();
        if active >= max_members {
            return Err(StorageError::Constraint("group is full"));
        }
        if inner.members.iter().any(|m| {
            m.group_id == member.group_id && m.whisper_id == member.whisper_id && m.is_active()
        }) {
            return Err(StorageError::Constraint("already an active member"));
        }
        inner.members.push(member.clone());
        if let Some(group) = inner.groups.get_mut(&member.group_id) {
            group.updated_at = at;
        }
        Ok(())
    }

    async fn remove_member(
        &self,
        id: &GroupId,
        whisper_id: &WhisperId,
        at: TimeStamp,
    ) -> Result<bool, StorageError> {
        let mut inner = self.inner.lock().unwrap();
        let mut removed = false;
        for m in inner.members.iter_mut() {
            if &m.group_id == id && &m.whisper_id == whisper_id && m.is_active() {
                m.removed_at = Some(at);
                removed = true;
            }
        }
        if removed {
            if let Some(group) = inner.groups.get_mut(id) {
                group.updated_at = at;
            }
        }
        Ok(removed)
    }

    async fn change_member_role(
        &self,
        id: &GroupId,
        whisper_id: &WhisperId,
        role: GroupRole,
        at: TimeStamp,
    ) -> Result<bool, StorageError> {
        let mut inner = self.inner.lock().unwrap();
        let mut changed = false;
        for m in inner.members.iter_mut() {
            if &m.group_id == id && &m.whisper_id == whisper_id && m.is_active() {
                m.role = role;
                changed = true;
            }
        }
        if changed {
            if let Some(group) = inner.groups.get_mut(id) {
                group.updated_at = at;
            }
        }
        Ok(changed)
    }

    async fn insert_call(&self, record: &CallRecord) -> Result<(), StorageError> {
        self.inner.lock().unwrap().calls.push(record.clone());
        Ok(())
    }

    async fn note_contact(
        &self,
        a: &WhisperId,
        b: &WhisperId,
        at: TimeStamp,
    ) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().unwrap();
        inner.contacts.insert((a.clone(), b.clone()), at);
        inner.contacts.insert((b.clone(), a.clone()), at);
        Ok(())
    }

    async fn recent_contacts(
        &self,
        id: &WhisperId,
        since: TimeStamp,
    ) -> Result<Vec<WhisperId>, StorageError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .contacts
            .iter()
            .filter(|((a, _), at)| a == id && **at >= since)
            .map(|((_, b), _)| b.clone())
            .collect())
    }
}

impl MemDurableStore {
    /// Inspection hook for tests.
    pub fn call_history(&self) -> Vec<CallRecord> {
        self.inner.lock().unwrap().calls.clone()
    }
}

struct PresenceEntry {
    last_seen: TimeStamp,
    expires_at: TimeStamp,
}

struct LiveCallEntry {
    call: LiveCall,
    expires_at: TimeStamp,
}

struct RateBucket {
    tokens: f64,
    last_refill_ms: i64,
}

/// The volatile store: TTL'd maps with a periodic sweeper.
#[derive(Default)]
pub struct MemVolatileStore {
    challenges: DashMap<ChallengeId, ChallengeRecord>,
    presence: DashMap<WhisperId, PresenceEntry>,
    live_calls: DashMap<CallId, LiveCallEntry>,
    buckets: DashMap<Vec<u8>, RateBucket>,
    dedup: DashMap<String, TimeStamp>,
}

impl MemVolatileStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VolatileStore for MemVolatileStore {
    async fn put_challenge(&self, record: ChallengeRecord) {
        self.challenges.insert(record.challenge_id.clone(), record);
    }

    async fn consume_challenge(
        &self,
        id: &ChallengeId,
        now: TimeStamp,
    ) -> Option<ChallengeRecord> {
        let (_, record) = self.challenges.remove(id)?;
        record.is_live_at(now).then_some(record)
    }

    async fn refresh_presence(
        &self,
        id: &WhisperId,
        now: TimeStamp,
        ttl_secs: i64,
    ) -> PresenceTransition {
        let expires_at = TimeStamp::from_millis(now.as_millis() + ttl_secs * 1000)
            .expect("presence expiry in range");
        let mut transition = PresenceTransition::CameOnline;
        self.presence
            .entry(id.clone())
            .and_modify(|entry| {
                if !entry.expires_at.has_expired_at(now) {
                    transition = PresenceTransition::StillOnline;
                }
                entry.last_seen = now;
                entry.expires_at = expires_at;
            })
            .or_insert(PresenceEntry {
                last_seen: now,
                expires_at,
            });
        transition
    }

    async fn presence(&self, id: &WhisperId, now: TimeStamp) -> Option<TimeStamp> {
        let entry = self.presence.get(id)?;
        (!entry.expires_at.has_expired_at(now)).then_some(entry.last_seen)
    }

    async fn clear_presence(&self, id: &WhisperId) -> Option<TimeStamp> {
        self.presence.remove(id).map(|(_, entry)| entry.last_seen)
    }

    async fn put_live_call(&self, call: LiveCall, now: TimeStamp, ttl_secs: i64) -> bool {
        let expires_at = TimeStamp::from_millis(now.as_millis() + ttl_secs * 1000)
            .expect("call expiry in range");
        match self.live_calls.entry(call.call_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                if occupied.get().expires_at.has_expired_at(now) {
                    occupied.insert(LiveCallEntry { call, expires_at });
                    true
                } else {
                    false
                }
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(LiveCallEntry { call, expires_at });
                true
            }
        }
    }

    async fn get_live_call(&self, id: &CallId, now: TimeStamp) -> Option<LiveCall> {
        let entry = self.live_calls.get(id)?;
        (!entry.expires_at.has_expired_at(now)).then(|| entry.call.clone())
    }

    async fn cas_call_state(
        &self,
        id: &CallId,
        expected: &[CallState],
        next: CallState,
        now: TimeStamp,
    ) -> Option<LiveCall> {
        let mut entry = self.live_calls.get_mut(id)?;
        if entry.expires_at.has_expired_at(now) || !expected.contains(&entry.call.state) {
            return None;
        }
        entry.call.state = next;
        if next == CallState::Answered {
            entry.call.answered_at = Some(now);
        }
        Some(entry.call.clone())
    }

    async fn remove_live_call(&self, id: &CallId) -> Option<LiveCall> {
        self.live_calls.remove(id).map(|(_, entry)| entry.call)
    }

    async fn find_live_call_between(
        &self,
        a: &WhisperId,
        b: &WhisperId,
        now: TimeStamp,
    ) -> Option<LiveCall> {
        self.live_calls.iter().find_map(|entry| {
            let call = &entry.call;
            let live = !entry.expires_at.has_expired_at(now) && !call.state.is_terminal();
            let between = (&call.caller_id == a && &call.callee_id == b)
                || (&call.caller_id == b && &call.callee_id == a);
            (live && between).then(|| call.clone())
        })
    }

    async fn allow_rate(
        &self,
        key: Vec<u8>,
        capacity: f64,
        refill_per_sec: f64,
        now_ms: i64,
    ) -> bool {
        let mut bucket = self.buckets.entry(key).or_insert(RateBucket {
            tokens: capacity,
            last_refill_ms: now_ms,
        });
        let elapsed_ms = (now_ms - bucket.last_refill_ms).max(0);
        bucket.tokens =
            (bucket.tokens + refill_per_sec * elapsed_ms as f64 / 1000.0).min(capacity);
        bucket.last_refill_ms = now_ms;
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    async fn dedup_claim(&self, key: String, now: TimeStamp, window_ms: i64) -> bool {
        match self.dedup.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                if now.as_millis() - occupied.get().as_millis() < window_ms {
                    false
                } else {
                    occupied.insert(now);
                    true
                }
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(now);
                true
            }
        }
    }

    async fn sweep(&self, now: TimeStamp) {
        self.challenges.retain(|_, c| c.is_live_at(now));
        self.presence.retain(|_, p| !p.expires_at.has_expired_at(now));
        // Live calls are left to the timeout wheel; evicting them here
        // would race `handle_timeout` out of its `call_end` emission.
        // Rate buckets idle for ten minutes refill to capacity anyway.
        self.buckets
            .retain(|_, b| now.as_millis() - b.last_refill_ms < 600_000);
        self.dedup
            .retain(|_, seen| now.as_millis() - seen.as_millis() < 60_000);
    }
}

#[cfg(test)]
mod tests {
    use whispertypes::identifiers::ChallengeId;

    use super::*;

    fn ts(millis: i64) -> TimeStamp {
        TimeStamp::from_millis(millis).unwrap()
    }

    #[tokio::test]
    async fn challenge_consumed_exactly_once() {
        let store = MemVolatileStore::new();
        let id = ChallengeId::random();
        store
            .put_challenge(ChallengeRecord {
                challenge_id: id.clone(),
                whisper_id: None,
                challenge_bytes: vec![1; 32],
                expires_at: ts(60_000),
            })
            .await;

        assert!(store.consume_challenge(&id, ts(1_000)).await.is_some());
        assert!(store.consume_challenge(&id, ts(1_000)).await.is_none());
    }

    #[tokio::test]
    async fn expired_challenge_is_gone() {
        let store = MemVolatileStore::new();
        let id = ChallengeId::random();
        store
            .put_challenge(ChallengeRecord {
                challenge_id: id.clone(),
                whisper_id: None,
                challenge_bytes: vec![1; 32],
                expires_at: ts(60_000),
            })
            .await;
        assert!(store.consume_challenge(&id, ts(61_000)).await.is_none());
    }

    #[tokio::test]
    async fn token_bucket_refills_lazily() {
        let store = MemVolatileStore::new();
        let key = b"bucket".to_vec();
        // Capacity 2, 1 token/sec.
        assert!(store.allow_rate(key.clone(), 2.0, 1.0, 0).await);
        assert!(store.allow_rate(key.clone(), 2.0, 1.0, 0).await);
        assert!(!store.allow_rate(key.clone(), 2.0, 1.0, 0).await);
        // After one second a token is back.
        assert!(store.allow_rate(key.clone(), 2.0, 1.0, 1_000).await);
        assert!(!store.allow_rate(key, 2.0, 1.0, 1_000).await);
    }

    #[tokio::test]
    async fn presence_transitions() {
        let store = MemVolatileStore::new();
        let id = WhisperId::derive_from_key(&[1u8; 32]);
        assert_eq!(
            store.refresh_presence(&id, ts(0), 60).await,
            PresenceTransition::CameOnline
        );
        assert_eq!(
            store.refresh_presence(&id, ts(30_000), 60).await,
            PresenceTransition::StillOnline
        );
        // TTL lapsed: the next refresh is a fresh online transition.
        assert_eq!(
            store.refresh_presence(&id, ts(120_000), 60).await,
            PresenceTransition::CameOnline
        );
    }

    #[tokio::test]
    async fn dedup_window() {
        let store = MemVolatileStore::new();
        assert!(store.dedup_claim("k".into(), ts(0), 2_000).await);
        assert!(!store.dedup_claim("k".into(), ts(1_999), 2_000).await);
        assert!(store.dedup_claim("k".into(), ts(2_000), 2_000).await);
    }

    #[tokio::test]
    async fn sweep_does_not_evict_live_calls() {
        let store = MemVolatileStore::new();
        let call_id = whispertypes::identifiers::CallId::from("k-sweep");
        let call = LiveCall {
            call_id: call_id.clone(),
            caller_id: WhisperId::derive_from_key(&[1u8; 32]),
            callee_id: WhisperId::derive_from_key(&[2u8; 32]),
            state: CallState::Initiated,
            is_video: false,
            created_at: ts(0),
            answered_at: None,
        };
        assert!(store.put_live_call(call, ts(0), 180).await);

        // Sweep far past the call TTL: the entry must survive so the
        // timeout wheel can still end the call properly.
        store.sweep(ts(10 * 60_000)).await;
        assert!(store.remove_live_call(&call_id).await.is_some());
    }
}
