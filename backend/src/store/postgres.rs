// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Postgres implementation of the durable store.
//!
//! Queries go through the runtime API; column values are decoded into the
//! typed records by hand. Multi-row invariants run inside a transaction
//! and are committed before the caller emits any side effects.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use whispertypes::crypto::{EncPublicKey, SignPublicKey, SignatureBytes};
use whispertypes::identifiers::{DeviceId, GroupId, MessageId, SessionToken, WhisperId};
use whispertypes::messages::client_group::GroupRole;
use whispertypes::messages::client_message::MessageEnvelope;
use whispertypes::time::TimeStamp;

use crate::auth_service::account_record::AccountRecord;
use crate::auth_service::push_token_record::PushTokenRecord;
use crate::auth_service::session_record::SessionRecord;
use crate::call_service::call_record::CallRecord;
use crate::errors::StorageError;
use crate::group_service::group_record::{GroupMemberRecord, GroupRecord};
use crate::router::pending_message::{PendingCursor, PendingMessageRecord};

use super::DurableStore;

#[derive(Clone, Debug)]
pub struct PgDurableStore {
    pool: PgPool,
}

impl PgDurableStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run the embedded migrations.
    pub async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| {
                let boxed: Box<dyn std::error::Error + Send + Sync> = Box::new(e);
                StorageError::Database(boxed.into())
            })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn malformed(what: &'static str) -> StorageError {
    StorageError::Constraint(what)
}

fn get_ts(row: &PgRow, column: &str) -> Result<TimeStamp, StorageError> {
    let time: DateTime<Utc> = row.try_get(column)?;
    Ok(time.into())
}

fn get_opt_ts(row: &PgRow, column: &str) -> Result<Option<TimeStamp>, StorageError> {
    let time: Option<DateTime<Utc>> = row.try_get(column)?;
    Ok(time.map(Into::into))
}

fn get_whisper_id(row: &PgRow, column: &str) -> Result<WhisperId, StorageError> {
    let raw: String = row.try_get(column)?;
    raw.parse().map_err(|_| malformed("whisper id column"))
}

fn account_from_row(row: &PgRow) -> Result<AccountRecord, StorageError> {
    let enc: Vec<u8> = row.try_get("enc_public_key")?;
    let sign: Vec<u8> = row.try_get("sign_public_key")?;
    let status: String = row.try_get("status")?;
    Ok(AccountRecord {
        whisper_id: get_whisper_id(row, "whisper_id")?,
        enc_public_key: EncPublicKey::from_slice(&enc)
            .map_err(|_| malformed("enc key column"))?,
        sign_public_key: SignPublicKey::from_slice(&sign)
            .map_err(|_| malformed("sign key column"))?,
        created_at: get_ts(row, "created_at")?,
        status: status.parse().map_err(|_| malformed("status column"))?,
    })
}

fn session_from_row(row: &PgRow) -> Result<SessionRecord, StorageError> {
    let token: String = row.try_get("session_token")?;
    let device: String = row.try_get("device_id")?;
    let platform: String = row.try_get("platform")?;
    Ok(SessionRecord {
        session_token: SessionToken::new(token),
        whisper_id: get_whisper_id(row, "whisper_id")?,
        device_id: DeviceId::new(device),
        platform: platform.parse().map_err(|_| malformed("platform column"))?,
        created_at: get_ts(row, "created_at")?,
        expires_at: get_ts(row, "expires_at")?,
    })
}

fn pending_from_row(row: &PgRow) -> Result<PendingMessageRecord, StorageError> {
    let message_id: Uuid = row.try_get("message_id")?;
    let group_id: Option<String> = row.try_get("group_id")?;
    let sig: Vec<u8> = row.try_get("sig")?;
    let reply_to: Option<Uuid> = row.try_get("reply_to")?;
    let envelope = MessageEnvelope {
        message_id: MessageId::new(message_id),
        from: get_whisper_id(row, "sender_id")?,
        to: get_whisper_id(row, "recipient_id")?,
        group_id: group_id.map(GroupId::new),
        msg_type: row.try_get("msg_type")?,
        timestamp: get_ts(row, "client_timestamp")?,
        nonce: row.try_get("nonce")?,
        ciphertext: row.try_get("ciphertext")?,
        sig: SignatureBytes::from_slice(&sig).map_err(|_| malformed("sig column"))?,
        reply_to: reply_to.map(MessageId::new),
        reactions: row.try_get("reactions")?,
        attachment: row.try_get("attachment")?,
    };
    Ok(PendingMessageRecord {
        envelope,
        received_at: get_ts(row, "received_at")?,
        created_at: get_ts(row, "created_at")?,
        delivered_at: get_opt_ts(row, "delivered_at")?,
    })
}

fn member_from_row(row: &PgRow) -> Result<GroupMemberRecord, StorageError> {
    let group_id: String = row.try_get("group_id")?;
    let role: String = row.try_get("role")?;
    Ok(GroupMemberRecord {
        group_id: GroupId::new(group_id),
        whisper_id: get_whisper_id(row, "whisper_id")?,
        role: role.parse().map_err(|_| malformed("role column"))?,
        joined_at: get_ts(row, "joined_at")?,
        removed_at: get_opt_ts(row, "removed_at")?,
    })
}

fn group_from_row(row: &PgRow) -> Result<GroupRecord, StorageError> {
    let group_id: String = row.try_get("group_id")?;
    Ok(GroupRecord {
        group_id: GroupId::new(group_id),
        title: row.try_get("title")?,
        owner_id: get_whisper_id(row, "owner_id")?,
        created_at: get_ts(row, "created_at")?,
        updated_at: get_ts(row, "updated_at")?,
    })
}

#[async_trait]
impl DurableStore for PgDurableStore {
    async fn load_account(&self, id: &WhisperId) -> Result<Option<AccountRecord>, StorageError> {
        let row = sqlx::query(
            "SELECT whisper_id, enc_public_key, sign_public_key, created_at, status
             FROM accounts WHERE whisper_id = $1",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn load_account_by_sign_key(
        &self,
        key: &SignPublicKey,
    ) -> Result<Option<AccountRecord>, StorageError> {
        let row = sqlx::query(
            "SELECT whisper_id, enc_public_key, sign_public_key, created_at, status
             FROM accounts WHERE sign_public_key = $1",
        )
        .bind(key.as_bytes().as_slice())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn insert_account(&self, account: &AccountRecord) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO accounts
                (whisper_id, enc_public_key, sign_public_key, created_at, status)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(account.whisper_id.as_str())
        .bind(account.enc_public_key.as_bytes().as_slice())
        .bind(account.sign_public_key.as_bytes().as_slice())
        .bind(account.created_at.time())
        .bind(account.status.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                StorageError::Constraint("whisper id already registered")
            }
            other => other.into(),
        })?;
        Ok(())
    }

    async fn load_session(
        &self,
        token: &SessionToken,
    ) -> Result<Option<SessionRecord>, StorageError> {
        let row = sqlx::query(
            "SELECT session_token, whisper_id, device_id, platform, created_at, expires_at
             FROM sessions WHERE session_token = $1",
        )
        .bind(token.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(session_from_row).transpose()
    }

    async fn displace_sessions(
        &self,
        session: &SessionRecord,
    ) -> Result<Vec<SessionRecord>, StorageError> {
        let mut txn = self.pool.begin().await?;

        let revoked = sqlx::query(
            "DELETE FROM sessions WHERE whisper_id = $1
             RETURNING session_token, whisper_id, device_id, platform, created_at, expires_at",
        )
        .bind(session.whisper_id.as_str())
        .fetch_all(&mut *txn)
        .await?
        .iter()
        .map(session_from_row)
        .collect::<Result<Vec<_>, _>>()?;

        sqlx::query(
            "INSERT INTO sessions
                (session_token, whisper_id, device_id, platform, created_at, expires_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(session.session_token.as_str())
        .bind(session.whisper_id.as_str())
        .bind(session.device_id.as_str())
        .bind(session.platform.as_str())
        .bind(session.created_at.time())
        .bind(session.expires_at.time())
        .execute(&mut *txn)
        .await?;

        txn.commit().await?;
        Ok(revoked)
    }

    async fn rotate_session(
        &self,
        old: &SessionToken,
        new: &SessionRecord,
    ) -> Result<bool, StorageError> {
        let mut txn = self.pool.begin().await?;

        let deleted = sqlx::query("DELETE FROM sessions WHERE session_token = $1")
            .bind(old.as_str())
            .execute(&mut *txn)
            .await?
            .rows_affected();
        if deleted == 0 {
            return Ok(false);
        }

        sqlx::query(
            "INSERT INTO sessions
                (session_token, whisper_id, device_id, platform, created_at, expires_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(new.session_token.as_str())
        .bind(new.whisper_id.as_str())
        .bind(new.device_id.as_str())
        .bind(new.platform.as_str())
        .bind(new.created_at.time())
        .bind(new.expires_at.time())
        .execute(&mut *txn)
        .await?;

        txn.commit().await?;
        Ok(true)
    }

    async fn delete_session(&self, token: &SessionToken) -> Result<bool, StorageError> {
        let deleted = sqlx::query("DELETE FROM sessions WHERE session_token = $1")
            .bind(token.as_str())
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted > 0)
    }

    async fn upsert_push_token(&self, record: &PushTokenRecord) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO push_tokens
                (whisper_id, device_id, platform, push_token, voip_token, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (whisper_id) DO UPDATE SET
                device_id = EXCLUDED.device_id,
                platform = EXCLUDED.platform,
                push_token = EXCLUDED.push_token,
                voip_token = EXCLUDED.voip_token,
                updated_at = EXCLUDED.updated_at",
        )
        .bind(record.whisper_id.as_str())
        .bind(record.device_id.as_str())
        .bind(record.platform.as_str())
        .bind(record.push_token.as_deref())
        .bind(record.voip_token.as_deref())
        .bind(record.updated_at.time())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_push_token(
        &self,
        id: &WhisperId,
    ) -> Result<Option<PushTokenRecord>, StorageError> {
        let row = sqlx::query(
            "SELECT whisper_id, device_id, platform, push_token, voip_token, updated_at
             FROM push_tokens WHERE whisper_id = $1",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| {
            let device: String = row.try_get("device_id")?;
            let platform: String = row.try_get("platform")?;
            Ok(PushTokenRecord {
                whisper_id: get_whisper_id(&row, "whisper_id")?,
                device_id: DeviceId::new(device),
                platform: platform.parse().map_err(|_| malformed("platform column"))?,
                push_token: row.try_get("push_token")?,
                voip_token: row.try_get("voip_token")?,
                updated_at: get_ts(&row, "updated_at")?,
            })
        })
        .transpose()
    }

    async fn insert_pending(&self, record: &PendingMessageRecord) -> Result<(), StorageError> {
        let e = &record.envelope;
        sqlx::query(
            "INSERT INTO pending_messages
                (message_id, recipient_id, sender_id, group_id, msg_type,
                 client_timestamp, nonce, ciphertext, sig, reply_to, reactions,
                 attachment, received_at, created_at, delivered_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
        )
        .bind(e.message_id.as_uuid())
        .bind(e.to.as_str())
        .bind(e.from.as_str())
        .bind(e.group_id.as_ref().map(|g| g.as_str()))
        .bind(&e.msg_type)
        .bind(e.timestamp.time())
        .bind(&e.nonce)
        .bind(&e.ciphertext)
        .bind(e.sig.as_bytes().as_slice())
        .bind(e.reply_to.as_ref().map(|id| *id.as_uuid()))
        .bind(&e.reactions)
        .bind(&e.attachment)
        .bind(record.received_at.time())
        .bind(record.created_at.time())
        .bind(record.delivered_at.map(|t| t.time()))
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                StorageError::Constraint("message id already queued")
            }
            other => other.into(),
        })?;
        Ok(())
    }

    async fn mark_pending_delivered(
        &self,
        recipient: &WhisperId,
        message_id: &MessageId,
        at: TimeStamp,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "UPDATE pending_messages SET delivered_at = $1
             WHERE recipient_id = $2 AND message_id = $3",
        )
        .bind(at.time())
        .bind(recipient.as_str())
        .bind(message_id.as_uuid())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_pending(
        &self,
        recipient: &WhisperId,
        message_id: &MessageId,
    ) -> Result<bool, StorageError> {
        let deleted = sqlx::query(
            "DELETE FROM pending_messages WHERE recipient_id = $1 AND message_id = $2",
        )
        .bind(recipient.as_str())
        .bind(message_id.as_uuid())
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(deleted > 0)
    }

    async fn fetch_pending_page(
        &self,
        recipient: &WhisperId,
        cursor: Option<PendingCursor>,
        limit: u32,
    ) -> Result<Vec<PendingMessageRecord>, StorageError> {
        let rows = match cursor {
            Some(cursor) => {
                sqlx::query(
                    "SELECT * FROM pending_messages
                     WHERE recipient_id = $1
                       AND (client_timestamp, message_id::text) > ($2, $3)
                     ORDER BY client_timestamp ASC, message_id::text ASC
                     LIMIT $4",
                )
                .bind(recipient.as_str())
                .bind(cursor.timestamp.time())
                .bind(cursor.message_id.to_string())
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT * FROM pending_messages
                     WHERE recipient_id = $1
                     ORDER BY client_timestamp ASC, message_id::text ASC
                     LIMIT $2",
                )
                .bind(recipient.as_str())
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(pending_from_row).collect()
    }

    async fn purge_expired_pending(&self, before: TimeStamp) -> Result<u64, StorageError> {
        let purged = sqlx::query("DELETE FROM pending_messages WHERE created_at < $1")
            .bind(before.time())
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(purged)
    }

    async fn insert_group(
        &self,
        group: &GroupRecord,
        members: &[GroupMemberRecord],
    ) -> Result<(), StorageError> {
        let mut txn = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO groups (group_id, title, owner_id, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(group.group_id.as_str())
        .bind(&group.title)
        .bind(group.owner_id.as_str())
        .bind(group.created_at.time())
        .bind(group.updated_at.time())
        .execute(&mut *txn)
        .await?;

        for member in members {
            sqlx::query(
                "INSERT INTO group_members (group_id, whisper_id, role, joined_at, removed_at)
                 VALUES ($1, $2, $3, $4, NULL)",
            )
            .bind(member.group_id.as_str())
            .bind(member.whisper_id.as_str())
            .bind(member.role.as_str())
            .bind(member.joined_at.time())
            .execute(&mut *txn)
            .await?;
        }

        txn.commit().await?;
        Ok(())
    }

    async fn load_group(&self, id: &GroupId) -> Result<Option<GroupRecord>, StorageError> {
        let row = sqlx::query(
            "SELECT group_id, title, owner_id, created_at, updated_at
             FROM groups WHERE group_id = $1",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(group_from_row).transpose()
    }

    async fn update_group_title(
        &self,
        id: &GroupId,
        title: &str,
        at: TimeStamp,
    ) -> Result<(), StorageError> {
        sqlx::query("UPDATE groups SET title = $1, updated_at = $2 WHERE group_id = $3")
            .bind(title)
            .bind(at.time())
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn active_members(&self, id: &GroupId) -> Result<Vec<GroupMemberRecord>, StorageError> {
        let rows = sqlx::query(
            "SELECT group_id, whisper_id, role, joined_at, removed_at
             FROM group_members WHERE group_id = $1 AND removed_at IS NULL
             ORDER BY joined_at ASC",
        )
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(member_from_row).collect()
    }

    async fn active_member(
        &self,
        id: &GroupId,
        whisper_id: &WhisperId,
    ) -> Result<Option<GroupMemberRecord>, StorageError> {
        let row = sqlx::query(
            "SELECT group_id, whisper_id, role, joined_at, removed_at
             FROM group_members
             WHERE group_id = $1 AND whisper_id = $2 AND removed_at IS NULL",
        )
        .bind(id.as_str())
        .bind(whisper_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(member_from_row).transpose()
    }

    async fn add_member_checked(
        &self,
        member: &GroupMemberRecord,
        max_members: usize,
        at: TimeStamp,
    ) -> Result<(), StorageError> {
        let mut txn = self.pool.begin().await?;

        // Lock the group row so concurrent adds serialize on the cap check.
        let locked = sqlx::query("SELECT group_id FROM groups WHERE group_id = $1 FOR UPDATE")
            .bind(member.group_id.as_str())
            .fetch_optional(&mut *txn)
            .await?;
        if locked.is_none() {
            return Err(StorageError::Constraint("no such group"));
        }

        let active: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM group_members WHERE group_id = $1 AND removed_at IS NULL",
        )
        .bind(member.group_id.as_str())
        .fetch_one(&mut *txn)
        .await?;
        if active as usize >= max_members {
            return Err(StorageError::Constraint("group is full"));
        }

        sqlx::query(
            "INSERT INTO group_members (group_id, whisper_id, role, joined_at, removed_at)
             VALUES ($1, $2, $3, $4, NULL)",
        )
        .bind(member.group_id.as_str())
        .bind(member.whisper_id.as_str())
        .bind(member.role.as_str())
        .bind(member.joined_at.time())
        .execute(&mut *txn)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                StorageError::Constraint("already an active member")
            }
            other => other.into(),
        })?;

        sqlx::query("UPDATE groups SET updated_at = $1 WHERE group_id = $2")
            .bind(at.time())
            .bind(member.group_id.as_str())
            .execute(&mut *txn)
            .await?;

        txn.commit().await?;
        Ok(())
    }

    async fn remove_member(
        &self,
        id: &GroupId,
        whisper_id: &WhisperId,
        at: TimeStamp,
    ) -> Result<bool, StorageError> {
        let mut txn = self.pool.begin().await?;

        let removed = sqlx::query(
            "UPDATE group_members SET removed_at = $1
             WHERE group_id = $2 AND whisper_id = $3 AND removed_at IS NULL",
        )
        .bind(at.time())
        .bind(id.as_str())
        .bind(whisper_id.as_str())
        .execute(&mut *txn)
        .await?
        .rows_affected();

        if removed > 0 {
            sqlx::query("UPDATE groups SET updated_at = $1 WHERE group_id = $2")
                .bind(at.time())
                .bind(id.as_str())
                .execute(&mut *txn)
                .await?;
        }

        txn.commit().await?;
        Ok(removed > 0)
    }

    async fn change_member_role(
        &self,
        id: &GroupId,
        whisper_id: &WhisperId,
        role: GroupRole,
        at: TimeStamp,
    ) -> Result<bool, StorageError> {
        let mut txn = self.pool.begin().await?;

        let changed = sqlx::query(
            "UPDATE group_members SET role = $1
             WHERE group_id = $2 AND whisper_id = $3 AND removed_at IS NULL",
        )
        .bind(role.as_str())
        .bind(id.as_str())
        .bind(whisper_id.as_str())
        .execute(&mut *txn)
        .await?
        .rows_affected();

        if changed > 0 {
            sqlx::query("UPDATE groups SET updated_at = $1 WHERE group_id = $2")
                .bind(at.time())
                .bind(id.as_str())
                .execute(&mut *txn)
                .await?;
        }

        txn.commit().await?;
        Ok(changed > 0)
    }

    async fn insert_call(&self, record: &CallRecord) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO calls
                (call_id, caller_id, callee_id, state, is_video, created_at,
                 answered_at, ended_at, end_reason)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             ON CONFLICT (call_id) DO NOTHING",
        )
        .bind(record.call_id.as_str())
        .bind(record.caller_id.as_str())
        .bind(record.callee_id.as_str())
        .bind(record.state.as_str())
        .bind(record.is_video)
        .bind(record.created_at.time())
        .bind(record.answered_at.map(|t| t.time()))
        .bind(record.ended_at.map(|t| t.time()))
        .bind(record.end_reason.map(|r| r.as_str()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn note_contact(
        &self,
        a: &WhisperId,
        b: &WhisperId,
        at: TimeStamp,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO contact_edges (whisper_id, peer_id, last_message_at)
             VALUES ($1, $2, $3), ($2, $1, $3)
             ON CONFLICT (whisper_id, peer_id)
             DO UPDATE SET last_message_at = EXCLUDED.last_message_at",
        )
        .bind(a.as_str())
        .bind(b.as_str())
        .bind(at.time())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_contacts(
        &self,
        id: &WhisperId,
        since: TimeStamp,
    ) -> Result<Vec<WhisperId>, StorageError> {
        let rows = sqlx::query(
            "SELECT peer_id FROM contact_edges
             WHERE whisper_id = $1 AND last_message_at >= $2",
        )
        .bind(id.as_str())
        .bind(since.time())
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                let peer: String = row.try_get("peer_id")?;
                peer.parse().map_err(|_| malformed("peer id column"))
            })
            .collect()
    }
}
