// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Direct-message routing.
//!
//! Sends are verified (timestamp window, Ed25519 over the canonical
//! string), persisted, then delivered to a live connection or escalated to
//! a push wake. Rows stay queued until the recipient acknowledges with a
//! `delivery_receipt{status: delivered}` or the retention horizon drops
//! them.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use whispertypes::codec::OutboundFrame;
use whispertypes::identifiers::WhisperId;
use whispertypes::messages::client_message::{
    DeliveryReceiptParams, FetchPendingParams, MessageAccepted, MessageDelivered,
    PendingMessagesPage, ReceiptStatus, SendMessageParams,
};
use whispertypes::messages::{ClientVersions, MsgType};
use whispertypes::time::{TimeStamp, MAX_TIMESTAMP_SKEW_MS};

pub mod errors;
pub mod pending_message;

use errors::RouterError;
use pending_message::{PendingCursor, PendingMessageRecord};

use crate::clock::Clock;
use crate::notifier::{ConnectionNotifier, NotifierError};
use crate::push_dispatcher::{WakeHints, WakeSink};
use crate::store::DurableStore;

pub struct MessageRouter {
    store: Arc<dyn DurableStore>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn ConnectionNotifier>,
    push: Arc<dyn WakeSink>,
}

impl MessageRouter {
    pub fn new(
        store: Arc<dyn DurableStore>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn ConnectionNotifier>,
        push: Arc<dyn WakeSink>,
    ) -> Self {
        Self {
            store,
            clock,
            notifier,
            push,
        }
    }

    fn check_versions(protocol: u16, crypto: u16) -> Result<(), RouterError> {
        let versions = ClientVersions {
            protocol_version: protocol,
            crypto_version: crypto,
        };
        if !versions.is_supported() {
            return Err(RouterError::VersionMismatch);
        }
        Ok(())
    }

    /// Send → persist → live-deliver-or-queue. Returns the ack for the
    /// sender.
    #[instrument(skip_all, fields(message_id = %params.message.message_id))]
    pub async fn route_direct(
        &self,
        params: SendMessageParams,
        sender: &WhisperId,
    ) -> Result<MessageAccepted, RouterError> {
        Self::check_versions(params.protocol_version, params.crypto_version)?;
        let message = params.message;
        message.validate()?;

        if &message.from != sender {
            return Err(RouterError::SenderMismatch);
        }

        let now = self.clock.now();
        if !message.timestamp.is_within_skew_of(&now, MAX_TIMESTAMP_SKEW_MS) {
            return Err(RouterError::TimestampSkew);
        }

        let sender_account = self
            .store
            .load_account(sender)
            .await?
            .ok_or(RouterError::SenderMismatch)?;
        message
            .canonical()
            .verify(&sender_account.sign_public_key, &message.sig)
            .map_err(|_| RouterError::BadSignature)?;

        let recipient = self
            .store
            .load_account(&message.to)
            .await?
            .filter(|account| account.is_active())
            .ok_or(RouterError::RecipientNotFound)?;

        let accepted = MessageAccepted::sent(message.message_id);
        let record = PendingMessageRecord {
            envelope: message,
            received_at: now,
            created_at: now,
            delivered_at: None,
        };
        match self.store.insert_pending(&record).await {
            Ok(()) => {}
            // A resend of an already queued message id is idempotent.
            Err(crate::errors::StorageError::Constraint(_)) => {
                info!("duplicate send, acknowledging without re-queueing");
                return Ok(accepted);
            }
            Err(e) => return Err(e.into()),
        }

        self.store
            .note_contact(sender, &recipient.whisper_id, now)
            .await?;

        self.deliver_or_wake(record).await?;
        Ok(accepted)
    }

    /// Deliver a freshly queued record to a live connection, or wake the
    /// recipient via push. Shared with the group fan-out path.
    pub(crate) async fn deliver_or_wake(
        &self,
        record: PendingMessageRecord,
    ) -> Result<(), crate::errors::StorageError> {
        let recipient = record.recipient().clone();
        let message_id = record.message_id();
        let frame = OutboundFrame::new(MsgType::MessageReceived, &record.envelope);
        match self.notifier.notify(&recipient, frame).await {
            Ok(()) => {
                // Written to the socket, not yet acknowledged.
                self.store
                    .mark_pending_delivered(&recipient, &message_id, self.clock.now())
                    .await?;
            }
            Err(NotifierError::ClientNotFound) => {
                self.push
                    .wake(
                        &recipient,
                        whispertypes::messages::push_token::WakeReason::Message,
                        WakeHints {
                            correlation_id: Some(message_id.to_string()),
                            call: None,
                        },
                    )
                    .await;
            }
        }
        Ok(())
    }

    /// Receipt handling. The issuing party is `params.from`; `delivered`
    /// removes the queued row, `read` only forwards. Malformed or foreign
    /// receipts are dropped silently (at-most-once semantics).
    #[instrument(skip_all, fields(message_id = %params.message_id))]
    pub async fn handle_receipt(
        &self,
        params: DeliveryReceiptParams,
        sender: &WhisperId,
    ) -> Result<(), RouterError> {
        Self::check_versions(params.protocol_version, params.crypto_version)?;

        if &params.from != sender {
            warn!("receipt issuer does not match session, dropping");
            return Ok(());
        }

        if params.status == ReceiptStatus::Delivered {
            let removed = self
                .store
                .delete_pending(&params.from, &params.message_id)
                .await?;
            if !removed {
                // Duplicate receipt: nothing queued anymore, nothing to do.
                return Ok(());
            }
        }

        let frame = OutboundFrame::new(
            MsgType::MessageDelivered,
            &MessageDelivered {
                message_id: params.message_id,
                status: params.status,
                timestamp: params.timestamp,
            },
        );
        if self.notifier.notify(&params.to, frame).await.is_err() {
            // The original sender is offline; receipts are not queued.
            info!("receipt target offline, dropping notification");
        }
        Ok(())
    }

    /// Cursor pagination over the pending queue. Idempotent; rows are only
    /// removed by receipts or retention.
    pub async fn fetch_pending(
        &self,
        params: FetchPendingParams,
        user: &WhisperId,
    ) -> Result<PendingMessagesPage, RouterError> {
        Self::check_versions(params.protocol_version, params.crypto_version)?;
        params.validate()?;

        let cursor = params
            .cursor
            .as_deref()
            .map(|raw| PendingCursor::decode(raw).ok_or(RouterError::BadCursor))
            .transpose()?;
        let limit = params.effective_limit();

        let records = self.store.fetch_pending_page(user, cursor, limit).await?;
        let next_cursor = if records.len() == limit as usize {
            records.last().map(|record| {
                PendingCursor {
                    timestamp: record.envelope.timestamp,
                    message_id: record.message_id(),
                }
                .encode()
            })
        } else {
            None
        };

        Ok(PendingMessagesPage {
            messages: records.into_iter().map(|r| r.envelope).collect(),
            next_cursor,
        })
    }

    /// Retention sweep; returns the number of rows dropped.
    pub async fn purge_expired(&self, retention_days: i64) -> Result<u64, RouterError> {
        let now = self.clock.now();
        let horizon = TimeStamp::from_millis(now.as_millis() - retention_days * 24 * 3600 * 1000)
            .ok_or(RouterError::TimestampSkew)?;
        Ok(self.store.purge_expired_pending(horizon).await?)
    }
}
