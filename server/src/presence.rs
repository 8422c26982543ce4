// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Presence tracking and fan-out.
//!
//! Every inbound frame of a bound connection refreshes the user's
//! presence entry (TTL 60 s). The transition to online, and the loss of
//! the last live connection, are broadcast as `presence_update` to every
//! peer the user exchanged a message with in the last 30 days.

use std::sync::Arc;

use tracing::{debug, error};

use whisperbackend::clock::Clock;
use whisperbackend::notifier::ConnectionNotifier;
use whisperbackend::store::{DurableStore, PresenceTransition, VolatileStore};
use whispertypes::codec::OutboundFrame;
use whispertypes::identifiers::WhisperId;
use whispertypes::messages::presence::{PresenceStatus, PresenceUpdate};
use whispertypes::messages::MsgType;
use whispertypes::time::{Duration, TimeStamp};

pub const PRESENCE_TTL_SECS: i64 = 60;

/// Window of the contact index used for presence fan-out.
pub const CONTACT_WINDOW_DAYS: i64 = 30;

pub struct PresenceBroker {
    store: Arc<dyn DurableStore>,
    volatile: Arc<dyn VolatileStore>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn ConnectionNotifier>,
}

impl PresenceBroker {
    pub fn new(
        store: Arc<dyn DurableStore>,
        volatile: Arc<dyn VolatileStore>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn ConnectionNotifier>,
    ) -> Self {
        Self {
            store,
            volatile,
            clock,
            notifier,
        }
    }

    /// Refresh the presence TTL; broadcast when the user just came
    /// online.
    pub async fn on_activity(&self, whisper_id: &WhisperId) {
        let now = self.clock.now();
        let transition = self
            .volatile
            .refresh_presence(whisper_id, now, PRESENCE_TTL_SECS)
            .await;
        if transition == PresenceTransition::CameOnline {
            debug!(%whisper_id, "came online");
            self.broadcast(whisper_id, PresenceStatus::Online, None).await;
        }
    }

    /// The user's last live connection closed.
    pub async fn on_disconnect(&self, whisper_id: &WhisperId) {
        let last_seen = self.volatile.clear_presence(whisper_id).await;
        debug!(%whisper_id, "went offline");
        self.broadcast(whisper_id, PresenceStatus::Offline, last_seen)
            .await;
    }

    async fn broadcast(
        &self,
        whisper_id: &WhisperId,
        status: PresenceStatus,
        last_seen: Option<TimeStamp>,
    ) {
        let now = self.clock.now();
        let Some(since) = now.checked_add(Duration::days(-CONTACT_WINDOW_DAYS)) else {
            return;
        };
        let contacts = match self.store.recent_contacts(whisper_id, since).await {
            Ok(contacts) => contacts,
            Err(e) => {
                error!(error = %e, "failed to resolve presence contacts");
                return;
            }
        };

        let frame = OutboundFrame::new(
            MsgType::PresenceUpdate,
            &PresenceUpdate {
                whisper_id: whisper_id.clone(),
                status,
                last_seen,
            },
        );
        for contact in contacts {
            // Offline contacts simply miss the update.
            let _ = self.notifier.notify(&contact, frame.clone()).await;
        }
    }
}
