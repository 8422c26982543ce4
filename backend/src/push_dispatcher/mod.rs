// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Wake-push assembly and vendor dispatch.
//!
//! When a recipient has no live connection, the routing services call
//! [`PushDispatcher::wake`]. The dispatcher resolves the push target,
//! assembles the minimal wake payload, suppresses duplicates within a
//! two-second window and hands the result to the vendor provider.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};

use whispertypes::identifiers::{CallId, WhisperId};
use whispertypes::messages::push_token::{PushChannel, WakePayload, WakeReason};

use crate::clock::Clock;
use crate::store::{DurableStore, VolatileStore};

/// Duplicate wakes for the same (recipient, reason, correlation id) are
/// suppressed within this window.
pub const PUSH_DEDUP_WINDOW_MS: i64 = 2_000;

#[derive(Debug, thiserror::Error)]
pub enum PushNotificationError {
    /// Just for logging.
    #[error("push failed: {0}")]
    Other(String),
    /// The push token is invalid and should be dropped.
    #[error("invalid push token: {0}")]
    InvalidToken(String),
    /// Network error.
    #[error("network error: {0}")]
    NetworkError(String),
    /// The vendor JWT could not be created.
    #[error("jwt creation failed: {0}")]
    JwtCreationError(String),
    /// OAuth error.
    #[error("oauth error: {0}")]
    OAuthError(String),
    /// Configuration error.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

pub trait PushNotificationProvider: Send + Sync + 'static {
    fn push(
        &self,
        channel: PushChannel,
        token: &str,
        payload: &WakePayload,
    ) -> impl std::future::Future<Output = Result<(), PushNotificationError>> + Send;
}

/// Extra context for call wakes.
#[derive(Clone, Debug, Default)]
pub struct WakeHints {
    /// Deduplication handle: message id, call id, whatever correlates
    /// retries of the same event.
    pub correlation_id: Option<String>,
    pub call: Option<CallWake>,
}

#[derive(Clone, Debug)]
pub struct CallWake {
    pub call_id: CallId,
    pub from: WhisperId,
    pub caller_name: Option<String>,
    pub is_video: bool,
}

pub struct PushDispatcher<P> {
    store: Arc<dyn DurableStore>,
    volatile: Arc<dyn VolatileStore>,
    clock: Arc<dyn Clock>,
    provider: P,
}

impl<P: PushNotificationProvider> PushDispatcher<P> {
    pub fn new(
        store: Arc<dyn DurableStore>,
        volatile: Arc<dyn VolatileStore>,
        clock: Arc<dyn Clock>,
        provider: P,
    ) -> Self {
        Self {
            store,
            volatile,
            clock,
            provider,
        }
    }

    /// Wake a dormant client. Failures never propagate to the caller: a
    /// lost wake degrades to the client polling on its next connect.
    pub async fn wake(&self, whisper_id: &WhisperId, reason: WakeReason, hints: WakeHints) {
        let now = self.clock.now();

        let correlation = hints.correlation_id.as_deref().unwrap_or("-");
        let dedup_key = format!("push:{whisper_id}:{}:{correlation}", reason.as_str());
        if !self
            .volatile
            .dedup_claim(dedup_key, now, PUSH_DEDUP_WINDOW_MS)
            .await
        {
            return;
        }

        let target = match self.store.load_push_token(whisper_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                info!(%whisper_id, reason = reason.as_str(), "no push target registered");
                return;
            }
            Err(e) => {
                error!(error = %e, "failed to load push target");
                return;
            }
        };

        let push_target = target.as_target();
        let Some((channel, token)) = push_target.channel_for(reason) else {
            info!(%whisper_id, reason = reason.as_str(), "no wake channel for platform");
            return;
        };

        let mut payload = WakePayload::new(reason, whisper_id.clone());
        if let Some(call) = hints.call {
            payload = payload.with_call(call.call_id, call.from, call.caller_name, call.is_video);
        }

        match self.provider.push(channel, token, &payload).await {
            Ok(()) => {}
            Err(PushNotificationError::InvalidToken(description)) => {
                info!(
                    %whisper_id,
                    description,
                    "push token rejected by the vendor, dropping it"
                );
                let mut cleared = target.clone();
                match channel {
                    PushChannel::ApnsVoip => cleared.voip_token = None,
                    PushChannel::Fcm | PushChannel::Apns => cleared.push_token = None,
                }
                cleared.updated_at = now;
                if let Err(e) = self.store.upsert_push_token(&cleared).await {
                    error!(error = %e, "failed to drop invalid push token");
                }
            }
            Err(PushNotificationError::NetworkError(description)) => {
                warn!(description, "push failed with a network error");
            }
            Err(e) => {
                error!(error = %e, "push failed");
            }
        }
    }
}

/// Object-safe face of the dispatcher, so the routing services don't
/// carry the provider type parameter around.
#[async_trait]
pub trait WakeSink: Send + Sync {
    async fn wake(&self, whisper_id: &WhisperId, reason: WakeReason, hints: WakeHints);
}

#[async_trait]
impl<P: PushNotificationProvider> WakeSink for PushDispatcher<P> {
    async fn wake(&self, whisper_id: &WhisperId, reason: WakeReason, hints: WakeHints) {
        PushDispatcher::wake(self, whisper_id, reason, hints).await
    }
}

/// Provider that drops every push. Used by database-less local runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPushProvider;

impl PushNotificationProvider for NullPushProvider {
    async fn push(
        &self,
        _channel: PushChannel,
        _token: &str,
        _payload: &WakePayload,
    ) -> Result<(), PushNotificationError> {
        Ok(())
    }
}

/// Provider that records every push; used by tests.
#[derive(Default)]
pub struct RecordingPushProvider {
    pub pushes: std::sync::Mutex<Vec<(PushChannel, String, WakePayload)>>,
}

impl RecordingPushProvider {
    pub fn wakes(&self) -> Vec<WakePayload> {
        self.pushes
            .lock()
            .unwrap()
            .iter()
            .map(|(_, _, p)| p.clone())
            .collect()
    }
}

impl PushNotificationProvider for Arc<RecordingPushProvider> {
    async fn push(
        &self,
        channel: PushChannel,
        token: &str,
        payload: &WakePayload,
    ) -> Result<(), PushNotificationError> {
        self.pushes
            .lock()
            .unwrap()
            .push((channel, token.to_owned(), payload.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use whispertypes::messages::client_auth::Platform;
    use whispertypes::time::TimeStamp;

    use crate::auth_service::push_token_record::PushTokenRecord;
    use crate::clock::ManualClock;
    use crate::store::memory::{MemDurableStore, MemVolatileStore};

    use super::*;

    async fn dispatcher_with_target(
        platform: Platform,
        voip: Option<&str>,
    ) -> (PushDispatcher<Arc<RecordingPushProvider>>, Arc<RecordingPushProvider>, WhisperId)
    {
        let store = Arc::new(MemDurableStore::new());
        let id = WhisperId::derive_from_key(&[8u8; 32]);
        store
            .upsert_push_token(&PushTokenRecord {
                whisper_id: id.clone(),
                device_id: "d1".into(),
                platform,
                push_token: Some("tok".into()),
                voip_token: voip.map(Into::into),
                updated_at: TimeStamp::from_millis(0).unwrap(),
            })
            .await
            .unwrap();
        let provider = Arc::new(RecordingPushProvider::default());
        let dispatcher = PushDispatcher::new(
            store,
            Arc::new(MemVolatileStore::new()),
            ManualClock::at(0),
            provider.clone(),
        );
        (dispatcher, provider, id)
    }

    #[tokio::test]
    async fn message_wake_reaches_fcm() {
        let (dispatcher, provider, id) = dispatcher_with_target(Platform::Android, None).await;
        dispatcher
            .wake(&id, WakeReason::Message, WakeHints::default())
            .await;
        let pushes = provider.pushes.lock().unwrap();
        assert_eq!(pushes.len(), 1);
        assert_eq!(pushes[0].0, PushChannel::Fcm);
        assert_eq!(pushes[0].2.reason, WakeReason::Message);
    }

    #[tokio::test]
    async fn call_wake_prefers_voip() {
        let (dispatcher, provider, id) = dispatcher_with_target(Platform::Ios, Some("v")).await;
        let caller = WhisperId::derive_from_key(&[9u8; 32]);
        dispatcher
            .wake(
                &id,
                WakeReason::Call,
                WakeHints {
                    correlation_id: Some("k1".into()),
                    call: Some(CallWake {
                        call_id: CallId::from("k1"),
                        from: caller.clone(),
                        caller_name: None,
                        is_video: true,
                    }),
                },
            )
            .await;
        let pushes = provider.pushes.lock().unwrap();
        assert_eq!(pushes.len(), 1);
        assert_eq!(pushes[0].0, PushChannel::ApnsVoip);
        assert_eq!(pushes[0].2.from.as_ref(), Some(&caller));
        assert_eq!(pushes[0].2.is_video, Some(true));
    }

    #[tokio::test]
    async fn duplicate_wakes_are_suppressed() {
        let (dispatcher, provider, id) = dispatcher_with_target(Platform::Android, None).await;
        let hints = WakeHints {
            correlation_id: Some("m1".into()),
            call: None,
        };
        dispatcher.wake(&id, WakeReason::Message, hints.clone()).await;
        dispatcher.wake(&id, WakeReason::Message, hints).await;
        assert_eq!(provider.pushes.lock().unwrap().len(), 1);
    }
}
