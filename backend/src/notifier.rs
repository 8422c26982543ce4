// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Seam between the backend services and the websocket gateway.
//!
//! Services fan frames out to live connections through this trait; the
//! gateway implements it on top of its connection registry. When the
//! target has no live connection the services fall back to a push wake.

use async_trait::async_trait;

use whispertypes::codec::OutboundFrame;
use whispertypes::identifiers::WhisperId;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum NotifierError {
    /// The user has no live connection.
    #[error("client not connected")]
    ClientNotFound,
}

#[async_trait]
pub trait ConnectionNotifier: Send + Sync {
    /// Deliver a frame to every live connection of the user. Succeeds if
    /// at least one connection accepted it.
    async fn notify(
        &self,
        whisper_id: &WhisperId,
        frame: OutboundFrame,
    ) -> Result<(), NotifierError>;

    /// Send `force_logout{reason}` to the user's live connections, then
    /// close them with code 1000. Used on session displacement and
    /// revocation; a no-op when the user is offline.
    async fn force_logout(&self, whisper_id: &WhisperId, reason: &str);
}

/// Notifier that records every frame; used by tests.
pub mod recording {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct RecordingNotifier {
        /// Users currently "online" as far as the fake is concerned.
        online: Mutex<Vec<WhisperId>>,
        pub sent: Mutex<Vec<(WhisperId, OutboundFrame)>>,
        pub logouts: Mutex<Vec<(WhisperId, String)>>,
    }

    impl RecordingNotifier {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_online(&self, id: &WhisperId) {
            self.online.lock().unwrap().push(id.clone());
        }

        pub fn set_offline(&self, id: &WhisperId) {
            self.online.lock().unwrap().retain(|o| o != id);
        }

        pub fn frames_for(&self, id: &WhisperId) -> Vec<OutboundFrame> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .filter(|(to, _)| to == id)
                .map(|(_, frame)| frame.clone())
                .collect()
        }
    }

    #[async_trait]
    impl ConnectionNotifier for RecordingNotifier {
        async fn notify(
            &self,
            whisper_id: &WhisperId,
            frame: OutboundFrame,
        ) -> Result<(), NotifierError> {
            if !self.online.lock().unwrap().contains(whisper_id) {
                return Err(NotifierError::ClientNotFound);
            }
            self.sent
                .lock()
                .unwrap()
                .push((whisper_id.clone(), frame));
            Ok(())
        }

        async fn force_logout(&self, whisper_id: &WhisperId, reason: &str) {
            self.logouts
                .lock()
                .unwrap()
                .push((whisper_id.clone(), reason.to_owned()));
        }
    }
}
