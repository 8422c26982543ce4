// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Production push provider: FCM (OAuth2 service account) and APNs (ES256
//! JWT), including the VoIP channel for call wakes. Wake payloads carry
//! only routing data, never message content.

use std::{
    fs::File,
    io::Read,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;

use whisperbackend::push_dispatcher::{PushNotificationError, PushNotificationProvider};
use whisperbackend::settings::{ApnsSettings, FcmSettings};
use whispertypes::messages::push_token::{PushChannel, WakePayload};

#[derive(Debug, Serialize)]
struct FcmClaims {
    iss: String,
    scope: String,
    aud: String,
    iat: usize,
    exp: usize,
}

// Struct for the Google OAuth2 response
#[derive(Debug, Deserialize)]
struct OauthSuccessResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct OauthErrorResponse {
    error: String,
    error_description: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApnsClaims {
    iss: String,
    iat: usize,
}

#[derive(Debug, Clone)]
struct ApnsToken {
    jwt: String,
    issued_at: u64,
}

#[derive(Debug, Clone)]
struct FcmToken {
    token: String,
    // Seconds since UNIX_EPOCH.
    expires_at: u64,
}

impl FcmToken {
    fn is_expired(&self) -> bool {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        now >= self.expires_at
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ServiceAccount {
    project_id: Option<String>,
    private_key: String,
    client_email: String,
    token_uri: String,
}

#[derive(Debug, Clone)]
struct FcmState {
    service_account: ServiceAccount,
    token: Arc<Mutex<Option<FcmToken>>>,
}

#[derive(Debug, Clone)]
struct ApnsState {
    key_id: String,
    team_id: String,
    topic: String,
    private_key: Vec<u8>,
    token: Arc<Mutex<Option<ApnsToken>>>,
}

/// Provider used in production. A missing vendor configuration disables
/// that channel.
#[derive(Debug, Clone)]
pub struct ProductionPushProvider {
    client: Client,
    fcm_state: Option<FcmState>,
    apns_state: Option<ApnsState>,
}

impl ProductionPushProvider {
    pub fn new(
        fcm_settings: Option<FcmSettings>,
        apns_settings: Option<ApnsSettings>,
    ) -> anyhow::Result<Self> {
        // Read the FCM service account file.
        let fcm_state = if let Some(fcm_settings) = fcm_settings {
            let service_account = std::fs::read_to_string(fcm_settings.path)?;
            Some(FcmState {
                service_account: serde_json::from_str(&service_account)?,
                token: Arc::new(Mutex::new(None)),
            })
        } else {
            None
        };

        // Read the APNs signing key.
        let apns_state = if let Some(apns_settings) = apns_settings {
            let mut private_key_file = File::open(&apns_settings.privatekeypath)?;
            let mut private_key_p8 = String::new();
            private_key_file.read_to_string(&mut private_key_p8)?;

            Some(ApnsState {
                key_id: apns_settings.keyid,
                team_id: apns_settings.teamid,
                topic: apns_settings.topic,
                private_key: private_key_p8.into_bytes(),
                token: Arc::new(Mutex::new(None)),
            })
        } else {
            None
        };

        Ok(Self {
            client: Client::new(),
            fcm_state,
            apns_state,
        })
    }

    async fn issue_fcm_token(&self) -> Result<FcmToken, PushNotificationError> {
        let fcm_state = self.fcm_state.as_ref().ok_or_else(|| {
            PushNotificationError::InvalidConfiguration("FCM is not configured".to_owned())
        })?;

        // Reuse a cached bearer token while it is valid.
        let mut token_option = fcm_state.token.lock().await;
        if let Some(token) = token_option.as_ref() {
            if !token.is_expired() {
                return Ok(token.clone());
            }
        }

        let service_account = &fcm_state.service_account;
        let iat = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as usize;
        let claims = FcmClaims {
            iss: service_account.client_email.clone(),
            scope: "https://www.googleapis.com/auth/firebase.messaging".to_owned(),
            aud: service_account.token_uri.clone(),
            iat,
            exp: iat + 3600,
        };

        let header = Header::new(Algorithm::RS256);
        let encoding_key = EncodingKey::from_rsa_pem(service_account.private_key.as_bytes())
            .map_err(|e| PushNotificationError::JwtCreationError(e.to_string()))?;
        let jwt = encode(&header, &claims, &encoding_key)
            .map_err(|e| PushNotificationError::JwtCreationError(e.to_string()))?;

        // Exchange the JWT for a bearer token.
        let response = self
            .client
            .post(&service_account.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", &jwt),
            ])
            .send()
            .await
            .map_err(|e| PushNotificationError::NetworkError(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| PushNotificationError::NetworkError(e.to_string()))?;

        if !status.is_success() {
            let error: OauthErrorResponse = serde_json::from_str(&body)
                .map_err(|e| PushNotificationError::OAuthError(e.to_string()))?;
            return Err(PushNotificationError::OAuthError(format!(
                "{} {}",
                error.error,
                error.error_description.unwrap_or_default()
            )));
        }

        let token_response: OauthSuccessResponse = serde_json::from_str(&body)
            .map_err(|e| PushNotificationError::OAuthError(e.to_string()))?;
        let fcm_token = FcmToken {
            token: token_response.access_token,
            expires_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs()
                + token_response.expires_in,
        };
        *token_option = Some(fcm_token.clone());
        Ok(fcm_token)
    }

    /// Return a JWT for APNs, reissued once it is 40 minutes old (APNs
    /// accepts tokens between 20 and 60 minutes of age).
    async fn issue_apns_jwt(&self) -> Result<String, PushNotificationError> {
        let apns_state = self.apns_state.as_ref().ok_or_else(|| {
            PushNotificationError::InvalidConfiguration("APNs is not configured".to_owned())
        })?;

        let mut token_option = apns_state.token.lock().await;
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        if let Some(token) = &*token_option {
            if now < token.issued_at + 60 * 40 {
                return Ok(token.jwt.clone());
            }
        }

        let claims = ApnsClaims {
            iss: apns_state.team_id.clone(),
            iat: now as usize,
        };
        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some(apns_state.key_id.clone());
        let jwt = encode(
            &header,
            &claims,
            &EncodingKey::from_ec_pem(&apns_state.private_key)
                .map_err(|e| PushNotificationError::JwtCreationError(e.to_string()))?,
        )
        .map_err(|e| PushNotificationError::JwtCreationError(e.to_string()))?;

        *token_option = Some(ApnsToken {
            jwt: jwt.clone(),
            issued_at: now,
        });
        Ok(jwt)
    }

    async fn push_google(
        &self,
        token: &str,
        payload: &WakePayload,
    ) -> Result<(), PushNotificationError> {
        let Some(fcm_state) = &self.fcm_state else {
            return Ok(());
        };

        let bearer_token = self.issue_fcm_token().await?;
        let Some(ref project_id) = fcm_state.service_account.project_id else {
            return Err(PushNotificationError::InvalidConfiguration(
                "missing project ID in service account".to_owned(),
            ));
        };

        let url = format!("https://fcm.googleapis.com/v1/projects/{project_id}/messages:send");
        // FCM data payloads are string-valued maps.
        let message = json!({
            "message": {
                "token": token,
                "data": {
                    "payload": serde_json::to_string(payload).unwrap_or_default(),
                },
                "android": { "priority": "high" }
            }
        });

        let res = self
            .client
            .post(&url)
            .bearer_auth(&bearer_token.token)
            .json(&message)
            .send()
            .await
            .map_err(|e| PushNotificationError::NetworkError(e.to_string()))?;

        match res.status() {
            StatusCode::OK => Ok(()),
            // The token is gone; the dispatcher will drop it.
            StatusCode::NOT_FOUND => Err(PushNotificationError::InvalidToken(
                res.text().await.unwrap_or_default(),
            )),
            s => Err(PushNotificationError::Other(format!(
                "unexpected status code: {} with body: {}",
                s,
                res.text().await.unwrap_or_default()
            ))),
        }
    }

    async fn push_apple(
        &self,
        voip: bool,
        token: &str,
        payload: &WakePayload,
    ) -> Result<(), PushNotificationError> {
        let Some(apns_state) = &self.apns_state else {
            return Ok(());
        };

        let jwt = self.issue_apns_jwt().await?;
        let url = format!("https://api.push.apple.com:443/3/device/{token}");

        let (topic, push_type, priority) = if voip {
            (format!("{}.voip", apns_state.topic), "voip", "10")
        } else {
            (apns_state.topic.clone(), "alert", "10")
        };

        let body = json!({
            "aps": {
                "content-available": 1,
                "mutable-content": 1,
            },
            "payload": payload,
        });

        let res = self
            .client
            .post(url)
            .bearer_auth(jwt)
            .header("apns-topic", topic)
            .header("apns-push-type", push_type)
            .header("apns-priority", priority)
            .header("apns-expiration", "0")
            .json(&body)
            .send()
            .await
            .map_err(|e| PushNotificationError::NetworkError(e.to_string()))?;

        match res.status() {
            StatusCode::OK => Ok(()),
            StatusCode::GONE => Err(PushNotificationError::InvalidToken(
                res.text().await.unwrap_or_default(),
            )),
            s => Err(PushNotificationError::Other(format!(
                "unexpected status code: {} with body: {}",
                s,
                res.text().await.unwrap_or_default()
            ))),
        }
    }
}

impl PushNotificationProvider for ProductionPushProvider {
    async fn push(
        &self,
        channel: PushChannel,
        token: &str,
        payload: &WakePayload,
    ) -> Result<(), PushNotificationError> {
        match channel {
            PushChannel::Fcm => self.push_google(token, payload).await,
            PushChannel::Apns => self.push_apple(false, token, payload).await,
            PushChannel::ApnsVoip => self.push_apple(true, token, payload).await,
        }
    }
}
