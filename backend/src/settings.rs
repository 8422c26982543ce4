// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use serde::Deserialize;

/// Configuration for the server.
#[derive(Deserialize, Clone, Debug)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub application: ApplicationSettings,
    /// If this isn't present, the provider will not send push notifications
    /// to apple devices.
    pub apns: Option<ApnsSettings>,
    /// If this isn't present, the provider will not send push notifications
    /// to android devices.
    pub fcm: Option<FcmSettings>,
    pub turn: TurnSettings,
    #[serde(default)]
    pub limits: LimitSettings,
}

/// Configuration for the application.
#[derive(Deserialize, Clone, Debug)]
pub struct ApplicationSettings {
    pub port: u16,
    pub host: String,
    pub domain: String,
}

/// Configuration for the database.
#[derive(Deserialize, Clone, Debug)]
pub struct DatabaseSettings {
    pub username: String,
    pub password: String,
    pub port: u16,
    pub host: String,
    pub name: String,
    pub cacertpath: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FcmSettings {
    /// The path to the service account key file.
    pub path: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApnsSettings {
    pub keyid: String,
    pub teamid: String,
    pub privatekeypath: String,
    pub topic: String,
}

/// TURN REST credential settings. The shared secret must match the one
/// configured on the TURN servers.
#[derive(Debug, Deserialize, Clone)]
pub struct TurnSettings {
    pub urls: Vec<String>,
    pub shared_secret: String,
    #[serde(default = "default_turn_ttl")]
    pub credential_ttl_secs: u32,
}

fn default_turn_ttl() -> u32 {
    whispertypes::crypto::turn::TURN_CREDENTIAL_TTL_SECS
}

/// Resource caps. Defaults follow the protocol constants.
#[derive(Debug, Deserialize, Clone)]
pub struct LimitSettings {
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue_frames: usize,
    #[serde(default = "default_retention_days")]
    pub pending_retention_days: i64,
}

fn default_max_connections() -> usize {
    65_536
}

fn default_outbound_queue() -> usize {
    256
}

fn default_retention_days() -> i64 {
    30
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            outbound_queue_frames: default_outbound_queue(),
            pending_retention_days: default_retention_days(),
        }
    }
}

impl DatabaseSettings {
    /// Add the TLS mode to the connection string if the CA certificate path
    /// is set.
    fn add_tls_mode(&self, mut connection_string: String) -> String {
        if let Some(ref ca_cert_path) = self.cacertpath {
            connection_string.push_str(&format!("?sslmode=verify-ca&sslrootcert={ca_cert_path}"));
        } else {
            tracing::warn!(
                "No CA certificate path set for database connection. TLS will not be enabled."
            );
        }
        connection_string
    }

    fn base_connection_string(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}",
            self.username, self.password, self.host, self.port
        )
    }

    /// Get the connection string for the database.
    pub fn connection_string(&self) -> String {
        let mut connection_string = self.base_connection_string();
        connection_string.push('/');
        connection_string.push_str(&self.name);
        self.add_tls_mode(connection_string)
    }

    /// Get the connection string without the database name.
    pub fn connection_string_without_database(&self) -> String {
        let connection_string = self.base_connection_string();
        self.add_tls_mode(connection_string)
    }
}
