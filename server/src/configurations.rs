// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration loading.
//!
//! Three layers, later wins: `configuration/base.yaml`, the overlay for
//! the current [`Environment`], then `WHISPER_*` environment variables.
//! The configuration directory defaults to `<cwd>/<prefix>configuration`
//! and can be pointed elsewhere with `WHISPER_CONFIG_DIR` (useful for
//! containers, where the working directory and the config mount rarely
//! agree).

use std::path::PathBuf;
use std::str::FromStr;

use config::{Config, ConfigError, File, Source};
use whisperbackend::settings::Settings;

/// The possible runtime environments, each with its own overlay file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Environment {
    Local,
    Production,
}

impl Environment {
    /// Read `APP_ENVIRONMENT`; an unset variable means local.
    pub fn current() -> Result<Self, ConfigError> {
        match std::env::var("APP_ENVIRONMENT") {
            Ok(raw) => raw.parse().map_err(ConfigError::Message),
            Err(_) => Ok(Environment::Local),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "`{other}` is not a supported environment; use `local` or `production`"
            )),
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

fn configuration_directory(prefix: &str) -> Result<PathBuf, ConfigError> {
    if let Ok(dir) = std::env::var("WHISPER_CONFIG_DIR") {
        return Ok(PathBuf::from(dir));
    }
    let cwd = std::env::current_dir().map_err(|e| {
        ConfigError::Message(format!("cannot determine the working directory: {e}"))
    })?;
    Ok(cwd.join(format!("{prefix}configuration")))
}

/// Load the configuration for the current environment.
pub fn get_configuration(prefix: &str) -> Result<Settings, ConfigError> {
    let environment = Environment::current()?;
    let directory = configuration_directory(prefix)?;
    layered(
        File::from(directory.join("base")).required(true),
        File::from(directory.join(environment.as_str())).required(true),
    )
}

/// Load the configuration from in-memory YAML strings (tests).
pub fn get_configuration_from_str(base: &str, environment: &str) -> Result<Settings, ConfigError> {
    layered(
        File::from_str(base, config::FileFormat::Yaml),
        File::from_str(environment, config::FileFormat::Yaml),
    )
}

fn layered(
    base: impl Source + Send + Sync + 'static,
    overlay: impl Source + Send + Sync + 'static,
) -> Result<Settings, ConfigError> {
    Config::builder()
        .add_source(base)
        .add_source(overlay)
        // `WHISPER_APPLICATION_PORT=5001` overrides `application.port`.
        // `try_parsing` turns the string values into the field types, so
        // numeric and boolean settings can be overridden too.
        .add_source(
            config::Environment::with_prefix("WHISPER")
                .separator("_")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = r#"
application:
  host: 127.0.0.1
  port: 8443
  domain: whisper.example.com
database:
  username: whisper
  password: secret
  host: localhost
  port: 5432
  name: whisper
turn:
  urls:
    - turn:turn.example.com:3478
  shared_secret: turnsecret
"#;

    #[test]
    fn layered_yaml_parses() {
        let settings =
            get_configuration_from_str(BASE, "application:\n  port: 9000\n").unwrap();
        assert_eq!(settings.application.port, 9000);
        assert_eq!(settings.application.domain, "whisper.example.com");
        assert_eq!(settings.turn.credential_ttl_secs, 3600);
        assert_eq!(settings.limits.outbound_queue_frames, 256);
        assert!(settings.fcm.is_none());
        assert!(settings.apns.is_none());
    }

    #[test]
    fn environment_names_round_trip() {
        assert_eq!("local".parse::<Environment>().unwrap(), Environment::Local);
        assert_eq!(
            "PRODUCTION".parse::<Environment>().unwrap(),
            Environment::Production
        );
        assert!("staging".parse::<Environment>().is_err());
        assert_eq!(Environment::Production.to_string(), "production");
    }
}
