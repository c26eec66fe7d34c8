//! Worker configuration from the environment.
//!
//! Storage settings are a hard prerequisite: without a database URL and auth
//! token there is nowhere to put ingested state, so startup fails. VAPID
//! keys only gate push notifications and their absence merely disables that
//! subsystem.

use crate::error::{Result, WorkerError};

/// Remote store connection settings. Required.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub database_url: String,
    pub auth_token: String,
}

/// Web-push sender identity. Optional; `None` disables notifications.
#[derive(Debug, Clone)]
pub struct VapidConfig {
    pub public_key: String,
    pub private_key: String,
    pub subject: String,
}

/// Full worker configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    pub vapid: Option<VapidConfig>,
    /// Season year used for the calendar fetch.
    pub season: i32,
}

const DEFAULT_SEASON: i32 = 2026;
const DEFAULT_VAPID_SUBJECT: &str = "mailto:noreply@apexfeed.dev";

impl Config {
    /// Load configuration from environment variables.
    ///
    /// `TURSO_DATABASE_URL` and `TURSO_AUTH_TOKEN` are required.
    /// `VAPID_PUBLIC_KEY`/`VAPID_PRIVATE_KEY` enable push notifications;
    /// `VAPID_SUBJECT` overrides the sender identity. `SEASON_YEAR`
    /// overrides the calendar year.
    pub fn from_env() -> Result<Self> {
        let database_url = std::env::var("TURSO_DATABASE_URL")
            .map_err(|_| WorkerError::missing_config("TURSO_DATABASE_URL"))?;
        let auth_token = std::env::var("TURSO_AUTH_TOKEN")
            .map_err(|_| WorkerError::missing_config("TURSO_AUTH_TOKEN"))?;

        let vapid = match (
            std::env::var("VAPID_PUBLIC_KEY").ok(),
            std::env::var("VAPID_PRIVATE_KEY").ok(),
        ) {
            (Some(public_key), Some(private_key)) => Some(VapidConfig {
                public_key,
                private_key,
                subject: std::env::var("VAPID_SUBJECT")
                    .unwrap_or_else(|_| DEFAULT_VAPID_SUBJECT.to_string()),
            }),
            _ => None,
        };

        let season = std::env::var("SEASON_YEAR")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_SEASON);

        Ok(Config { storage: StorageConfig { database_url, auth_token }, vapid, season })
    }

    /// Whether push notifications are enabled.
    pub fn push_enabled(&self) -> bool {
        self.vapid.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_enabled_follows_vapid_presence() {
        let base = Config {
            storage: StorageConfig {
                database_url: "libsql://example.turso.io".into(),
                auth_token: "token".into(),
            },
            vapid: None,
            season: 2026,
        };
        assert!(!base.push_enabled());

        let with_vapid = Config {
            vapid: Some(VapidConfig {
                public_key: "pub".into(),
                private_key: "priv".into(),
                subject: DEFAULT_VAPID_SUBJECT.into(),
            }),
            ..base
        };
        assert!(with_vapid.push_enabled());
    }
}
