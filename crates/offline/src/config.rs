//! Offline subsystem configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::store;

const DEFAULT_API_URL: &str = "http://localhost:8080";
const DEFAULT_SYNC_INTERVAL_SECS: u64 = 30;

/// Configuration for [`crate::runtime::OfflineRuntime`].
#[derive(Debug, Clone)]
pub struct OfflineConfig {
    /// Base URL of the tillpoint API.
    pub api_url: String,
    /// Path of the SQLite file backing the queue store.
    pub db_path: PathBuf,
    /// Period of the background sync ticker.
    pub sync_interval: Duration,
}

impl OfflineConfig {
    /// Build a configuration from the environment, falling back to defaults:
    /// `TILLPOINT_API_URL`, `TILLPOINT_DB_PATH`,
    /// `TILLPOINT_SYNC_INTERVAL_SECS`.
    pub fn from_env() -> anyhow::Result<Self> {
        let api_url =
            std::env::var("TILLPOINT_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());

        let db_path = match std::env::var("TILLPOINT_DB_PATH") {
            Ok(path) => PathBuf::from(path),
            Err(_) => store::default_db_path()?,
        };

        let sync_interval = std::env::var("TILLPOINT_SYNC_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(DEFAULT_SYNC_INTERVAL_SECS));

        Ok(Self {
            api_url,
            db_path,
            sync_interval,
        })
    }
}
