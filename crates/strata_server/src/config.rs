//! Server configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Default write-lease timeout per table lock.
pub const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 300;

/// Default deadline for a single API operation.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;

/// Janitor sweep interval (staging files, expired uploads).
pub const JANITOR_INTERVAL_SECS: u64 = 15 * 60;

/// Retention sweep interval for snapshots.
pub const RETENTION_INTERVAL_SECS: u64 = 60 * 60;

/// Staging files older than this are considered leaked.
pub const STAGING_MAX_AGE_HOURS: i64 = 24;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Data root holding the metadata file and all project trees.
    pub data_root: PathBuf,
    /// REST bind address, e.g. `127.0.0.1:8080`.
    pub http_addr: String,
    /// Control RPC bind, e.g. `tcp://127.0.0.1:5555`. None disables RPC.
    pub control_addr: Option<String>,
    /// System admin key (from the environment, never stored).
    pub admin_key: String,
    pub lock_timeout: Duration,
    pub request_timeout: Duration,
}

impl ServerConfig {
    pub fn new(data_root: impl Into<PathBuf>, admin_key: impl Into<String>) -> Self {
        Self {
            data_root: data_root.into(),
            http_addr: "127.0.0.1:8080".to_string(),
            control_addr: None,
            admin_key: admin_key.into(),
            lock_timeout: Duration::from_secs(DEFAULT_LOCK_TIMEOUT_SECS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}
