//! Client configuration loaded from environment variables.
//!
//! All settings have defaults so the client starts with zero configuration
//! against a `signal-cli` on `PATH`.

use std::path::PathBuf;
use std::time::Duration;

use courier_rpc::DaemonConfig;
use courier_shared::constants::{
    DEFAULT_DEVICE_NAME, DEFAULT_LINK_TIMEOUT_SECS, DEFAULT_REQUEST_TIMEOUT_SECS,
};

use crate::error::ClientError;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Daemon executable.
    /// Env: `COURIER_DAEMON_PATH`
    /// Default: `signal-cli`
    pub daemon_path: PathBuf,

    /// Account the daemon is bound to (`-a`).
    /// Env: `COURIER_ACCOUNT`
    /// Default: none (multi-account mode).
    pub account: Option<String>,

    /// Message cache location.
    /// Env: `COURIER_DB_PATH`
    /// Default: none, meaning the platform data directory.
    pub db_path: Option<PathBuf>,

    /// Deadline for ordinary daemon calls.
    /// Env: `COURIER_REQUEST_TIMEOUT_SECS`
    /// Default: `30`
    pub request_timeout: Duration,

    /// Deadline for `finishLink`, which waits on a human scanning a code.
    /// Env: `COURIER_LINK_TIMEOUT_SECS`
    /// Default: `600`
    pub link_timeout: Duration,

    /// Name the new device is registered under.
    /// Env: `COURIER_DEVICE_NAME`
    /// Default: `courier`
    pub device_name: String,

    /// How long the link success state stays visible before switching to chat.
    /// Env: `COURIER_LINK_SUCCESS_DELAY_MS`
    /// Default: `1500`
    pub link_success_delay: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            daemon_path: PathBuf::from("signal-cli"),
            account: None,
            db_path: None,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            link_timeout: Duration::from_secs(DEFAULT_LINK_TIMEOUT_SECS),
            device_name: DEFAULT_DEVICE_NAME.to_string(),
            link_success_delay: Duration::from_millis(1500),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(path) = lookup("COURIER_DAEMON_PATH").filter(|v| !v.is_empty()) {
            config.daemon_path = PathBuf::from(path);
        }

        if let Some(account) = lookup("COURIER_ACCOUNT").filter(|v| !v.is_empty()) {
            config.account = Some(account);
        }

        if let Some(path) = lookup("COURIER_DB_PATH").filter(|v| !v.is_empty()) {
            config.db_path = Some(PathBuf::from(path));
        }

        if let Some(secs) = parse_u64(&lookup, "COURIER_REQUEST_TIMEOUT_SECS", 1) {
            config.request_timeout = Duration::from_secs(secs);
        }

        if let Some(secs) = parse_u64(&lookup, "COURIER_LINK_TIMEOUT_SECS", 1) {
            config.link_timeout = Duration::from_secs(secs);
        }

        if let Some(name) = lookup("COURIER_DEVICE_NAME").filter(|v| !v.trim().is_empty()) {
            config.device_name = name;
        }

        if let Some(ms) = parse_u64(&lookup, "COURIER_LINK_SUCCESS_DELAY_MS", 0) {
            config.link_success_delay = Duration::from_millis(ms);
        }

        config
    }

    /// Reject settings the session cannot run with.
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.daemon_path.as_os_str().is_empty() {
            return Err(ClientError::Config("daemon path is empty".into()));
        }
        if self.device_name.trim().is_empty() {
            return Err(ClientError::Config("device name is empty".into()));
        }
        if self.link_timeout < self.request_timeout {
            return Err(ClientError::Config(format!(
                "link timeout ({}s) is shorter than the request timeout ({}s)",
                self.link_timeout.as_secs(),
                self.request_timeout.as_secs()
            )));
        }
        Ok(())
    }

    /// Launch settings for the daemon engine.
    pub fn daemon_config(&self) -> DaemonConfig {
        DaemonConfig {
            account: self.account.clone(),
            request_timeout: self.request_timeout,
            ..DaemonConfig::new(self.daemon_path.clone())
        }
    }
}

/// Parse an integer variable of at least `min`; anything else logs a
/// warning and yields `None` so the default stays.
fn parse_u64<F>(lookup: &F, name: &str, min: u64) -> Option<u64>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(name)?;
    match raw.trim().parse::<u64>() {
        Ok(value) if value >= min => Some(value),
        _ => {
            tracing::warn!(variable = name, value = %raw, "Invalid value, using default");
            None
        }
    }
}
