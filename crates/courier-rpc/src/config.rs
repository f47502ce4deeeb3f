//! Daemon launch settings.

use std::path::PathBuf;
use std::time::Duration;

use courier_shared::constants::DEFAULT_REQUEST_TIMEOUT_SECS;

/// How to launch and talk to the daemon.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Path (or bare name, resolved through `PATH`) of the daemon executable.
    pub executable: PathBuf,
    /// Account to bind to. `None` runs the daemon in multi-account mode.
    pub account: Option<String>,
    /// Arguments selecting the streaming JSON-RPC mode.
    /// Default: `["jsonRpc"]`
    pub mode_args: Vec<String>,
    /// Deadline applied by [`RpcClient::call`](crate::RpcClient::call).
    pub request_timeout: Duration,
    /// Capacity of the event broadcast channel. Slow subscribers that fall
    /// further behind than this miss events.
    pub event_capacity: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("signal-cli"),
            account: None,
            mode_args: vec!["jsonRpc".to_string()],
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            event_capacity: 1024,
        }
    }
}

impl DaemonConfig {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            ..Self::default()
        }
    }

    /// Full argument list passed to the executable.
    pub fn command_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(self.mode_args.len() + 2);
        if let Some(account) = &self.account {
            args.push("-a".to_string());
            args.push(account.clone());
        }
        args.extend(self.mode_args.iter().cloned());
        args
    }
}
