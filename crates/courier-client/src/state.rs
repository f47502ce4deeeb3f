//! Lifecycle state of a [`Session`](crate::Session).
//!
//! The current [`AppPhase`] is published on a `tokio::sync::watch` channel so
//! a front-end can render whichever screen matches it.

use serde::Serialize;

/// Top-level phase: loading → onboarding → chat. Onboarding can be
/// re-entered from chat by linking again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", content = "link", rename_all = "camelCase")]
pub enum AppPhase {
    Loading,
    Onboarding(LinkState),
    Chat,
}

/// Progress of the device-link flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum LinkState {
    RequestingUri,
    /// Show `uri` (usually as a QR code) to the primary device.
    WaitingForScan { uri: String },
    Success,
    Error { reason: String },
}

impl AppPhase {
    pub fn is_chat(&self) -> bool {
        matches!(self, AppPhase::Chat)
    }

    pub fn link_error(reason: impl Into<String>) -> Self {
        AppPhase::Onboarding(LinkState::Error {
            reason: reason.into(),
        })
    }
}
