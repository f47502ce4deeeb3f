use serde::Deserialize;
use serde_json::json;
use tracing::info;

use courier_shared::constants::methods;

use crate::error::ClientError;
use crate::session::Session;
use crate::state::{AppPhase, LinkState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartLinkResult {
    device_link_uri: String,
}

impl Session {
    /// Link this client as a secondary device of an existing account.
    ///
    /// Publishes each step as an onboarding phase: the link URI for the user
    /// to scan, then success and, after a short pause, chat. Any failure is
    /// published as a link error; there is no automatic retry.
    pub async fn link_device(&self) -> Result<(), ClientError> {
        self.set_phase(AppPhase::Onboarding(LinkState::RequestingUri));

        let link: StartLinkResult = self
            .rpc
            .call_as(methods::START_LINK, None)
            .await
            .map_err(|e| self.fail(e.into()))?;

        info!("Device link URI received, waiting for scan");
        self.set_phase(AppPhase::Onboarding(LinkState::WaitingForScan {
            uri: link.device_link_uri.clone(),
        }));

        let params = json!({
            "deviceLinkUri": link.device_link_uri,
            "deviceName": self.config.device_name,
        });
        self.rpc
            .call_with_timeout(methods::FINISH_LINK, Some(params), self.config.link_timeout)
            .await
            .map_err(|e| self.fail(e.into()))?;

        self.set_phase(AppPhase::Onboarding(LinkState::Success));

        let accounts = self.list_accounts().await.map_err(|e| self.fail(e))?;
        if accounts.is_empty() {
            return Err(self.fail(ClientError::LinkIncomplete));
        }

        info!(accounts = accounts.len(), "Device linked");
        tokio::time::sleep(self.config.link_success_delay).await;
        self.set_phase(AppPhase::Chat);
        Ok(())
    }
}
