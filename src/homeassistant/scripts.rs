use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use super::client::HomeAssistantClient;
use crate::domain::{CommandSink, InverterCommand};

/// Names of the host scripts driving the inverter
#[derive(Debug, Clone)]
pub struct ScriptNames {
    pub discharge: String,
    pub force_charge: String,
    pub auto_mode: String,
}

impl Default for ScriptNames {
    fn default() -> Self {
        Self {
            discharge: "sonnen_force_discharge".to_string(),
            force_charge: "sonnen_force_charge".to_string(),
            auto_mode: "sonnen_set_auto_mode".to_string(),
        }
    }
}

impl ScriptNames {
    /// Service name and payload for a command
    pub fn service_call(&self, command: InverterCommand) -> (String, Value) {
        match command {
            InverterCommand::Discharge { power_w } => {
                (format!("script.{}", self.discharge), json!({ "power": power_w }))
            }
            InverterCommand::ForceCharge { power_w } => {
                (format!("script.{}", self.force_charge), json!({ "power": power_w }))
            }
            InverterCommand::SetAutoMode => (format!("script.{}", self.auto_mode), json!({})),
        }
    }
}

/// Sends inverter commands as Home Assistant script calls
pub struct ScriptCommandSink {
    client: HomeAssistantClient,
    scripts: ScriptNames,
}

impl ScriptCommandSink {
    pub fn new(client: HomeAssistantClient, scripts: ScriptNames) -> Self {
        Self { client, scripts }
    }
}

#[async_trait]
impl CommandSink for ScriptCommandSink {
    async fn send(&self, command: InverterCommand) -> Result<()> {
        let (service, data) = self.scripts.service_call(command);
        self.client.call_service(&service, data).await?;
        info!(%command, service = %service, "inverter command sent");
        Ok(())
    }
}
