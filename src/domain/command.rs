use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Command sent to the battery inverter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum InverterCommand {
    /// Discharge at the given power (W)
    Discharge { power_w: u32 },
    /// Force charge at the given power (W); zero stops the battery
    ForceCharge { power_w: u32 },
    /// Hand control back to the inverter's automatic mode
    SetAutoMode,
}

impl InverterCommand {
    /// Zero-power force charge, i.e. stop all battery flow.
    pub fn hold() -> Self {
        InverterCommand::ForceCharge { power_w: 0 }
    }
}

impl fmt::Display for InverterCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InverterCommand::Discharge { power_w } => write!(f, "discharge({} W)", power_w),
            InverterCommand::ForceCharge { power_w } => write!(f, "force_charge({} W)", power_w),
            InverterCommand::SetAutoMode => write!(f, "set_auto_mode"),
        }
    }
}

/// Destination for inverter commands
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandSink: Send + Sync {
    async fn send(&self, command: InverterCommand) -> Result<()>;
}
