use serde::{Deserialize, Serialize};
use std::fmt;
use strum::EnumString;

/// Discharge capacity assumed when the cloud does not report one (W)
pub const DEFAULT_MAX_DISCHARGE_W: f64 = 3300.0;

/// Peak limit shown when the cloud does not report one (kW).
/// Deliberately high so a missing value never looks like a tight limit.
pub const DEFAULT_PEAK_LIMIT_KW: f64 = 12.0;

/// Action the cloud strategy wants the battery to follow
#[derive(Debug, Clone, PartialEq, Eq, EnumString)]
#[strum(serialize_all = "UPPERCASE")]
pub enum CloudAction {
    /// Keep the battery still (zero flow)
    Hold,
    /// Let the inverter run its own automatic mode
    Idle,
    Charge,
    Discharge,
    /// Anything the controller does not understand; no local action is taken
    #[strum(default)]
    Other(String),
}

impl CloudAction {
    /// Parse a raw action keyword, case-insensitively.
    pub fn parse(raw: &str) -> Self {
        let upper = raw.trim().to_uppercase();
        upper
            .parse()
            .unwrap_or(CloudAction::Other(upper))
    }
}

impl fmt::Display for CloudAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloudAction::Hold => write!(f, "HOLD"),
            CloudAction::Idle => write!(f, "IDLE"),
            CloudAction::Charge => write!(f, "CHARGE"),
            CloudAction::Discharge => write!(f, "DISCHARGE"),
            CloudAction::Other(raw) => write!(f, "{}", raw),
        }
    }
}

/// Last strategy computed by the cloud backend.
///
/// Every field is optional: the backend may omit any of them and the
/// controller falls back to conservative defaults. An empty snapshot is
/// what the controller sees before the first successful poll.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategySnapshot {
    pub action: Option<String>,
    pub target_power_kw: Option<f64>,
    pub max_discharge_kw: Option<f64>,
    pub peak_power_kw: Option<f64>,
    pub min_soc_buffer: Option<f64>,
    pub is_peak_shaving_active: Option<bool>,
    pub reason: Option<String>,
}

impl StrategySnapshot {
    /// Cloud action, `HOLD` when no action is known.
    pub fn cloud_action(&self) -> CloudAction {
        self.action
            .as_deref()
            .map(CloudAction::parse)
            .unwrap_or(CloudAction::Hold)
    }

    pub fn peak_shaving_active(&self) -> bool {
        self.is_peak_shaving_active.unwrap_or(true)
    }

    /// Inverter discharge capacity in watts.
    pub fn max_discharge_w(&self) -> f64 {
        self.max_discharge_kw
            .map(|kw| kw * 1000.0)
            .unwrap_or(DEFAULT_MAX_DISCHARGE_W)
    }

    /// Charge power requested by the cloud, in watts.
    pub fn charge_target_w(&self) -> Option<f64> {
        self.target_power_kw.map(|kw| kw * 1000.0)
    }

    pub fn peak_limit_kw(&self) -> f64 {
        self.peak_power_kw.unwrap_or(DEFAULT_PEAK_LIMIT_KW)
    }
}
