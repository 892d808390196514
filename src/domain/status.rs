use serde::Serialize;
use std::fmt;

use super::strategy::{CloudAction, StrategySnapshot};

/// Copy of the guard's flags published after every cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GuardSnapshot {
    pub peak_active: bool,
    pub solar_override: bool,
    pub in_maintenance: bool,
    pub maintenance_reason: Option<String>,
}

/// Operator-facing status of the guard
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum GuardStatus {
    Maintenance(String),
    SolarOverride,
    Disabled,
    Triggered,
    Monitoring,
}

impl GuardStatus {
    /// Maintenance wins over everything, then solar override, then the
    /// cloud's enable flag, then the local peak state.
    pub fn derive(guard: &GuardSnapshot, strategy: &StrategySnapshot) -> Self {
        if guard.in_maintenance {
            return GuardStatus::Maintenance(guard.maintenance_reason.clone().unwrap_or_default());
        }
        if guard.solar_override {
            return GuardStatus::SolarOverride;
        }
        if !strategy.peak_shaving_active() {
            return GuardStatus::Disabled;
        }
        if guard.peak_active {
            GuardStatus::Triggered
        } else {
            GuardStatus::Monitoring
        }
    }
}

impl fmt::Display for GuardStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuardStatus::Maintenance(reason) => {
                write!(f, "Maintenance mode detected ({}). Pausing control.", reason)
            }
            GuardStatus::SolarOverride => write!(f, "Solar Override Active"),
            GuardStatus::Disabled => write!(f, "Disabled"),
            GuardStatus::Triggered => write!(f, "Triggered"),
            GuardStatus::Monitoring => write!(f, "Monitoring"),
        }
    }
}

/// Action as the household sees it: a cloud HOLD replaced by the local solar
/// override reads as IDLE.
pub fn displayed_action(guard: &GuardSnapshot, strategy: &StrategySnapshot) -> String {
    match strategy.action.as_deref() {
        None => "UNKNOWN".to_string(),
        Some(raw) => {
            if guard.solar_override && CloudAction::parse(raw) == CloudAction::Hold {
                CloudAction::Idle.to_string()
            } else {
                raw.to_string()
            }
        }
    }
}

/// Local protection takes priority over the cloud's explanation.
pub fn displayed_reason(guard: &GuardSnapshot, strategy: &StrategySnapshot) -> String {
    if guard.peak_active {
        return "Local Peak Guard Triggered".to_string();
    }
    if guard.solar_override {
        return "Solar Override (Local)".to_string();
    }
    strategy
        .reason
        .clone()
        .unwrap_or_else(|| "Unknown".to_string())
}
