use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;
use validator::Validate;

use crate::controller::engine::{GuardSettings, DEFAULT_MAINTENANCE_KEYWORDS};
use crate::homeassistant::ScriptNames;
use crate::sensors::LoadSources;

pub const DEFAULT_API_URL: &str = "https://battery-prod.awestinconsulting.se";
pub const DEFAULT_LIMIT_ENTITY: &str = "sensor.optimizer_light_peak_limit";

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct Config {
    #[validate(nested)]
    pub server: ServerConfig,
    #[validate(nested)]
    pub home_assistant: HomeAssistantConfig,
    #[validate(nested)]
    pub cloud: CloudConfig,
    #[validate(nested)]
    pub sensors: SensorsConfig,
    #[validate(nested)]
    #[serde(default)]
    pub controller: ControllerConfig,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_request_timeout")]
    #[validate(range(min = 1))]
    pub request_timeout_secs: u64,
    /// Bearer token for mutating endpoints; empty disables the check
    #[serde(default)]
    pub api_token: String,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct HomeAssistantConfig {
    #[validate(url)]
    pub base_url: String,
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_state_poll")]
    #[validate(range(min = 1))]
    pub state_poll_seconds: u64,
    #[serde(default = "default_http_timeout")]
    pub http_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CloudConfig {
    #[serde(default = "default_api_url")]
    #[validate(url)]
    pub api_url: String,
    #[validate(length(min = 1, message = "cloud.api_key must be set"))]
    pub api_key: String,
    #[serde(default = "default_poll_interval")]
    #[validate(range(min = 1))]
    pub poll_interval_minutes: u64,
    #[serde(default = "default_http_timeout")]
    pub http_timeout_seconds: u64,
    #[serde(default = "default_report_retries")]
    pub report_max_retries: u32,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SensorsConfig {
    #[serde(default = "default_limit_entity")]
    #[validate(length(min = 1))]
    pub limit_entity: String,
    #[validate(length(min = 1, message = "sensors.soc_entity must be set"))]
    pub soc_entity: String,
    pub grid_entity: Option<String>,
    #[serde(default)]
    pub grid_invert: bool,
    pub battery_power_entity: Option<String>,
    pub battery_status_entity: Option<String>,
    #[serde(default = "default_keywords")]
    pub battery_status_keywords: String,
    pub virtual_load_entity: Option<String>,
    pub consumption_forecast_entity: Option<String>,
}

impl SensorsConfig {
    /// Every entity the controller reads, for mirroring from the host
    pub fn watched_entities(&self) -> Vec<String> {
        let mut entities = vec![self.limit_entity.clone(), self.soc_entity.clone()];
        entities.extend(
            [
                &self.grid_entity,
                &self.battery_power_entity,
                &self.battery_status_entity,
                &self.virtual_load_entity,
                &self.consumption_forecast_entity,
            ]
            .into_iter()
            .flatten()
            .cloned(),
        );
        entities
    }

    /// Entities whose changes trigger a control cycle
    pub fn trigger_entities(&self) -> Vec<String> {
        match &self.virtual_load_entity {
            Some(entity) => vec![entity.clone()],
            None => [&self.grid_entity, &self.battery_power_entity]
                .into_iter()
                .flatten()
                .cloned()
                .collect(),
        }
    }

    pub fn guard_settings(&self) -> GuardSettings {
        GuardSettings {
            soc_entity: self.soc_entity.clone(),
            load: self.load_sources(),
            battery_status_entity: self.battery_status_entity.clone(),
            maintenance_keywords: GuardSettings::parse_keywords(&self.battery_status_keywords),
        }
    }

    pub fn load_sources(&self) -> LoadSources {
        LoadSources {
            grid_entity: self.grid_entity.clone(),
            battery_power_entity: self.battery_power_entity.clone(),
            invert_grid: self.grid_invert,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ControllerConfig {
    #[serde(default = "default_tick")]
    #[validate(range(min = 1))]
    pub tick_seconds: u64,
    #[serde(default = "default_discharge_script")]
    pub discharge_script: String,
    #[serde(default = "default_force_charge_script")]
    pub force_charge_script: String,
    #[serde(default = "default_auto_mode_script")]
    pub auto_mode_script: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            tick_seconds: default_tick(),
            discharge_script: default_discharge_script(),
            force_charge_script: default_force_charge_script(),
            auto_mode_script: default_auto_mode_script(),
        }
    }
}

impl ControllerConfig {
    pub fn script_names(&self) -> ScriptNames {
        ScriptNames {
            discharge: self.discharge_script.clone(),
            force_charge: self.force_charge_script.clone(),
            auto_mode: self.auto_mode_script.clone(),
        }
    }
}

fn default_request_timeout() -> u64 {
    30
}
fn default_state_poll() -> u64 {
    5
}
fn default_http_timeout() -> u64 {
    10
}
fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}
fn default_poll_interval() -> u64 {
    5
}
fn default_report_retries() -> u32 {
    2
}
fn default_limit_entity() -> String {
    DEFAULT_LIMIT_ENTITY.to_string()
}
fn default_keywords() -> String {
    DEFAULT_MAINTENANCE_KEYWORDS.to_string()
}
fn default_tick() -> u64 {
    30
}
fn default_discharge_script() -> String {
    ScriptNames::default().discharge
}
fn default_force_charge_script() -> String {
    ScriptNames::default().force_charge
}
fn default_auto_mode_script() -> String {
    ScriptNames::default().auto_mode
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::from_figment(
            Figment::new()
                .merge(Toml::file("config/default.toml"))
                .merge(Env::prefixed("PEAKGUARD__").split("__")),
        )
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let cfg: Config = figment.extract().context("invalid configuration")?;
        cfg.validate().context("configuration rejected")?;
        Ok(cfg)
    }

    pub fn ha_timeout(&self) -> Duration {
        Duration::from_secs(self.home_assistant.http_timeout_seconds.max(1))
    }

    pub fn cloud_timeout(&self) -> Duration {
        Duration::from_secs(self.cloud.http_timeout_seconds.max(1))
    }
}
