use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::domain::{GuardSnapshot, StrategySnapshot};
use crate::sensors::{SampleReader, SensorSource};

#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("SoC sensor {0} is unavailable")]
    SocUnavailable(String),

    #[error("SoC sensor {entity_id} has non-numeric state '{value}'")]
    InvalidSoc { entity_id: String, value: String },

    #[error("strategy API error: HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("strategy request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("strategy response could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct CachedStrategy {
    pub snapshot: StrategySnapshot,
    pub fetched_at: DateTime<Utc>,
}

/// Latest strategy fetched from the cloud, shared between the poller and
/// the guard. Empty until the first successful poll.
#[derive(Clone, Default)]
pub struct StrategyCache {
    inner: Arc<RwLock<Option<CachedStrategy>>>,
}

impl StrategyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self) -> Option<CachedStrategy> {
        self.inner.read().clone()
    }

    pub fn snapshot_or_default(&self) -> StrategySnapshot {
        self.inner
            .read()
            .as_ref()
            .map(|c| c.snapshot.clone())
            .unwrap_or_default()
    }

    pub fn store(&self, snapshot: StrategySnapshot) {
        *self.inner.write() = Some(CachedStrategy {
            snapshot,
            fetched_at: Utc::now(),
        });
    }
}

/// Body of `POST {api_url}/signal`
#[derive(Debug, Serialize)]
pub struct SignalRequest {
    pub api_key: String,
    pub soc: f64,
    pub is_solar_override: bool,
    pub consumption_forecast_kwh: f64,
}

pub struct StrategyPollerSettings {
    pub api_url: String,
    pub api_key: String,
    pub soc_entity: String,
    pub consumption_forecast_entity: Option<String>,
    pub timeout: Duration,
}

/// Periodically pulls the strategy from the cloud into a [`StrategyCache`].
pub struct StrategyPoller {
    client: reqwest::Client,
    settings: StrategyPollerSettings,
    sensors: Arc<dyn SensorSource>,
    guard: watch::Receiver<GuardSnapshot>,
    cache: StrategyCache,
}

impl StrategyPoller {
    pub fn new(
        settings: StrategyPollerSettings,
        sensors: Arc<dyn SensorSource>,
        guard: watch::Receiver<GuardSnapshot>,
        cache: StrategyCache,
    ) -> Result<Self, StrategyError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("peak-guard/0.3"));
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .default_headers(headers)
            .build()?;
        Ok(Self {
            client,
            settings,
            sensors,
            guard,
            cache,
        })
    }

    fn signal(&self) -> Result<SignalRequest, StrategyError> {
        let reader = SampleReader::new(self.sensors.as_ref());
        let soc_entity = &self.settings.soc_entity;
        let raw = reader
            .text(soc_entity)
            .ok_or_else(|| StrategyError::SocUnavailable(soc_entity.clone()))?;
        let soc = raw
            .trim()
            .parse::<f64>()
            .map_err(|_| StrategyError::InvalidSoc {
                entity_id: soc_entity.clone(),
                value: raw.clone(),
            })?;

        let consumption_forecast_kwh = self
            .settings
            .consumption_forecast_entity
            .as_deref()
            .and_then(|id| reader.number(id).ok().flatten())
            .unwrap_or(0.0);

        Ok(SignalRequest {
            api_key: self.settings.api_key.clone(),
            soc,
            is_solar_override: self.guard.borrow().solar_override,
            consumption_forecast_kwh,
        })
    }

    /// Fetch the strategy once without touching the cache.
    pub async fn fetch(&self) -> Result<StrategySnapshot, StrategyError> {
        let request = self.signal()?;
        let url = format!("{}/signal", self.settings.api_url.trim_end_matches('/'));
        debug!(soc = request.soc, is_solar_override = request.is_solar_override, "requesting strategy");

        let resp = self.client.post(url).json(&request).send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if status != reqwest::StatusCode::OK {
            return Err(StrategyError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(serde_json::from_str(&body)?)
    }

    /// Fetch and cache. On failure the previous strategy stays in place.
    pub async fn poll_once(&self) -> Result<(), StrategyError> {
        let snapshot = self.fetch().await?;
        info!(
            action = snapshot.action.as_deref().unwrap_or("UNKNOWN"),
            peak_shaving_active = snapshot.peak_shaving_active(),
            "strategy updated"
        );
        self.cache.store(snapshot);
        Ok(())
    }

    pub async fn run(&self, every_minutes: u64) {
        let mut interval =
            tokio::time::interval(Duration::from_secs(every_minutes.max(1) * 60));
        loop {
            interval.tick().await;
            if let Err(e) = self.poll_once().await {
                warn!(error = %e, "strategy poll failed, keeping previous strategy");
            }
        }
    }
}
