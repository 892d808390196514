pub mod engine;
pub mod service;

use anyhow::Result;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::cloud::{CloudReporter, StrategyCache, StrategyPoller, StrategyPollerSettings};
use crate::config::Config;
use crate::domain::{CommandSink, ReportSink};
use crate::homeassistant::{HomeAssistantClient, ScriptCommandSink, StateSync};
use crate::sensors::{SensorSource, StateStore};

pub use engine::{Cycle, GuardError, GuardSettings, PeakGuardEngine};
pub use service::PeakGuardService;

#[derive(Clone)]
pub struct AppState {
    pub cfg: Config,
    pub store: Arc<StateStore>,
    pub service: Arc<PeakGuardService>,
    pub poller: Arc<StrategyPoller>,
    pub sync: Arc<StateSync>,
}

impl AppState {
    pub fn new(cfg: Config) -> Result<Self> {
        let ha = HomeAssistantClient::new(
            &cfg.home_assistant.base_url,
            &cfg.home_assistant.token,
            cfg.ha_timeout(),
        )?;
        let commands: Arc<dyn CommandSink> = Arc::new(ScriptCommandSink::new(
            ha.clone(),
            cfg.controller.script_names(),
        ));
        let reports: Arc<dyn ReportSink> = Arc::new(CloudReporter::new(
            &cfg.cloud.api_url,
            &cfg.cloud.api_key,
            cfg.cloud_timeout(),
            cfg.cloud.report_max_retries,
        )?);
        Self::with_sinks(cfg, ha, commands, reports)
    }

    /// Wire the state with caller supplied command and report sinks.
    pub fn with_sinks(
        cfg: Config,
        ha: HomeAssistantClient,
        commands: Arc<dyn CommandSink>,
        reports: Arc<dyn ReportSink>,
    ) -> Result<Self> {
        let store = Arc::new(StateStore::new());
        let sensors: Arc<dyn SensorSource> = store.clone();
        let strategy = StrategyCache::new();

        let service = Arc::new(PeakGuardService::new(
            cfg.sensors.guard_settings(),
            sensors.clone(),
            strategy.clone(),
            commands,
            reports,
        ));

        let poller = Arc::new(StrategyPoller::new(
            StrategyPollerSettings {
                api_url: cfg.cloud.api_url.clone(),
                api_key: cfg.cloud.api_key.clone(),
                soc_entity: cfg.sensors.soc_entity.clone(),
                consumption_forecast_entity: cfg.sensors.consumption_forecast_entity.clone(),
                timeout: cfg.cloud_timeout(),
            },
            sensors,
            service.subscribe(),
            strategy,
        )?);

        let sync = Arc::new(StateSync::new(
            ha,
            store.clone(),
            cfg.sensors.watched_entities(),
        ));

        Ok(Self {
            cfg,
            store,
            service,
            poller,
            sync,
        })
    }

    /// One control cycle with the configured entities
    pub async fn run_configured(&self) -> Cycle {
        self.service
            .update(
                self.cfg.sensors.virtual_load_entity.as_deref(),
                &self.cfg.sensors.limit_entity,
            )
            .await
    }
}

pub fn spawn_controller_tasks(state: AppState) {
    let sync = state.sync.clone();
    let poll_seconds = state.cfg.home_assistant.state_poll_seconds;
    let poller = state.poller.clone();
    let poll_minutes = state.cfg.cloud.poll_interval_minutes;
    tokio::spawn(async move {
        // The first strategy request needs a SoC reading
        sync.sync_once().await;
        tokio::spawn(async move { poller.run(poll_minutes).await });
        sync.run(poll_seconds).await;
    });

    let triggered = state.clone();
    tokio::spawn(async move { run_on_changes(triggered).await });

    let ticking = state;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(
            ticking.cfg.controller.tick_seconds.max(1),
        ));
        loop {
            interval.tick().await;
            ticking.run_configured().await;
        }
    });
}

/// Run a cycle whenever one of the trigger entities changes.
async fn run_on_changes(state: AppState) {
    let triggers: HashSet<String> = state.cfg.sensors.trigger_entities().into_iter().collect();
    if triggers.is_empty() {
        warn!("no trigger entities configured, relying on the fixed tick");
        return;
    }
    info!(entities = ?triggers, "listening for state changes");

    let mut changes = state.store.subscribe();
    loop {
        match changes.recv().await {
            Ok(entity_id) => {
                if triggers.contains(&entity_id) {
                    debug!(entity_id = %entity_id, "trigger entity changed");
                    state.run_configured().await;
                }
            }
            Err(RecvError::Lagged(missed)) => {
                warn!(missed, "state change listener lagged");
                state.run_configured().await;
            }
            Err(RecvError::Closed) => break,
        }
    }
}
