use axum::extract::State;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    api::response::ApiResponse,
    controller::AppState,
    domain::{displayed_action, displayed_reason, GuardSnapshot, GuardStatus, StrategySnapshot},
    sensors::{LoadEstimator, SampleReader},
};

/// Read-only view of the guard for dashboards
#[derive(Debug, Serialize)]
pub struct PeakGuardStatus {
    pub status: String,
    pub action: String,
    pub reason: String,
    pub target_power_kw: f64,
    pub min_soc_buffer: f64,
    pub peak_power_kw: f64,
    pub peak_shaving_active: bool,
    /// `None` when the load source is unavailable or unreadable
    pub virtual_load_w: Option<i64>,
    pub guard: GuardSnapshot,
    pub strategy_updated_at: Option<DateTime<Utc>>,
}

impl PeakGuardStatus {
    pub fn derive(
        guard: GuardSnapshot,
        strategy: &StrategySnapshot,
        virtual_load_w: Option<f64>,
        strategy_updated_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            status: GuardStatus::derive(&guard, strategy).to_string(),
            action: displayed_action(&guard, strategy),
            reason: displayed_reason(&guard, strategy),
            target_power_kw: strategy.target_power_kw.unwrap_or(0.0),
            min_soc_buffer: strategy.min_soc_buffer.unwrap_or(0.0),
            peak_power_kw: strategy.peak_limit_kw(),
            peak_shaving_active: strategy.peak_shaving_active(),
            virtual_load_w: virtual_load_w.map(|w| w.round() as i64),
            guard,
            strategy_updated_at,
        }
    }
}

pub async fn get_status(State(st): State<AppState>) -> ApiResponse<PeakGuardStatus> {
    let cached = st.service.strategy().latest();
    let (strategy, updated_at) = match cached {
        Some(c) => (c.snapshot, Some(c.fetched_at)),
        None => (StrategySnapshot::default(), None),
    };

    let sources = st.cfg.sensors.load_sources();
    let virtual_load_w = LoadEstimator::new(SampleReader::new(st.store.as_ref()), &sources)
        .virtual_load_w(st.cfg.sensors.virtual_load_entity.as_deref())
        .ok()
        .flatten();

    ApiResponse::success(PeakGuardStatus::derive(
        st.service.guard(),
        &strategy,
        virtual_load_w,
        updated_at,
    ))
}
