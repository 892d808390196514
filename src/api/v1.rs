use axum::{
    extract::State,
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::{
    api::{error::ApiError, response::ApiResponse, status::get_status},
    auth::{require_bearer, ApiToken},
    controller::AppState,
    domain::{GuardSnapshot, InverterCommand, ReportKind},
};

pub fn router(state: AppState) -> Router {
    let token = ApiToken::new(&state.cfg.server.api_token);
    let protected = Router::new()
        .route("/peak-guard/run", post(run_peak_guard))
        .route_layer(middleware::from_fn_with_state(token, require_bearer));

    Router::new()
        .route("/healthz", get(healthz))
        .route("/status", get(get_status))
        .merge(protected)
        .with_state(state)
}

pub async fn healthz() -> impl IntoResponse {
    StatusCode::OK
}

/// Manual trigger; omitted fields fall back to the configured entities.
#[derive(Debug, Default, Deserialize)]
pub struct RunRequest {
    pub virtual_load_entity: Option<String>,
    pub limit_entity: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RunResponse {
    pub command: Option<InverterCommand>,
    pub reports: Vec<ReportKind>,
    pub guard: GuardSnapshot,
}

pub async fn run_peak_guard(
    State(st): State<AppState>,
    body: Option<Json<RunRequest>>,
) -> Result<ApiResponse<RunResponse>, ApiError> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let limit_entity = req
        .limit_entity
        .unwrap_or_else(|| st.cfg.sensors.limit_entity.clone());
    if limit_entity.trim().is_empty() {
        return Err(ApiError::BadRequest("limit_entity must not be empty".to_string()));
    }
    let virtual_load_entity = req
        .virtual_load_entity
        .or_else(|| st.cfg.sensors.virtual_load_entity.clone());

    let started = Instant::now();
    let requested: Vec<&str> = virtual_load_entity
        .as_deref()
        .into_iter()
        .chain([limit_entity.as_str()])
        .collect();
    st.sync.refresh_unwatched(&requested).await;

    let cycle = st
        .service
        .update(virtual_load_entity.as_deref(), &limit_entity)
        .await;

    Ok(ApiResponse::success(RunResponse {
        command: cycle.command,
        reports: cycle.reports.iter().map(|r| r.kind).collect(),
        guard: st.service.guard(),
    })
    .with_duration(started.elapsed().as_millis() as u64))
}
