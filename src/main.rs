use anyhow::Result;
use peak_guard::{api, config, controller, telemetry};
use config::Config;
use telemetry::init_tracing;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            return Err(e.into());
        }
    }
    init_tracing();

    let cfg = Config::load()?;

    if cfg.home_assistant.token.is_empty() {
        warn!("home_assistant.token is empty; state reads and script calls will be rejected");
    }
    if cfg.server.api_token.is_empty() {
        warn!("server.api_token is empty; the manual trigger endpoint is unauthenticated");
    }

    let app_state = controller::AppState::new(cfg.clone())?;
    let app = api::router(app_state.clone());

    let addr = cfg.server.socket_addr()?;
    if cfg.server.host == "0.0.0.0" {
        warn!(
            "Server binding to 0.0.0.0 - service will be accessible from network! \
            Bind to 127.0.0.1 unless behind a firewall/reverse proxy."
        );
    }

    info!(
        %addr,
        limit_entity = %cfg.sensors.limit_entity,
        tick_seconds = cfg.controller.tick_seconds,
        "starting PeakGuard"
    );

    controller::spawn_controller_tasks(app_state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(telemetry::shutdown_signal())
        .await?;

    warn!("shutdown complete");
    Ok(())
}
