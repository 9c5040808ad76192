//! Raffle Keeper
//!
//! Off-chain upkeep trigger for the raffle program. Runs three concurrent
//! subsystems:
//!
//! - **Upkeep loop**: simulates `check_upkeep` on a fixed cadence and submits
//!   `perform_upkeep` when a draw is due; alarms on a stuck draw.
//! - **Listener**: WebSocket subscription to the raffle's on-chain events.
//! - **HTTP server**: liveness (`/health`), last observed state (`/status`)
//!   and counters (`/metrics`).

use actix_web::{web, App, HttpResponse, HttpServer};
use solana_sdk::signature::Signer;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

mod codec;
mod config;
mod coordinator;
mod listener;
mod metrics;
mod raffle_account;
mod status;
mod upkeep;

use config::AppConfig;
use metrics::Metrics;
use status::KeeperStatus;

/// Shared application state accessible from HTTP handlers.
struct AppState {
    status: Arc<RwLock<KeeperStatus>>,
    metrics: Arc<Metrics>,
}

/// Liveness probe: returns 200 if the process is running.
async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({"status": "ok"}))
}

/// Last observed raffle snapshot and the stuck-draw flag.
async fn status(data: web::Data<AppState>) -> HttpResponse {
    let status = data.status.read().await;
    HttpResponse::Ok().json(&*status)
}

async fn metrics(data: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(data.metrics.to_json())
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();

    fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,solana_client=warn,solana_rpc_client=warn,hyper=warn")),
        )
        .with_target(true)
        .with_ansi(true)
        .init();

    let config = AppConfig::from_env()
        .map_err(|e| std::io::Error::other(format!("invalid configuration: {e:#}")))?;

    info!(
        program = %config.program_id,
        raffle = %config.raffle,
        authority = %config.raffle_authority,
        keeper = %config.keeper_keypair.pubkey(),
        "Starting raffle keeper"
    );
    info!(rpc = %config.rpc_url, ws = %config.ws_url, "Endpoints configured");

    let keeper_status = Arc::new(RwLock::new(KeeperStatus::default()));
    let keeper_metrics = Arc::new(Metrics::new());

    // Background: stream on-chain raffle events.
    let listener_config = config.clone();
    let listener_metrics = keeper_metrics.clone();
    tokio::spawn(async move {
        listener::listen_for_events(listener_config, listener_metrics).await;
    });

    // Background: poll the raffle and trigger draws.
    let upkeep_config = config.clone();
    let upkeep_status = keeper_status.clone();
    let upkeep_metrics = keeper_metrics.clone();
    tokio::spawn(async move {
        upkeep::run_upkeep_loop(upkeep_config, upkeep_status, upkeep_metrics).await;
    });

    let state = web::Data::new(AppState {
        status: keeper_status,
        metrics: keeper_metrics,
    });
    let addr = ("0.0.0.0", config.http_port);

    info!(port = config.http_port, "Starting HTTP server");

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .route("/health", web::get().to(health))
            .route("/status", web::get().to(status))
            .route("/metrics", web::get().to(metrics))
    })
    .bind(addr)?
    .run()
    .await
}
