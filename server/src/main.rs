//! APM Central Server - Main Entry Point
//!
//! Authenticated ingest, an optional UDP ingest port, embedded storage, a
//! log-aggregator shipper, and a read-only query API (§4.5-§4.8).

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use clap::Parser;
use tracing::info;

use apm_server::config::{Cli, Config};
use apm_server::state::AppState;
use apm_server::storage::Storage;
use apm_server::{api, auth, ingest, ratelimit, shipper};

/// Bounded window for in-flight requests to drain once shutdown begins
/// (§4.5 "forced-exit deadline").
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(path) = &cli.config {
        dotenvy::from_path(path).ok();
    } else {
        dotenvy::dotenv().ok();
    }

    let default_filter = cli
        .log_level
        .clone()
        .unwrap_or_else(|| "apm_server=debug,tower_http=debug".into());
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .json()
        .init();

    let mut config = Config::from_env()?;
    config.apply_cli(&cli);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting APM server"
    );

    if config.tls_enabled() {
        tracing::warn!(
            "TLS_KEY_PATH/TLS_CERT_PATH configured but in-process TLS termination is not \
             implemented; run this behind a TLS-terminating proxy (see DESIGN.md)"
        );
    }

    ingest::http::init_start_time();

    let storage = Storage::open(&config.db_path)?;
    let state = AppState::new(config.clone(), storage.clone());

    let retention_task = apm_server::storage::retention::spawn_retention_task(storage.writer_handle());
    let replay_task = shipper::spawn_replay_worker(state.shipper.clone());

    let udp_task = config.udp_port.map(|port| {
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(error) = ingest::udp::run(port, state).await {
                tracing::error!(%error, "UDP ingest listener exited");
            }
        })
    });

    let ingest_routes: Router<AppState> = Router::new()
        .route("/ingest/app", post(ingest::http::post_app))
        .route("/ingest/db", post(ingest::http::post_db))
        .layer(middleware::from_fn_with_state(state.clone(), auth::require_api_key));
    let ingest_routes: Router<AppState> =
        ingest_routes.layer(middleware::from_fn_with_state(state.clone(), ratelimit::enforce));

    let app = Router::new()
        .route("/health", get(ingest::http::health))
        .route("/ready", get(ingest::http::ready))
        .merge(ingest_routes)
        .merge(api::router())
        .with_state(state);

    let addr: SocketAddr = ([0, 0, 0, 0], config.port).into();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "APM server listening");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let shutdown_signal = async move {
        let _ = shutdown_rx.await;
    };

    let serve_task = tokio::spawn(async move {
        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(shutdown_signal)
            .await
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, draining in-flight requests");
    let _ = shutdown_tx.send(());

    if tokio::time::timeout(SHUTDOWN_GRACE, serve_task).await.is_err() {
        tracing::warn!("server did not drain within the forced-exit deadline, exiting anyway");
    }

    retention_task.abort();
    replay_task.abort();
    if let Some(task) = udp_task {
        task.abort();
    }

    info!("APM server shut down cleanly");
    Ok(())
}
