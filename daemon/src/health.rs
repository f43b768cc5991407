//! Loopback-only health endpoint (§4.4): reports queue depth, spill file
//! count, and breaker state so an operator (or a supervisor) can observe
//! the daemon without reaching into its process internals.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use tokio::sync::{mpsc, oneshot};

use crate::actor::Command;

#[derive(Clone)]
struct HealthState {
    commands: mpsc::Sender<Command>,
}

pub async fn serve(port: u16, commands: mpsc::Sender<Command>) {
    let state = HealthState { commands };
    let app = Router::new()
        .route("/health", get(health_handler))
        .with_state(state);

    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(%addr, error = %e, "failed to bind health endpoint");
            return;
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "health endpoint server exited");
    }
}

async fn health_handler(State(state): State<HealthState>) -> impl IntoResponse {
    let (reply_tx, reply_rx) = oneshot::channel();
    if state
        .commands
        .send(Command::Health(reply_tx))
        .await
        .is_err()
    {
        return axum::http::StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    match reply_rx.await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(_) => axum::http::StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}
