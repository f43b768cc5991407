//! HTTP ingest handlers (§4.5): `POST /ingest/app`, `POST /ingest/db`,
//! `GET /health`, `GET /ready`.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use apm_common::correlation;
use apm_common::model::RecordSource;

use crate::auth::AuthenticatedProject;
use crate::state::AppState;
use crate::storage::NewRecord;
use crate::validation::{parse_app_ingest, parse_db_ingest};

/// Static OK body for the liveness probe.
pub async fn health() -> &'static str {
    "OK"
}

/// Readiness gate (§4.5): storage open and at least one API key configured.
pub async fn ready(State(state): State<AppState>) -> Response {
    let storage_open = state.storage.is_open();
    let known_api_keys = state.config.api_keys.len();
    let ready = storage_open && known_api_keys > 0;

    let body = serde_json::json!({
        "ready": ready,
        "storage_open": storage_open,
        "known_api_keys": known_api_keys,
        "uptime_secs": uptime_secs(),
        "shipper_enabled": state.shipper.enabled(),
    });
    let status = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, Json(body)).into_response()
}

/// Server start time. Call [`init_start_time`] early in `main()` for accuracy.
static START_TIME: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();

/// Record the server start time. Call once during startup, before serving
/// requests, so `uptime_secs` in `/ready` is accurate.
pub fn init_start_time() {
    START_TIME.get_or_init(std::time::Instant::now);
}

fn uptime_secs() -> u64 {
    START_TIME.get_or_init(std::time::Instant::now).elapsed().as_secs()
}

/// `POST /ingest/app`. The authoritative project is always the one bound to
/// the bearer token, never a field in the body (§4.5 invariant).
pub async fn post_app(
    State(state): State<AppState>,
    AuthenticatedProject(project): AuthenticatedProject,
    body: Bytes,
) -> Response {
    let request = match parse_app_ingest(&body) {
        Ok(request) => request,
        Err(errors) => return errors.into_response(),
    };

    let url = Some(request.payload.request.uri.clone());
    let http_method = Some(request.payload.request.method.clone());
    let status_code = Some(request.payload.response.status);

    let payload = match serde_json::to_string(&request.payload) {
        Ok(payload) => payload,
        Err(error) => {
            tracing::error!(%error, "failed to serialize app payload for storage");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let record = NewRecord {
        correlation_id: request.correlation_id,
        project,
        source: RecordSource::AppAgent,
        timestamp: request.timestamp,
        duration_ms: request.duration_ms,
        payload,
        created_at: now_secs(),
        url,
        http_method,
        status_code,
    };

    store_and_forward(&state, record).await
}

/// `POST /ingest/db`.
pub async fn post_db(
    State(state): State<AppState>,
    AuthenticatedProject(project): AuthenticatedProject,
    body: Bytes,
) -> Response {
    let request = match parse_db_ingest(&body) {
        Ok(request) => request,
        Err(errors) => return errors.into_response(),
    };

    let payload = match serde_json::to_string(&request.data) {
        Ok(payload) => payload,
        Err(error) => {
            tracing::error!(%error, "failed to serialize db payload for storage");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let record = NewRecord {
        correlation_id: request.correlation_id.unwrap_or_else(correlation::new_id),
        project,
        source: RecordSource::DbAgent,
        timestamp: request.timestamp,
        duration_ms: None,
        payload,
        created_at: now_secs(),
        url: None,
        http_method: None,
        status_code: None,
    };

    store_and_forward(&state, record).await
}

/// Insert `record` and schedule a background shipper forward, per §4.7's
/// "after each successful store-insert... without awaiting its completion."
pub(super) async fn store_and_forward(state: &AppState, record: NewRecord) -> Response {
    let correlation_id = record.correlation_id.clone();
    match state.storage.insert_record(record.clone()).await {
        Ok(id) => {
            let stored = apm_common::model::ProfilingRecord {
                id,
                correlation_id: record.correlation_id,
                project: record.project,
                source: record.source,
                timestamp: record.timestamp,
                duration_ms: record.duration_ms,
                payload: record.payload,
                created_at: record.created_at,
                forwarded: 0,
            };
            state.shipper.forward_in_background(stored);
            (StatusCode::ACCEPTED, Json(serde_json::json!({"id": id, "correlation_id": correlation_id})))
                .into_response()
        }
        Err(error) => {
            tracing::error!(%error, "failed to store ingested record");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
