//! `GET /api/correlation/:id` (§4.8): every record sharing a correlation
//! id, partitioned by source.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::state::AppState;

pub async fn correlation(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.storage.correlation_bundle(id).await {
        Ok(Some(bundle)) => Json(bundle).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(error) => {
            tracing::error!(%error, "correlation bundle query failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
