//! `GET /api/compare?correlation_id=...` (§4.8): percentile rank of one
//! request among every request for the same URL.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CompareQuery {
    correlation_id: String,
}

pub async fn compare(State(state): State<AppState>, Query(query): Query<CompareQuery>) -> Response {
    match state.storage.compare(query.correlation_id).await {
        Ok(Some(result)) => Json(result).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(error) => {
            tracing::error!(%error, "compare query failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
