//! `GET /api/projects` (§4.8): distinct project list, ascending.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::state::AppState;

pub async fn projects(State(state): State<AppState>) -> Response {
    match state.storage.distinct_projects().await {
        Ok(projects) => Json(serde_json::json!({ "projects": projects })).into_response(),
        Err(error) => {
            tracing::error!(%error, "failed to list distinct projects");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
