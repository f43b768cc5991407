//! `GET /api/stats` (§4.8): project-wide aggregates, or URL-specific
//! aggregates plus percentiles when `url` is supplied.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    project: String,
    url: Option<String>,
}

pub async fn stats(State(state): State<AppState>, Query(query): Query<StatsQuery>) -> Response {
    if let Some(url) = query.url {
        return match state.storage.url_stats(query.project, url).await {
            Ok(stats) => Json(stats).into_response(),
            Err(error) => {
                tracing::error!(%error, "url stats query failed");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        };
    }

    match state.storage.project_stats(query.project).await {
        Ok(stats) => Json(stats).into_response(),
        Err(error) => {
            tracing::error!(%error, "project stats query failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
