//! `GET /api/search` (§4.8): cursor-paginated record listing. Offset
//! pagination is never accepted — the only way forward is the `after`
//! cursor, the `timestamp` of the last row from the previous page.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use apm_common::model::RecordSource;

use crate::state::AppState;
use crate::storage::SearchFilter;

const MIN_LIMIT: i64 = 1;
const MAX_LIMIT: i64 = 100;
const DEFAULT_LIMIT: i64 = 50;

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    project: Option<String>,
    source: Option<String>,
    correlation_id: Option<String>,
    url: Option<String>,
    duration_min: Option<f64>,
    duration_max: Option<f64>,
    timestamp_start: Option<f64>,
    timestamp_end: Option<f64>,
    after: Option<f64>,
    limit: Option<i64>,
}

pub async fn search(State(state): State<AppState>, Query(query): Query<SearchQuery>) -> Response {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT);
    if !(MIN_LIMIT..=MAX_LIMIT).contains(&limit) {
        return validation_error("limit must be between 1 and 100");
    }

    if let Some(source) = &query.source {
        if source.parse::<RecordSource>().is_err() {
            return validation_error("source must be app_agent or db_agent");
        }
    }

    let filter = SearchFilter {
        project: query.project,
        source: query.source,
        correlation_id: query.correlation_id,
        url: query.url,
        duration_min: query.duration_min,
        duration_max: query.duration_max,
        timestamp_start: query.timestamp_start,
        timestamp_end: query.timestamp_end,
        after: query.after,
        limit,
    };

    match state.storage.search(filter).await {
        Ok(page) => Json(serde_json::json!({
            "records": page.records,
            "hasMore": page.has_more,
            "cursor": page.cursor,
        }))
        .into_response(),
        Err(error) => {
            tracing::error!(%error, "search query failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn validation_error(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(serde_json::json!({"error": message}))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_zero_is_rejected() {
        assert!(!(MIN_LIMIT..=MAX_LIMIT).contains(&0));
    }

    #[test]
    fn limit_101_is_rejected() {
        assert!(!(MIN_LIMIT..=MAX_LIMIT).contains(&101));
    }

    #[test]
    fn limit_100_is_accepted() {
        assert!((MIN_LIMIT..=MAX_LIMIT).contains(&100));
    }
}
