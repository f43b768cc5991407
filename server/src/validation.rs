//! Strict ingest body validation (§4.5): deserialize into the wire type,
//! then check the invariants a shape check alone can't express — non-empty
//! identifiers, finite timestamps, non-negative durations. Failures produce
//! a field -> message map rather than a single opaque error.

use std::collections::BTreeMap;

use apm_common::model::{AppIngestRequest, DbIngestRequest};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Debug, Default, Serialize)]
pub struct ValidationErrors(BTreeMap<String, String>);

impl ValidationErrors {
    fn new() -> Self {
        Self(BTreeMap::new())
    }

    fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0.insert(field.to_string(), message.into());
    }

    fn into_result<T>(self, value: T) -> Result<T, Self> {
        if self.0.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }
}

impl IntoResponse for ValidationErrors {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": "validation_failed",
            "fields": self.0,
        });
        (StatusCode::BAD_REQUEST, Json(body)).into_response()
    }
}

fn shape_error(e: &serde_json::Error) -> ValidationErrors {
    let mut errors = ValidationErrors::new();
    errors.add("body", e.to_string());
    errors
}

/// Validate a `POST /ingest/app` body.
pub fn parse_app_ingest(body: &[u8]) -> Result<AppIngestRequest, ValidationErrors> {
    let request: AppIngestRequest = serde_json::from_slice(body).map_err(|e| shape_error(&e))?;

    let mut errors = ValidationErrors::new();
    if request.correlation_id.trim().is_empty() {
        errors.add("correlation_id", "must not be empty");
    }
    if !request.timestamp.is_finite() {
        errors.add("timestamp", "must be a finite number");
    }
    if let Some(duration) = request.duration_ms {
        if duration < 0.0 {
            errors.add("duration_ms", "must not be negative");
        }
    }
    if request.payload.request.uri.trim().is_empty() {
        errors.add("payload.request.uri", "must not be empty");
    }

    errors.into_result(request)
}

/// Validate a `POST /ingest/db` body.
pub fn parse_db_ingest(body: &[u8]) -> Result<DbIngestRequest, ValidationErrors> {
    let request: DbIngestRequest = serde_json::from_slice(body).map_err(|e| shape_error(&e))?;

    let mut errors = ValidationErrors::new();
    if !request.timestamp.is_finite() {
        errors.add("timestamp", "must be a finite number");
    }

    errors.into_result(request)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_json_reports_under_body_key() {
        let err = parse_app_ingest(b"not json").unwrap_err();
        assert!(err.0.contains_key("body"));
    }

    #[test]
    fn empty_correlation_id_is_rejected() {
        let body = br#"{
            "correlation_id": "",
            "timestamp": 1.0,
            "duration_ms": null,
            "payload": {
                "request": {"method": "GET", "uri": "/x", "headers": {}, "query": {}, "form": {}},
                "response": {"status": 200, "headers": {}},
                "timing": {"start": 0.0, "end": 1.0, "duration_ms": 1.0},
                "server": {"hostname": "h"}
            }
        }"#;
        let err = parse_app_ingest(body).unwrap_err();
        assert!(err.0.contains_key("correlation_id"));
    }

    #[test]
    fn negative_duration_is_rejected() {
        let body = br#"{
            "correlation_id": "c1",
            "timestamp": 1.0,
            "duration_ms": -5.0,
            "payload": {
                "request": {"method": "GET", "uri": "/x", "headers": {}, "query": {}, "form": {}},
                "response": {"status": 200, "headers": {}},
                "timing": {"start": 0.0, "end": 1.0, "duration_ms": 1.0},
                "server": {"hostname": "h"}
            }
        }"#;
        let err = parse_app_ingest(body).unwrap_err();
        assert!(err.0.contains_key("duration_ms"));
    }

    #[test]
    fn valid_body_parses_cleanly() {
        let body = br#"{
            "correlation_id": "c1",
            "timestamp": 1.0,
            "duration_ms": 5.0,
            "payload": {
                "request": {"method": "GET", "uri": "/x", "headers": {}, "query": {}, "form": {}},
                "response": {"status": 200, "headers": {}},
                "timing": {"start": 0.0, "end": 1.0, "duration_ms": 1.0},
                "server": {"hostname": "h"}
            }
        }"#;
        assert!(parse_app_ingest(body).is_ok());
    }
}
