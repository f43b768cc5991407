//! The profiling record and its payload shape (§3).
//!
//! `ProfilingRecord` is the unit stored centrally, shipped to the log
//! aggregator, and returned by the query API. `AppPayload` is the detailed
//! JSON captured by the in-process collector and carried as `payload` on
//! app-agent records; `DbPayload` is the analogous shape for database-agent
//! records ingested over `/ingest/db`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Maximum number of SQL events retained per request (§4.2).
pub const MAX_SQL_EVENTS: usize = 500;
/// Maximum payload size before truncation kicks in (§4.3).
pub const MAX_PAYLOAD_BYTES: usize = 64 * 1024;

/// Origin of a profiling record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordSource {
    AppAgent,
    DbAgent,
}

impl RecordSource {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AppAgent => "app_agent",
            Self::DbAgent => "db_agent",
        }
    }
}

impl std::fmt::Display for RecordSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RecordSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "app_agent" => Ok(Self::AppAgent),
            "db_agent" => Ok(Self::DbAgent),
            other => Err(format!("unknown record source: {other}")),
        }
    }
}

/// A row of the central store's single profiling table (§4.6 schema).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfilingRecord {
    pub id: i64,
    pub correlation_id: String,
    pub project: String,
    pub source: RecordSource,
    pub timestamp: f64,
    pub duration_ms: Option<f64>,
    /// Opaque JSON, serialized [`AppPayload`] or [`DbPayload`].
    pub payload: String,
    pub created_at: i64,
    pub forwarded: i32,
}

impl ProfilingRecord {
    /// Extract the derived virtual fields (§3: `url`, `http_method`,
    /// `status_code`) from `payload` without a full typed deserialize.
    #[must_use]
    pub fn derive_virtual_fields(&self) -> (Option<String>, Option<String>, Option<i64>) {
        let Ok(value) = serde_json::from_str::<Value>(&self.payload) else {
            return (None, None, None);
        };
        let url = value
            .pointer("/request/uri")
            .and_then(Value::as_str)
            .map(str::to_owned);
        let method = value
            .pointer("/request/method")
            .and_then(Value::as_str)
            .map(str::to_owned);
        let status = value.pointer("/response/status").and_then(Value::as_i64);
        (url, method, status)
    }
}

/// One captured SQL event (§3, §4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlEvent {
    /// Redacted SQL text, possibly prefixed with a correlation comment.
    pub statement: String,
    pub duration_ms: f64,
    /// Up to `sql_stack_trace_limit` frames, arguments stripped.
    #[serde(default)]
    pub stack_trace: Vec<String>,
    /// Opaque connection descriptor (host:port/db, or similar).
    #[serde(default)]
    pub connection: Option<String>,
}

/// Bounded list of SQL events with a hard cap and a truncation flag
/// (§4.2: "hard cap 500 queries retained; excess dropped with a
/// `queries_truncated` summary flag").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SqlEventList {
    pub events: Vec<SqlEvent>,
    #[serde(default)]
    pub queries_truncated: bool,
}

impl SqlEventList {
    /// Push an event, dropping it and setting the truncation flag once the
    /// cap is reached.
    pub fn push(&mut self, event: SqlEvent) {
        if self.events.len() >= MAX_SQL_EVENTS {
            self.queries_truncated = true;
            return;
        }
        self.events.push(event);
    }

    /// Keep only the top `n` events by duration, descending, setting the
    /// truncation flag if anything was dropped. Used by the local-transport
    /// size-reduction pass (§4.3).
    pub fn truncate_to_top_by_duration(&mut self, n: usize) {
        if self.events.len() <= n {
            return;
        }
        self.events
            .sort_by(|a, b| b.duration_ms.total_cmp(&a.duration_ms));
        self.events.truncate(n);
        self.queries_truncated = true;
    }
}

/// One entry in the function-profiling summary (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionSample {
    pub name: String,
    pub calls: u64,
    pub wall_ms: f64,
}

/// Function-profiling summary: top-N by wall time plus a hotspot list
/// (functions consuming ≥5% of total wall time).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FunctionProfilingSummary {
    pub top: Vec<FunctionSample>,
    pub hotspots: Vec<FunctionSample>,
}

impl FunctionProfilingSummary {
    /// Build a summary from raw per-function samples: sorts by wall time,
    /// keeps the top `n`, and extracts the hotspot subset.
    #[must_use]
    pub fn from_samples(mut samples: Vec<FunctionSample>, top_n: usize) -> Self {
        samples.sort_by(|a, b| b.wall_ms.total_cmp(&a.wall_ms));
        let total_wall_ms: f64 = samples.iter().map(|s| s.wall_ms).sum();
        let hotspots = samples
            .iter()
            .filter(|s| total_wall_ms > 0.0 && s.wall_ms / total_wall_ms >= 0.05)
            .cloned()
            .collect();
        samples.truncate(top_n);
        Self {
            top: samples,
            hotspots,
        }
    }

    /// Truncation step used when the serialized payload exceeds
    /// [`MAX_PAYLOAD_BYTES`] (§4.3: truncate function summary first).
    pub fn truncate_top(&mut self, n: usize) {
        self.top.truncate(n);
    }
}

/// Captured request metadata, already redacted (§4.2).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestInfo {
    pub method: String,
    pub uri: String,
    #[serde(default)]
    pub headers: BTreeMap<String, Value>,
    #[serde(default)]
    pub query: BTreeMap<String, Value>,
    #[serde(default)]
    pub form: BTreeMap<String, Value>,
}

/// Captured response metadata, already redacted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseInfo {
    pub status: i64,
    #[serde(default)]
    pub headers: BTreeMap<String, Value>,
}

/// Wall-clock timing for the request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timing {
    pub start: f64,
    pub end: f64,
    pub duration_ms: f64,
}

/// Peak resident memory observed during the request, in bytes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MemoryInfo {
    pub peak_bytes: u64,
}

/// Identity of the server that produced the record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerIdentity {
    pub hostname: String,
}

/// A fatal error captured at request end, if any.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FatalError {
    pub message: String,
    pub kind: String,
}

/// The full detail captured for an `app_agent` record (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppPayload {
    pub request: RequestInfo,
    pub response: ResponseInfo,
    pub timing: Timing,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemoryInfo>,
    #[serde(default)]
    pub function_profiling: Option<FunctionProfilingSummary>,
    #[serde(default)]
    pub sql: SqlEventList,
    pub server: ServerIdentity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<BTreeMap<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fatal_error: Option<FatalError>,
}

/// Source of a database-agent record (§6: `POST /ingest/db`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DbSource {
    PgStatActivity,
    PgStatStatements,
    PgLog,
    SystemMetrics,
}

/// Body accepted by `POST /ingest/app`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppIngestRequest {
    pub correlation_id: String,
    /// Carried for completeness; the authoritative project is the
    /// authenticated one (§3 invariant 2), never this field, for HTTP
    /// ingest. UDP ingest is the sole trusted exception (§9 open question 1).
    #[serde(default)]
    pub project: Option<String>,
    pub timestamp: f64,
    pub duration_ms: Option<f64>,
    pub payload: AppPayload,
}

/// Body accepted by `POST /ingest/db`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbIngestRequest {
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
    pub timestamp: f64,
    pub source: DbSource,
    pub data: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sql_event_list_caps_at_500() {
        let mut list = SqlEventList::default();
        for i in 0..510 {
            list.push(SqlEvent {
                statement: format!("SELECT {i}"),
                duration_ms: 1.0,
                stack_trace: vec![],
                connection: None,
            });
        }
        assert_eq!(list.events.len(), MAX_SQL_EVENTS);
        assert!(list.queries_truncated);
    }

    #[test]
    fn sql_event_list_under_cap_not_truncated() {
        let mut list = SqlEventList::default();
        list.push(SqlEvent {
            statement: "SELECT 1".into(),
            duration_ms: 1.0,
            stack_trace: vec![],
            connection: None,
        });
        assert!(!list.queries_truncated);
    }

    #[test]
    fn hotspots_require_five_percent_of_wall_time() {
        let samples = vec![
            FunctionSample {
                name: "a".into(),
                calls: 1,
                wall_ms: 95.0,
            },
            FunctionSample {
                name: "b".into(),
                calls: 1,
                wall_ms: 5.0,
            },
            FunctionSample {
                name: "c".into(),
                calls: 1,
                wall_ms: 0.1,
            },
        ];
        let summary = FunctionProfilingSummary::from_samples(samples, 10);
        assert_eq!(summary.hotspots.len(), 2);
    }

    #[test]
    fn record_source_round_trips_as_str() {
        assert_eq!(
            "app_agent".parse::<RecordSource>().unwrap(),
            RecordSource::AppAgent
        );
        assert_eq!(RecordSource::DbAgent.as_str(), "db_agent");
    }
}
