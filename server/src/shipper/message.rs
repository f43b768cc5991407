//! GELF wire message for one profiling record (§4.7). The field naming
//! (`version`, `host`, `short_message`, `full_message`, underscore-prefixed
//! custom fields) follows the Graylog Extended Log Format the central
//! config already speaks of (`GRAYLOG_HOST`/`GRAYLOG_PORT`/`GRAYLOG_FACILITY`).

use apm_common::model::ProfilingRecord;
use serde::Serialize;
use serde_json::Value;

const MAX_URL_LEN: usize = 500;
/// GELF informational level (syslog severity 6).
const LEVEL_INFO: i32 = 6;

#[derive(Debug, Serialize)]
pub struct ShipperMessage {
    pub version: &'static str,
    pub host: String,
    pub short_message: String,
    pub timestamp: f64,
    pub level: i32,
    pub full_message: String,
    #[serde(rename = "_correlation_id")]
    pub correlation_id: String,
    #[serde(rename = "_project")]
    pub project: String,
    #[serde(rename = "_source")]
    pub source: String,
    #[serde(rename = "_row_id")]
    pub row_id: i64,
    #[serde(rename = "_duration_ms", skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
    #[serde(rename = "_url", skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(rename = "_method", skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(rename = "_status_code", skip_serializing_if = "Option::is_none")]
    pub status_code: Option<i64>,
    #[serde(rename = "_sql_count", skip_serializing_if = "Option::is_none")]
    pub sql_count: Option<u64>,
    #[serde(rename = "_sql_total_ms", skip_serializing_if = "Option::is_none")]
    pub sql_total_ms: Option<f64>,
    #[serde(rename = "_peak_memory_mb", skip_serializing_if = "Option::is_none")]
    pub peak_memory_mb: Option<f64>,
    #[serde(rename = "_hostname", skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

/// Build the wire message for `record`, opportunistically pulling `url`,
/// `method`, `status_code`, SQL summary counts, peak memory, and hostname
/// out of the stored payload. Fields that aren't present in the payload
/// (e.g. a `db_agent` record has no `request`/`response`) are simply
/// omitted rather than treated as an error.
#[must_use]
pub fn build_message(record: &ProfilingRecord) -> ShipperMessage {
    let (url, method, status_code) = record.derive_virtual_fields();
    let payload: Option<Value> = serde_json::from_str(&record.payload).ok();

    let sql_events = payload
        .as_ref()
        .and_then(|v| v.pointer("/sql/events"))
        .and_then(Value::as_array);
    let sql_count = sql_events.map(|events| events.len() as u64);
    let sql_total_ms = sql_events.map(|events| {
        events
            .iter()
            .filter_map(|e| e.get("duration_ms").and_then(Value::as_f64))
            .sum()
    });

    let peak_memory_mb = payload
        .as_ref()
        .and_then(|v| v.pointer("/memory/peak_bytes"))
        .and_then(Value::as_f64)
        .map(|bytes| bytes / (1024.0 * 1024.0));

    let hostname = payload
        .as_ref()
        .and_then(|v| v.pointer("/server/hostname"))
        .and_then(Value::as_str)
        .map(str::to_owned);

    ShipperMessage {
        version: "1.1",
        host: record.source.as_str().to_string(),
        short_message: format!("{} - {}", record.source.as_str(), record.project),
        timestamp: record.timestamp,
        level: LEVEL_INFO,
        full_message: record.payload.clone(),
        correlation_id: record.correlation_id.clone(),
        project: record.project.clone(),
        source: record.source.as_str().to_string(),
        row_id: record.id,
        duration_ms: record.duration_ms,
        url: url.map(|u| truncate(&u, MAX_URL_LEN)),
        method,
        status_code,
        sql_count,
        sql_total_ms,
        peak_memory_mb,
        hostname,
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

/// Serialize `message` and append the zero-byte frame delimiter mandatory
/// for GELF-over-TCP — without it the aggregator silently drops the data.
pub fn frame(message: &ShipperMessage) -> serde_json::Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec(message)?;
    bytes.push(0);
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use apm_common::model::RecordSource;

    fn app_record(payload: &str) -> ProfilingRecord {
        ProfilingRecord {
            id: 42,
            correlation_id: "c1".into(),
            project: "proj".into(),
            source: RecordSource::AppAgent,
            timestamp: 100.0,
            duration_ms: Some(12.5),
            payload: payload.to_string(),
            created_at: 1,
            forwarded: 0,
        }
    }

    #[test]
    fn extracts_url_method_status_from_payload() {
        let record = app_record(
            r#"{"request":{"method":"GET","uri":"/x"},"response":{"status":200}}"#,
        );
        let message = build_message(&record);
        assert_eq!(message.url.as_deref(), Some("/x"));
        assert_eq!(message.method.as_deref(), Some("GET"));
        assert_eq!(message.status_code, Some(200));
    }

    #[test]
    fn sums_sql_durations() {
        let record = app_record(
            r#"{"sql":{"events":[{"duration_ms":1.5},{"duration_ms":2.5}]}}"#,
        );
        let message = build_message(&record);
        assert_eq!(message.sql_count, Some(2));
        assert_eq!(message.sql_total_ms, Some(4.0));
    }

    #[test]
    fn missing_payload_fields_are_omitted_not_errors() {
        let record = app_record("{}");
        let message = build_message(&record);
        assert!(message.url.is_none());
        assert!(message.peak_memory_mb.is_none());
    }

    #[test]
    fn url_is_truncated_to_500() {
        let long_url = format!("/{}", "a".repeat(600));
        let record = app_record(&format!(
            r#"{{"request":{{"method":"GET","uri":"{long_url}"}},"response":{{"status":200}}}}"#
        ));
        let message = build_message(&record);
        assert_eq!(message.url.unwrap().len(), MAX_URL_LEN);
    }

    #[test]
    fn framed_message_ends_in_zero_byte() {
        let record = app_record("{}");
        let bytes = frame(&build_message(&record)).unwrap();
        assert_eq!(*bytes.last().unwrap(), 0);
    }
}
