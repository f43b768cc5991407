//! SQL event capture (§4.2 SQL hook, §9 redesign note on the database
//! library's event-manager subscription).
//!
//! The host's database-access library owns a `dyn SqlEventSource` —
//! typically the active [`RequestGuard`](crate::collector::RequestGuard) —
//! and drives it through `on_before`/`on_after` around each query. The
//! collector publishes no concrete database-driver type, only this
//! contract.

use std::time::Instant;

use apm_common::model::SqlEvent;
use apm_common::redact::redact_sql;

/// Contract the host's database library drives for each query it executes.
pub trait SqlEventSource: Send {
    /// Called immediately before a query is sent to the database.
    fn on_before(&mut self, query: &str);
    /// Called once the query completes (successfully or not).
    /// `connection` is an opaque descriptor (host:port/db) if available.
    fn on_after(&mut self, connection: Option<&str>);
}

/// Per-query capture state between `on_before` and `on_after`.
pub(crate) struct PendingQuery {
    pub redacted_statement: String,
    pub started_at: Instant,
}

impl PendingQuery {
    pub fn begin(raw_sql: &str, redact: bool) -> Self {
        let redacted_statement = if redact {
            redact_sql(raw_sql)
        } else {
            raw_sql.to_string()
        };
        Self {
            redacted_statement,
            started_at: Instant::now(),
        }
    }

    pub fn finish(self, connection: Option<&str>, stack_limit: usize) -> SqlEvent {
        SqlEvent {
            statement: self.redacted_statement,
            duration_ms: self.started_at.elapsed().as_secs_f64() * 1000.0,
            stack_trace: capture_stack_trace(stack_limit),
            connection: connection.map(str::to_string),
        }
    }
}

/// Capture up to `limit` call-frame descriptions, deliberately omitting
/// argument values (§4.2: "without argument values").
#[must_use]
pub fn capture_stack_trace(limit: usize) -> Vec<String> {
    if limit == 0 {
        return Vec::new();
    }
    let backtrace = std::backtrace::Backtrace::capture();
    if backtrace.status() != std::backtrace::BacktraceStatus::Captured {
        return Vec::new();
    }
    format!("{backtrace}")
        .lines()
        .filter(|line| line.trim_start().starts_with(|c: char| c.is_ascii_digit()))
        .take(limit)
        .map(str::trim)
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_query_redacts_before_recording() {
        let pending = PendingQuery::begin("SELECT * FROM users WHERE token='abc'", true);
        assert!(pending.redacted_statement.contains("[REDACTED]"));
        let event = pending.finish(Some("db:5432/app"), 0);
        assert!(event.stack_trace.is_empty());
        assert_eq!(event.connection.as_deref(), Some("db:5432/app"));
    }

    #[test]
    fn stack_trace_limit_zero_skips_capture() {
        assert!(capture_stack_trace(0).is_empty());
    }
}
