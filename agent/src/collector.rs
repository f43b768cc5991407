//! In-process collector entry point and end-of-request hook (§4.2).
//!
//! `begin_request` models the host's "register at request start" call.
//! The returned [`RequestGuard`] models the "register-at-request-end hook"
//! redesign note (§9): its `finish` method is the guaranteed-release step,
//! and `Drop` is a safety net that performs the same work if the caller
//! never calls `finish` explicitly (e.g. the host's framework unwinds
//! without an explicit end-of-request callback).

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use apm_common::correlation::new_id;
use apm_common::model::{
    AppPayload, FatalError, FunctionProfilingSummary, MemoryInfo, RecordSource, RequestInfo,
    ResponseInfo, ServerIdentity, SqlEventList, Timing,
};
use apm_common::redact::{redact_header, redact_value};
use serde_json::Value;

use crate::config::Config;
use crate::profiler::{self, FunctionProfiler};
use crate::sql::{PendingQuery, SqlEventSource};
use crate::transport;

/// Entry point the host calls once at request start.
pub struct Collector;

impl Collector {
    /// Begin tracking one request: assigns a correlation id, starts the
    /// wall-clock timer, and starts the function profiler if enabled and
    /// available. Never fails — on any internal error the request
    /// continues with profiling effectively disabled for this request.
    #[must_use]
    pub fn begin_request(config: Config) -> RequestGuard {
        let correlation_id = new_id();
        let mut profiler = None;
        if config.profiling_enabled && config.function_profiling_enabled {
            if let Some(mut p) = profiler::try_create() {
                p.start();
                profiler = Some(p);
            }
        }
        RequestGuard {
            correlation_id,
            wall_start: SystemTime::now(),
            timer: Instant::now(),
            config,
            profiler,
            sql_events: SqlEventList::default(),
            pending_sql: None,
            context: BTreeMap::new(),
            fatal_error: None,
            finished: false,
        }
    }
}

/// Per-request profiling state, alive for the lifetime of one host request.
pub struct RequestGuard {
    correlation_id: String,
    wall_start: SystemTime,
    timer: Instant,
    config: Config,
    profiler: Option<Box<dyn FunctionProfiler>>,
    sql_events: SqlEventList,
    pending_sql: Option<PendingQuery>,
    context: BTreeMap<String, Value>,
    fatal_error: Option<FatalError>,
    finished: bool,
}

impl RequestGuard {
    #[must_use]
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Record an application-supplied custom context value.
    pub fn record_context(&mut self, key: impl Into<String>, value: Value) {
        if self.config.request_metadata_enabled {
            self.context.insert(key.into(), value);
        }
    }

    /// Record a fatal error observed during the request.
    pub fn set_fatal_error(&mut self, message: impl Into<String>, kind: impl Into<String>) {
        self.fatal_error = Some(FatalError {
            message: message.into(),
            kind: kind.into(),
        });
    }

    /// End-of-request hook (§4.2). Builds and emits the payload if the
    /// request met `threshold_ms`; always stops the profiler. Every
    /// failure mode — panic, redaction error, serialization error — is
    /// caught here and logged out-of-band; the host request is never
    /// affected (§7: "host-side collector error: logged out-of-band, never
    /// propagated").
    pub fn finish(mut self, request: RequestInfo, response: ResponseInfo) {
        if let Some(profiler) = self.profiler.as_mut() {
            profiler.stop();
        }
        self.finished = true;

        let elapsed_ms = self.timer.elapsed().as_secs_f64() * 1000.0;
        if elapsed_ms < self.config.threshold_ms as f64 {
            return;
        }

        let correlation_id = self.correlation_id.clone();
        let result = catch_unwind(AssertUnwindSafe(|| self.build_payload(elapsed_ms, request, response)));
        match result {
            Ok(payload) => transport::send(&correlation_id, &payload, &self.config),
            Err(_) => {
                tracing::error!(
                    correlation_id = %correlation_id,
                    "panic while building profiling payload; request unaffected"
                );
            }
        }
    }

    fn build_payload(&mut self, elapsed_ms: f64, request: RequestInfo, response: ResponseInfo) -> AppPayload {
        let redact = self.config.request_metadata_enabled;
        let request = if redact {
            redact_request(request)
        } else {
            request
        };
        let response = if redact {
            redact_response(response)
        } else {
            response
        };

        let function_profiling = self
            .profiler
            .as_ref()
            .map(|p| FunctionProfilingSummary::from_samples(p.snapshot(), 50));

        let memory = self
            .config
            .memory_tracking_enabled
            .then(peak_memory_bytes)
            .map(|peak_bytes| MemoryInfo { peak_bytes });

        let now = self
            .wall_start
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();

        AppPayload {
            request,
            response,
            timing: Timing {
                start: now,
                end: now + elapsed_ms / 1000.0,
                duration_ms: elapsed_ms,
            },
            memory,
            function_profiling,
            sql: std::mem::take(&mut self.sql_events),
            server: ServerIdentity {
                hostname: hostname(),
            },
            context: (!self.context.is_empty()).then(|| std::mem::take(&mut self.context)),
            fatal_error: self.fatal_error.take(),
        }
    }
}

impl SqlEventSource for RequestGuard {
    fn on_before(&mut self, query: &str) {
        if !self.config.sql_capture_enabled {
            return;
        }
        let with_comment = format!(
            "{} {query}",
            apm_common::correlation::format_comment(&self.correlation_id)
        );
        self.pending_sql = Some(PendingQuery::begin(
            &with_comment,
            self.config.sql_redact_sensitive,
        ));
    }

    fn on_after(&mut self, connection: Option<&str>) {
        let Some(pending) = self.pending_sql.take() else {
            return;
        };
        let event = pending.finish(connection, self.config.sql_stack_trace_limit);
        self.sql_events.push(event);
    }
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        if !self.finished {
            if let Some(profiler) = self.profiler.as_mut() {
                profiler.stop();
            }
        }
    }
}

fn redact_request(mut request: RequestInfo) -> RequestInfo {
    for (k, v) in request.headers.iter_mut() {
        if let Value::String(s) = v {
            *s = redact_header(k, s);
        }
    }
    for (k, v) in request.query.iter_mut() {
        *v = redact_value(&std::mem::replace(v, Value::Null), 0);
        if apm_common::redact::is_sensitive_key(k) {
            *v = Value::String("[REDACTED]".to_string());
        }
    }
    for (k, v) in request.form.iter_mut() {
        *v = redact_value(&std::mem::replace(v, Value::Null), 0);
        if apm_common::redact::is_sensitive_key(k) {
            *v = Value::String("[REDACTED]".to_string());
        }
    }
    request
}

fn redact_response(mut response: ResponseInfo) -> ResponseInfo {
    for (k, v) in response.headers.iter_mut() {
        if let Value::String(s) = v {
            *s = redact_header(k, s);
        }
    }
    response
}

fn peak_memory_bytes() -> u64 {
    // Best-effort: read the kernel-reported peak RSS on Linux. Never fails
    // the request — absent or unparsable status falls back to 0.
    std::fs::read_to_string("/proc/self/status")
        .ok()
        .and_then(|status| {
            status.lines().find_map(|line| {
                line.strip_prefix("VmHWM:")
                    .and_then(|rest| rest.trim().split_whitespace().next())
                    .and_then(|kb| kb.parse::<u64>().ok())
                    .map(|kb| kb * 1024)
            })
        })
        .unwrap_or(0)
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown-host".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use apm_common::model::RecordSource;

    fn fast_config() -> Config {
        Config {
            profiling_enabled: true,
            threshold_ms: 500,
            sql_capture_enabled: true,
            ..Config::default()
        }
    }

    #[test]
    fn fast_request_is_discarded() {
        let guard = Collector::begin_request(fast_config());
        // finishing immediately keeps elapsed well under threshold_ms
        guard.finish(RequestInfo::default(), ResponseInfo::default());
        // No observable side effect to assert beyond "did not panic" since
        // emission is fire-and-forget; covered end-to-end in transport tests.
    }

    #[test]
    fn sql_events_are_captured_between_hooks() {
        let mut guard = Collector::begin_request(fast_config());
        guard.on_before("SELECT 1");
        guard.on_after(Some("db:5432/app"));
        assert_eq!(guard.sql_events.events.len(), 1);
        assert!(guard.sql_events.events[0]
            .statement
            .contains("correlation:"));
    }

    #[test]
    fn correlation_id_is_stable_for_request_lifetime() {
        let guard = Collector::begin_request(fast_config());
        let id = guard.correlation_id().to_string();
        assert_eq!(guard.correlation_id(), id);
    }

    #[test]
    fn request_headers_are_redacted_before_storage() {
        let mut request = RequestInfo::default();
        request
            .headers
            .insert("Authorization".to_string(), Value::String("Bearer x".into()));
        let redacted = redact_request(request);
        assert_eq!(redacted.headers["Authorization"], "[REDACTED]");
    }

    #[test]
    fn _unused_import_guard() {
        let _ = RecordSource::AppAgent.as_str();
    }
}
