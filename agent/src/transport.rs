//! Local transport: fire-and-forget datagram send to the host daemon, with
//! an atomic disk-spill fallback (§4.3).

use std::io::Write;
use std::os::unix::net::UnixDatagram;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use apm_common::model::{AppPayload, MAX_PAYLOAD_BYTES};

use crate::config::Config;

/// One-hour cutoff for the opportunistic spill-directory cleanup sweep.
const SPILL_MAX_AGE: Duration = Duration::from_secs(3600);

/// Serialize, truncate if oversize, and attempt local-socket delivery;
/// fall through to disk on any failure. Never panics, never blocks the
/// caller beyond `listener_timeout_ms`.
pub fn send(correlation_id: &str, payload: &AppPayload, config: &Config) {
    let mut payload = payload.clone();
    let mut bytes = match serde_json::to_vec(&payload) {
        Ok(b) => b,
        Err(e) => {
            tracing::error!(correlation_id, error = %e, "failed to serialize profiling payload");
            return;
        }
    };

    if bytes.len() > MAX_PAYLOAD_BYTES {
        if let Some(summary) = payload.function_profiling.as_mut() {
            summary.truncate_top(50);
        }
        bytes = serde_json::to_vec(&payload).unwrap_or(bytes);
    }
    if bytes.len() > MAX_PAYLOAD_BYTES {
        payload.sql.truncate_to_top_by_duration(100);
        bytes = serde_json::to_vec(&payload).unwrap_or(bytes);
    }

    if bytes.len() > MAX_PAYLOAD_BYTES {
        spill_to_disk(correlation_id, &bytes, config);
        return;
    }

    let start = Instant::now();
    let delivered = try_send_datagram(&bytes, config);
    let elapsed = start.elapsed();
    let budget = Duration::from_millis(config.listener_timeout_ms);
    if delivered && elapsed > budget.mul_f64(0.8) {
        tracing::warn!(
            correlation_id,
            elapsed_ms = elapsed.as_millis() as u64,
            budget_ms = config.listener_timeout_ms,
            "local-transport send approached its timeout budget"
        );
    }

    if !delivered {
        spill_to_disk(correlation_id, &bytes, config);
    }
}

fn try_send_datagram(bytes: &[u8], config: &Config) -> bool {
    let Ok(socket) = UnixDatagram::unbound() else {
        return false;
    };
    if socket
        .set_write_timeout(Some(Duration::from_millis(config.listener_timeout_ms)))
        .is_err()
    {
        return false;
    }
    socket
        .send_to(bytes, &config.listener_socket_path)
        .is_ok()
}

/// Write `bytes` to a freshly named temp file and atomically rename it,
/// guaranteeing a crash-safe, never-partial record on disk (§4.3).
fn spill_to_disk(correlation_id: &str, bytes: &[u8], config: &Config) {
    let Some(dir) = pick_writable_dir(config) else {
        tracing::error!(correlation_id, "no writable disk-buffer directory available; dropping record");
        return;
    };

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros())
        .unwrap_or(0);
    let nonce = std::process::id();
    let final_name = format!("profile_{timestamp}_{nonce}.json");
    let tmp_name = format!(".{final_name}.tmp");
    let tmp_path = dir.join(&tmp_name);
    let final_path = dir.join(&final_name);

    let write_result = std::fs::File::create(&tmp_path).and_then(|mut f| f.write_all(bytes));
    match write_result.and_then(|()| std::fs::rename(&tmp_path, &final_path)) {
        Ok(()) => {
            cleanup_old_spill_files(&dir);
        }
        Err(e) => {
            tracing::error!(correlation_id, error = %e, "disk spill failed; record dropped");
            let _ = std::fs::remove_file(&tmp_path);
        }
    }
}

fn pick_writable_dir(config: &Config) -> Option<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(configured) = &config.disk_buffer_path {
        candidates.push(PathBuf::from(configured));
    }
    candidates.push(std::env::temp_dir().join("apm-buffer"));
    candidates.push(std::env::temp_dir());

    candidates.into_iter().find(|dir| {
        std::fs::create_dir_all(dir).is_ok() && is_writable(dir)
    })
}

fn is_writable(dir: &Path) -> bool {
    let probe = dir.join(format!(".apm-write-probe-{}", std::process::id()));
    let ok = std::fs::write(&probe, b"").is_ok();
    let _ = std::fs::remove_file(&probe);
    ok
}

/// Best-effort removal of spill files older than one hour (§4.3). Failure
/// to remove a file is silently ignored — cleanup is defensive, not a
/// correctness requirement (§9 open question 4).
fn cleanup_old_spill_files(dir: &Path) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    let now = SystemTime::now();
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.starts_with("profile_") {
            continue;
        }
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        let Ok(modified) = metadata.modified() else {
            continue;
        };
        if now.duration_since(modified).unwrap_or_default() > SPILL_MAX_AGE {
            let _ = std::fs::remove_file(&path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apm_common::model::{RequestInfo, ResponseInfo, ServerIdentity, SqlEventList, Timing};

    fn sample_payload() -> AppPayload {
        AppPayload {
            request: RequestInfo::default(),
            response: ResponseInfo::default(),
            timing: Timing {
                start: 0.0,
                end: 0.1,
                duration_ms: 100.0,
            },
            memory: None,
            function_profiling: None,
            sql: SqlEventList::default(),
            server: ServerIdentity {
                hostname: "test-host".into(),
            },
            context: None,
            fatal_error: None,
        }
    }

    #[test]
    fn falls_back_to_disk_when_no_receiver() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            listener_socket_path: "/nonexistent/path/agent.sock".into(),
            disk_buffer_path: Some(dir.path().to_string_lossy().into_owned()),
            listener_timeout_ms: 10,
            ..Config::default()
        };
        send("corr-1", &sample_payload(), &config);
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn spill_file_is_never_partial() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            disk_buffer_path: Some(dir.path().to_string_lossy().into_owned()),
            ..Config::default()
        };
        spill_to_disk("corr-2", b"{\"ok\":true}", &config);
        let entry = std::fs::read_dir(dir.path())
            .unwrap()
            .next()
            .unwrap()
            .unwrap();
        let contents = std::fs::read_to_string(entry.path()).unwrap();
        assert_eq!(contents, "{\"ok\":true}");
    }

    #[test]
    fn cleanup_removes_only_old_files() {
        let dir = tempfile::tempdir().unwrap();
        let fresh = dir.path().join("profile_1_1.json");
        std::fs::write(&fresh, b"{}").unwrap();
        cleanup_old_spill_files(dir.path());
        assert!(fresh.exists());
    }
}
