//! Disk spill and replay (§4.4 disk spill).
//!
//! A spill file is a JSON array of queued records, written to a temp path
//! and atomically renamed into place, named `buffer_<micros>_<nonce>.json`
//! so that directory listing order is also arrival order.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;

const FILE_PREFIX: &str = "buffer_";

/// Atomically write `records` as a spill file in `dir`.
pub fn write(dir: &Path, records: &[Value]) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let micros = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros())
        .unwrap_or(0);
    let nonce = std::process::id();
    let final_name = format!("{FILE_PREFIX}{micros}_{nonce}.json");
    let tmp_path = dir.join(format!(".{final_name}.tmp"));
    let final_path = dir.join(&final_name);

    std::fs::write(&tmp_path, serde_json::to_vec(records)?)?;
    std::fs::rename(&tmp_path, &final_path)?;
    Ok(final_path)
}

/// Replay all spill files in `dir` in filename (arrival time) order,
/// returning every record in order. Corrupt files are logged and deleted;
/// successfully replayed files are deleted once parsed.
pub fn replay_all(dir: &Path) -> Vec<Value> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut files: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(FILE_PREFIX) && n.ends_with(".json"))
        })
        .collect();
    files.sort();

    let mut out = Vec::new();
    for path in files {
        match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<Vec<Value>>(&bytes) {
                Ok(records) => {
                    out.extend(records);
                    let _ = std::fs::remove_file(&path);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "corrupt spill file discarded");
                    let _ = std::fs::remove_file(&path);
                }
            },
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "unreadable spill file discarded");
                let _ = std::fs::remove_file(&path);
            }
        }
    }
    out
}

/// Count of spill files currently on disk, for the health endpoint.
#[must_use]
pub fn count(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .flatten()
                .filter(|e| {
                    e.file_name()
                        .to_str()
                        .is_some_and(|n| n.starts_with(FILE_PREFIX) && n.ends_with(".json"))
                })
                .count()
        })
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn replay_returns_records_in_arrival_order() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), &[json!(1), json!(2)]).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        write(dir.path(), &[json!(3)]).unwrap();

        let replayed = replay_all(dir.path());
        assert_eq!(replayed, vec![json!(1), json!(2), json!(3)]);
        assert_eq!(count(dir.path()), 0);
    }

    #[test]
    fn corrupt_file_is_discarded_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("buffer_1_1.json"), b"not json").unwrap();
        let replayed = replay_all(dir.path());
        assert!(replayed.is_empty());
        assert_eq!(count(dir.path()), 0);
    }

    #[test]
    fn write_is_atomic_no_tmp_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), &[json!("x")]).unwrap();
        let leftover_tmp = std::fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .any(|e| e.file_name().to_string_lossy().ends_with(".tmp"));
        assert!(!leftover_tmp);
    }
}
