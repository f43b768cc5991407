//! Hourly retention sweep (§4.6): delete rows older than 7 days, then run a
//! bounded incremental vacuum if anything was deleted.

use std::time::Duration;

use rusqlite::Connection;
use tokio::sync::Mutex;

const RETENTION_SECS: i64 = 7 * 24 * 3600;
const VACUUM_PAGE_LIMIT: i64 = 1000;

/// Spawn the hourly retention task. The first tick fires immediately (one
/// sweep at boot, per §4.6), then every hour on the hour thereafter.
pub fn spawn_retention_task(writer: std::sync::Arc<Mutex<Connection>>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(3600));
        loop {
            interval.tick().await;
            run_retention_cycle(&writer).await;
        }
    })
}

async fn run_retention_cycle(writer: &std::sync::Arc<Mutex<Connection>>) {
    let writer = writer.clone();
    let deleted = tokio::task::spawn_blocking(move || {
        let conn = writer.blocking_lock();
        sweep(&conn)
    })
    .await;

    match deleted {
        Ok(Ok(deleted)) => {
            tracing::info!(deleted, "retention sweep completed");
        }
        Ok(Err(e)) => tracing::warn!(error = %e, "retention sweep failed"),
        Err(e) => tracing::warn!(error = %e, "retention sweep task panicked"),
    }
}

fn sweep(conn: &Connection) -> rusqlite::Result<usize> {
    let cutoff = now_secs() - RETENTION_SECS;
    let deleted = conn.execute(
        "DELETE FROM profiling_records WHERE created_at < ?1",
        [cutoff],
    )?;
    if deleted > 0 {
        conn.execute(&format!("PRAGMA incremental_vacuum({VACUUM_PAGE_LIMIT})"), [])?;
    }
    Ok(deleted)
}

fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::queries::{insert_record, NewRecord};
    use crate::storage::schema;
    use apm_common::model::RecordSource;

    #[test]
    fn sweep_deletes_only_rows_past_retention() {
        let mut conn = Connection::open_in_memory().unwrap();
        schema::run_migrations(&mut conn).unwrap();

        let old_cutoff = now_secs() - RETENTION_SECS - 10;
        insert_record(
            &conn,
            &NewRecord {
                correlation_id: "old".into(),
                project: "p".into(),
                source: RecordSource::AppAgent,
                timestamp: 1.0,
                duration_ms: None,
                payload: "{}".into(),
                created_at: old_cutoff,
                url: None,
                http_method: None,
                status_code: None,
            },
        )
        .unwrap();
        insert_record(
            &conn,
            &NewRecord {
                correlation_id: "new".into(),
                project: "p".into(),
                source: RecordSource::AppAgent,
                timestamp: 2.0,
                duration_ms: None,
                payload: "{}".into(),
                created_at: now_secs(),
                url: None,
                http_method: None,
                status_code: None,
            },
        )
        .unwrap();

        let deleted = sweep(&conn).unwrap();
        assert_eq!(deleted, 1);
        let remaining: i64 = conn
            .query_row("SELECT COUNT(*) FROM profiling_records", [], |r| r.get(0))
            .unwrap();
        assert_eq!(remaining, 1);
    }

    #[test]
    fn retention_window_is_seven_days() {
        assert_eq!(RETENTION_SECS, 604_800);
    }
}
