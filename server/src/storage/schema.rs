//! Forward-only migration registry (§4.6). Each migration is idempotent —
//! it checks for its own effect (a column or index already present) before
//! acting, so re-running the registry against an already-migrated database
//! is a no-op.

use rusqlite::Connection;

/// Pragmas applied before first use (§4.6): WAL for concurrent reads under
/// a concurrent write, `NORMAL` synchronous mode, incremental auto-vacuum,
/// a generous page cache, and in-memory temp tables.
pub fn apply_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA auto_vacuum = INCREMENTAL;
         PRAGMA cache_size = -20000;
         PRAGMA temp_store = MEMORY;
         PRAGMA busy_timeout = 5000;",
    )
}

/// Run every migration that has not yet been recorded as applied.
pub fn run_migrations(conn: &mut Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
             name TEXT PRIMARY KEY,
             applied_at INTEGER NOT NULL
         );",
    )?;

    let migrations: &[(&str, fn(&Connection) -> rusqlite::Result<()>)] = &[
        ("0001_create_profiling_records", migration_0001),
        ("0002_add_forwarded_column", migration_0002),
    ];

    let tx = conn.transaction()?;
    for (name, migration) in migrations {
        let already_applied: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM schema_migrations WHERE name = ?1)",
            [name],
            |row| row.get(0),
        )?;
        if already_applied {
            continue;
        }
        migration(&tx)?;
        tx.execute(
            "INSERT INTO schema_migrations (name, applied_at) VALUES (?1, strftime('%s','now'))",
            [name],
        )?;
        tracing::info!(migration = *name, "applied storage migration");
    }
    tx.commit()
}

/// Base table and the indexes that don't depend on later columns.
fn migration_0001(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS profiling_records (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             correlation_id TEXT NOT NULL,
             project TEXT NOT NULL,
             source TEXT NOT NULL,
             timestamp REAL NOT NULL,
             duration_ms REAL,
             payload TEXT NOT NULL,
             created_at INTEGER NOT NULL,
             url TEXT,
             http_method TEXT,
             status_code INTEGER
         );
         CREATE INDEX IF NOT EXISTS idx_records_correlation_id
             ON profiling_records (correlation_id);
         CREATE INDEX IF NOT EXISTS idx_records_project_timestamp
             ON profiling_records (project, timestamp);
         CREATE INDEX IF NOT EXISTS idx_records_duration_ms
             ON profiling_records (duration_ms) WHERE duration_ms IS NOT NULL;
         CREATE INDEX IF NOT EXISTS idx_records_source_timestamp
             ON profiling_records (source, timestamp);
         CREATE INDEX IF NOT EXISTS idx_records_created_at
             ON profiling_records (created_at);
         CREATE INDEX IF NOT EXISTS idx_records_url
             ON profiling_records (url);",
    )
}

/// Adds `forwarded`, defaulting pre-existing rows to already-shipped (1) so
/// an upgrade never triggers a replay storm; new inserts explicitly supply
/// 0 regardless of this column default (§4.6).
fn migration_0002(conn: &Connection) -> rusqlite::Result<()> {
    let has_column: bool = conn
        .prepare("SELECT 1 FROM pragma_table_info('profiling_records') WHERE name = 'forwarded'")?
        .exists([])?;
    if !has_column {
        conn.execute(
            "ALTER TABLE profiling_records ADD COLUMN forwarded INTEGER NOT NULL DEFAULT 1",
            [],
        )?;
    }
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_records_forwarded_id
             ON profiling_records (forwarded, id)",
        [],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn).unwrap();
        run_migrations(&mut conn).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn new_rows_default_to_unforwarded_via_explicit_insert() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn).unwrap();
        conn.execute(
            "INSERT INTO profiling_records
                 (correlation_id, project, source, timestamp, duration_ms, payload, created_at, forwarded)
             VALUES ('c1', 'p', 'app_agent', 1.0, NULL, '{}', 1, 0)",
            [],
        )
        .unwrap();
        let forwarded: i64 = conn
            .query_row(
                "SELECT forwarded FROM profiling_records WHERE correlation_id = 'c1'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(forwarded, 0);
    }
}
