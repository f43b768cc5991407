//! Embedded relational store (§4.6): single file, write-ahead logging, one
//! writer connection behind a lock, and a fresh read-only connection per
//! query so concurrent readers never block each other or the writer.

pub mod queries;
pub mod retention;
pub mod schema;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusqlite::Connection;
use tokio::sync::Mutex;

pub use queries::{
    CompareResult, CorrelationBundle, NewRecord, ProjectStats, SearchFilter, SearchPage, UrlStats,
};

#[derive(Clone)]
pub struct Storage {
    db_path: PathBuf,
    writer: Arc<Mutex<Connection>>,
}

impl Storage {
    /// Open (creating if absent) the store at `db_path`, apply pragmas, and
    /// run every pending migration.
    pub fn open(db_path: &str) -> anyhow::Result<Self> {
        let path = PathBuf::from(db_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut conn = Connection::open(&path)?;
        schema::apply_pragmas(&conn)?;
        schema::run_migrations(&mut conn)?;

        Ok(Self {
            db_path: path,
            writer: Arc::new(Mutex::new(conn)),
        })
    }

    /// Whether the store opened successfully — for the `/ready` gate (§4.5).
    #[must_use]
    pub fn is_open(&self) -> bool {
        true
    }

    fn open_reader(&self) -> rusqlite::Result<Connection> {
        let conn = Connection::open(&self.db_path)?;
        schema::apply_pragmas(&conn)?;
        Ok(conn)
    }

    pub async fn insert_record(&self, record: NewRecord) -> anyhow::Result<i64> {
        let writer = self.writer.clone();
        let id = tokio::task::spawn_blocking(move || {
            let conn = writer.blocking_lock();
            queries::insert_record(&conn, &record)
        })
        .await??;
        Ok(id)
    }

    pub async fn search(&self, filter: SearchFilter) -> anyhow::Result<SearchPage> {
        self.with_reader(move |conn| queries::search_records(conn, &filter))
            .await
    }

    pub async fn distinct_projects(&self) -> anyhow::Result<Vec<String>> {
        self.with_reader(queries::distinct_projects).await
    }

    pub async fn project_stats(&self, project: String) -> anyhow::Result<ProjectStats> {
        self.with_reader(move |conn| queries::project_stats(conn, &project))
            .await
    }

    pub async fn url_stats(&self, project: String, url: String) -> anyhow::Result<UrlStats> {
        self.with_reader(move |conn| queries::url_stats(conn, &project, &url))
            .await
    }

    pub async fn compare(&self, correlation_id: String) -> anyhow::Result<Option<CompareResult>> {
        self.with_reader(move |conn| queries::compare_record(conn, &correlation_id))
            .await
    }

    pub async fn correlation_bundle(
        &self,
        correlation_id: String,
    ) -> anyhow::Result<Option<CorrelationBundle>> {
        self.with_reader(move |conn| queries::correlation_bundle(conn, &correlation_id))
            .await
    }

    pub async fn fetch_unforwarded_batch(
        &self,
        limit: i64,
    ) -> anyhow::Result<Vec<apm_common::model::ProfilingRecord>> {
        self.with_reader(move |conn| queries::fetch_unforwarded_batch(conn, limit))
            .await
    }

    pub async fn mark_forwarded(&self, id: i64) -> anyhow::Result<()> {
        let writer = self.writer.clone();
        tokio::task::spawn_blocking(move || {
            let conn = writer.blocking_lock();
            queries::mark_forwarded(&conn, id)
        })
        .await??;
        Ok(())
    }

    pub fn writer_handle(&self) -> Arc<Mutex<Connection>> {
        self.writer.clone()
    }

    async fn with_reader<T, F>(&self, f: F) -> anyhow::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let path = self.db_path.clone();
        let result = tokio::task::spawn_blocking(move || -> rusqlite::Result<T> {
            let conn = Connection::open(&path)?;
            schema::apply_pragmas(&conn)?;
            f(&conn)
        })
        .await??;
        Ok(result)
    }
}

/// Used only by callers that already hold a `Path` and want a scratch
/// read-only connection without going through `Storage` (tests, tooling).
pub fn open_readonly(path: &Path) -> rusqlite::Result<Connection> {
    Connection::open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use apm_common::model::RecordSource;

    #[tokio::test]
    async fn open_runs_migrations_and_accepts_inserts() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.sqlite");
        let storage = Storage::open(db_path.to_str().unwrap()).unwrap();

        let id = storage
            .insert_record(NewRecord {
                correlation_id: "c1".into(),
                project: "p".into(),
                source: RecordSource::AppAgent,
                timestamp: 1.0,
                duration_ms: Some(12.0),
                payload: "{}".into(),
                created_at: 1,
                url: Some("/x".into()),
                http_method: Some("GET".into()),
                status_code: Some(200),
            })
            .await
            .unwrap();
        assert!(id > 0);

        let projects = storage.distinct_projects().await.unwrap();
        assert_eq!(projects, vec!["p".to_string()]);
    }
}
