//! Prepared-statement query and insert helpers (§4.6, §4.8). All reads and
//! writes go through `rusqlite`'s parameter binding — never through string
//! interpolation.

use apm_common::model::{ProfilingRecord, RecordSource};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

/// Parameters for a new row insert. `forwarded` is always written as 0 for
/// fresh ingest regardless of the column's migration-time default (§4.6).
/// Owns its strings so a record can be built on a request-handling task and
/// moved into a `spawn_blocking` closure without fighting lifetimes.
#[derive(Clone)]
pub struct NewRecord {
    pub correlation_id: String,
    pub project: String,
    pub source: RecordSource,
    pub timestamp: f64,
    pub duration_ms: Option<f64>,
    pub payload: String,
    pub created_at: i64,
    pub url: Option<String>,
    pub http_method: Option<String>,
    pub status_code: Option<i64>,
}

pub fn insert_record(conn: &Connection, record: &NewRecord) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO profiling_records
             (correlation_id, project, source, timestamp, duration_ms, payload,
              created_at, forwarded, url, http_method, status_code)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8, ?9, ?10)",
        params![
            record.correlation_id,
            record.project,
            record.source.as_str(),
            record.timestamp,
            record.duration_ms,
            record.payload,
            record.created_at,
            record.url,
            record.http_method,
            record.status_code,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProfilingRecord> {
    let source: String = row.get("source")?;
    Ok(ProfilingRecord {
        id: row.get("id")?,
        correlation_id: row.get("correlation_id")?,
        project: row.get("project")?,
        source: source.parse().unwrap_or(RecordSource::AppAgent),
        timestamp: row.get("timestamp")?,
        duration_ms: row.get("duration_ms")?,
        payload: row.get("payload")?,
        created_at: row.get("created_at")?,
        forwarded: row.get("forwarded")?,
    })
}

/// Filters accepted by `GET /api/search` (§4.8). `after` is the cursor —
/// the `timestamp` of the last row returned by the previous page.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub project: Option<String>,
    pub source: Option<String>,
    pub correlation_id: Option<String>,
    pub url: Option<String>,
    pub duration_min: Option<f64>,
    pub duration_max: Option<f64>,
    pub timestamp_start: Option<f64>,
    pub timestamp_end: Option<f64>,
    pub after: Option<f64>,
    pub limit: i64,
}

pub struct SearchPage {
    pub records: Vec<ProfilingRecord>,
    pub has_more: bool,
    pub cursor: Option<f64>,
}

/// Cursor-paginated search, ordered `timestamp DESC`. Fetches `limit + 1`
/// rows to determine `has_more` without a second query. Offset pagination
/// is never used (§4.8 invariant).
pub fn search_records(conn: &Connection, filter: &SearchFilter) -> rusqlite::Result<SearchPage> {
    let fetch = filter.limit + 1;
    let pattern = filter.url.as_ref().map(|u| escape_like_pattern(u));

    let mut stmt = conn.prepare(
        "SELECT id, correlation_id, project, source, timestamp, duration_ms, payload,
                created_at, forwarded
         FROM profiling_records
         WHERE (?1 IS NULL OR project = ?1)
           AND (?2 IS NULL OR source = ?2)
           AND (?3 IS NULL OR correlation_id = ?3)
           AND (?4 IS NULL OR url LIKE '%' || ?4 || '%' ESCAPE '\\')
           AND (?5 IS NULL OR duration_ms >= ?5)
           AND (?6 IS NULL OR duration_ms <= ?6)
           AND (?7 IS NULL OR timestamp >= ?7)
           AND (?8 IS NULL OR timestamp <= ?8)
           AND (?9 IS NULL OR timestamp < ?9)
         ORDER BY timestamp DESC
         LIMIT ?10",
    )?;
    let mut rows = stmt.query(params![
        filter.project,
        filter.source,
        filter.correlation_id,
        pattern,
        filter.duration_min,
        filter.duration_max,
        filter.timestamp_start,
        filter.timestamp_end,
        filter.after,
        fetch,
    ])?;

    let mut records = Vec::new();
    while let Some(row) = rows.next()? {
        records.push(row_to_record(row)?);
    }

    let has_more = records.len() as i64 > filter.limit;
    if has_more {
        records.truncate(filter.limit as usize);
    }
    let cursor = records.last().map(|r| r.timestamp);

    Ok(SearchPage {
        records,
        has_more,
        cursor,
    })
}

pub fn distinct_projects(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT DISTINCT project FROM profiling_records ORDER BY project ASC")?;
    let rows = stmt.query_map([], |row| row.get(0))?;
    rows.collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectStats {
    pub total_records: i64,
    pub app_count: i64,
    pub db_count: i64,
    pub min_timestamp: Option<f64>,
    pub max_timestamp: Option<f64>,
    pub avg_duration_ms: Option<f64>,
}

pub fn project_stats(conn: &Connection, project: &str) -> rusqlite::Result<ProjectStats> {
    conn.query_row(
        "SELECT
             COUNT(*),
             COUNT(*) FILTER (WHERE source = 'app_agent'),
             COUNT(*) FILTER (WHERE source = 'db_agent'),
             MIN(timestamp),
             MAX(timestamp),
             AVG(duration_ms)
         FROM profiling_records
         WHERE project = ?1",
        [project],
        |row| {
            Ok(ProjectStats {
                total_records: row.get(0)?,
                app_count: row.get(1)?,
                db_count: row.get(2)?,
                min_timestamp: row.get(3)?,
                max_timestamp: row.get(4)?,
                avg_duration_ms: row.get(5)?,
            })
        },
    )
}

#[derive(Debug, Clone, Serialize)]
pub struct UrlStats {
    pub count: i64,
    pub avg_duration_ms: Option<f64>,
    pub min_duration_ms: Option<f64>,
    pub max_duration_ms: Option<f64>,
    pub p50: Option<f64>,
    pub p95: Option<f64>,
    pub p99: Option<f64>,
}

/// URL-specific stats with percentiles computed via `LIMIT/OFFSET` over a
/// sorted scan rather than a built-in percentile aggregate (§4.8: portable
/// across SQLite builds that lack `PERCENTILE_CONT`).
pub fn url_stats(conn: &Connection, project: &str, url: &str) -> rusqlite::Result<UrlStats> {
    let (count, avg, min, max): (i64, Option<f64>, Option<f64>, Option<f64>) = conn.query_row(
        "SELECT COUNT(*), AVG(duration_ms), MIN(duration_ms), MAX(duration_ms)
         FROM profiling_records
         WHERE project = ?1 AND url = ?2 AND duration_ms IS NOT NULL",
        params![project, url],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
    )?;

    let percentile = |p: f64| -> rusqlite::Result<Option<f64>> {
        if count == 0 {
            return Ok(None);
        }
        let offset = ((count as f64) * p).floor() as i64;
        let offset = offset.clamp(0, count - 1);
        conn.query_row(
            "SELECT duration_ms FROM profiling_records
             WHERE project = ?1 AND url = ?2 AND duration_ms IS NOT NULL
             ORDER BY duration_ms ASC LIMIT 1 OFFSET ?3",
            params![project, url, offset],
            |row| row.get(0),
        )
        .optional()
    };

    Ok(UrlStats {
        count,
        avg_duration_ms: avg,
        min_duration_ms: min,
        max_duration_ms: max,
        p50: percentile(0.50)?,
        p95: percentile(0.95)?,
        p99: percentile(0.99)?,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct CompareResult {
    pub record: ProfilingRecordView,
    pub average_duration_ms: f64,
    pub percentile_rank: i64,
    pub faster_than_percent: i64,
    pub sample_size: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProfilingRecordView {
    pub id: i64,
    pub correlation_id: String,
    pub project: String,
    pub url: Option<String>,
    pub duration_ms: Option<f64>,
    pub timestamp: f64,
}

/// `GET /api/compare` (§4.8): percentile rank of one request among all
/// requests for the same URL.
pub fn compare_record(conn: &Connection, correlation_id: &str) -> rusqlite::Result<Option<CompareResult>> {
    let target = conn
        .query_row(
            "SELECT id, correlation_id, project, url, duration_ms, timestamp
             FROM profiling_records WHERE correlation_id = ?1 AND duration_ms IS NOT NULL
             ORDER BY id ASC LIMIT 1",
            [correlation_id],
            |row| {
                Ok(ProfilingRecordView {
                    id: row.get(0)?,
                    correlation_id: row.get(1)?,
                    project: row.get(2)?,
                    url: row.get(3)?,
                    duration_ms: row.get(4)?,
                    timestamp: row.get(5)?,
                })
            },
        )
        .optional()?;

    let Some(target) = target else {
        return Ok(None);
    };
    let Some(url) = target.url.clone() else {
        return Ok(None);
    };
    let duration = target.duration_ms.unwrap_or(0.0);

    let (total, slower, avg): (i64, i64, f64) = conn.query_row(
        "SELECT
             COUNT(*),
             COUNT(*) FILTER (WHERE duration_ms > ?3),
             COALESCE(AVG(duration_ms), 0.0)
         FROM profiling_records
         WHERE project = ?1 AND url = ?2 AND duration_ms IS NOT NULL",
        params![target.project, url, duration],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )?;

    if total == 0 {
        return Ok(None);
    }
    let rank = ((slower as f64 / total as f64) * 100.0).round() as i64;

    Ok(Some(CompareResult {
        record: target,
        average_duration_ms: avg,
        percentile_rank: rank,
        faster_than_percent: 100 - rank,
        sample_size: total,
    }))
}

#[derive(Debug, Clone, Serialize)]
pub struct CorrelationSummary {
    pub total_records: i64,
    pub app_count: i64,
    pub db_count: i64,
    pub total_sql_time_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CorrelationBundle {
    pub app_request: Option<ProfilingRecord>,
    pub sql_queries: Vec<ProfilingRecord>,
    pub other_records: Vec<ProfilingRecord>,
    pub summary: CorrelationSummary,
}

/// `GET /api/correlation/:id` (§4.8): every record sharing a correlation
/// id, partitioned by source.
pub fn correlation_bundle(
    conn: &Connection,
    correlation_id: &str,
) -> rusqlite::Result<Option<CorrelationBundle>> {
    let mut stmt = conn.prepare(
        "SELECT id, correlation_id, project, source, timestamp, duration_ms, payload,
                created_at, forwarded
         FROM profiling_records WHERE correlation_id = ?1 ORDER BY id ASC",
    )?;
    let mut rows = stmt.query([correlation_id])?;

    let mut app_request = None;
    let mut sql_queries = Vec::new();
    let mut other_records = Vec::new();
    let mut total_sql_time_ms = 0.0;

    while let Some(row) = rows.next()? {
        let record = row_to_record(row)?;
        match record.source {
            RecordSource::AppAgent if app_request.is_none() => app_request = Some(record),
            RecordSource::DbAgent => {
                if let Ok(value) = serde_json::from_str::<serde_json::Value>(&record.payload) {
                    if let Some(ms) = value.get("duration_ms").and_then(serde_json::Value::as_f64)
                    {
                        total_sql_time_ms += ms;
                    }
                }
                sql_queries.push(record);
            }
            _ => other_records.push(record),
        }
    }

    let total_records = (usize::from(app_request.is_some()) + sql_queries.len() + other_records.len()) as i64;
    if total_records == 0 {
        return Ok(None);
    }

    Ok(Some(CorrelationBundle {
        summary: CorrelationSummary {
            total_records,
            app_count: i64::from(app_request.is_some()),
            db_count: sql_queries.len() as i64,
            total_sql_time_ms,
        },
        app_request,
        sql_queries,
        other_records,
    }))
}

/// Fetch up to `limit` un-forwarded rows in ascending `id` order, for the
/// shipper's recovery replay (§4.7, strictly ascending).
pub fn fetch_unforwarded_batch(conn: &Connection, limit: i64) -> rusqlite::Result<Vec<ProfilingRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, correlation_id, project, source, timestamp, duration_ms, payload,
                created_at, forwarded
         FROM profiling_records
         WHERE forwarded = 0
         ORDER BY id ASC
         LIMIT ?1",
    )?;
    let rows = stmt.query_map([limit], row_to_record)?;
    rows.collect()
}

pub fn mark_forwarded(conn: &Connection, id: i64) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE profiling_records SET forwarded = 1 WHERE id = ?1",
        [id],
    )?;
    Ok(())
}

fn escape_like_pattern(input: &str) -> String {
    input
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::schema;

    fn test_conn() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        schema::run_migrations(&mut conn).unwrap();
        conn
    }

    fn insert(conn: &Connection, correlation_id: &str, project: &str, ts: f64, duration: Option<f64>, url: Option<&str>) -> i64 {
        insert_record(
            conn,
            &NewRecord {
                correlation_id: correlation_id.into(),
                project: project.into(),
                source: RecordSource::AppAgent,
                timestamp: ts,
                duration_ms: duration,
                payload: "{}".into(),
                created_at: ts as i64,
                url: url.map(String::from),
                http_method: Some("GET".into()),
                status_code: Some(200),
            },
        )
        .unwrap()
    }

    #[test]
    fn search_orders_by_timestamp_desc_and_flags_has_more() {
        let conn = test_conn();
        for i in 0..5 {
            insert(&conn, &format!("c{i}"), "p", i as f64, Some(1.0), Some("/x"));
        }
        let page = search_records(
            &conn,
            &SearchFilter {
                project: Some("p".into()),
                limit: 3,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(page.records.len(), 3);
        assert!(page.has_more);
        assert_eq!(page.records[0].timestamp, 4.0);
    }

    #[test]
    fn escape_like_pattern_handles_metacharacters() {
        assert_eq!(escape_like_pattern("a%b_c"), "a\\%b\\_c");
    }

    #[test]
    fn url_stats_percentile_matches_manual_offset() {
        let conn = test_conn();
        for i in 1..=10 {
            insert(&conn, &format!("c{i}"), "p", i as f64, Some(i as f64 * 10.0), Some("/slow"));
        }
        let stats = url_stats(&conn, "p", "/slow").unwrap();
        assert_eq!(stats.count, 10);
        // offset = floor(10*0.5)=5, 0-indexed ascending -> 6th smallest = 60.0
        assert_eq!(stats.p50, Some(60.0));
    }

    #[test]
    fn unforwarded_batch_is_ascending_by_id() {
        let conn = test_conn();
        insert(&conn, "c1", "p", 1.0, None, None);
        insert(&conn, "c2", "p", 2.0, None, None);
        let batch = fetch_unforwarded_batch(&conn, 10).unwrap();
        assert_eq!(batch.len(), 2);
        assert!(batch[0].id < batch[1].id);
        mark_forwarded(&conn, batch[0].id).unwrap();
        let remaining = fetch_unforwarded_batch(&conn, 10).unwrap();
        assert_eq!(remaining.len(), 1);
    }

    #[test]
    fn compare_returns_none_when_no_duration() {
        let conn = test_conn();
        insert(&conn, "c1", "p", 1.0, None, Some("/x"));
        assert!(compare_record(&conn, "c1").unwrap().is_none());
    }
}
