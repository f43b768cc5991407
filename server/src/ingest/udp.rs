//! UDP ingest (§4.5): unauthenticated, fire-and-forget. Each datagram is a
//! JSON record carrying its own `source` and `project` — the sole place in
//! the pipeline where a payload-supplied `project` is trusted (§9 open
//! question 1: intended for trusted network segments only).

use std::sync::Arc;

use serde::Deserialize;
use tokio::net::UdpSocket;

use apm_common::correlation;
use apm_common::model::RecordSource;

use crate::state::AppState;
use crate::storage::NewRecord;

const MAX_DATAGRAM_BYTES: usize = 64 * 1024;

#[derive(Debug, Deserialize)]
struct UdpRecord {
    correlation_id: Option<String>,
    project: String,
    source: RecordSource,
    timestamp: f64,
    duration_ms: Option<f64>,
    payload: serde_json::Value,
}

/// Bind the auxiliary UDP port and admit datagrams until the socket errors
/// fatally. Malformed or oversized datagrams increment counters via a log
/// line but are never reflected back to the sender (§4.5).
pub async fn run(port: u16, state: AppState) -> anyhow::Result<()> {
    let socket = UdpSocket::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "UDP ingest listening");
    let state = Arc::new(state);
    let mut buf = vec![0u8; MAX_DATAGRAM_BYTES];

    loop {
        let (len, peer) = match socket.recv_from(&mut buf).await {
            Ok(pair) => pair,
            Err(error) => {
                tracing::warn!(%error, "UDP ingest recv failed");
                continue;
            }
        };
        let datagram = buf[..len].to_vec();
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            admit_datagram(&state, &datagram, peer).await;
        });
    }
}

async fn admit_datagram(state: &AppState, datagram: &[u8], peer: std::net::SocketAddr) {
    let record: UdpRecord = match serde_json::from_slice(datagram) {
        Ok(record) => record,
        Err(error) => {
            tracing::warn!(%error, %peer, "dropping malformed UDP ingest datagram");
            return;
        }
    };

    let payload = match serde_json::to_string(&record.payload) {
        Ok(payload) => payload,
        Err(error) => {
            tracing::warn!(%error, %peer, "failed to serialize UDP ingest payload");
            return;
        }
    };

    let url = record
        .payload
        .pointer("/request/uri")
        .and_then(serde_json::Value::as_str)
        .map(str::to_owned);
    let http_method = record
        .payload
        .pointer("/request/method")
        .and_then(serde_json::Value::as_str)
        .map(str::to_owned);
    let status_code = record
        .payload
        .pointer("/response/status")
        .and_then(serde_json::Value::as_i64);

    let new_record = NewRecord {
        correlation_id: record.correlation_id.unwrap_or_else(correlation::new_id),
        project: record.project,
        source: record.source,
        timestamp: record.timestamp,
        duration_ms: record.duration_ms,
        payload,
        created_at: now_secs(),
        url,
        http_method,
        status_code,
    };

    crate::ingest::http::store_and_forward(state, new_record).await;
}

fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
