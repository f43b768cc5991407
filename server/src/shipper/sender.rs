//! Circuit-breaker-guarded GELF sender (§4.7). One long-lived `Shipper`
//! is shared by the ingest handlers (which forward in the background
//! without awaiting completion) and the replay worker.

use std::sync::Arc;
use std::time::Duration;

use apm_common::breaker::{BreakerConfig, BreakerState, CircuitBreaker};
use apm_common::model::ProfilingRecord;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use super::message;
use crate::config::Config;
use crate::storage::Storage;

const SEND_DEADLINE: Duration = Duration::from_secs(5);

pub struct Shipper {
    config: Arc<Config>,
    breaker: Mutex<CircuitBreaker>,
    storage: Storage,
}

impl Shipper {
    #[must_use]
    pub fn new(config: Arc<Config>, storage: Storage) -> Self {
        let breaker = CircuitBreaker::load_or_new(&config.breaker_state_path(), BreakerConfig::shipper_defaults());
        Self {
            config,
            breaker: Mutex::new(breaker),
            storage,
        }
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.config.graylog_enabled
    }

    /// Schedule a forward without awaiting it (§4.7 ingress coupling): the
    /// ingest response must never wait on, or fail because of, shipping.
    pub fn forward_in_background(self: &Arc<Self>, record: ProfilingRecord) {
        if !self.enabled() {
            return;
        }
        let shipper = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(error) = shipper.send_and_mark(&record).await {
                tracing::warn!(id = record.id, %error, "shipper forward failed");
            }
        });
    }

    pub(super) async fn breaker_is_closed(&self) -> bool {
        matches!(self.breaker.lock().await.state(), BreakerState::Closed)
    }

    pub(super) fn storage(&self) -> &Storage {
        &self.storage
    }

    pub(super) async fn send_and_mark(&self, record: &ProfilingRecord) -> anyhow::Result<()> {
        self.send_one(record).await?;
        self.storage.mark_forwarded(record.id).await?;
        Ok(())
    }

    pub(super) async fn send_one(&self, record: &ProfilingRecord) -> anyhow::Result<()> {
        let now = now_secs();
        {
            let mut breaker = self.breaker.lock().await;
            if !breaker.allow(now) {
                anyhow::bail!("circuit breaker open");
            }
        }

        let framed = message::frame(&message::build_message(record))?;
        let result = send_framed(&self.config.graylog_host, self.config.graylog_port, &framed).await;

        let mut breaker = self.breaker.lock().await;
        match &result {
            Ok(()) => breaker.record_success(now),
            Err(_) => breaker.record_failure(now),
        }
        if let Err(e) = breaker.save(&self.config.breaker_state_path()) {
            tracing::warn!(error = %e, "failed to persist shipper breaker state");
        }
        drop(breaker);

        result
    }
}

async fn send_framed(host: &str, port: u16, bytes: &[u8]) -> anyhow::Result<()> {
    tokio::time::timeout(SEND_DEADLINE, async {
        let mut stream = TcpStream::connect((host, port)).await?;
        stream.write_all(bytes).await?;
        stream.flush().await?;
        Ok::<(), anyhow::Error>(())
    })
    .await??;
    Ok(())
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
    use apm_common::model::RecordSource;

    fn record() -> ProfilingRecord {
        ProfilingRecord {
            id: 1,
            correlation_id: "c1".into(),
            project: "p".into(),
            source: RecordSource::AppAgent,
            timestamp: 1.0,
            duration_ms: None,
            payload: "{}".into(),
            created_at: 1,
            forwarded: 0,
        }
    }

    #[tokio::test]
    async fn unreachable_aggregator_trips_the_breaker_after_enough_failures() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("t.sqlite");
        let storage = Storage::open(db_path.to_str().unwrap()).unwrap();
        let mut config = Config::default_for_test();
        config.graylog_enabled = true;
        config.graylog_host = "127.0.0.1".into();
        config.graylog_port = 1; // nothing listens here
        config.state_path = dir.path().to_str().unwrap().to_string();
        let shipper = Shipper::new(Arc::new(config), storage);

        for _ in 0..5 {
            let _ = shipper.send_one(&record()).await;
        }
        assert!(!shipper.breaker_is_closed().await);
    }
}
