//! Replay worker (§4.7): when the breaker is closed, stream records with
//! `forwarded = 0` in ascending `id` order and send each through the same
//! breaker-guarded path the ingest-time forward uses.

use std::sync::Arc;
use std::time::Duration;

use super::sender::Shipper;

const BATCH_SIZE: i64 = 100;
const CHECK_INTERVAL: Duration = Duration::from_secs(30);
const INTER_BATCH_DELAY: Duration = Duration::from_millis(100);

pub fn spawn_replay_worker(shipper: Arc<Shipper>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CHECK_INTERVAL);
        loop {
            interval.tick().await;
            if !shipper.enabled() {
                continue;
            }
            if shipper.breaker_is_closed().await {
                replay_once(&shipper).await;
            }
        }
    })
}

/// Drain unforwarded records in batches of 100 until the backlog is empty or
/// a send fails (breaker opened mid-batch), in which case stop cleanly and
/// wait for the next recovery window.
async fn replay_once(shipper: &Arc<Shipper>) {
    loop {
        let batch = match shipper.storage().fetch_unforwarded_batch(BATCH_SIZE).await {
            Ok(batch) => batch,
            Err(error) => {
                tracing::warn!(%error, "replay worker failed to read unforwarded batch");
                return;
            }
        };
        if batch.is_empty() {
            return;
        }

        let batch_len = batch.len();
        for record in &batch {
            if let Err(error) = shipper.send_and_mark(record).await {
                tracing::warn!(id = record.id, %error, "replay send failed, stopping batch");
                return;
            }
        }

        if (batch_len as i64) < BATCH_SIZE {
            return;
        }
        tokio::time::sleep(INTER_BATCH_DELAY).await;
    }
}
