//! Periodic forward tick (§4.4): drain a batch from the actor, POST each
//! record to the central server, and report the outcome back so the
//! breaker and the queue stay consistent with what was actually sent.

use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::actor::{Command, DrainOutcome};
use crate::config::Config;

/// Run the forward loop forever, waking up every `flush_interval_secs`.
pub async fn run(config: Config, commands: mpsc::Sender<Command>) {
    let client = match reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(2))
        .timeout(Duration::from_secs(5))
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            tracing::error!(error = %e, "failed to build forwarder HTTP client");
            return;
        }
    };

    let mut interval = tokio::time::interval(Duration::from_secs(config.flush_interval_secs));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    interval.tick().await;

    loop {
        interval.tick().await;
        if let Err(e) = flush_once(&client, &config, &commands).await {
            tracing::warn!(error = %e, "forward tick failed");
        }
    }
}

async fn flush_once(
    client: &reqwest::Client,
    config: &Config,
    commands: &mpsc::Sender<Command>,
) -> anyhow::Result<()> {
    let (reply_tx, reply_rx) = oneshot::channel();
    commands
        .send(Command::DrainForForward {
            max: config.flush_batch_size,
            reply: reply_tx,
        })
        .await?;

    let batch = match reply_rx.await? {
        DrainOutcome::BreakerOpen => return Ok(()),
        DrainOutcome::Batch(batch) => batch,
    };
    if batch.is_empty() {
        return Ok(());
    }

    let (undelivered, all_succeeded) = send_batch(client, config, batch).await;

    let (report_tx, report_rx) = oneshot::channel();
    commands
        .send(Command::ReportForwardResult {
            undelivered,
            all_succeeded,
            reply: report_tx,
        })
        .await?;
    report_rx.await?;
    Ok(())
}

/// Send every record in `batch` individually, so a single malformed record
/// cannot block the rest. Returns the records that must be requeued and
/// whether every send in the batch succeeded (breaker input).
async fn send_batch(
    client: &reqwest::Client,
    config: &Config,
    batch: Vec<Value>,
) -> (Vec<Value>, bool) {
    let url = format!("{}/ingest/app", config.central_url.trim_end_matches('/'));
    let mut undelivered = Vec::new();
    let mut all_succeeded = true;

    for record in batch {
        match client
            .post(&url)
            .bearer_auth(&config.api_key)
            .json(&record)
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => {}
            Ok(resp) => {
                tracing::warn!(status = %resp.status(), "central server rejected record");
                all_succeeded = false;
                undelivered.push(record);
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to reach central server");
                all_succeeded = false;
                undelivered.push(record);
            }
        }
    }

    (undelivered, all_succeeded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_batch_is_a_noop() {
        let (undelivered, all_succeeded) = send_batch(
            &reqwest::Client::new(),
            &Config {
                central_url: "http://127.0.0.1:1".into(),
                ..Config::default_for_test()
            },
            vec![],
        )
        .await;
        assert!(undelivered.is_empty());
        assert!(all_succeeded);
    }

    #[tokio::test]
    async fn unreachable_server_marks_every_record_undelivered() {
        let (undelivered, all_succeeded) = send_batch(
            &reqwest::Client::new(),
            &Config {
                central_url: "http://127.0.0.1:1".into(),
                ..Config::default_for_test()
            },
            vec![serde_json::json!({"a": 1}), serde_json::json!({"a": 2})],
        )
        .await;
        assert_eq!(undelivered.len(), 2);
        assert!(!all_succeeded);
    }
}
