//! Single state-owning worker (§9 redesign note: "in a target with
//! threads, preserve the invariants by running all state-mutating
//! operations on a single worker with a message queue"). Every other
//! component — the receiver, the forwarder tick, the health endpoint —
//! talks to this actor over a channel; nothing else touches the queue,
//! spill directory, or breaker state directly.

use std::path::PathBuf;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use apm_common::breaker::{BreakerConfig, BreakerState, CircuitBreaker};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::config::Config;
use crate::lifecycle::{LifecycleAction, LifecyclePolicy};
use crate::queue::MemoryQueue;
use crate::spill;

/// Snapshot returned to the health endpoint (§4.4).
#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthSnapshot {
    pub uptime_secs: u64,
    pub queue_depth: usize,
    pub spill_file_count: usize,
    pub breaker_state: BreakerState,
    pub last_failure_time: Option<i64>,
}

pub enum Command {
    /// Admit one received record into the memory queue.
    Admit(Value),
    /// Drain up to `max` records for the forwarder to attempt, gated by
    /// the breaker.
    DrainForForward {
        max: usize,
        reply: oneshot::Sender<DrainOutcome>,
    },
    /// Return records the forwarder could not deliver to the front of the
    /// queue, and report the send outcome to the breaker.
    ReportForwardResult {
        undelivered: Vec<Value>,
        all_succeeded: bool,
        reply: oneshot::Sender<()>,
    },
    Health(oneshot::Sender<HealthSnapshot>),
    /// Flush the memory queue to disk and stop accepting further admission
    /// (graceful shutdown, or a lifecycle-triggered restart).
    Shutdown(oneshot::Sender<()>),
}

/// Outcome of a drain request: either a batch to send, or `None` because
/// the breaker currently forbids the attempt.
pub enum DrainOutcome {
    Batch(Vec<Value>),
    BreakerOpen,
}

pub struct Actor {
    config: Config,
    queue: MemoryQueue,
    breaker: CircuitBreaker,
    lifecycle: LifecyclePolicy,
    started_at: Instant,
    buffer_dir: PathBuf,
    breaker_path: PathBuf,
}

impl Actor {
    #[must_use]
    pub fn new(config: Config) -> Self {
        let buffer_dir = PathBuf::from(&config.buffer_path);
        let breaker_path = config.breaker_state_path();
        let breaker_config = BreakerConfig {
            failure_threshold: config.failure_threshold,
            failure_percentage: None,
            min_volume: 1,
            retry_timeout_secs: config.retry_timeout_secs,
        };
        let breaker = CircuitBreaker::load_or_new(&breaker_path, breaker_config);
        let queue = MemoryQueue::new(config.mem_limit);
        let lifecycle = LifecyclePolicy::new(&config);
        Self {
            config,
            queue,
            breaker,
            lifecycle,
            started_at: Instant::now(),
            buffer_dir,
            breaker_path,
        }
    }

    /// Replay any spill files left from a previous run before accepting
    /// new traffic (§4.4, §8 property 11: replay preserves arrival order).
    pub fn replay_spills(&mut self) {
        let records = spill::replay_all(&self.buffer_dir);
        let overflow = self.queue.admit_replayed(records);
        if !overflow.is_empty() {
            self.spill_now(overflow);
        }
    }

    /// Run the command loop until a `Shutdown` command is processed.
    pub async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        while let Some(command) = commands.recv().await {
            match command {
                Command::Admit(record) => self.handle_admit(record),
                Command::DrainForForward { max, reply } => {
                    let _ = reply.send(self.handle_drain(max));
                }
                Command::ReportForwardResult {
                    undelivered,
                    all_succeeded,
                    reply,
                } => {
                    self.handle_forward_result(undelivered, all_succeeded);
                    let _ = reply.send(());
                }
                Command::Health(reply) => {
                    let _ = reply.send(self.health_snapshot());
                }
                Command::Shutdown(reply) => {
                    self.handle_shutdown();
                    let _ = reply.send(());
                    break;
                }
            }
        }
    }

    fn handle_admit(&mut self, record: Value) {
        if self.queue.is_full() {
            let drained = self.queue.drain_all();
            self.spill_now(drained);
        }
        self.queue.push(record);

        match self.lifecycle.record_admission() {
            LifecycleAction::Continue => {}
            LifecycleAction::ForceGc => {
                tracing::debug!(received = self.lifecycle.received(), "forced GC pass");
            }
            LifecycleAction::Restart => {
                tracing::warn!(
                    received = self.lifecycle.received(),
                    "lifecycle limit reached, spilling and exiting for supervisor restart"
                );
                let drained = self.queue.drain_all();
                self.spill_now(drained);
                std::process::exit(0);
            }
        }
    }

    fn handle_drain(&mut self, max: usize) -> DrainOutcome {
        let now = now_secs();
        if !self.breaker.allow(now) {
            return DrainOutcome::BreakerOpen;
        }
        DrainOutcome::Batch(self.queue.drain_up_to(max))
    }

    fn handle_forward_result(&mut self, undelivered: Vec<Value>, all_succeeded: bool) {
        let now = now_secs();
        if all_succeeded {
            self.breaker.record_success(now);
        } else {
            self.breaker.record_failure(now);
        }
        if !undelivered.is_empty() {
            self.queue.requeue_front(undelivered);
        }
        if let Err(e) = self.breaker.save(&self.breaker_path) {
            tracing::warn!(error = %e, "failed to persist breaker state");
        }
    }

    fn handle_shutdown(&mut self) {
        let drained = self.queue.drain_all();
        if !drained.is_empty() {
            self.spill_now(drained);
        }
    }

    fn spill_now(&self, records: Vec<Value>) {
        if records.is_empty() {
            return;
        }
        if let Err(e) = spill::write(&self.buffer_dir, &records) {
            tracing::error!(error = %e, count = records.len(), "failed to spill records to disk");
        }
    }

    fn health_snapshot(&self) -> HealthSnapshot {
        let snapshot = self.breaker.snapshot();
        HealthSnapshot {
            uptime_secs: self.started_at.elapsed().as_secs(),
            queue_depth: self.queue.len(),
            spill_file_count: spill::count(&self.buffer_dir),
            breaker_state: snapshot.state,
            last_failure_time: snapshot.last_failure_time,
        }
    }
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_config(dir: &std::path::Path) -> Config {
        Config {
            buffer_path: dir.to_string_lossy().into_owned(),
            mem_limit: 2,
            ..Config::default_for_test()
        }
    }

    #[tokio::test]
    async fn admission_at_capacity_triggers_exactly_one_spill() {
        let dir = tempfile::tempdir().unwrap();
        let mut actor = Actor::new(test_config(dir.path()));
        actor.handle_admit(json!(1));
        actor.handle_admit(json!(2));
        assert_eq!(spill::count(dir.path()), 0);
        actor.handle_admit(json!(3));
        assert_eq!(spill::count(dir.path()), 1);
    }

    #[tokio::test]
    async fn drain_respects_breaker_open_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut actor = Actor::new(test_config(dir.path()));
        actor.handle_admit(json!(1));
        for _ in 0..actor.config.failure_threshold {
            actor.handle_forward_result(vec![], false);
        }
        match actor.handle_drain(10) {
            DrainOutcome::BreakerOpen => {}
            DrainOutcome::Batch(_) => panic!("expected breaker to be open"),
        }
    }

    #[tokio::test]
    async fn shutdown_spills_remaining_queue() {
        let dir = tempfile::tempdir().unwrap();
        let mut actor = Actor::new(test_config(dir.path()));
        actor.handle_admit(json!(1));
        actor.handle_shutdown();
        assert_eq!(spill::count(dir.path()), 1);
    }
}
