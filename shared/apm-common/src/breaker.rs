//! Circuit breaker state machine shared by the host daemon's forwarder
//! (§4.4) and the central server's log-aggregator shipper (§4.7).
//!
//! Both callers need identical closed/open/half-open semantics and
//! persisted-state behavior (§5, testable property 10); only the trip
//! condition differs — the daemon trips on a consecutive-failure count, the
//! shipper trips on an error percentage over a minimum volume. Both shapes
//! are expressed through [`BreakerConfig`].

use std::collections::VecDeque;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Breaker lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Trip condition and timing parameters for one breaker instance.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive-failure count that trips the breaker (daemon mode).
    /// Ignored when `failure_percentage` is set.
    pub failure_threshold: u32,
    /// When set, the breaker trips on the rolling failure percentage over
    /// `min_volume` observations instead of a consecutive count (shipper
    /// mode, §4.7: "50% failures over 5 requests").
    pub failure_percentage: Option<f64>,
    /// Minimum observations in the rolling window before the percentage
    /// trip condition can fire.
    pub min_volume: usize,
    /// Seconds to wait after opening before allowing a half-open probe.
    pub retry_timeout_secs: i64,
}

impl BreakerConfig {
    /// Daemon-to-central defaults (§4.4): 5 consecutive failures, 60s reset.
    #[must_use]
    pub const fn daemon_defaults() -> Self {
        Self {
            failure_threshold: 5,
            failure_percentage: None,
            min_volume: 1,
            retry_timeout_secs: 60,
        }
    }

    /// Central-to-aggregator defaults (§4.7): 50% failures over 5 requests,
    /// 60s reset.
    #[must_use]
    pub const fn shipper_defaults() -> Self {
        Self {
            failure_threshold: 1,
            failure_percentage: Some(0.5),
            min_volume: 5,
            retry_timeout_secs: 60,
        }
    }
}

/// On-disk / wire representation of breaker state (§6 persisted state).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub failure_count: u32,
    pub last_failure_time: Option<i64>,
    pub opened_at: Option<i64>,
}

/// A circuit breaker instance. Not internally synchronized — each caller
/// (the daemon's single-threaded loop, the shipper's single background
/// task) owns exclusive access to its instance.
pub struct CircuitBreaker {
    config: BreakerConfig,
    state: BreakerState,
    consecutive_failures: u32,
    last_failure_time: Option<i64>,
    opened_at: Option<i64>,
    /// Rolling outcomes for percentage-mode trip evaluation; `true` = failure.
    window: VecDeque<bool>,
    /// Set while a half-open probe is outstanding so concurrent callers
    /// don't all attempt a probe at once.
    probe_in_flight: bool,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: BreakerState::Closed,
            consecutive_failures: 0,
            last_failure_time: None,
            opened_at: None,
            window: VecDeque::new(),
            probe_in_flight: false,
        }
    }

    /// Load persisted state from `path` if present, otherwise start fresh.
    /// A corrupt state file is logged by the caller and treated as absent.
    pub fn load_or_new(path: &Path, config: BreakerConfig) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<BreakerSnapshot>(&contents) {
                Ok(snapshot) => {
                    let mut breaker = Self::new(config);
                    breaker.state = snapshot.state;
                    breaker.consecutive_failures = snapshot.failure_count;
                    breaker.last_failure_time = snapshot.last_failure_time;
                    breaker.opened_at = snapshot.opened_at;
                    breaker
                }
                Err(_) => Self::new(config),
            },
            Err(_) => Self::new(config),
        }
    }

    /// Persist current state to `path` with temp-write + atomic rename.
    pub fn save(&self, path: &Path) -> Result<()> {
        let snapshot = self.snapshot();
        let body = serde_json::to_vec(&snapshot)?;
        let tmp_path = path.with_extension("tmp");
        std::fs::write(&tmp_path, body)?;
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }

    #[must_use]
    pub fn snapshot(&self) -> BreakerSnapshot {
        BreakerSnapshot {
            state: self.state,
            failure_count: self.consecutive_failures,
            last_failure_time: self.last_failure_time,
            opened_at: self.opened_at,
        }
    }

    #[must_use]
    pub const fn state(&self) -> BreakerState {
        self.state
    }

    /// Evaluate whether a protected call may proceed at time `now`
    /// (seconds since epoch). Transitions open -> half-open when the retry
    /// timeout has elapsed, allowing exactly one concurrent probe through.
    pub fn allow(&mut self, now: i64) -> bool {
        match self.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let opened_at = self.opened_at.unwrap_or(now);
                if now - opened_at > self.config.retry_timeout_secs && !self.probe_in_flight {
                    self.state = BreakerState::HalfOpen;
                    self.probe_in_flight = true;
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => {
                if self.probe_in_flight {
                    false
                } else {
                    self.probe_in_flight = true;
                    true
                }
            }
        }
    }

    /// Record a successful call outcome.
    pub fn record_success(&mut self, now: i64) {
        self.push_outcome(false);
        match self.state {
            BreakerState::Closed => {
                self.consecutive_failures = 0;
            }
            BreakerState::HalfOpen => {
                self.state = BreakerState::Closed;
                self.consecutive_failures = 0;
                self.opened_at = None;
                self.probe_in_flight = false;
                self.window.clear();
            }
            BreakerState::Open => {
                // A success arriving while nominally open (e.g. a racing
                // probe) still closes the breaker.
                self.state = BreakerState::Closed;
                self.consecutive_failures = 0;
                self.opened_at = None;
                self.probe_in_flight = false;
                self.window.clear();
            }
        }
        let _ = now;
    }

    /// Record a failed call outcome, tripping the breaker if the
    /// configured condition is met.
    pub fn record_failure(&mut self, now: i64) {
        self.push_outcome(true);
        self.consecutive_failures += 1;
        self.last_failure_time = Some(now);

        match self.state {
            BreakerState::HalfOpen => {
                self.trip(now);
            }
            BreakerState::Closed => {
                if self.should_trip() {
                    self.trip(now);
                }
            }
            BreakerState::Open => {
                self.trip(now);
            }
        }
    }

    fn trip(&mut self, now: i64) {
        self.state = BreakerState::Open;
        self.opened_at = Some(now);
        self.probe_in_flight = false;
    }

    fn push_outcome(&mut self, failed: bool) {
        if self.config.failure_percentage.is_some() {
            self.window.push_back(failed);
            let cap = self.config.min_volume.max(1) * 4;
            while self.window.len() > cap {
                self.window.pop_front();
            }
        }
    }

    fn should_trip(&self) -> bool {
        match self.config.failure_percentage {
            Some(threshold) => {
                if self.window.len() < self.config.min_volume {
                    return false;
                }
                let failures = self.window.iter().filter(|f| **f).count();
                (failures as f64 / self.window.len() as f64) >= threshold
            }
            None => self.consecutive_failures >= self.config.failure_threshold,
        }
    }
}

/// Load a breaker state file directly into a [`BreakerSnapshot`], surfacing
/// corruption as an error rather than silently resetting (used by callers
/// that want to log the corruption before falling back).
pub fn read_snapshot(path: &Path) -> Result<BreakerSnapshot> {
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents)
        .map_err(|e| Error::BreakerStateCorrupt(format!("{path:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_consecutive_failures() {
        let mut breaker = CircuitBreaker::new(BreakerConfig::daemon_defaults());
        for _ in 0..4 {
            breaker.record_failure(0);
        }
        assert_eq!(breaker.state(), BreakerState::Closed);
        breaker.record_failure(0);
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[test]
    fn half_opens_after_retry_timeout() {
        let mut breaker = CircuitBreaker::new(BreakerConfig::daemon_defaults());
        for _ in 0..5 {
            breaker.record_failure(0);
        }
        assert!(!breaker.allow(30));
        assert!(breaker.allow(61));
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
    }

    #[test]
    fn successful_probe_closes_breaker() {
        let mut breaker = CircuitBreaker::new(BreakerConfig::daemon_defaults());
        for _ in 0..5 {
            breaker.record_failure(0);
        }
        assert!(breaker.allow(61));
        breaker.record_success(61);
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn failed_probe_reopens_and_restamps() {
        let mut breaker = CircuitBreaker::new(BreakerConfig::daemon_defaults());
        for _ in 0..5 {
            breaker.record_failure(0);
        }
        assert!(breaker.allow(61));
        breaker.record_failure(61);
        assert_eq!(breaker.state(), BreakerState::Open);
        assert_eq!(breaker.snapshot().opened_at, Some(61));
    }

    #[test]
    fn percentage_mode_requires_min_volume() {
        let mut breaker = CircuitBreaker::new(BreakerConfig::shipper_defaults());
        breaker.record_failure(0);
        breaker.record_failure(0);
        assert_eq!(breaker.state(), BreakerState::Closed);
        breaker.record_success(0);
        breaker.record_failure(0);
        breaker.record_failure(0);
        // 3 failures / 5 observations = 60% >= 50%
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[test]
    fn persists_and_reloads_open_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("breaker.json");
        let mut breaker = CircuitBreaker::new(BreakerConfig::daemon_defaults());
        for _ in 0..5 {
            breaker.record_failure(100);
        }
        breaker.save(&path).unwrap();

        let reloaded = CircuitBreaker::load_or_new(&path, BreakerConfig::daemon_defaults());
        assert_eq!(reloaded.state(), BreakerState::Open);
        assert_eq!(reloaded.snapshot().opened_at, Some(100));
    }

    #[test]
    fn corrupt_state_file_falls_back_to_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("breaker.json");
        std::fs::write(&path, b"not json").unwrap();
        let breaker = CircuitBreaker::load_or_new(&path, BreakerConfig::daemon_defaults());
        assert_eq!(breaker.state(), BreakerState::Closed);
    }
}
