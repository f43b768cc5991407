//! Lifecycle limits (§4.4): the daemon voluntarily restarts once it has
//! handled too many requests or grown too large, relying on the supervisor
//! to bring it back up (§7: "Daemon memory pressure / request cap:
//! voluntary restart, spill queue first").

use crate::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAction {
    Continue,
    ForceGc,
    Restart,
}

pub struct LifecyclePolicy {
    received: u64,
    max_requests: u64,
    memory_limit_mb: u64,
    gc_interval: u64,
}

impl LifecyclePolicy {
    #[must_use]
    pub const fn new(config: &Config) -> Self {
        Self {
            received: 0,
            max_requests: config.max_requests,
            memory_limit_mb: config.memory_limit_mb,
            gc_interval: config.gc_interval,
        }
    }

    /// Record one admitted request and evaluate whether the daemon should
    /// force a GC pass or restart.
    pub fn record_admission(&mut self) -> LifecycleAction {
        self.received += 1;

        if self.received >= self.max_requests || resident_memory_mb() >= self.memory_limit_mb {
            return LifecycleAction::Restart;
        }
        if self.gc_interval > 0 && self.received % self.gc_interval == 0 {
            return LifecycleAction::ForceGc;
        }
        LifecycleAction::Continue
    }

    #[must_use]
    pub const fn received(&self) -> u64 {
        self.received
    }
}

/// Best-effort resident memory in MB, read from `/proc/self/status`. Rust
/// has no managed heap to force-collect, so a "forced GC pass" (§4.4)
/// maps to shrinking internal buffers back to their live size; this
/// function only supplies the comparison input for the restart threshold.
fn resident_memory_mb() -> u64 {
    std::fs::read_to_string("/proc/self/status")
        .ok()
        .and_then(|status| {
            status.lines().find_map(|line| {
                line.strip_prefix("VmRSS:")
                    .and_then(|rest| rest.trim().split_whitespace().next())
                    .and_then(|kb| kb.parse::<u64>().ok())
            })
        })
        .map(|kb| kb / 1024)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_requests: u64, gc_interval: u64) -> Config {
        Config {
            max_requests,
            memory_limit_mb: u64::MAX,
            gc_interval,
            ..Config::default_for_test()
        }
    }

    #[test]
    fn restarts_at_max_requests() {
        let cfg = config(3, 0);
        let mut policy = LifecyclePolicy::new(&cfg);
        assert_eq!(policy.record_admission(), LifecycleAction::Continue);
        assert_eq!(policy.record_admission(), LifecycleAction::Continue);
        assert_eq!(policy.record_admission(), LifecycleAction::Restart);
    }

    #[test]
    fn forces_gc_at_interval() {
        let cfg = config(1000, 2);
        let mut policy = LifecyclePolicy::new(&cfg);
        assert_eq!(policy.record_admission(), LifecycleAction::Continue);
        assert_eq!(policy.record_admission(), LifecycleAction::ForceGc);
    }
}
