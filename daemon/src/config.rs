//! Daemon configuration, environment-driven with the same defaults as the
//! agent's file-based config (§6: "Daemon: environment-driven with same
//! defaults").

use anyhow::{Context, Result};
use std::env;

/// Daemon configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Stream-socket path the receiver binds to.
    pub listener_socket_path: String,
    /// Optional auxiliary datagram path (§9 open question 2).
    pub listener_datagram_path: Option<String>,
    /// Memory-queue capacity before a spill is triggered.
    pub mem_limit: usize,
    /// Directory for spill files and the breaker state file.
    pub buffer_path: String,
    /// Base URL of the central ingestion server, e.g. `http://127.0.0.1:8080`.
    pub central_url: String,
    /// Bearer token presented to the central server.
    pub api_key: String,
    pub flush_interval_secs: u64,
    pub flush_batch_size: usize,
    pub failure_threshold: u32,
    pub retry_timeout_secs: i64,
    pub max_requests: u64,
    pub memory_limit_mb: u64,
    pub gc_interval: u64,
    /// Loopback-only health endpoint port.
    pub health_port: u16,
}

/// Startup flags, overlaid on top of environment variables (§6 CLI
/// surface). Every flag also has an `env` fallback via `clap`'s `env`
/// feature, so a bare `apm-daemond` with no flags behaves exactly like
/// the environment-only configuration below.
#[derive(Debug, clap::Parser)]
#[command(name = "apm-daemond", about = "APM buffering daemon")]
pub struct Cli {
    /// Optional `.env`-style file to load before reading the environment.
    #[arg(long, env = "APM_DAEMON_CONFIG")]
    pub config: Option<std::path::PathBuf>,

    /// Overrides `HEALTH_PORT`.
    #[arg(long, env = "HEALTH_PORT")]
    pub port: Option<u16>,

    /// Overrides `RUST_LOG`/the default filter directive.
    #[arg(long, env = "LOG_LEVEL")]
    pub log_level: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            listener_socket_path: env::var("LISTENER_SOCKET_PATH")
                .unwrap_or_else(|_| "/run/apm/agent.sock".into()),
            listener_datagram_path: env::var("LISTENER_DATAGRAM_PATH").ok(),
            mem_limit: env::var("MEM_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(100),
            buffer_path: env::var("DAEMON_BUFFER_PATH")
                .unwrap_or_else(|_| "/var/lib/apm/buffer".into()),
            central_url: env::var("CENTRAL_URL").context("CENTRAL_URL must be set")?,
            api_key: env::var("API_KEY").context("API_KEY must be set")?,
            flush_interval_secs: env::var("FLUSH_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            flush_batch_size: env::var("FLUSH_BATCH_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(50),
            failure_threshold: env::var("FAILURE_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            retry_timeout_secs: env::var("RETRY_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
            max_requests: env::var("MAX_REQUESTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1000),
            memory_limit_mb: env::var("MEMORY_LIMIT_MB")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(256),
            gc_interval: env::var("GC_INTERVAL")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(500),
            health_port: env::var("HEALTH_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(9090),
        })
    }

    #[must_use]
    pub fn breaker_state_path(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.buffer_path).join("breaker.json")
    }

    /// Apply CLI overrides on top of an environment-derived config.
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(port) = cli.port {
            self.health_port = port;
        }
    }

    #[must_use]
    pub fn default_for_test() -> Self {
        Self {
            listener_socket_path: "/tmp/apm-test-agent.sock".into(),
            listener_datagram_path: None,
            mem_limit: 100,
            buffer_path: "/tmp/apm-test-buffer".into(),
            central_url: "http://127.0.0.1:8080".into(),
            api_key: "test-key".into(),
            flush_interval_secs: 5,
            flush_batch_size: 50,
            failure_threshold: 5,
            retry_timeout_secs: 60,
            max_requests: 1000,
            memory_limit_mb: 256,
            gc_interval: 500,
            health_port: 9090,
        }
    }
}
