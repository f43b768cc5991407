//! Central server configuration, environment-driven (§6).

use std::collections::BTreeMap;
use std::env;

use anyhow::Result;

/// Command-line surface overlaying the environment-driven config.
#[derive(Debug, clap::Parser)]
#[command(name = "apm-serverd", about = "APM central ingestion and query server")]
pub struct Cli {
    /// Path to a `.env`-style file to load before reading the environment.
    #[arg(long, env = "APM_SERVER_CONFIG")]
    pub config: Option<std::path::PathBuf>,
    /// Overrides `PORT`.
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,
    #[arg(long, env = "LOG_LEVEL")]
    pub log_level: Option<String>,
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub tls_key_path: Option<String>,
    pub tls_cert_path: Option<String>,
    pub db_path: String,
    pub udp_port: Option<u16>,
    pub rate_limit: u32,
    /// `api_key -> project` (project already lower-cased, §4.5).
    pub api_keys: BTreeMap<String, String>,
    pub graylog_enabled: bool,
    pub graylog_host: String,
    pub graylog_port: u16,
    pub graylog_facility: String,
    pub state_path: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let port = env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8080);
        let udp_port = env::var("UDP_PORT").ok().and_then(|v| v.parse().ok());
        let rate_limit = env::var("RATE_LIMIT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(100);

        let tls_key_path = env::var("TLS_KEY_PATH").ok();
        let tls_cert_path = env::var("TLS_CERT_PATH").ok();
        if tls_key_path.is_some() != tls_cert_path.is_some() {
            anyhow::bail!("TLS_KEY_PATH and TLS_CERT_PATH must both be set or both be absent");
        }

        let state_path = env::var("STATE_PATH").unwrap_or_else(|_| "/var/lib/apm/state".into());

        Ok(Self {
            port,
            tls_key_path,
            tls_cert_path,
            db_path: env::var("DB_PATH").unwrap_or_else(|_| "/var/lib/apm/apm.sqlite".into()),
            udp_port,
            rate_limit,
            api_keys: load_api_keys(),
            graylog_enabled: env::var("GRAYLOG_ENABLED")
                .ok()
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            graylog_host: env::var("GRAYLOG_HOST").unwrap_or_else(|_| "127.0.0.1".into()),
            graylog_port: env::var("GRAYLOG_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(12201),
            graylog_facility: env::var("GRAYLOG_FACILITY").unwrap_or_else(|_| "apm".into()),
            state_path,
        })
    }

    #[must_use]
    pub fn tls_enabled(&self) -> bool {
        self.tls_key_path.is_some() && self.tls_cert_path.is_some()
    }

    /// Overlay CLI flags onto the environment-derived config (§4.1 CLI
    /// surface, mirrored on the daemon binary).
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(port) = cli.port {
            self.port = port;
        }
    }

    #[must_use]
    pub fn breaker_state_path(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.state_path).join("shipper_breaker.json")
    }

    #[must_use]
    pub fn default_for_test() -> Self {
        let mut api_keys = BTreeMap::new();
        api_keys.insert("test-key".to_string(), "testproject".to_string());
        Self {
            port: 0,
            tls_key_path: None,
            tls_cert_path: None,
            db_path: ":memory:".into(),
            udp_port: None,
            rate_limit: 100,
            api_keys,
            graylog_enabled: false,
            graylog_host: "127.0.0.1".into(),
            graylog_port: 12201,
            graylog_facility: "apm".into(),
            state_path: "/tmp/apm-server-test-state".into(),
        }
    }
}

/// Scan the environment for `API_KEY_<PROJECT>=<key>` pairs, lower-casing
/// the project name (§4.5).
fn load_api_keys() -> BTreeMap<String, String> {
    env::vars()
        .filter_map(|(name, value)| {
            name.strip_prefix("API_KEY_")
                .map(|project| (value, project.to_lowercase()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tls_enabled_requires_both_paths() {
        let mut cfg = Config::default_for_test();
        assert!(!cfg.tls_enabled());
        cfg.tls_key_path = Some("key.pem".into());
        assert!(!cfg.tls_enabled());
        cfg.tls_cert_path = Some("cert.pem".into());
        assert!(cfg.tls_enabled());
    }
}
