//! Agent configuration (§4.1, §6).
//!
//! Parsed once per process from a `key=value` file with typed scalars and
//! memoized — a missing file or a parse error yields the safe default set,
//! in which profiling is off. No dependency in the retrieval pack does
//! bespoke `key=value` scanning, so this is a small hand-rolled parser
//! rather than an added crate.

use std::path::Path;
use std::sync::OnceLock;

/// Agent configuration (§4.1 table). Every field has a conservative
/// default matching "profiling off".
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub profiling_enabled: bool,
    pub threshold_ms: u64,
    pub function_profiling_enabled: bool,
    pub sql_capture_enabled: bool,
    pub sql_redact_sensitive: bool,
    pub sql_stack_trace_limit: usize,
    pub memory_tracking_enabled: bool,
    pub request_metadata_enabled: bool,
    pub listener_socket_path: String,
    pub listener_timeout_ms: u64,
    pub disk_buffer_path: Option<String>,
    pub project_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            profiling_enabled: false,
            threshold_ms: 500,
            function_profiling_enabled: false,
            sql_capture_enabled: false,
            sql_redact_sensitive: true,
            sql_stack_trace_limit: 10,
            memory_tracking_enabled: false,
            request_metadata_enabled: true,
            listener_socket_path: "/run/apm/agent.sock".to_string(),
            listener_timeout_ms: 50,
            disk_buffer_path: None,
            project_name: String::new(),
        }
    }
}

impl Config {
    /// Parse a `key=value` file, one assignment per line, `#` comments,
    /// blank lines ignored. Any parse failure on an individual key falls
    /// back to that key's default rather than aborting the whole load.
    #[must_use]
    pub fn parse(contents: &str) -> Self {
        let mut config = Self::default();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim().trim_matches('"');
            apply_key(&mut config, key, value);
        }
        config
    }

    /// Load configuration from `path`. Missing file or unreadable contents
    /// yields [`Config::default`] (profiling off) rather than an error —
    /// a misconfigured agent must never fail the host application.
    #[must_use]
    pub fn load_from_path(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::parse(&contents),
            Err(_) => Self::default(),
        }
    }
}

fn apply_key(config: &mut Config, key: &str, value: &str) {
    match key {
        "profiling_enabled" => config.profiling_enabled = parse_bool(value, config.profiling_enabled),
        "threshold_ms" => config.threshold_ms = parse_u64(value, config.threshold_ms),
        "function_profiling_enabled" => {
            config.function_profiling_enabled = parse_bool(value, config.function_profiling_enabled);
        }
        "sql_capture_enabled" => {
            config.sql_capture_enabled = parse_bool(value, config.sql_capture_enabled);
        }
        "sql_redact_sensitive" => {
            config.sql_redact_sensitive = parse_bool(value, config.sql_redact_sensitive);
        }
        "sql_stack_trace_limit" => {
            config.sql_stack_trace_limit = parse_u64(value, config.sql_stack_trace_limit as u64) as usize;
        }
        "memory_tracking_enabled" => {
            config.memory_tracking_enabled = parse_bool(value, config.memory_tracking_enabled);
        }
        "request_metadata_enabled" => {
            config.request_metadata_enabled = parse_bool(value, config.request_metadata_enabled);
        }
        "listener_socket_path" => config.listener_socket_path = value.to_string(),
        "listener_timeout_ms" => config.listener_timeout_ms = parse_u64(value, config.listener_timeout_ms),
        "disk_buffer_path" => config.disk_buffer_path = Some(value.to_string()),
        "project_name" => config.project_name = value.to_string(),
        _ => {}
    }
}

fn parse_bool(value: &str, default: bool) -> bool {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}

fn parse_u64(value: &str, default: u64) -> u64 {
    value.parse().unwrap_or(default)
}

static MEMOIZED: OnceLock<Config> = OnceLock::new();

/// Load and memoize the configuration for the process lifetime. Subsequent
/// calls, regardless of `path`, return the first-loaded value.
pub fn memoized(path: &Path) -> &'static Config {
    MEMOIZED.get_or_init(|| Config::load_from_path(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_profiling_off_defaults() {
        let config = Config::load_from_path(Path::new("/nonexistent/profiling.ini"));
        assert!(!config.profiling_enabled);
        assert_eq!(config.threshold_ms, 500);
    }

    #[test]
    fn parses_typed_scalars() {
        let config = Config::parse(
            "profiling_enabled = true\n\
             threshold_ms = 250\n\
             # a comment\n\
             sql_stack_trace_limit=3\n\
             project_name = checkout\n",
        );
        assert!(config.profiling_enabled);
        assert_eq!(config.threshold_ms, 250);
        assert_eq!(config.sql_stack_trace_limit, 3);
        assert_eq!(config.project_name, "checkout");
    }

    #[test]
    fn unparseable_scalar_falls_back_to_default() {
        let config = Config::parse("threshold_ms = not-a-number\n");
        assert_eq!(config.threshold_ms, 500);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let config = Config::parse("totally_unknown_key = 1\n");
        assert_eq!(config, Config::default());
    }
}
