//! Configuration loading and defaults.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **Environment variables** — `PROCD_DATA_DIR`, `PROCD_LOG_LEVEL`
//! 2. **Config file** — path via `--config <path>`, or `procd.toml` in CWD
//! 3. **Compiled defaults** — see each field's default value below
//!
//! ```toml
//! [core]
//! data_dir = "/var/lib/procd"
//! log_buffer_capacity = 1000
//! graceful_grace_secs = 5
//! registry_cleanup_grace_secs = 3
//!
//! [ports]
//! range_start = 3000
//! range_end = 3099
//! scan_extra = [4000, 4200, 9000, 9090, 5000, 5001, "...", 8099]
//!
//! [logging]
//! level = "info"
//!
//! [supervisor]
//! max_backoff = 60
//! stable_threshold = 60
//! ```

use std::path::Path;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub core: CoreConfig,
    #[serde(default)]
    pub ports: PortsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
}

/// Core resource and timing settings.
#[derive(Debug, Clone, Deserialize)]
pub struct CoreConfig {
    /// Directory for session logs. Default `/var/lib/procd`.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Maximum in-memory log entries retained per session (default 1000).
    #[serde(default = "default_log_buffer_capacity")]
    pub log_buffer_capacity: usize,
    /// Graceful-termination budget in seconds before SIGKILL (default 5).
    #[serde(default = "default_graceful_grace_secs")]
    pub graceful_grace_secs: u64,
    /// Registry's own follow-up kill budget in seconds (default 3).
    #[serde(default = "default_registry_cleanup_grace_secs")]
    pub registry_cleanup_grace_secs: u64,
}

/// Port allocation range and extra scan targets.
#[derive(Debug, Clone, Deserialize)]
pub struct PortsConfig {
    /// First port in the allocation range, inclusive (default 3000).
    #[serde(default = "default_range_start")]
    pub range_start: u16,
    /// Last port in the allocation range, inclusive (default 3099).
    #[serde(default = "default_range_end")]
    pub range_end: u16,
    /// Extra ports scanned (but never allocated from) by `list_system_processes`.
    #[serde(default = "default_scan_extra")]
    pub scan_extra: Vec<u16>,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter level (default `info`). Overridden by `RUST_LOG` env var.
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// Supervisor settings for `procd supervise`.
#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorConfig {
    /// Maximum seconds between restart attempts (default 60).
    #[serde(default = "default_supervisor_max_backoff")]
    pub max_backoff: u64,
    /// Seconds of uptime before resetting backoff (default 60).
    #[serde(default = "default_supervisor_stable_threshold")]
    pub stable_threshold: u64,
}

fn default_data_dir() -> String {
    "/var/lib/procd".to_string()
}
fn default_log_buffer_capacity() -> usize {
    1000
}
fn default_graceful_grace_secs() -> u64 {
    5
}
fn default_registry_cleanup_grace_secs() -> u64 {
    3
}
fn default_range_start() -> u16 {
    3000
}
fn default_range_end() -> u16 {
    3099
}
fn default_scan_extra() -> Vec<u16> {
    let mut ports = vec![4000, 4200, 9000, 9090];
    ports.extend(5000..=5099);
    ports.extend(8000..=8099);
    ports
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_supervisor_max_backoff() -> u64 {
    60
}
fn default_supervisor_stable_threshold() -> u64 {
    60
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_buffer_capacity: default_log_buffer_capacity(),
            graceful_grace_secs: default_graceful_grace_secs(),
            registry_cleanup_grace_secs: default_registry_cleanup_grace_secs(),
        }
    }
}

impl Default for PortsConfig {
    fn default() -> Self {
        Self {
            range_start: default_range_start(),
            range_end: default_range_end(),
            scan_extra: default_scan_extra(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_backoff: default_supervisor_max_backoff(),
            stable_threshold: default_supervisor_stable_threshold(),
        }
    }
}

impl Config {
    /// Load configuration with the precedence chain: env vars > file > defaults.
    ///
    /// If `path` is `Some`, reads that file (panics on failure). Otherwise looks
    /// for `procd.toml` in the current directory, falling back to compiled defaults.
    pub fn load(path: Option<&str>) -> Self {
        let mut config = if let Some(p) = path {
            let content = std::fs::read_to_string(p)
                .unwrap_or_else(|e| panic!("Failed to read config file {p}: {e}"));
            toml::from_str(&content)
                .unwrap_or_else(|e| panic!("Failed to parse config file {p}: {e}"))
        } else if Path::new("procd.toml").exists() {
            let content = std::fs::read_to_string("procd.toml").expect("Failed to read procd.toml");
            toml::from_str(&content).expect("Failed to parse procd.toml")
        } else {
            Config {
                core: CoreConfig::default(),
                ports: PortsConfig::default(),
                logging: LoggingConfig::default(),
                supervisor: SupervisorConfig::default(),
            }
        };

        if let Ok(dir) = std::env::var("PROCD_DATA_DIR") {
            config.core.data_dir = dir;
        }
        if let Ok(level) = std::env::var("PROCD_LOG_LEVEL") {
            config.logging.level = level;
        }

        config
    }
}
