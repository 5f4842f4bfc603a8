use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 8787;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_TIMEZONE: &str = "UTC";
pub const SHUTDOWN_TIMEOUT_SECS: u64 = 5; // force-clear handles after this
pub const HANDLE_GRACE_MS: u64 = 200; // per-handle stop grace on shutdown
pub const UNSCHEDULE_GRACE_MS: u64 = 100;
pub const RETRY_BACKOFF_BASE_MS: u64 = 1_000; // attempt n waits base * 2^n
pub const MAX_REDIRECTS: usize = 5;
pub const MAX_RESPONSE_BODY_CHARS: usize = 64 * 1024;

/// Top-level config (cronx.toml + CRONX_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CronxConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// Control surface of the daemon (health, active jobs, run-now).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Timing and size limits of the scheduling engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Upper bound for the whole shutdown sequence. Handles still running
    /// afterwards are aborted.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
    /// Time a cancelled handle gets to observe the shutdown flag and exit.
    #[serde(default = "default_handle_grace_ms")]
    pub handle_grace_ms: u64,
    #[serde(default = "default_unschedule_grace_ms")]
    pub unschedule_grace_ms: u64,
    /// Base of the exponential retry backoff (1 s, 2 s, 4 s, ... by default).
    #[serde(default = "default_retry_backoff_base_ms")]
    pub retry_backoff_base_ms: u64,
    /// Redirect limit for templates with `follow_redirects = true`.
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
    /// Response bodies longer than this are truncated before being logged.
    #[serde(default = "default_max_response_body_chars")]
    pub max_response_body_chars: usize,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout_secs: SHUTDOWN_TIMEOUT_SECS,
            handle_grace_ms: HANDLE_GRACE_MS,
            unschedule_grace_ms: UNSCHEDULE_GRACE_MS,
            retry_backoff_base_ms: RETRY_BACKOFF_BASE_MS,
            max_redirects: MAX_REDIRECTS,
            max_response_body_chars: MAX_RESPONSE_BODY_CHARS,
            user_agent: default_user_agent(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_shutdown_timeout_secs() -> u64 {
    SHUTDOWN_TIMEOUT_SECS
}
fn default_handle_grace_ms() -> u64 {
    HANDLE_GRACE_MS
}
fn default_unschedule_grace_ms() -> u64 {
    UNSCHEDULE_GRACE_MS
}
fn default_retry_backoff_base_ms() -> u64 {
    RETRY_BACKOFF_BASE_MS
}
fn default_max_redirects() -> usize {
    MAX_REDIRECTS
}
fn default_max_response_body_chars() -> usize {
    MAX_RESPONSE_BODY_CHARS
}
fn default_user_agent() -> String {
    format!("cronx/{}", env!("CARGO_PKG_VERSION"))
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cronx/cronx.db", home)
}

impl CronxConfig {
    /// Load config from a TOML file with CRONX_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `CRONX_SCHEDULER__SHUTDOWN_TIMEOUT_SECS=10`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        tracing::debug!(path = %path, "loading config");
        let config: CronxConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("CRONX_").split("__"))
            .extract()
            .map_err(|e| crate::error::CronxError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cronx/cronx.toml", home)
}
