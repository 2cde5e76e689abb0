use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 8088;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_API_BASE_URL: &str = "https://v3.football.api-sports.io";
pub const DEFAULT_KEY_HEADER: &str = "x-apisports-key";
pub const DEFAULT_DAILY_LIMIT: u32 = 100; // free plan ceiling
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Top-level config (matchday.toml + MATCHDAY_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchdayConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
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

/// Outbound sports-data API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_base_url")]
    pub base_url: String,
    /// Falls back to the `FOOTBALL_API_KEY` env var when absent.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Header carrying the key. RapidAPI deployments use `x-rapidapi-key`.
    #[serde(default = "default_key_header")]
    pub key_header: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_base_url(),
            api_key: None,
            key_header: default_key_header(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl ApiConfig {
    /// The configured key, or `FOOTBALL_API_KEY` from the environment.
    /// Blank values count as missing.
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var("FOOTBALL_API_KEY").ok())
            .filter(|k| !k.trim().is_empty())
    }
}

/// Timer, queue and quota tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Calls allowed per calendar day for rows created from now on.
    #[serde(default = "default_daily_limit")]
    pub daily_limit: u32,
    /// Timer Service polling cadence.
    #[serde(default = "default_timer_poll_ms")]
    pub timer_poll_ms: u64,
    /// Worker block-wait on an empty queue before re-checking quota.
    #[serde(default = "default_queue_poll_secs")]
    pub queue_poll_secs: u64,
    /// Worker sleep while the day's quota is exhausted.
    #[serde(default = "default_quota_recheck_secs")]
    pub quota_recheck_secs: u64,
    /// Pause between two immediate-queue calls, independent of quota.
    #[serde(default = "default_politeness_delay_ms")]
    pub politeness_delay_ms: u64,
    /// Offset applied to UTC to obtain the server calendar (quota days, cron fields).
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            daily_limit: DEFAULT_DAILY_LIMIT,
            timer_poll_ms: default_timer_poll_ms(),
            queue_poll_secs: default_queue_poll_secs(),
            quota_recheck_secs: default_quota_recheck_secs(),
            politeness_delay_ms: default_politeness_delay_ms(),
            utc_offset_minutes: 0,
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}
fn default_key_header() -> String {
    DEFAULT_KEY_HEADER.to_string()
}
fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}
fn default_daily_limit() -> u32 {
    DEFAULT_DAILY_LIMIT
}
fn default_timer_poll_ms() -> u64 {
    1_000
}
fn default_queue_poll_secs() -> u64 {
    60
}
fn default_quota_recheck_secs() -> u64 {
    300
}
fn default_politeness_delay_ms() -> u64 {
    2_000
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.matchday/matchday.db", home)
}

impl MatchdayConfig {
    /// Load config from a TOML file with MATCHDAY_* env var overrides.
    ///
    /// Nested keys use a double underscore: `MATCHDAY_SCHEDULER__DAILY_LIMIT=500`.
    /// A missing file is not an error; every field has a default.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("MATCHDAY_").split("__"))
            .extract()
            .map_err(|e| crate::error::MatchdayError::Config(e.to_string()))
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.matchday/matchday.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let cfg = MatchdayConfig::load(path.to_str()).unwrap();
        assert_eq!(cfg.gateway.port, DEFAULT_PORT);
        assert_eq!(cfg.scheduler.daily_limit, DEFAULT_DAILY_LIMIT);
        assert_eq!(cfg.api.timeout_secs, 30);
        assert_eq!(cfg.api.key_header, "x-apisports-key");
    }

    #[test]
    fn toml_sections_override_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[gateway]
port = 9000

[api]
api_key = "k-123"
timeout_secs = 5

[scheduler]
daily_limit = 7500
politeness_delay_ms = 0
"#
        )
        .unwrap();

        let cfg = MatchdayConfig::load(file.path().to_str()).unwrap();
        assert_eq!(cfg.gateway.port, 9000);
        assert_eq!(cfg.gateway.bind, DEFAULT_BIND);
        assert_eq!(cfg.api.resolved_api_key().as_deref(), Some("k-123"));
        assert_eq!(cfg.api.timeout_secs, 5);
        assert_eq!(cfg.scheduler.daily_limit, 7500);
        assert_eq!(cfg.scheduler.politeness_delay_ms, 0);
        assert_eq!(cfg.scheduler.queue_poll_secs, 60);
    }

    #[test]
    fn malformed_toml_is_a_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[scheduler]\ndaily_limit = \"lots\"").unwrap();
        let err = MatchdayConfig::load(file.path().to_str()).unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }
}
