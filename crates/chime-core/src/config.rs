use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 18890;
pub const DEFAULT_BIND: &str = "127.0.0.1";

/// Backup margin (seconds) behind the target when exact scheduling works.
pub const DEFAULT_MARGIN_SECS: u64 = 120;
/// Backup margin (seconds) when exact scheduling is denied and the margin
/// path is the only delivery guarantee.
pub const DEFAULT_DEGRADED_MARGIN_SECS: u64 = 15;

/// Top-level config (chime.toml + CHIME_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChimeConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub alarms: AlarmConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Override with env var: CHIME_GATEWAY_PORT=19000
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

/// Timer tuning for the alarm engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmConfig {
    /// Seconds the backup timer trails the target when the exact path is armed.
    #[serde(default = "default_margin_secs")]
    pub margin_secs: u64,
    /// Seconds the backup timer trails the target when the exact path is
    /// unavailable. Kept short because nothing else will fire.
    #[serde(default = "default_degraded_margin_secs")]
    pub degraded_margin_secs: u64,
    /// Whether the host grants precise wall-clock wakeups.
    #[serde(default = "bool_true")]
    pub exact_enabled: bool,
}

impl Default for AlarmConfig {
    fn default() -> Self {
        Self {
            margin_secs: DEFAULT_MARGIN_SECS,
            degraded_margin_secs: DEFAULT_DEGRADED_MARGIN_SECS,
            exact_enabled: true,
        }
    }
}

/// Where delivered alarms are sent.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DeliveryConfig {
    /// If set, each delivered alarm is POSTed as JSON to this URL.
    /// When unset, deliveries are logged only.
    pub webhook_url: Option<String>,
}

fn bool_true() -> bool {
    true
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_margin_secs() -> u64 {
    DEFAULT_MARGIN_SECS
}
fn default_degraded_margin_secs() -> u64 {
    DEFAULT_DEGRADED_MARGIN_SECS
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.chime/chime.db", home)
}

impl ChimeConfig {
    /// Load config from a TOML file with CHIME_* env var overrides.
    ///
    /// Falls back to ~/.chime/chime.toml when no explicit path is given;
    /// a missing file yields the defaults.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: ChimeConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("CHIME_").split("_"))
            .extract()
            .map_err(|e| crate::error::ChimeError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.chime/chime.toml", home)
}
