/// Configuration management
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub server_host: String,
    #[serde(default = "default_port")]
    pub server_port: u16,

    /// Redis backing store. When absent the service runs on the in-process
    /// store, which is fine for a single instance and for tests.
    pub redis_url: Option<String>,

    pub access_token_secret: String,
    pub refresh_token_secret: String,
    #[serde(default = "default_access_ttl_secs")]
    pub access_ttl_secs: u64,
    #[serde(default = "default_refresh_ttl_secs")]
    pub refresh_ttl_secs: u64,

    #[serde(default = "default_max_login_attempts")]
    pub max_login_attempts: u32,
    #[serde(default = "default_lockout_window_secs")]
    pub lockout_window_secs: u64,

    pub alert_webhook_url: Option<String>,
    #[serde(default = "default_event_retention_days")]
    pub event_retention_days: u64,

    /// Bootstrap admin identity for deployments without a directory backend
    /// wired in. Both must be set for the account to exist.
    pub seed_admin_email: Option<String>,
    pub seed_admin_password: Option<String>,

    /// Upper bound for any single store operation.
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
    /// Whether revocation checks allow requests through when the store is
    /// unreachable. Off by default: a revoked token must stay revoked.
    #[serde(default)]
    pub blacklist_fail_open: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_access_ttl_secs() -> u64 {
    15 * 60
}

fn default_refresh_ttl_secs() -> u64 {
    7 * 24 * 60 * 60
}

fn default_max_login_attempts() -> u32 {
    5
}

fn default_lockout_window_secs() -> u64 {
    15 * 60
}

fn default_event_retention_days() -> u64 {
    30
}

fn default_store_timeout_ms() -> u64 {
    100
}

impl Config {
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::from_env()
    }
}
