//! Server configuration
//!
//! TOML file merged with environment overrides (env wins). With no database
//! URL configured the server runs single-node against the in-memory store;
//! with one it runs against Postgres with advisory session locks.

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Plaintext API keys start with this.
    #[serde(default = "default_api_key_prefix")]
    pub api_key_prefix: String,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub worker: WorkerSettings,

    #[serde(default)]
    pub voice: VoiceConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Postgres URL; unset means in-memory single-node mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default = "default_connection_limit")]
    pub connection_limit: u32,

    #[serde(default = "default_pool_timeout_secs")]
    pub pool_timeout_secs: u64,

    #[serde(default = "default_statement_timeout_secs")]
    pub statement_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_worker_count")]
    pub count: u32,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            count: default_worker_count(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VoiceConfig {
    /// Free-form mode string handed through to clients.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,

    /// Where stored audio lands; unset disables file storage (metadata-only
    /// artifacts are still recorded).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_storage_dir: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            api_key_prefix: default_api_key_prefix(),
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
            worker: WorkerSettings::default(),
            voice: VoiceConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Ok(toml::from_str(&contents)?)
    }

    /// Merge environment variables into config (env vars take precedence).
    pub fn merge_env(&mut self) {
        if let Ok(val) = std::env::var("VOCALBRIDGE_HOST") {
            self.host = val;
        }
        if let Ok(val) = std::env::var("VOCALBRIDGE_PORT")
            && let Ok(port) = val.parse::<u16>()
        {
            self.port = port;
        }
        if let Ok(val) = std::env::var("DATABASE_URL") {
            self.database.url = Some(val);
        }
        if let Ok(val) = std::env::var("VOCALBRIDGE_DB_CONNECTION_LIMIT")
            && let Ok(limit) = val.parse::<u32>()
        {
            self.database.connection_limit = limit;
        }
        if let Ok(val) = std::env::var("VOCALBRIDGE_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("VOCALBRIDGE_API_KEY_PREFIX") {
            self.api_key_prefix = val;
        }
        if let Ok(val) = std::env::var("VOCALBRIDGE_WORKER_ENABLED")
            && let Ok(enabled) = val.parse::<bool>()
        {
            self.worker.enabled = enabled;
        }
        if let Ok(val) = std::env::var("VOCALBRIDGE_WORKER_COUNT")
            && let Ok(count) = val.parse::<u32>()
        {
            self.worker.count = count;
        }
        if let Ok(val) = std::env::var("AUDIO_STORAGE_DIR") {
            self.voice.audio_storage_dir = Some(val);
        }
        if let Ok(val) = std::env::var("VOICE_MODE") {
            self.voice.mode = Some(val);
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_api_key_prefix() -> String {
    "vb_live_".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_connection_limit() -> u32 {
    25
}

fn default_pool_timeout_secs() -> u64 {
    10
}

fn default_statement_timeout_secs() -> u64 {
    30
}

fn default_worker_count() -> u32 {
    1
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}
