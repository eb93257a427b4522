//! Agent configuration loading from file and environment variables.

use kuber_search::SearchConfig;
use kuber_session::{EvictionPolicy, StoreSettings};
use kuber_types::{AUTO_SAVE_INTERVAL, DEFAULT_HISTORY_LIMIT, DEFAULT_SESSION_CAPACITY};
use kuber_voice::{LiveKitConfig, OpenAiConfig};
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;

/// Top-level agent configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    /// Session store and persistence settings.
    #[serde(default)]
    pub sessions: SessionsConfig,

    #[serde(default)]
    pub search: SearchConfig,

    /// LiveKit server. Voice sessions are refused while `url` is empty.
    #[serde(default)]
    pub livekit: LiveKitConfig,

    /// OpenAI-compatible STT, TTS and chat endpoints.
    #[serde(default)]
    pub openai: OpenAiConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Network configuration for the HTTP worker.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionsConfig {
    /// Directory that receives `session_<id>.json` files.
    #[serde(default = "default_sessions_dir")]
    pub dir: String,

    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Zero disables auto-save.
    #[serde(default = "default_auto_save_every")]
    pub auto_save_every: usize,

    /// Messages returned by `get_conversation_history`.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    #[serde(default)]
    pub eviction: EvictionPolicy,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "kuber_agent=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    8080
}

fn default_sessions_dir() -> String {
    "sessions".to_string()
}

fn default_capacity() -> usize {
    DEFAULT_SESSION_CAPACITY
}

fn default_auto_save_every() -> usize {
    AUTO_SAVE_INTERVAL
}

fn default_history_limit() -> usize {
    DEFAULT_HISTORY_LIMIT
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            dir: default_sessions_dir(),
            capacity: default_capacity(),
            auto_save_every: default_auto_save_every(),
            history_limit: default_history_limit(),
            eviction: EvictionPolicy::default(),
        }
    }
}

impl SessionsConfig {
    pub fn store_settings(&self) -> StoreSettings {
        StoreSettings {
            capacity: self.capacity,
            auto_save_every: self.auto_save_every,
            eviction: self.eviction,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `KUBER_HOST` overrides `server.host`
/// - `KUBER_PORT` overrides `server.port`
/// - `KUBER_SESSIONS_DIR` overrides `sessions.dir`
/// - `KUBER_LOG_LEVEL` overrides `logging.level`
/// - `KUBER_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `LIVEKIT_URL`, `LIVEKIT_PUBLIC_URL`, `LIVEKIT_API_KEY`, `LIVEKIT_API_SECRET`
///   override the `livekit` section
/// - `OPENAI_API_KEY`, `OPENAI_BASE_URL` override the `openai` section
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Applies environment-style overrides read through `var`.
pub fn apply_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(host) = var("KUBER_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Some(port) = var("KUBER_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Some(dir) = var("KUBER_SESSIONS_DIR") {
        config.sessions.dir = dir;
    }
    if let Some(level) = var("KUBER_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("KUBER_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }

    if let Some(url) = var("LIVEKIT_URL") {
        config.livekit.url = url;
    }
    if let Some(url) = var("LIVEKIT_PUBLIC_URL") {
        config.livekit.public_url = url;
    }
    if let Some(key) = var("LIVEKIT_API_KEY") {
        config.livekit.api_key = key;
    }
    if let Some(secret) = var("LIVEKIT_API_SECRET") {
        config.livekit.api_secret = secret;
    }

    if let Some(key) = var("OPENAI_API_KEY") {
        config.openai.api_key = key;
    }
    if let Some(url) = var("OPENAI_BASE_URL") {
        config.openai.base_url = url;
    }
}
