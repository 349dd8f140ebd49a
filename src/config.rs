//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Where a loaded [`Config`] came from
#[derive(Debug, Default)]
pub struct ConfigOrigin {
    /// File the settings were read from; `None` means built-in defaults
    pub path: Option<PathBuf>,
    /// Candidates that existed but failed to load
    pub skipped: Vec<ConfigError>,
}

impl ConfigOrigin {
    pub fn file(path: &Path) -> Self {
        Self {
            path: Some(path.to_path_buf()),
            skipped: Vec::new(),
        }
    }

    pub fn log(&self) {
        for e in &self.skipped {
            tracing::warn!("Skipped config file: {}", e);
        }
        match &self.path {
            Some(path) => tracing::info!("Loaded config from {:?}", path),
            None => tracing::info!("Using default config with environment overrides"),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub controller: ControllerConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub mqtt: MqttConfig,

    #[serde(default)]
    pub display: DisplayConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Home-automation controller connection
#[derive(Debug, Clone, Deserialize)]
pub struct ControllerConfig {
    #[serde(default = "default_controller_url")]
    pub url: String,

    #[serde(default)]
    pub token: String,

    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,

    #[serde(default = "default_auth_timeout")]
    pub auth_timeout_secs: u64,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    #[serde(default = "default_ping_timeout")]
    pub ping_timeout_secs: u64,
}

fn default_controller_url() -> String {
    "https://homeassistant.local:8123".to_string()
}

fn default_reconnect_delay() -> u64 {
    5
}

fn default_auth_timeout() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    10
}

fn default_idle_timeout() -> u64 {
    60
}

fn default_ping_timeout() -> u64 {
    10
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            url: default_controller_url(),
            token: String::new(),
            reconnect_delay_secs: default_reconnect_delay(),
            auth_timeout_secs: default_auth_timeout(),
            request_timeout_secs: default_request_timeout(),
            idle_timeout_secs: default_idle_timeout(),
            ping_timeout_secs: default_ping_timeout(),
        }
    }
}

impl ControllerConfig {
    /// Real-time endpoint derived from the controller base URL.
    ///
    /// `https://host:8123` becomes `wss://host:8123/api/websocket`. URLs that
    /// already use a `ws`/`wss` scheme are taken as the full endpoint.
    pub fn websocket_url(&self) -> String {
        let url = self.url.trim_end_matches('/');
        if url.starts_with("ws://") || url.starts_with("wss://") {
            return url.to_string();
        }
        let (scheme, rest) = match url.split_once("://") {
            Some(("https", rest)) => ("wss", rest),
            Some((_, rest)) => ("ws", rest),
            None => ("wss", url),
        };
        format!("{}://{}/api/websocket", scheme, rest)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs(self.ping_timeout_secs)
    }
}

/// HTTP surface and downstream WebSocket listener
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_ws_port")]
    pub ws_port: u16,

    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8765
}

fn default_ws_port() -> u16 {
    8766
}

fn default_shutdown_grace() -> u64 {
    5
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            ws_port: default_ws_port(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

impl ServerConfig {
    /// Socket address for the HTTP surface
    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Socket address for the downstream WebSocket listener
    pub fn ws_addr(&self) -> String {
        format!("{}:{}", self.host, self.ws_port)
    }
}

/// MQTT broker integration
#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_broker")]
    pub broker: String,

    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    #[serde(default = "default_device_id")]
    pub device_id: String,

    #[serde(default = "default_device_name")]
    pub device_name: String,

    #[serde(default = "default_topic_root")]
    pub topic_root: String,

    #[serde(default = "default_discovery_prefix")]
    pub discovery_prefix: String,

    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,

    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,
}

fn default_broker() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_device_id() -> String {
    "skylight_living".to_string()
}

fn default_device_name() -> String {
    "Living Room Dashboard".to_string()
}

fn default_topic_root() -> String {
    "skylight".to_string()
}

fn default_discovery_prefix() -> String {
    "homeassistant".to_string()
}

fn default_keep_alive() -> u64 {
    30
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            broker: default_broker(),
            port: default_mqtt_port(),
            username: String::new(),
            password: String::new(),
            device_id: default_device_id(),
            device_name: default_device_name(),
            topic_root: default_topic_root(),
            discovery_prefix: default_discovery_prefix(),
            keep_alive_secs: default_keep_alive(),
            reconnect_delay_secs: default_reconnect_delay(),
        }
    }
}

impl MqttConfig {
    /// Fixed MQTT client identifier for this device
    pub fn client_id(&self) -> String {
        format!("dashbridge_{}", self.device_id)
    }
}

/// Local display hardware
#[derive(Debug, Clone, Deserialize)]
pub struct DisplayConfig {
    /// sysfs backlight directory, e.g. `/sys/class/backlight/rpi_backlight`
    pub backlight_dir: Option<PathBuf>,

    #[serde(default = "default_min_brightness")]
    pub min_brightness: u8,
}

fn default_min_brightness() -> u8 {
    10
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            backlight_dir: None,
            min_brightness: default_min_brightness(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment.
    ///
    /// Runs before logging is set up, so nothing is logged here; call
    /// [`ConfigOrigin::log`] once tracing is initialised.
    pub fn load_default() -> (Self, ConfigOrigin) {
        let candidates: Vec<PathBuf> = [
            dirs::config_dir().map(|p| p.join("dashbridge").join("config.toml")),
            Some(PathBuf::from("/etc/dashbridge/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ]
        .into_iter()
        .flatten()
        .collect();

        Self::load_first(&candidates)
    }

    /// Load the first existing candidate that parses
    pub fn load_first(candidates: &[PathBuf]) -> (Self, ConfigOrigin) {
        let mut origin = ConfigOrigin::default();

        for path in candidates.iter().filter(|p| p.exists()) {
            match Self::load_with_env(path) {
                Ok(config) => {
                    origin.path = Some(path.clone());
                    return (config, origin);
                }
                Err(e) => origin.skipped.push(e),
            }
        }

        (Self::from_env(), origin)
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        // Controller overrides
        if let Ok(url) = std::env::var("DASHBRIDGE_CONTROLLER_URL") {
            self.controller.url = url;
        }
        if let Ok(token) = std::env::var("DASHBRIDGE_CONTROLLER_TOKEN") {
            self.controller.token = token;
        }

        // Server overrides
        if let Ok(host) = std::env::var("DASHBRIDGE_HOST") {
            self.server.host = host;
        }
        if let Some(port) = env_parse("DASHBRIDGE_PORT") {
            self.server.port = port;
        }
        if let Some(port) = env_parse("DASHBRIDGE_WS_PORT") {
            self.server.ws_port = port;
        }

        // MQTT overrides
        if let Ok(enabled) = std::env::var("DASHBRIDGE_MQTT_ENABLED") {
            self.mqtt.enabled = enabled.to_lowercase() == "true" || enabled == "1";
        }
        if let Ok(broker) = std::env::var("DASHBRIDGE_MQTT_BROKER") {
            self.mqtt.broker = broker;
        }
        if let Some(port) = env_parse("DASHBRIDGE_MQTT_PORT") {
            self.mqtt.port = port;
        }
        if let Ok(username) = std::env::var("DASHBRIDGE_MQTT_USERNAME") {
            self.mqtt.username = username;
        }
        if let Ok(password) = std::env::var("DASHBRIDGE_MQTT_PASSWORD") {
            self.mqtt.password = password;
        }
        if let Ok(device_id) = std::env::var("DASHBRIDGE_MQTT_DEVICE_ID") {
            self.mqtt.device_id = device_id;
        }

        // Logging overrides
        if let Ok(level) = std::env::var("DASHBRIDGE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("DASHBRIDGE_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Dashbridge Configuration
#
# Environment variables override these settings:
# - DASHBRIDGE_CONTROLLER_URL, DASHBRIDGE_CONTROLLER_TOKEN
# - DASHBRIDGE_HOST, DASHBRIDGE_PORT, DASHBRIDGE_WS_PORT
# - DASHBRIDGE_MQTT_ENABLED, DASHBRIDGE_MQTT_BROKER, DASHBRIDGE_MQTT_PORT
# - DASHBRIDGE_MQTT_USERNAME, DASHBRIDGE_MQTT_PASSWORD, DASHBRIDGE_MQTT_DEVICE_ID
# - DASHBRIDGE_LOG_LEVEL, DASHBRIDGE_LOG_FORMAT

[controller]
# Home Assistant base URL (self-signed certificates are accepted)
url = "https://homeassistant.local:8123"

# Long-lived access token
token = ""

# Fixed delay between reconnect attempts (seconds)
reconnect_delay_secs = 5

# Timeouts for the auth handshake and subscribe acknowledgements (seconds)
auth_timeout_secs = 10
request_timeout_secs = 10

# Silence before a liveness ping, and how long the pong may take (seconds)
idle_timeout_secs = 60
ping_timeout_secs = 10

[server]
host = "0.0.0.0"

# HTTP surface (/api/screenshot, /api/notifications, /health)
port = 8765

# Browser WebSocket bridge
ws_port = 8766

# Upper bound on orderly shutdown (seconds)
shutdown_grace_secs = 5

[mqtt]
enabled = false
broker = "localhost"
port = 1883
username = ""
password = ""

# Unique identifier (no spaces) and friendly name
device_id = "skylight_living"
device_name = "Living Room Dashboard"

# Topics live under <topic_root>/<device_id>/
topic_root = "skylight"
discovery_prefix = "homeassistant"

keep_alive_secs = 30
reconnect_delay_secs = 5

[display]
# sysfs backlight directory; leave unset on hardware without one
# backlight_dir = "/sys/class/backlight/rpi_backlight"

# Brightness never drops below this percentage
min_brightness = 10

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}
