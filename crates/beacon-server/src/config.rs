//! Configuration loading from file and environment variables.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use beacon_observe::{ObserveTarget, RetryPolicy, DEFAULT_OBSERVER_BUFFER};
use serde::Deserialize;
use thiserror::Error;

/// Top-level configuration shared by both binaries.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// HTTP listener settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Event log bounds and retention.
    #[serde(default)]
    pub store: StoreConfig,

    /// Pub/sub broker publishing.
    #[serde(default)]
    pub publisher: PublisherConfig,

    /// Observable resource exposed by the server.
    #[serde(default)]
    pub observe: ObserveConfig,

    /// Settings for the `beacon-observer` binary.
    #[serde(default)]
    pub observer: ObserverConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Bounds of the in-memory event log.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Maximum number of retained events.
    #[serde(default = "default_max_events")]
    pub max_events: usize,

    /// Events older than this are removed by the periodic sweep.
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,

    /// Seconds between sweeps. `0` disables the periodic sweep.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

/// Broker publishing.
#[derive(Debug, Clone, Deserialize)]
pub struct PublisherConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// MQTT broker address, `mqtt://host:port`.
    #[serde(default = "default_broker_url")]
    pub broker_url: String,

    /// Client identifier presented to the broker.
    #[serde(default = "default_client_id")]
    pub client_id: String,

    #[serde(default = "default_topic")]
    pub topic: String,

    /// Bound on a single publish attempt, in milliseconds.
    #[serde(default = "default_publish_timeout_ms")]
    pub timeout_ms: u64,
}

/// The observable resource.
#[derive(Debug, Clone, Deserialize)]
pub struct ObserveConfig {
    /// Path the resource is mounted at.
    #[serde(default = "default_resource")]
    pub resource: String,

    /// Per-observer delivery buffer. A full buffer detaches the observer.
    #[serde(default = "default_observer_buffer")]
    pub observer_buffer: usize,
}

/// The standalone observation client.
#[derive(Debug, Clone, Deserialize)]
pub struct ObserverConfig {
    /// Base URL of the server to observe.
    #[serde(default = "default_observe_url")]
    pub url: String,

    #[serde(default = "default_resource")]
    pub resource: String,

    #[serde(default = "default_true")]
    pub confirmable: bool,

    #[serde(default = "default_startup_delay_secs")]
    pub startup_delay_secs: u64,

    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    #[serde(default = "default_max_start_retries")]
    pub max_start_retries: u32,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Size of the observer's local event log.
    #[serde(default = "default_observer_max_events")]
    pub max_events: usize,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "beacon_server=debug,info").
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
    4000
}

fn default_max_events() -> usize {
    beacon_store::DEFAULT_MAX_EVENTS
}

fn default_retention_days() -> u64 {
    7
}

fn default_sweep_interval_secs() -> u64 {
    60 * 60
}

fn default_true() -> bool {
    true
}

fn default_broker_url() -> String {
    "mqtt://127.0.0.1:1883".to_string()
}

fn default_client_id() -> String {
    "beacon-relay".to_string()
}

fn default_topic() -> String {
    "beacon/events".to_string()
}

fn default_publish_timeout_ms() -> u64 {
    2000
}

fn default_resource() -> String {
    "/beacon/events".to_string()
}

fn default_observer_buffer() -> usize {
    DEFAULT_OBSERVER_BUFFER
}

fn default_observe_url() -> String {
    "http://127.0.0.1:4000".to_string()
}

fn default_startup_delay_secs() -> u64 {
    2
}

fn default_retry_delay_secs() -> u64 {
    5
}

fn default_max_start_retries() -> u32 {
    5
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_observer_max_events() -> usize {
    100
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

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_events: default_max_events(),
            retention_days: default_retention_days(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            broker_url: default_broker_url(),
            client_id: default_client_id(),
            topic: default_topic(),
            timeout_ms: default_publish_timeout_ms(),
        }
    }
}

impl Default for ObserveConfig {
    fn default() -> Self {
        Self {
            resource: default_resource(),
            observer_buffer: default_observer_buffer(),
        }
    }
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            url: default_observe_url(),
            resource: default_resource(),
            confirmable: true,
            startup_delay_secs: default_startup_delay_secs(),
            retry_delay_secs: default_retry_delay_secs(),
            max_start_retries: default_max_start_retries(),
            connect_timeout_secs: default_connect_timeout_secs(),
            max_events: default_observer_max_events(),
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

impl StoreConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_days.saturating_mul(24 * 60 * 60))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl PublisherConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl ObserverConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            delay: Duration::from_secs(self.retry_delay_secs),
            max_start_retries: self.max_start_retries,
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
        }
    }

    pub fn target(&self) -> ObserveTarget {
        ObserveTarget {
            base_url: self.url.clone(),
            resource: self.resource.clone(),
            confirmable: self.confirmable,
        }
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_secs(self.startup_delay_secs)
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

/// Picks the config file path: first CLI argument, then
/// `BEACON_CONFIG_PATH`. Returns the path and where it came from.
pub fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("BEACON_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

/// Loads configuration from a TOML file, falling back to defaults, then
/// applies environment overrides.
///
/// Environment variable overrides:
/// - `BEACON_HOST` overrides `server.host`
/// - `BEACON_PORT` overrides `server.port`
/// - `BEACON_MAX_EVENTS` overrides `store.max_events`
/// - `BEACON_BROKER_URL` overrides `publisher.broker_url`
/// - `BEACON_PUBLISH_ENABLED` overrides `publisher.enabled`
/// - `BEACON_OBSERVE_URL` overrides `observer.url`
/// - `BEACON_LOG_LEVEL` overrides `logging.level`
/// - `BEACON_LOG_JSON` overrides `logging.json`
///
/// Boolean values accept `true`/`1`/`yes`/`on` and `false`/`0`/`no`/`off`.
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

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Applies `BEACON_*` overrides read through `lookup`. Unparseable values
/// are logged and ignored.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(host) = lookup("BEACON_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Some(port) = lookup("BEACON_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Some(max_events) = lookup("BEACON_MAX_EVENTS") {
        if let Ok(parsed) = max_events.parse() {
            config.store.max_events = parsed;
        }
    }
    if let Some(broker_url) = lookup("BEACON_BROKER_URL") {
        config.publisher.broker_url = broker_url;
    }
    if let Some(enabled) = lookup("BEACON_PUBLISH_ENABLED") {
        if let Some(parsed) = parse_flag("BEACON_PUBLISH_ENABLED", &enabled) {
            config.publisher.enabled = parsed;
        }
    }
    if let Some(url) = lookup("BEACON_OBSERVE_URL") {
        config.observer.url = url;
    }
    if let Some(level) = lookup("BEACON_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = lookup("BEACON_LOG_JSON") {
        if let Some(parsed) = parse_flag("BEACON_LOG_JSON", &json) {
            config.logging.json = parsed;
        }
    }
}

fn parse_flag(key: &str, value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => {
            tracing::warn!(key, value, "unrecognized boolean override; keeping configured value");
            None
        }
    }
}
