//! Configuration for the sensor agent.
//!
//! Resolution order: built-in defaults, then the optional configuration file
//! (JSON, parsed as JSON5), then environment variable overrides. The result
//! is validated once and never mutated afterwards.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::sensor::SensorRole;

/// Environment variable overriding [`AgentConfig::hue_url`].
pub const ENV_HUE_URL: &str = "PHILIPS_HUE_URL";
/// Environment variable overriding [`AgentConfig::motion_sensor_id`].
pub const ENV_MOTION_SENSOR_ID: &str = "MOTION_SENSOR_ID";
/// Environment variable overriding [`AgentConfig::light_level_sensor_id`].
pub const ENV_LIGHT_LEVEL_SENSOR_ID: &str = "LIGHT_LEVEL_SENSOR_ID";
/// Environment variable overriding [`AgentConfig::temperature_sensor_id`].
pub const ENV_TEMPERATURE_SENSOR_ID: &str = "TEMPERATURE_SENSOR_ID";
/// Environment variable overriding [`AgentConfig::relay_url`].
pub const ENV_RELAY_URL: &str = "SENSOR_RELAY_URL";
/// Environment variable overriding [`AgentConfig::port`].
pub const ENV_PORT: &str = "PORT";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Invalid config value: {0}")]
    Value(#[from] serde_json::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete agent configuration.
///
/// Keys are documented in PascalCase but matched case-insensitively, so
/// `"port"` and `"philipsHueUrl"` are accepted as well.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Base URL of the hub API, e.g. `http://10.0.0.2/api/<username>`.
    /// Empty disables polling.
    #[serde(rename = "PhilipsHueUrl", default)]
    pub hue_url: String,

    /// Hub id of the motion sensor (presence).
    #[serde(rename = "MotionSensorId", default)]
    pub motion_sensor_id: String,

    /// Hub id of the ambient light sensor.
    #[serde(rename = "LightLevelSensorId", default)]
    pub light_level_sensor_id: String,

    /// Hub id of the temperature sensor.
    #[serde(rename = "TemperatureSensorId", default)]
    pub temperature_sensor_id: String,

    /// Port for the metrics endpoint (default: 9101).
    #[serde(rename = "Port", default = "default_port")]
    pub port: u16,

    /// Relay endpoint for normalized reports. Empty disables relaying.
    #[serde(rename = "SensorRelayUrl", default)]
    pub relay_url: String,

    /// Polling behaviour.
    #[serde(rename = "Poll", default)]
    pub poll: PollConfig,

    /// Logging configuration.
    #[serde(rename = "Logging", default)]
    pub logging: LoggingConfig,
}

fn default_port() -> u16 {
    9101
}

/// How the wait between two cycles is measured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SchedulePolicy {
    /// Wait the full interval after a cycle completes. Slow upstream calls
    /// stretch the effective period.
    #[default]
    FixedDelay,
    /// Start cycles on a fixed cadence. A cycle that overruns the interval is
    /// followed immediately by the next one; cycles never overlap.
    FixedRate,
}

/// Polling loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PollConfig {
    /// Seconds between cycles (default: 10).
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Interval policy (default: "fixed-delay").
    #[serde(default)]
    pub schedule: SchedulePolicy,

    /// Timeout for the hub request, including the body (default: 5000).
    #[serde(default = "default_timeout_ms")]
    pub hub_timeout_ms: u64,

    /// Timeout for each relay attempt (default: 5000).
    #[serde(default = "default_timeout_ms")]
    pub relay_timeout_ms: u64,
}

fn default_interval_secs() -> u64 {
    10
}

fn default_timeout_ms() -> u64 {
    5000
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            schedule: SchedulePolicy::default(),
            hub_timeout_ms: default_timeout_ms(),
            relay_timeout_ms: default_timeout_ms(),
        }
    }
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn hub_timeout(&self) -> Duration {
        Duration::from_millis(self.hub_timeout_ms)
    }

    pub fn relay_timeout(&self) -> Duration {
        Duration::from_millis(self.relay_timeout_ms)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format: "text" or "json".
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format (default).
    #[default]
    Text,
    /// Structured JSON format.
    Json,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            hue_url: String::new(),
            motion_sensor_id: String::new(),
            light_level_sensor_id: String::new(),
            temperature_sensor_id: String::new(),
            port: default_port(),
            relay_url: String::new(),
            poll: PollConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Resolve the configuration from `path` and the process environment.
    ///
    /// A missing file means "use defaults"; any other read or parse failure
    /// is an error.
    pub fn resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::resolve_with(path, |key| std::env::var(key).ok())
    }

    /// Same as [`resolve`](Self::resolve) with an explicit environment lookup.
    pub fn resolve_with<P, F>(path: P, lookup: F) -> Result<Self, ConfigError>
    where
        P: AsRef<Path>,
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::load_or_default(path)?;
        config.apply_env_with(lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the file at `path`, falling back to defaults if it does not exist.
    /// No environment overlay or validation is applied.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_json5(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Parse and validate configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config = Self::from_json5(content)?;
        config.validate()?;
        Ok(config)
    }

    fn from_json5(content: &str) -> Result<Self, ConfigError> {
        let mut value: serde_json::Value = json5::from_str(content)?;

        canonicalize_keys(&mut value, TOP_LEVEL_KEYS);
        if let serde_json::Value::Object(sections) = &mut value {
            if let Some(poll) = sections.get_mut("Poll") {
                canonicalize_keys(poll, POLL_KEYS);
            }
            if let Some(logging) = sections.get_mut("Logging") {
                canonicalize_keys(logging, LOGGING_KEYS);
            }
        }

        Ok(serde_json::from_value(value)?)
    }

    /// Overlay environment variables on top of the current values.
    ///
    /// A variable that is set (even to an empty string) replaces the file
    /// value.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let strings: [(&str, &mut String); 5] = [
            (ENV_HUE_URL, &mut self.hue_url),
            (ENV_MOTION_SENSOR_ID, &mut self.motion_sensor_id),
            (ENV_LIGHT_LEVEL_SENSOR_ID, &mut self.light_level_sensor_id),
            (ENV_TEMPERATURE_SENSOR_ID, &mut self.temperature_sensor_id),
            (ENV_RELAY_URL, &mut self.relay_url),
        ];

        for (key, slot) in strings {
            if let Some(value) = lookup(key) {
                *slot = value;
            }
        }

        if let Some(value) = lookup(ENV_PORT) {
            self.port = value.trim().parse().map_err(|_| {
                ConfigError::Validation(format!("Invalid {} value: {:?}", ENV_PORT, value))
            })?;
        }

        Ok(())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::Validation("Port must be > 0".to_string()));
        }

        if self.poll.interval_secs == 0 {
            return Err(ConfigError::Validation(
                "Poll.IntervalSecs must be > 0".to_string(),
            ));
        }

        if self.poll.hub_timeout_ms == 0 || self.poll.relay_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "Poll timeouts must be > 0".to_string(),
            ));
        }

        validate_url("PhilipsHueUrl", &self.hue_url)?;
        validate_url("SensorRelayUrl", &self.relay_url)?;

        Ok(())
    }

    /// Relay endpoint, if relaying is enabled.
    pub fn relay_url(&self) -> Option<&str> {
        if self.relay_url.is_empty() {
            None
        } else {
            Some(&self.relay_url)
        }
    }

    /// Hub id configured for a sensor role.
    pub fn sensor_id(&self, role: SensorRole) -> &str {
        match role {
            SensorRole::Motion => &self.motion_sensor_id,
            SensorRole::LightLevel => &self.light_level_sensor_id,
            SensorRole::Temperature => &self.temperature_sensor_id,
        }
    }

    /// Address for the metrics endpoint.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.port))
    }
}

const TOP_LEVEL_KEYS: &[&str] = &[
    "PhilipsHueUrl",
    "MotionSensorId",
    "LightLevelSensorId",
    "TemperatureSensorId",
    "Port",
    "SensorRelayUrl",
    "Poll",
    "Logging",
];
const POLL_KEYS: &[&str] = &["IntervalSecs", "Schedule", "HubTimeoutMs", "RelayTimeoutMs"];
const LOGGING_KEYS: &[&str] = &["Level", "Format"];

/// Rewrite the keys of an object to their canonical spelling when they match
/// one of `known` ignoring case. Unknown keys are left alone.
fn canonicalize_keys(value: &mut serde_json::Value, known: &[&str]) {
    let serde_json::Value::Object(map) = value else {
        return;
    };

    for (key, entry) in std::mem::take(map) {
        let key = known
            .iter()
            .find(|name| name.eq_ignore_ascii_case(&key))
            .map_or(key, |name| name.to_string());
        map.insert(key, entry);
    }
}

fn validate_url(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.is_empty() {
        return Ok(());
    }

    let url = reqwest::Url::parse(value)
        .map_err(|e| ConfigError::Validation(format!("Invalid {}: {} ({})", field, value, e)))?;

    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ConfigError::Validation(format!(
            "Invalid {}: unsupported scheme {}",
            field, other
        ))),
    }
}
