//! Startup configuration.
//!
//! The daemon reads a single JSON document. The `vanD` section holds process
//! settings, and every other known top-level key is a group of devices of one
//! kind, keyed by an arbitrary id:
//!
//! ```json
//! {
//!   "vanD": {"scan_time": 10, "statistics_refresh_interval": 30, "prometheus_exporter_port": 31337},
//!   "li3": {"1": {"dev_name": "Li3-1", "mac_address": "FF:69:4E:38:44:B3",
//!                 "service_uuid": "...", "characteristic": "...", "timeout": 10}}
//! }
//! ```

use crate::mac_address::MacAddress;
use crate::telemetry::DeviceKind;
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Validation(String),
}

/// One configured peripheral. Never mutated after load.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DeviceConfig {
    /// Human label, exported as the `dev_name` label.
    #[serde(rename = "dev_name")]
    pub identity: String,
    #[serde(rename = "mac_address")]
    pub address: MacAddress,
    #[serde(rename = "service_uuid")]
    pub service_id: String,
    #[serde(rename = "characteristic")]
    pub characteristic_id: String,
    /// Upper bound for establishing a session with this device.
    #[serde(rename = "timeout", deserialize_with = "seconds")]
    pub discovery_timeout: Duration,
}

/// Process-level settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProcessConfig {
    #[serde(deserialize_with = "seconds")]
    pub scan_time: Duration,
    #[serde(rename = "statistics_refresh_interval", deserialize_with = "seconds")]
    pub refresh_interval: Duration,
    #[serde(rename = "prometheus_exporter_port")]
    pub exporter_port: u16,
}

/// The full configuration document.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Config {
    #[serde(rename = "vanD")]
    pub process: ProcessConfig,
    #[serde(default)]
    pub li3: BTreeMap<String, DeviceConfig>,
    #[serde(default)]
    pub govee: BTreeMap<String, DeviceConfig>,
}

impl Config {
    /// Load and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&content)
    }

    /// Parse and validate a configuration document.
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.process.refresh_interval.is_zero() {
            return Err(ConfigError::Validation(
                "statistics_refresh_interval must be greater than zero".to_string(),
            ));
        }
        for (kind, id, device) in self.devices() {
            if device.identity.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "{kind} device '{id}' has an empty dev_name"
                )));
            }
        }
        Ok(())
    }

    /// Every configured device with its kind and config id, in a stable order.
    pub fn devices(&self) -> impl Iterator<Item = (DeviceKind, &str, &DeviceConfig)> {
        let batteries = self
            .li3
            .iter()
            .map(|(id, d)| (DeviceKind::Li3Battery, id.as_str(), d));
        let hygrometers = self
            .govee
            .iter()
            .map(|(id, d)| (DeviceKind::GoveeHygrometer, id.as_str(), d));
        batteries.chain(hygrometers)
    }

    pub fn has_devices(&self) -> bool {
        !self.li3.is_empty() || !self.govee.is_empty()
    }

    /// Apply command line overrides to the process settings.
    pub fn with_overrides(
        mut self,
        scan_time: Option<Duration>,
        refresh_interval: Option<Duration>,
        exporter_port: Option<u16>,
    ) -> Result<Self, ConfigError> {
        if let Some(scan_time) = scan_time {
            self.process.scan_time = scan_time;
        }
        if let Some(refresh_interval) = refresh_interval {
            self.process.refresh_interval = refresh_interval;
        }
        if let Some(port) = exporter_port {
            self.process.exporter_port = port;
        }
        self.validate()?;
        Ok(self)
    }
}

fn seconds<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = f64::deserialize(deserializer)?;
    Duration::try_from_secs_f64(secs)
        .map_err(|e| serde::de::Error::custom(format!("invalid duration {secs}: {e}")))
}

/// Parse a duration from a human-readable string.
///
/// Supports the following suffixes:
/// - `s` or no suffix: seconds
/// - `m`: minutes
/// - `h`: hours
/// - `ms`: milliseconds
///
/// # Examples
/// ```
/// use vand::config::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("3s").unwrap(), Duration::from_secs(3));
/// assert_eq!(parse_duration("1m").unwrap(), Duration::from_secs(60));
/// assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
/// ```
pub fn parse_duration(src: &str) -> Result<Duration, String> {
    let src = src.trim();

    if src.is_empty() {
        return Err("empty duration string".to_string());
    }

    if let Some(num) = src.strip_suffix("ms") {
        let millis: u64 = num
            .trim()
            .parse()
            .map_err(|_| format!("invalid milliseconds: {}", num))?;
        return Ok(Duration::from_millis(millis));
    }

    if let Some(num) = src.strip_suffix('h') {
        let hours: u64 = num
            .trim()
            .parse()
            .map_err(|_| format!("invalid hours: {}", num))?;
        let secs = hours
            .checked_mul(3600)
            .ok_or_else(|| format!("duration too large: {}", src))?;
        return Ok(Duration::from_secs(secs));
    }

    if let Some(num) = src.strip_suffix('m') {
        let minutes: u64 = num
            .trim()
            .parse()
            .map_err(|_| format!("invalid minutes: {}", num))?;
        let secs = minutes
            .checked_mul(60)
            .ok_or_else(|| format!("duration too large: {}", src))?;
        return Ok(Duration::from_secs(secs));
    }

    if let Some(num) = src.strip_suffix('s') {
        let secs: u64 = num
            .trim()
            .parse()
            .map_err(|_| format!("invalid seconds: {}", num))?;
        return Ok(Duration::from_secs(secs));
    }

    let secs: u64 = src
        .parse()
        .map_err(|_| format!("invalid duration: {}", src))?;
    Ok(Duration::from_secs(secs))
}
