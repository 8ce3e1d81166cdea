//! Configuration structures for the drive stack.
//!
//! Supports TOML deserialization with sensible defaults for bench testing
//! and explicit values for production deployment. All durations use the
//! humantime format ("2s", "500ms").

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Top-level driver configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveConfig {
    /// Network transport settings.
    pub transport: TransportConfig,
    /// SDO request retry policy.
    pub sdo: SdoConfig,
    /// Controller timing and motion profile defaults.
    pub motion: MotionConfig,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            sdo: SdoConfig::default(),
            motion: MotionConfig::default(),
        }
    }
}

impl DriveConfig {
    /// Parse a configuration from a TOML string.
    pub fn from_toml(input: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(input)?)
    }

    /// Serialize the configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Connection endpoint and link supervision settings.
///
/// Owned exclusively by the transport and immutable after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Drive hostname or IP address.
    pub host: String,

    /// Modbus TCP port of the drive.
    pub port: u16,

    /// Modbus unit identifier (drive address).
    pub unit_id: u8,

    /// TCP connect timeout.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Read/write timeout for a single frame exchange.
    #[serde(with = "humantime_serde")]
    pub io_timeout: Duration,

    /// Reconnection policy after a link failure.
    pub reconnect: ReconnectConfig,

    /// Link liveness probing.
    pub heartbeat: HeartbeatConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            host: "192.168.0.100".into(),
            port: 502,
            unit_id: 0,
            connect_timeout: Duration::from_secs(2),
            io_timeout: Duration::from_secs(1),
            reconnect: ReconnectConfig::default(),
            heartbeat: HeartbeatConfig::default(),
        }
    }
}

impl TransportConfig {
    /// The `host:port` endpoint string.
    #[must_use]
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Bounded reconnection with a fixed backoff delay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Reconnection attempts per call before surfacing a transport error.
    pub max_attempts: u32,

    /// Delay between reconnection attempts.
    #[serde(with = "humantime_serde")]
    pub delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(500),
        }
    }
}

/// Periodic liveness probing of the link.
///
/// A silently dead socket is detected by reading the statusword on a fixed
/// interval; after `max_misses` consecutive failures the link is torn down
/// so reconnection happens before an application call blocks on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Enable the background heartbeat thread.
    pub enabled: bool,

    /// Interval between liveness probes.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// Consecutive probe failures tolerated before the link is torn down.
    pub max_misses: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(2),
            max_misses: 3,
        }
    }
}

/// SDO request retry policy.
///
/// Only timeout-class failures are retried; aborts and malformed frames
/// surface immediately.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SdoConfig {
    /// Retries after the initial attempt times out.
    pub retries: u32,

    /// Delay between retry attempts.
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
}

impl Default for SdoConfig {
    fn default() -> Self {
        Self {
            retries: 3,
            retry_delay: Duration::from_millis(100),
        }
    }
}

/// Controller timing budgets and motion profile defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    /// Budget for walking the power state machine to a requested state.
    #[serde(with = "humantime_serde")]
    pub state_timeout: Duration,

    /// Delay between statusword polls.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Budget for a positioning move to report target-reached.
    #[serde(with = "humantime_serde")]
    pub motion_timeout: Duration,

    /// Budget for a homing run to report completion.
    #[serde(with = "humantime_serde")]
    pub homing_timeout: Duration,

    /// Default profile velocity, in device units.
    pub profile_velocity: u32,

    /// Default profile acceleration, in device units.
    pub profile_acceleration: u32,

    /// Default profile deceleration, in device units.
    pub profile_deceleration: u32,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            state_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(50),
            motion_timeout: Duration::from_secs(30),
            homing_timeout: Duration::from_secs(60),
            profile_velocity: 2000,
            profile_acceleration: 2000,
            profile_deceleration: 2000,
        }
    }
}

/// Errors arising from the configuration surface.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// TOML parsing error.
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Serde helper module for `Duration` using humantime format.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DriveConfig::default();
        assert_eq!(config.transport.port, 502);
        assert_eq!(config.transport.connect_timeout, Duration::from_secs(2));
        assert_eq!(config.transport.reconnect.max_attempts, 3);
        assert!(config.transport.heartbeat.enabled);
        assert_eq!(config.sdo.retries, 3);
        assert_eq!(config.motion.profile_velocity, 2000);
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
            [transport]
            host = "10.0.0.42"
            port = 503
            unit_id = 1
            io_timeout = "250ms"

            [transport.heartbeat]
            enabled = false
            interval = "5s"

            [motion]
            state_timeout = "2s"
            profile_velocity = 1500
        "#;

        let config = DriveConfig::from_toml(toml).unwrap();
        assert_eq!(config.transport.host, "10.0.0.42");
        assert_eq!(config.transport.port, 503);
        assert_eq!(config.transport.unit_id, 1);
        assert_eq!(config.transport.io_timeout, Duration::from_millis(250));
        assert!(!config.transport.heartbeat.enabled);
        assert_eq!(config.transport.heartbeat.interval, Duration::from_secs(5));
        assert_eq!(config.motion.state_timeout, Duration::from_secs(2));
        assert_eq!(config.motion.profile_velocity, 1500);
        // Unspecified sections keep their defaults.
        assert_eq!(config.sdo.retries, 3);
    }

    #[test]
    fn test_roundtrip_toml() {
        let config = DriveConfig::default();
        let toml = config.to_toml().unwrap();
        let parsed = DriveConfig::from_toml(&toml).unwrap();
        assert_eq!(parsed.transport.host, config.transport.host);
        assert_eq!(parsed.transport.io_timeout, config.transport.io_timeout);
        assert_eq!(parsed.motion.motion_timeout, config.motion.motion_timeout);
    }

    #[test]
    fn test_addr_format() {
        let mut transport = TransportConfig::default();
        transport.host = "drive.local".into();
        transport.port = 502;
        assert_eq!(transport.addr(), "drive.local:502");
    }
}
