//! Driver tuning, loadable from JSON.

use std::path::Path;
use std::time::Duration;

use ledlink_frame::{ConnectionConfig, DEFAULT_MAX_PAYLOAD};
use ledlink_peer::{ChannelConfig, HandshakeConfig, PeerConfig};
use serde::{Deserialize, Serialize};

use crate::error::{DriverError, Result};

/// Durations are written as whole milliseconds.
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Buffering policy of one animation player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Frames the buffer is topped back up to.
    pub target_stack_size: usize,
    /// Fraction of `target_stack_size` under which a refill is requested.
    pub request_threshold: f64,
    /// Transient refill failures tolerated in a row before playback stops.
    pub max_consecutive_failures: u32,
    /// Bound on joining the playback thread.
    #[serde(with = "millis")]
    pub stop_timeout: Duration,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            target_stack_size: 64,
            request_threshold: 0.25,
            max_consecutive_failures: 3,
            stop_timeout: Duration::from_secs(1),
        }
    }
}

impl PlayerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.target_stack_size == 0 {
            return Err(DriverError::Config(
                "target_stack_size must be positive".to_string(),
            ));
        }
        if !(self.request_threshold > 0.0 && self.request_threshold <= 1.0) {
            return Err(DriverError::Config(format!(
                "request_threshold {} outside (0, 1]",
                self.request_threshold
            )));
        }
        if self.max_consecutive_failures == 0 {
            return Err(DriverError::Config(
                "max_consecutive_failures must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Everything a driver process needs besides its strips.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    #[serde(with = "millis")]
    pub max_idle_time: Duration,
    #[serde(with = "millis")]
    pub poll_interval: Duration,
    #[serde(with = "millis")]
    pub handoff_timeout: Duration,
    pub max_payload_size: usize,
    /// Deadline for driver-initiated requests (buffer refills).
    #[serde(with = "millis")]
    pub request_timeout: Duration,
    pub max_token_len: usize,
    pub player: PlayerConfig,
}

impl Default for DriverConfig {
    fn default() -> Self {
        let connection = ConnectionConfig::default();
        let channel = ChannelConfig::default();
        Self {
            max_idle_time: connection.max_idle_time,
            poll_interval: connection.poll_interval,
            handoff_timeout: connection.handoff_timeout,
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            request_timeout: channel.request_timeout,
            max_token_len: HandshakeConfig::default().max_token_len,
            player: PlayerConfig::default(),
        }
    }
}

impl DriverConfig {
    /// Read and validate a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|err| DriverError::Config(format!("{}: {err}", path.display())))?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|err| DriverError::Config(format!("{}: {err}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(DriverError::Config("poll_interval must be positive".to_string()));
        }
        if self.max_idle_time <= self.poll_interval {
            return Err(DriverError::Config(
                "max_idle_time must exceed poll_interval".to_string(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(DriverError::Config(
                "request_timeout must be positive".to_string(),
            ));
        }
        self.player.validate()
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            max_idle_time: self.max_idle_time,
            poll_interval: self.poll_interval,
            handoff_timeout: self.handoff_timeout,
            max_payload_size: self.max_payload_size,
            ..ConnectionConfig::default()
        }
    }

    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            request_timeout: self.request_timeout,
            poll_interval: self.poll_interval,
        }
    }

    /// Settings for accepted portal links.
    pub fn peer_config(&self) -> PeerConfig {
        PeerConfig {
            connection: self.connection_config(),
            channel: self.channel_config(),
        }
    }

    pub fn handshake_config(&self) -> HandshakeConfig {
        HandshakeConfig {
            max_token_len: self.max_token_len,
            ..HandshakeConfig::default()
        }
    }
}
