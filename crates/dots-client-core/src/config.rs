//! Client configuration
//!
//! Session defaults, message task parameters and block-size overrides are
//! carried in one explicit [`ClientConfig`] value handed to the environment at
//! construction time. Nothing here is global.

use core::time::Duration;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::block::LARGEST_SZX;
use crate::errors::{ConfigError, DotsResult};

// ----------------------------------------------------------------------------
// Session Defaults
// ----------------------------------------------------------------------------

/// Default signal session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionDefaults {
    /// Interval between heartbeats in seconds
    pub heartbeat_interval_secs: u64,
    /// Missing heartbeats tolerated before the session is torn down
    pub missing_hb_allowed: u32,
    /// Transport-level retransmissions of confirmable messages
    pub max_retransmit: u32,
    /// Initial acknowledgement timeout in seconds
    pub ack_timeout_secs: f64,
    /// Randomization applied to the acknowledgement timeout
    pub ack_random_factor: f64,
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 30,
            missing_hb_allowed: 15,
            max_retransmit: 3,
            ack_timeout_secs: 2.0,
            ack_random_factor: 1.5,
        }
    }
}

impl SessionDefaults {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Check the session parameters; NaN and infinite timings are rejected
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::Invalid {
            reason: reason.to_string(),
        };

        if self.heartbeat_interval_secs == 0 {
            return Err(invalid("heartbeat interval must be greater than 0"));
        }
        if self.missing_hb_allowed == 0 {
            return Err(invalid("missing heartbeat allowance must be greater than 0"));
        }
        if !(self.ack_timeout_secs > 0.0 && self.ack_timeout_secs.is_finite()) {
            return Err(invalid("ack timeout must be a positive number of seconds"));
        }
        if !(self.ack_random_factor >= 1.0 && self.ack_random_factor.is_finite()) {
            return Err(invalid("ack random factor must be at least 1.0"));
        }
        Ok(())
    }

    pub fn retransmit_params(&self) -> RetransmitParams {
        RetransmitParams {
            max_retransmit: self.max_retransmit,
            ack_timeout_secs: self.ack_timeout_secs,
            ack_random_factor: self.ack_random_factor,
        }
    }
}

/// Transport retransmission parameters pushed to the session
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetransmitParams {
    pub max_retransmit: u32,
    pub ack_timeout_secs: f64,
    pub ack_random_factor: f64,
}

impl RetransmitParams {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.ack_timeout_secs)
    }
}

// ----------------------------------------------------------------------------
// Message Task Configuration
// ----------------------------------------------------------------------------

/// Retry and timeout parameters for message tasks of one delivery class
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageTaskConfig {
    /// Spacing between application-level retransmissions in seconds
    pub interval_secs: u64,
    /// Retransmission budget
    pub retry: u32,
    /// Overall timeout in seconds
    pub timeout_secs: u64,
}

impl MessageTaskConfig {
    pub fn confirmable() -> Self {
        Self {
            interval_secs: 2,
            retry: 3,
            timeout_secs: 10,
        }
    }

    pub fn non_confirmable() -> Self {
        Self {
            interval_secs: 2,
            retry: 3,
            timeout_secs: 10,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// ----------------------------------------------------------------------------
// Block Size Configuration
// ----------------------------------------------------------------------------

/// Block size overrides, expressed as size exponents (SZX)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockSizeConfig {
    /// Size requested regardless of what the server negotiated
    pub initial_request_block_size: Option<u8>,
    /// Smaller size requested from the second block on
    pub second_request_block_size: Option<u8>,
}

// ----------------------------------------------------------------------------
// Channel and Driver Configuration
// ----------------------------------------------------------------------------

/// Bounded queue sizes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Shared task event queue (tasks -> dispatch loop)
    pub event_buffer_size: usize,
    /// Client event queue (environment -> application)
    pub client_event_buffer_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: 32,
            client_event_buffer_size: 64,
        }
    }
}

impl ChannelConfig {
    /// Create configuration optimized for testing
    pub fn testing() -> Self {
        Self {
            event_buffer_size: 128,
            client_event_buffer_size: 128,
        }
    }
}

/// Outer driver loop parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Time handed to the transport per poll, in milliseconds
    pub poll_slice_ms: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self { poll_slice_ms: 50 }
    }
}

impl DriverConfig {
    pub fn poll_slice(&self) -> Duration {
        Duration::from_millis(self.poll_slice_ms)
    }
}

// ----------------------------------------------------------------------------
// Client Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for a DOTS signal client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub session: SessionDefaults,
    pub confirmable: MessageTaskConfig,
    pub non_confirmable: MessageTaskConfig,
    pub block: BlockSizeConfig,
    /// Ping interval in seconds, 0 disables pings
    pub ping_interval_secs: u64,
    /// Lead time before a session configuration Max-Age expires, in seconds
    pub interval_before_max_age_secs: u64,
    pub channels: ChannelConfig,
    pub driver: DriverConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            session: SessionDefaults::default(),
            confirmable: MessageTaskConfig::confirmable(),
            non_confirmable: MessageTaskConfig::non_confirmable(),
            block: BlockSizeConfig::default(),
            ping_interval_secs: 0,
            interval_before_max_age_secs: 120,
            channels: ChannelConfig::default(),
            driver: DriverConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Configuration with short timers for tests
    pub fn testing() -> Self {
        Self {
            session: SessionDefaults {
                heartbeat_interval_secs: 1,
                missing_hb_allowed: 3,
                ..SessionDefaults::default()
            },
            confirmable: MessageTaskConfig {
                interval_secs: 1,
                retry: 0,
                timeout_secs: 5,
            },
            non_confirmable: MessageTaskConfig {
                interval_secs: 1,
                retry: 3,
                timeout_secs: 5,
            },
            block: BlockSizeConfig::default(),
            ping_interval_secs: 0,
            interval_before_max_age_secs: 1,
            channels: ChannelConfig::testing(),
            driver: DriverConfig { poll_slice_ms: 10 },
        }
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(source: &str) -> DotsResult<Self> {
        let config: ClientConfig = toml::from_str(source).map_err(ConfigError::from)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> DotsResult<Self> {
        let source = std::fs::read_to_string(path.as_ref()).map_err(ConfigError::from)?;
        let config = Self::from_toml_str(&source)?;
        tracing::debug!("Loaded client configuration from {}", path.as_ref().display());
        Ok(config)
    }

    /// Validate the configuration for consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::Invalid {
            reason: reason.to_string(),
        };

        self.session.validate()?;
        for (name, task) in [
            ("confirmable", &self.confirmable),
            ("non_confirmable", &self.non_confirmable),
        ] {
            if task.timeout_secs == 0 {
                return Err(ConfigError::Invalid {
                    reason: format!("{} task timeout must be greater than 0", name),
                });
            }
        }
        for szx in [
            self.block.initial_request_block_size,
            self.block.second_request_block_size,
        ]
        .into_iter()
        .flatten()
        {
            if szx > LARGEST_SZX {
                return Err(ConfigError::Invalid {
                    reason: format!("block size exponent {} exceeds {}", szx, LARGEST_SZX),
                });
            }
        }
        if self.channels.event_buffer_size == 0 || self.channels.client_event_buffer_size == 0 {
            return Err(invalid("channel buffers must hold at least one event"));
        }
        if self.driver.poll_slice_ms == 0 {
            return Err(invalid("driver poll slice must be greater than 0"));
        }
        Ok(())
    }

    /// Ping interval, `None` when pings are disabled
    pub fn ping_interval(&self) -> Option<Duration> {
        (self.ping_interval_secs > 0).then(|| Duration::from_secs(self.ping_interval_secs))
    }

    pub fn interval_before_max_age(&self) -> Duration {
        Duration::from_secs(self.interval_before_max_age_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::DotsError;

    #[test]
    fn defaults_match_signal_channel_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.session.heartbeat_interval(), Duration::from_secs(30));
        assert_eq!(config.session.missing_hb_allowed, 15);
        assert_eq!(config.session.max_retransmit, 3);
        assert_eq!(config.channels.event_buffer_size, 32);
        assert!(config.ping_interval().is_none());
        assert!(config.validate().is_ok());
        assert!(ClientConfig::testing().validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = ClientConfig::from_toml_str(
            r#"
            ping_interval_secs = 20

            [session]
            heartbeat_interval_secs = 15

            [block]
            second_request_block_size = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.session.heartbeat_interval_secs, 15);
        assert_eq!(config.session.missing_hb_allowed, 15);
        assert_eq!(config.block.second_request_block_size, Some(2));
        assert_eq!(config.ping_interval(), Some(Duration::from_secs(20)));
    }

    #[test]
    fn rejects_oversized_block_exponent() {
        let result = ClientConfig::from_toml_str("[block]\ninitial_request_block_size = 7\n");
        assert!(matches!(
            result,
            Err(DotsError::Config(ConfigError::Invalid { .. }))
        ));
    }

    #[test]
    fn rejects_non_finite_ack_timing() {
        for timeout in [f64::NAN, f64::INFINITY, 0.0, -1.0] {
            let session = SessionDefaults {
                ack_timeout_secs: timeout,
                ..SessionDefaults::default()
            };
            assert!(session.validate().is_err(), "ack timeout {} accepted", timeout);
        }

        let session = SessionDefaults {
            ack_random_factor: f64::NAN,
            ..SessionDefaults::default()
        };
        assert!(session.validate().is_err());

        let result = ClientConfig::from_toml_str("[session]\nack_timeout_secs = nan\n");
        assert!(matches!(
            result,
            Err(DotsError::Config(ConfigError::Invalid { .. }))
        ));
    }

    #[test]
    fn rejects_malformed_toml() {
        let result = ClientConfig::from_toml_str("session = 3");
        assert!(matches!(result, Err(DotsError::Config(ConfigError::Parse(_)))));
    }
}
