//! Configuration management for blaze-telemetry.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::packet::{StartMarker, FRAME_LEN};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Directory name under the platform config and data directories.
const APP_DIR_NAME: &str = "blaze-telemetry";

/// Environment variable prefix.
const ENV_PREFIX: &str = "BLAZE_";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `BLAZE_`, sections split on `__`,
///    e.g. `BLAZE_RADIO__RX_CAPACITY`)
/// 2. TOML config file at `~/.config/blaze-telemetry/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Flight phase detection thresholds.
    pub flight: FlightConfig,
    /// Storage buffers.
    pub storage: StorageConfig,
    /// Radio link.
    pub radio: RadioConfig,
    /// Control loop.
    pub pipeline: PipelineConfig,
}

/// Flight phase detection thresholds and dwell times.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlightConfig {
    /// Acceleration magnitude (g) above which launch is detected.
    pub launch_accel_threshold_g: f32,
    /// Vertical velocity (m/s, negative) below which apogee is detected.
    pub apogee_velocity_threshold: f32,
    /// Vertical velocity (m/s) below which the rocket is clearly falling.
    pub descent_velocity_threshold: f32,
    /// Altitude (m) below which landing is possible.
    pub landed_altitude_threshold: f32,
    /// Largest deviation from 1 g still counted as resting.
    pub landed_accel_threshold_g: f32,
    /// How long the launch condition must hold (ms).
    pub launch_dwell_ms: u64,
    /// How long the apogee condition must hold (ms).
    pub apogee_dwell_ms: u64,
    /// How long the descent condition must hold (ms).
    pub descent_dwell_ms: u64,
    /// How long the landed condition must hold (ms).
    pub landed_dwell_ms: u64,
}

/// Storage buffer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Primary (telemetry frame) buffer size in bytes.
    pub primary_capacity: usize,
    /// Archival (CSV log) buffer size in bytes.
    pub archival_capacity: usize,
    /// Directory for flight logs.
    /// Defaults to `~/.local/share/blaze-telemetry/flights`
    pub log_dir: Option<PathBuf>,
}

/// Radio link configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    /// RX ring slots (one is never used).
    pub rx_capacity: usize,
    /// TX ring slots (one is never used).
    pub tx_capacity: usize,
    /// Largest payload accepted by `write_to_tx`.
    pub max_payload: usize,
    /// Serial baud rate of the modem port.
    pub baud_rate: u32,
    /// Silence before and after the AT escape sequence (ms).
    pub at_guard_silence_ms: u64,
    /// Wait between writing and reading back a register (ms).
    pub param_settle_ms: u64,
    /// How long to wait for the AT escape reply (ms).
    pub at_reply_timeout_ms: u64,
    /// How long to wait for a register query reply (ms).
    pub query_timeout_ms: u64,
    /// Delay before sending control-channel answers, while the modem reboots (ms).
    pub response_settle_ms: u64,
    /// Text that opens a control command.
    pub control_start_token: String,
    /// Text that closes a control command.
    pub control_end_token: String,
    /// Most control-channel text kept while waiting for a complete command.
    pub control_buffer_capacity: usize,
}

/// Control loop configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Control loop period (ms).
    pub tick_interval_ms: u64,
    /// Send downlink frames every this many ticks.
    pub downlink_every: u32,
    /// Start marker stamped on telemetry frames.
    pub downlink_marker: StartMarker,
}

impl Default for FlightConfig {
    fn default() -> Self {
        Self {
            launch_accel_threshold_g: 2.0,
            apogee_velocity_threshold: -0.5,
            descent_velocity_threshold: -1.0,
            landed_altitude_threshold: 5.0,
            landed_accel_threshold_g: 0.5,
            launch_dwell_ms: 100,
            apogee_dwell_ms: 500,
            descent_dwell_ms: 0,
            landed_dwell_ms: 2000,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            primary_capacity: 512,
            archival_capacity: 2048,
            log_dir: None, // Resolved at runtime
        }
    }
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            rx_capacity: 256,
            tx_capacity: 512,
            max_payload: 32,
            baud_rate: 57_600,
            at_guard_silence_ms: 1200,
            param_settle_ms: 100,
            at_reply_timeout_ms: 1000,
            query_timeout_ms: 250,
            response_settle_ms: 5000,
            control_start_token: "rocket".to_string(),
            control_end_token: "end".to_string(),
            control_buffer_capacity: 256,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 10,
            downlink_every: 1,
            downlink_marker: StartMarker::NoResponse,
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading, parsing or validation fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(APP_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(APP_DIR_NAME)
    }

    /// Get the flight log directory, resolving defaults if not set.
    #[must_use]
    pub fn log_dir(&self) -> PathBuf {
        self.storage
            .log_dir
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join("flights"))
    }

    /// Get the tick interval as a Duration.
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.pipeline.tick_interval_ms)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.storage.primary_capacity == 0 || self.storage.archival_capacity == 0 {
            return Err(Error::config(
                "primary_capacity and archival_capacity must be greater than 0",
            ));
        }

        let radio = &self.radio;
        if radio.rx_capacity < 2 || radio.tx_capacity < 2 {
            return Err(Error::config(
                "rx_capacity and tx_capacity must be at least 2",
            ));
        }
        if radio.max_payload == 0 || radio.max_payload >= radio.tx_capacity {
            return Err(Error::config(format!(
                "max_payload ({}) must be between 1 and tx_capacity - 1 ({})",
                radio.max_payload,
                radio.tx_capacity - 1
            )));
        }
        if radio.max_payload < FRAME_LEN {
            return Err(Error::config(format!(
                "max_payload ({}) must hold a whole frame ({FRAME_LEN} bytes)",
                radio.max_payload
            )));
        }
        if radio.control_start_token.is_empty() || radio.control_end_token.is_empty() {
            return Err(Error::config("control tokens must not be empty"));
        }
        // Tokens plus the two `-` sentinels.
        let shortest_command = radio.control_start_token.len() + radio.control_end_token.len() + 2;
        if radio.control_buffer_capacity < shortest_command {
            return Err(Error::config(format!(
                "control_buffer_capacity ({}) must hold at least {shortest_command} bytes",
                radio.control_buffer_capacity
            )));
        }

        if self.flight.apogee_velocity_threshold >= 0.0 {
            return Err(Error::config(format!(
                "apogee_velocity_threshold ({}) must be negative",
                self.flight.apogee_velocity_threshold
            )));
        }

        if self.pipeline.tick_interval_ms == 0 {
            return Err(Error::config("tick_interval_ms must be greater than 0"));
        }
        if self.pipeline.downlink_every == 0 {
            return Err(Error::config("downlink_every must be greater than 0"));
        }

        Ok(())
    }
}
