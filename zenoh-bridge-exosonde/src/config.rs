//! Configuration for the EXO sonde bridge.
//!
//! Every field has a default matching the stock deployment (an EXO3 sonde on
//! `/dev/waggle-sensor-exosonde3` at 115200 baud), so the bridge runs without
//! a configuration file at all.

use serde::{Deserialize, Serialize};
use sondesight_common::{Format, LoggingConfig, ZenohConfig};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] sondesight_common::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete bridge configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SondeBridgeConfig {
    /// Zenoh connection settings
    #[serde(default)]
    pub zenoh: ZenohConfig,

    /// Instrument settings
    #[serde(default)]
    pub sonde: SondeConfig,

    /// Envelope serialization format
    #[serde(default)]
    pub serialization: Format,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Instrument and acquisition settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SondeConfig {
    /// Instrument name (used as publication source and in key expressions)
    #[serde(default = "default_name")]
    pub name: String,

    /// Key expression prefix (default: "sondesight/exosonde")
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Serial line settings
    #[serde(default)]
    pub serial: SerialConfig,

    /// Modbus unit/slave ID (1-247)
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,

    /// Per-request response timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Sleep between acquisition cycles, in seconds
    #[serde(default = "default_sleep_secs")]
    pub sleep_secs: u64,

    /// Wait after forcing a sample, in seconds
    #[serde(default = "default_sample_dwell_secs")]
    pub sample_dwell_secs: u64,

    /// CSV reference table mapping parameter codes to names
    #[serde(default = "default_lookup_table")]
    pub lookup_table: PathBuf,
}

impl Default for SondeConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            key_prefix: default_key_prefix(),
            serial: SerialConfig::default(),
            unit_id: default_unit_id(),
            timeout_ms: default_timeout_ms(),
            sleep_secs: default_sleep_secs(),
            sample_dwell_secs: default_sample_dwell_secs(),
            lookup_table: default_lookup_table(),
        }
    }
}

fn default_name() -> String {
    "exosonde3".to_string()
}

fn default_key_prefix() -> String {
    "sondesight/exosonde".to_string()
}

fn default_unit_id() -> u8 {
    1
}

fn default_timeout_ms() -> u64 {
    1000
}

fn default_sleep_secs() -> u64 {
    15
}

fn default_sample_dwell_secs() -> u64 {
    15
}

fn default_lookup_table() -> PathBuf {
    PathBuf::from("./register_configuration.csv")
}

/// Modbus RTU serial line configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Serial port path (e.g., "/dev/ttyUSB0" or "COM1")
    #[serde(default = "default_port")]
    pub port: String,
    /// Baud rate (default: 115200)
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Data bits (default: 8)
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    /// Parity: "none", "even", or "odd" (default: "none")
    #[serde(default = "default_parity")]
    pub parity: String,
    /// Stop bits: 1 or 2 (default: 1)
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            parity: default_parity(),
            stop_bits: default_stop_bits(),
        }
    }
}

fn default_port() -> String {
    "/dev/waggle-sensor-exosonde3".to_string()
}

fn default_baud_rate() -> u32 {
    115_200
}

fn default_data_bits() -> u8 {
    8
}

fn default_parity() -> String {
    "none".to_string()
}

fn default_stop_bits() -> u8 {
    1
}

/// Durations driving the acquisition loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleTiming {
    /// Wait after the force-sample command
    pub sample_dwell: Duration,
    /// Wait after a successful publication
    pub sleep: Duration,
}

impl SondeConfig {
    /// Acquisition loop timing derived from this configuration.
    pub fn timing(&self) -> CycleTiming {
        CycleTiming {
            sample_dwell: Duration::from_secs(self.sample_dwell_secs),
            sleep: Duration::from_secs(self.sleep_secs),
        }
    }

    /// Per-request response timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl SondeBridgeConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: SondeBridgeConfig = sondesight_common::load_config(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let sonde = &self.sonde;

        if sonde.name.is_empty() {
            return Err(ConfigError::Validation(
                "Instrument name cannot be empty".to_string(),
            ));
        }

        if sonde.unit_id == 0 || sonde.unit_id > 247 {
            return Err(ConfigError::Validation(format!(
                "Instrument '{}': unit_id must be 1-247",
                sonde.name
            )));
        }

        let serial = &sonde.serial;
        if serial.port.is_empty() {
            return Err(ConfigError::Validation(format!(
                "Instrument '{}': serial port cannot be empty",
                sonde.name
            )));
        }

        if serial.baud_rate == 0 {
            return Err(ConfigError::Validation(format!(
                "Instrument '{}': baud_rate must be positive",
                sonde.name
            )));
        }

        match serial.parity.to_lowercase().as_str() {
            "none" | "even" | "odd" => {}
            _ => {
                return Err(ConfigError::Validation(format!(
                    "Instrument '{}': invalid parity '{}' (use none, even, or odd)",
                    sonde.name, serial.parity
                )));
            }
        }

        if !(5..=8).contains(&serial.data_bits) {
            return Err(ConfigError::Validation(format!(
                "Instrument '{}': data_bits must be 5-8",
                sonde.name
            )));
        }

        if !(1..=2).contains(&serial.stop_bits) {
            return Err(ConfigError::Validation(format!(
                "Instrument '{}': stop_bits must be 1 or 2",
                sonde.name
            )));
        }

        Ok(())
    }
}
