//! Configuration System using Figment
//!
//! Configuration is layered, later sources overriding earlier ones:
//! 1. Built-in defaults ([`Settings::default`])
//! 2. A TOML file (`config/serial_monitor.toml` unless another path is given)
//! 3. Environment variables prefixed with `SERIAL_MONITOR_`, nested keys
//!    separated by `__` (e.g. `SERIAL_MONITOR_SERIAL__READ_TIMEOUT_MS=5000`)
//!
//! Command-line flags are applied on top by the binary.
//!
//! # Example
//! ```no_run
//! use serial_monitor::config::Settings;
//!
//! let settings = Settings::load()?;
//! println!("Baud rate: {}", settings.serial.baud_rate);
//! # Ok::<(), serial_monitor::error::DaqError>(())
//! ```

use crate::error::{AppResult, DaqError};
use crate::measurement::LogFormat;
use crate::repeater::FailurePolicy;
use crate::transport::DEFAULT_BAUD_RATE;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/serial_monitor.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "SERIAL_MONITOR_";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// `[application]`
    pub application: ApplicationConfig,
    /// `[serial]`
    pub serial: SerialSettings,
    /// `[acquisition]`
    pub acquisition: AcquisitionConfig,
    /// `[storage]`
    pub storage: StorageConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

/// Serial line configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    /// Line speed; the board firmware expects 9600
    pub baud_rate: u32,
    /// Deadline for reading one sample, in milliseconds
    pub read_timeout_ms: u64,
    /// OS-level read timeout per poll, in milliseconds
    pub poll_interval_ms: u64,
    /// Pause between closing and reopening an already open port
    pub reset_delay_ms: u64,
}

/// Run behaviour
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// What the run does after a failed measurement
    pub failure_policy: FailurePolicy,
}

/// Log file output configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Folder used when none is given on the command line
    pub output_dir: Option<PathBuf>,
    /// Log file format; only `text` is written
    pub format: LogFormat,
    /// Placeholder written to the `Firmware Version:` header line
    pub firmware_version: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout_ms: 2000,
            poll_interval_ms: 100,
            reset_delay_ms: 0,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: None,
            format: LogFormat::Text,
            firmware_version: "yy.mm.ab".to_string(),
        }
    }
}

impl Settings {
    /// Load from the default config path and the environment.
    ///
    /// A missing file is not an error; defaults apply.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file path and the environment.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let settings: Settings = Self::figment(path.as_ref()).extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// The provider stack, exposed for callers that merge extra layers.
    #[must_use]
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(DaqError::invalid(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.serial.baud_rate == 0 {
            return Err(DaqError::invalid("serial.baud_rate must be greater than 0"));
        }

        if self.serial.read_timeout_ms == 0 {
            return Err(DaqError::invalid(
                "serial.read_timeout_ms must be greater than 0",
            ));
        }

        if self.serial.poll_interval_ms == 0 {
            return Err(DaqError::invalid(
                "serial.poll_interval_ms must be greater than 0",
            ));
        }

        if self.serial.poll_interval_ms > self.serial.read_timeout_ms {
            return Err(DaqError::invalid(format!(
                "serial.poll_interval_ms ({}) must not exceed serial.read_timeout_ms ({})",
                self.serial.poll_interval_ms, self.serial.read_timeout_ms
            )));
        }

        Ok(())
    }
}
