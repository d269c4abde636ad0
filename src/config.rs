//! Configuration loading using Figment.
//!
//! Configuration is layered, later sources winning:
//! 1. Built-in defaults (an 8-sensor board at 115200 baud, 60 s live window)
//! 2. A TOML file (`config/thermo.toml` unless another path is given)
//! 3. Environment variables prefixed with `THERMO_DAQ_`, nested keys separated
//!    by a double underscore
//!
//! # Example
//! ```no_run
//! use thermo_daq::config::LoggerConfig;
//!
//! let config = LoggerConfig::load()?;
//! config.validate()?;
//! println!("Logging {} sensors", config.acquisition.sensor_count);
//! # Ok::<(), thermo_daq::error::LoggerError>(())
//! ```
//!
//! Override from the shell:
//! ```bash
//! THERMO_DAQ_SERIAL__PORT=/dev/ttyACM0 THERMO_DAQ_DISPLAY__UNIT=F thermo-daq run
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::acquisition::AcquisitionSettings;
use crate::error::{LoggerError, LoggerResult};
use crate::presentation::{AxisBounds, SplitLayout, TemperatureUnit, ViewMode, ViewState};
use crate::protocol::DEFAULT_READY_SENTINEL;
use crate::sink::LogColumns;
use crate::store::DEFAULT_CAPACITY;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/thermo.toml";

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "THERMO_DAQ_";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    /// Name and log level.
    pub application: ApplicationConfig,
    /// Device link.
    pub serial: SerialConfig,
    /// Sensor count and live history bounds.
    pub acquisition: AcquisitionConfig,
    /// CSV log location and layout.
    pub storage: StorageConfig,
    /// Initial view state.
    pub display: DisplayConfig,
    /// Simulated board used with `--simulate`.
    pub simulation: SimulationConfig,
}

/// Application-level settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Shown in the CLI banner.
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

/// Device link settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Serial device path, e.g. `/dev/ttyACM0` or `COM4`.
    pub port: Option<String>,
    /// Line speed; the firmware uses 115200.
    pub baud_rate: u32,
    /// Line the firmware prints once it is ready to stream.
    pub ready_sentinel: String,
    /// Polling tick period.
    pub poll_interval_ms: u64,
}

/// What the live store keeps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Sensors on the board; every record carries a hot and a cold value for each.
    pub sensor_count: usize,
    /// Sliding window of history kept for display.
    pub history_seconds: f64,
    /// Hard bound on records held in memory.
    pub buffer_capacity: usize,
}

/// Where and how the CSV log is written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root of the dated log tree.
    pub root_dir: PathBuf,
    /// Experiment name, used in the log file name.
    pub experiment: String,
    /// Channel columns written to the log.
    pub columns: LogColumns,
    /// Sync every row to disk, not only to the OS.
    pub fsync: bool,
}

/// Initial display state. Cosmetic only, never affects parsing or logging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Unit for live readouts and plots.
    pub unit: TemperatureUnit,
    /// Single combined plot or split layout.
    pub view_mode: ViewMode,
    /// Legend names per sensor; missing entries fall back to `Sensor {i}`.
    pub sensor_names: Vec<String>,
    /// Suffix for hot-junction curves.
    pub hot_label: String,
    /// Suffix for cold-junction curves.
    pub cold_label: String,
    /// Manual plot bounds.
    pub axis: AxisBounds,
    /// Split view placement; halves of the sensor list when absent.
    pub split_layout: Option<SplitLayout>,
}

/// Simulated device used with `--simulate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Delay between simulated lines.
    pub interval_ms: u64,
    /// Fixed RNG seed for reproducible runs.
    pub seed: Option<u64>,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "Thermocouple Logger".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: 115_200,
            ready_sentinel: DEFAULT_READY_SENTINEL.to_string(),
            poll_interval_ms: 100,
        }
    }
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            sensor_count: 8,
            history_seconds: 60.0,
            buffer_capacity: DEFAULT_CAPACITY,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("DataLog"),
            experiment: "HotWater".to_string(),
            columns: LogColumns::HotAndCold,
            fsync: false,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            unit: TemperatureUnit::Celsius,
            view_mode: ViewMode::Merged,
            sensor_names: Vec::new(),
            hot_label: "Hot".to_string(),
            cold_label: "Cold".to_string(),
            axis: AxisBounds::default(),
            split_layout: None,
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            seed: None,
        }
    }
}

impl LoggerConfig {
    /// Load from `config/thermo.toml` and the environment.
    pub fn load() -> LoggerResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file path and the environment.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> LoggerResult<Self> {
        Ok(Self::figment(path).extract()?)
    }

    /// The provider stack behind [`LoggerConfig::load_from`].
    pub fn figment<P: AsRef<Path>>(path: P) -> Figment {
        Figment::from(Serialized::defaults(LoggerConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Check values that deserialize fine but cannot run.
    pub fn validate(&self) -> LoggerResult<()> {
        let invalid = |msg: String| -> LoggerResult<()> { Err(LoggerError::Configuration(msg)) };

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return invalid(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.serial.baud_rate == 0 {
            return invalid("serial.baud_rate must be positive".to_string());
        }
        if self.serial.ready_sentinel.trim().is_empty() {
            return invalid("serial.ready_sentinel cannot be empty".to_string());
        }
        if self.serial.poll_interval_ms == 0 {
            return invalid("serial.poll_interval_ms must be positive".to_string());
        }

        let sensors = self.acquisition.sensor_count;
        if sensors == 0 {
            return invalid("acquisition.sensor_count must be positive".to_string());
        }
        if !self.acquisition.history_seconds.is_finite() || self.acquisition.history_seconds <= 0.0 {
            return invalid(format!(
                "acquisition.history_seconds must be a positive number, got {}",
                self.acquisition.history_seconds
            ));
        }
        if self.acquisition.buffer_capacity == 0 {
            return invalid("acquisition.buffer_capacity must be positive".to_string());
        }

        if self.storage.experiment.trim().is_empty() {
            return invalid("storage.experiment cannot be empty".to_string());
        }
        if self.storage.experiment.contains(['/', '\\']) {
            return invalid(format!(
                "storage.experiment '{}' cannot contain path separators",
                self.storage.experiment
            ));
        }

        if !self.display.sensor_names.is_empty() && self.display.sensor_names.len() != sensors {
            return invalid(format!(
                "display.sensor_names has {} entries for {} sensors",
                self.display.sensor_names.len(),
                sensors
            ));
        }
        if let Some(layout) = &self.display.split_layout {
            if let Some(bad) = layout.left.iter().chain(&layout.right).find(|&&s| s >= sensors) {
                return invalid(format!(
                    "display.split_layout references sensor {bad}, only {sensors} configured"
                ));
            }
        }
        self.display.axis.validate()?;

        if self.simulation.interval_ms == 0 {
            return invalid("simulation.interval_ms must be positive".to_string());
        }

        Ok(())
    }

    /// Tick period of the acquisition loop.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.serial.poll_interval_ms)
    }

    /// Settings for [`crate::acquisition::Acquisition`].
    pub fn acquisition_settings(&self) -> AcquisitionSettings {
        AcquisitionSettings {
            sensor_count: self.acquisition.sensor_count,
            window_seconds: self.acquisition.history_seconds,
            ready_sentinel: self.serial.ready_sentinel.clone(),
        }
    }

    /// Initial view state from the display section.
    pub fn view_state(&self) -> ViewState {
        let sensors = self.acquisition.sensor_count;
        let split = self
            .display
            .split_layout
            .clone()
            .unwrap_or_else(|| SplitLayout::halves(sensors));
        ViewState::new(sensors)
            .with_unit(self.display.unit)
            .with_mode(self.display.view_mode)
            .with_axis(self.display.axis)
            .with_split_layout(split)
            .with_labels(
                &self.display.sensor_names,
                self.display.hot_label.as_str(),
                self.display.cold_label.as_str(),
            )
    }
}
