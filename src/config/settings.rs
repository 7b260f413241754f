//! Settings structs, defaults and validation.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{AppResult, LabError};
use crate::hardware::DC_LINK_UNDER_VOLTAGE;

/// Top-level settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Bus and supervisor settings
    #[serde(default)]
    pub bus: BusConfig,
    /// Endpoint settings
    #[serde(default)]
    pub server: ServerConfig,
    /// Command execution tracker cadences
    #[serde(default)]
    pub tracker: TrackerConfig,
    /// Property publisher cadences
    #[serde(default)]
    pub publisher: PublisherConfig,
    /// Declared devices, in declaration order
    #[serde(default)]
    pub devices: Vec<DeviceDefinition>,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_app_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format
    #[serde(default)]
    pub log_format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable lines
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Bus and supervisor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Device configuration handed to the bus on open
    #[serde(default = "default_bus_config_path")]
    pub config_path: PathBuf,
    /// Supervisor poll interval
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Emergency code treated as "controller powered off"
    #[serde(default = "default_under_voltage_code")]
    pub under_voltage_code: u32,
}

/// Endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Port of the first endpoint; later endpoints count up from here
    #[serde(default = "default_base_port")]
    pub base_port: u16,
    /// Optional encryption material for all endpoints
    #[serde(default)]
    pub encryption: Option<EncryptionConfig>,
}

/// Certificate and key used by the endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncryptionConfig {
    /// PEM certificate
    pub cert_path: PathBuf,
    /// PEM private key
    pub key_path: PathBuf,
}

/// Command execution tracker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Loop cadence of a running command
    #[serde(default = "default_liveness_interval", with = "humantime_serde")]
    pub liveness_interval: Duration,
    /// Minimum spacing of emitted progress updates
    #[serde(default = "default_progress_interval", with = "humantime_serde")]
    pub progress_interval: Duration,
    /// Wait before re-reading a zero rate at start
    #[serde(default = "default_start_retry_delay", with = "humantime_serde")]
    pub start_retry_delay: Duration,
    /// Added to the computed duration of every operation
    #[serde(default = "default_completion_margin", with = "humantime_serde")]
    pub completion_margin: Duration,
    /// Upper bound for pump calibration on initialize
    #[serde(default = "default_initialize_timeout", with = "humantime_serde")]
    pub initialize_timeout: Duration,
    /// How long finished executions stay queryable
    #[serde(default = "default_execution_retention", with = "humantime_serde")]
    pub execution_retention: Duration,
}

/// Property publisher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherConfig {
    /// Cadence of fast signals (flow rate, fill level, position)
    #[serde(default = "default_fast_interval", with = "humantime_serde")]
    pub fast_interval: Duration,
    /// Cadence of configuration-like attributes (drive state, syringe)
    #[serde(default = "default_slow_interval", with = "humantime_serde")]
    pub slow_interval: Duration,
    /// Relative tolerance for float attributes (flow, fill level, setpoints)
    #[serde(default = "default_relative_tolerance")]
    pub relative_tolerance: f64,
    /// Relative tolerance for axis positions
    #[serde(default = "default_position_tolerance")]
    pub position_tolerance: f64,
    /// Relative tolerance for analog channels and controller actual values
    #[serde(default = "default_signal_tolerance")]
    pub signal_tolerance: f64,
    /// Relative tolerance for force sensor readings
    #[serde(default = "default_force_tolerance")]
    pub force_tolerance: f64,
    /// Buffered updates per subscriber
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

/// Declared kind of a device.
///
/// Only `Io` changes discovery: such devices never own valves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    /// No declared kind
    #[default]
    Generic,
    /// Syringe or continuous flow pump
    Pump,
    /// Axis system
    AxisSystem,
    /// Stand-alone valve
    Valve,
    /// Controller
    Controller,
    /// I/O convenience device
    Io,
}

/// Device declared in the configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDefinition {
    /// Unique device name as configured on the bus
    pub name: String,
    /// Declared kind
    #[serde(default)]
    pub kind: DeviceKind,
}

impl DeviceDefinition {
    /// Convenience constructor.
    pub fn new(name: impl Into<String>, kind: DeviceKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Ordered collection of declared devices; source of truth for ownership.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceConfiguration {
    devices: Vec<DeviceDefinition>,
}

impl DeviceConfiguration {
    /// Wrap a device list, keeping its order.
    pub fn new(devices: Vec<DeviceDefinition>) -> Self {
        Self { devices }
    }

    /// Declared devices in declaration order.
    pub fn devices(&self) -> &[DeviceDefinition] {
        &self.devices
    }

    /// Look up a declared device by name.
    pub fn get(&self, name: &str) -> Option<&DeviceDefinition> {
        self.devices.iter().find(|d| d.name == name)
    }

    /// Number of declared devices.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// True if nothing is declared.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_app_name() -> String {
    "rust_labdaq".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_bus_config_path() -> PathBuf {
    PathBuf::from("config/devices")
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_under_voltage_code() -> u32 {
    DC_LINK_UNDER_VOLTAGE
}

fn default_base_port() -> u16 {
    50051
}

fn default_liveness_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_progress_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_start_retry_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_completion_margin() -> Duration {
    Duration::from_secs(2)
}

fn default_initialize_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_execution_retention() -> Duration {
    Duration::from_secs(600)
}

fn default_fast_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_slow_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_relative_tolerance() -> f64 {
    1e-3
}

fn default_position_tolerance() -> f64 {
    2e-3
}

fn default_signal_tolerance() -> f64 {
    3e-3
}

fn default_force_tolerance() -> f64 {
    1e-3
}

fn default_channel_capacity() -> usize {
    16
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            log_level: default_log_level(),
            log_format: LogFormat::default(),
        }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            config_path: default_bus_config_path(),
            poll_interval: default_poll_interval(),
            under_voltage_code: default_under_voltage_code(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_port: default_base_port(),
            encryption: None,
        }
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            liveness_interval: default_liveness_interval(),
            progress_interval: default_progress_interval(),
            start_retry_delay: default_start_retry_delay(),
            completion_margin: default_completion_margin(),
            initialize_timeout: default_initialize_timeout(),
            execution_retention: default_execution_retention(),
        }
    }
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            fast_interval: default_fast_interval(),
            slow_interval: default_slow_interval(),
            relative_tolerance: default_relative_tolerance(),
            position_tolerance: default_position_tolerance(),
            signal_tolerance: default_signal_tolerance(),
            force_tolerance: default_force_tolerance(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

// ============================================================================
// Loading and Validation
// ============================================================================

impl PublisherConfig {
    /// Accepted range of every relative tolerance (0.1 % to 0.3 %).
    pub const TOLERANCE_RANGE: std::ops::RangeInclusive<f64> = 1e-3..=3e-3;
}

impl Settings {
    /// Default settings file location.
    pub const DEFAULT_PATH: &'static str = "config/labdaq.toml";

    /// Load settings from a TOML file and `LABDAQ_` environment variables.
    ///
    /// A missing file is not an error; built-in defaults apply. The result is
    /// validated before it is returned.
    ///
    /// # Errors
    ///
    /// `LabError::Settings` if the sources cannot be deserialized,
    /// `LabError::Configuration` if validation fails.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let settings: Self = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("LABDAQ_").split("__"))
            .extract()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Declared devices as a `DeviceConfiguration`.
    pub fn device_configuration(&self) -> DeviceConfiguration {
        DeviceConfiguration::new(self.devices.clone())
    }

    /// Validate settings after loading.
    ///
    /// Checks:
    /// - Log level is valid (trace, debug, info, warn, error)
    /// - Device names are non-empty and unique
    /// - All cadences are non-zero
    /// - Tolerances lie within `PublisherConfig::TOLERANCE_RANGE` and the
    ///   channel capacity is non-zero
    /// - Every declared device fits into the port range above `base_port`
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(LabError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let mut names = HashSet::new();
        for device in &self.devices {
            if device.name.trim().is_empty() {
                return Err(LabError::Configuration(
                    "Device name cannot be empty".to_string(),
                ));
            }
            if !names.insert(device.name.as_str()) {
                return Err(LabError::Configuration(format!(
                    "Duplicate device name: '{}'",
                    device.name
                )));
            }
        }

        let cadences = [
            ("bus.poll_interval", self.bus.poll_interval),
            ("tracker.liveness_interval", self.tracker.liveness_interval),
            ("tracker.progress_interval", self.tracker.progress_interval),
            ("tracker.execution_retention", self.tracker.execution_retention),
            ("publisher.fast_interval", self.publisher.fast_interval),
            ("publisher.slow_interval", self.publisher.slow_interval),
        ];
        for (key, value) in cadences {
            if value.is_zero() {
                return Err(LabError::Configuration(format!("{key} must be > 0")));
            }
        }

        let tolerances = [
            ("publisher.relative_tolerance", self.publisher.relative_tolerance),
            ("publisher.position_tolerance", self.publisher.position_tolerance),
            ("publisher.signal_tolerance", self.publisher.signal_tolerance),
            ("publisher.force_tolerance", self.publisher.force_tolerance),
        ];
        for (key, value) in tolerances {
            if !PublisherConfig::TOLERANCE_RANGE.contains(&value) {
                return Err(LabError::Configuration(format!(
                    "{key} = {value} must be between {} and {}",
                    PublisherConfig::TOLERANCE_RANGE.start(),
                    PublisherConfig::TOLERANCE_RANGE.end()
                )));
            }
        }
        if self.publisher.channel_capacity == 0 {
            return Err(LabError::Configuration(
                "publisher.channel_capacity must be > 0".to_string(),
            ));
        }

        let last_port = u32::from(self.server.base_port) + self.devices.len() as u32;
        if last_port > u32::from(u16::MAX) {
            return Err(LabError::Configuration(format!(
                "{} devices do not fit above base_port {}",
                self.devices.len(),
                self.server.base_port
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    #[serial]
    fn test_load_from_file() {
        let file = write_config(
            r#"
            [application]
            log_level = "debug"

            [bus]
            poll_interval = "250ms"

            [[devices]]
            name = "neMESYS_1_Pump"
            kind = "pump"

            [[devices]]
            name = "Nemesys_IO"
            kind = "io"
            "#,
        );

        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.application.log_level, "debug");
        assert_eq!(settings.bus.poll_interval, Duration::from_millis(250));
        assert_eq!(settings.server.base_port, 50051);
        assert_eq!(settings.devices.len(), 2);
        assert_eq!(settings.devices[1].kind, DeviceKind::Io);
        assert_eq!(settings.tracker.completion_margin, Duration::from_secs(2));
    }

    #[test]
    #[serial]
    fn test_missing_file_uses_defaults() {
        let settings = Settings::load_from("does/not/exist.toml").unwrap();
        assert_eq!(settings.bus.under_voltage_code, 0x3220);
        assert!(settings.devices.is_empty());
    }

    #[test]
    #[serial]
    fn test_env_override() {
        let file = write_config("[server]\nbase_port = 50051\n");
        std::env::set_var("LABDAQ_SERVER__BASE_PORT", "60000");
        let result = Settings::load_from(file.path());
        std::env::remove_var("LABDAQ_SERVER__BASE_PORT");
        assert_eq!(result.unwrap().server.base_port, 60000);
    }

    #[test]
    fn test_duplicate_device_names_rejected() {
        let settings = Settings {
            devices: vec![
                DeviceDefinition::new("pump_1", DeviceKind::Pump),
                DeviceDefinition::new("pump_1", DeviceKind::Pump),
            ],
            ..Settings::default()
        };
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("Duplicate device name"));
    }

    #[test]
    fn test_invalid_log_level_rejected() {
        let mut settings = Settings::default();
        settings.application.log_level = "verbose".into();
        assert!(matches!(
            settings.validate(),
            Err(LabError::Configuration(_))
        ));
    }

    #[test]
    fn test_zero_cadence_rejected() {
        let mut settings = Settings::default();
        settings.publisher.fast_interval = Duration::ZERO;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_tolerance_outside_range_rejected() {
        let mut settings = Settings::default();
        assert!(settings.validate().is_ok());
        settings.publisher.relative_tolerance = 1e-9;
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("publisher.relative_tolerance"));

        let mut settings = Settings::default();
        settings.publisher.signal_tolerance = 0.01;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_device_configuration_keeps_order() {
        let settings = Settings {
            devices: vec![
                DeviceDefinition::new("b", DeviceKind::Generic),
                DeviceDefinition::new("a", DeviceKind::Valve),
            ],
            ..Settings::default()
        };
        let config = settings.device_configuration();
        assert_eq!(config.devices()[0].name, "b");
        assert_eq!(config.get("a").map(|d| d.kind), Some(DeviceKind::Valve));
    }
}
