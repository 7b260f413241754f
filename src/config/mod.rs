//! Configuration System
//!
//! Strongly-typed settings loaded with Figment.
//!
//! # Configuration Sources
//!
//! Configuration is loaded from (in order of precedence):
//! 1. Environment variables prefixed with `LABDAQ_`
//! 2. TOML configuration file (default: `config/labdaq.toml`)
//!
//! # Example
//!
//! ```no_run
//! use rust_labdaq::config::Settings;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = Settings::load_from("config/labdaq.toml")?;
//!     println!("Declared devices: {}", settings.devices.len());
//!     Ok(())
//! }
//! ```
//!
//! # Environment Variables
//!
//! Nested keys are separated by a double underscore so that field names may
//! keep their own underscores:
//!
//! ```text
//! LABDAQ_APPLICATION__LOG_LEVEL=debug
//! LABDAQ_SERVER__BASE_PORT=60000
//! LABDAQ_BUS__POLL_INTERVAL="250ms"
//! ```

mod settings;

pub use settings::{
    ApplicationConfig, BusConfig, DeviceConfiguration, DeviceDefinition, DeviceKind,
    EncryptionConfig, LogFormat, PublisherConfig, ServerConfig, Settings, TrackerConfig,
};
