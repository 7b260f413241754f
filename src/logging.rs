//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

use crate::config::{ApplicationConfig, LogFormat};

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over `application.log_level`. Installing twice
/// is a no-op.
pub fn init(config: &ApplicationConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    let result = match config.log_format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    if let Err(e) = result {
        tracing::debug!("Tracing subscriber already installed: {}", e);
    }
}
