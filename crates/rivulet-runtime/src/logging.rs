//! Logging bootstrap

use crate::config::LoggingConfig;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

/// Install the global `tracing` subscriber described by `config`.
///
/// `RUST_LOG` overrides the configured level. Fails if a global subscriber
/// is already installed.
pub fn init(config: &LoggingConfig) -> Result<(), TryInitError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let layer: Box<dyn Layer<Registry> + Send + Sync> =
        match (config.format.as_str(), config.timestamps) {
            ("json", true) => fmt::layer().json().boxed(),
            ("json", false) => fmt::layer().json().without_time().boxed(),
            (_, true) => fmt::layer().boxed(),
            (_, false) => fmt::layer().without_time().boxed(),
        };

    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .try_init()
}
