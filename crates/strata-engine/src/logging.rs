//! Tracing subscriber setup
//!
//! `RUST_LOG` wins over the configured level when it is set.

use crate::config::LoggingSettings;
use crate::error::{EngineError, Result};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Install a global fmt subscriber. Fails if one is already installed.
pub fn init_logging(settings: &LoggingSettings) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(settings.log_level().to_string()));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(settings.show_target)
                .with_thread_ids(settings.show_thread_ids)
                .with_file(settings.show_location)
                .with_line_number(settings.show_location),
        )
        .try_init()
        .map_err(|e| EngineError::Logging(e.to_string()))
}
