//! Structured logging initialization.
//!
//! Builds a `tracing-subscriber` pipeline from [`LoggingConfig`]:
//! environment-based filtering (respects `RUST_LOG`), console output with
//! severity levels, optional module targets.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Initialize the global tracing subscriber from configuration.
///
/// `RUST_LOG` takes precedence over the configured level when set.
/// Safe to call more than once; later calls are no-ops, so tests and
/// embedding applications can both call it freely.
pub fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.include_target)
        .try_init();
}
