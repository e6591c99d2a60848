//! Structured logging setup (§4.7), mirroring the base crate's
//! `LoggingConfig`-driven `tracing_subscriber` initialisation.

use crate::config::LoggingConfig;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialises the global `tracing` subscriber from `config`. Safe to call
/// once at process startup; a second call is a no-op error that callers can
/// ignore.
pub fn init(config: &LoggingConfig) {
    let result = if config.format == "json" {
        let filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));
        fmt().with_env_filter(filter).json().try_init()
    } else {
        let filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));
        fmt().with_env_filter(filter).try_init()
    };

    if let Err(err) = result {
        eprintln!("logging already initialised: {err}");
    }
}
