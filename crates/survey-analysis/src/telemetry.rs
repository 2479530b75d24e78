//! Tracing initialization.

use std::sync::Once;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingSettings;

static INIT: Once = Once::new();

/// Environment variable overriding the configured filter.
pub const LOG_ENV: &str = "SURVEY_ANALYSIS_LOG";

/// Builds the filter from `SURVEY_ANALYSIS_LOG`, falling back to the
/// configured directive and then to `info`.
pub fn env_filter(settings: &LoggingSettings) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(&settings.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the global subscriber and bridges `log` records into it.
///
/// Idempotent; a subscriber installed elsewhere first is left in place.
pub fn init_tracing(settings: &LoggingSettings) {
    INIT.call_once(|| {
        if let Err(e) = tracing_log::LogTracer::init() {
            eprintln!("log bridge not installed: {}", e);
        }

        let filter = env_filter(settings);
        let result = if settings.json {
            tracing_subscriber::registry()
                .with(fmt::layer().json().with_target(true))
                .with(filter)
                .try_init()
        } else {
            tracing_subscriber::registry()
                .with(fmt::layer().with_target(true).with_thread_names(true))
                .with(filter)
                .try_init()
        };
        if let Err(e) = result {
            eprintln!("tracing subscriber not installed: {}", e);
        }
    });
}
