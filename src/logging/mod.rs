// Logging module for structured logging using the tracing crate

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

use crate::config::{LogFormat, LoggingConfig};

/// Build the filter for `config`; a set `RUST_LOG` wins over the configured level
pub fn build_filter(config: &LoggingConfig) -> Result<EnvFilter, String> {
    match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) if !directives.trim().is_empty() => EnvFilter::try_new(&directives)
            .map_err(|e| format!("Invalid RUST_LOG '{}': {}", directives, e)),
        _ => EnvFilter::try_new(&config.level)
            .map_err(|e| format!("Invalid logging.level '{}': {}", config.level, e)),
    }
}

/// Initialize the tracing subscriber for structured logging
///
/// JSON output is meant for log aggregation, pretty output for terminals.
/// Logs go to stderr so command output on stdout stays machine-readable.
///
/// # Errors
///
/// Returns an error if the filter is invalid or a global subscriber is
/// already installed.
///
/// # Examples
///
/// ```
/// use kitsune::config::LoggingConfig;
/// use kitsune::logging::init_subscriber;
///
/// init_subscriber(&LoggingConfig::default()).expect("Failed to initialize logging");
/// tracing::info!("Application started");
/// ```
pub fn init_subscriber(config: &LoggingConfig) -> Result<(), String> {
    let filter = build_filter(config)?;

    let result = match config.format {
        LogFormat::Json => Registry::default()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(false)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogFormat::Pretty => Registry::default()
            .with(filter)
            .with(fmt::layer().pretty().with_writer(std::io::stderr))
            .try_init(),
    };

    result.map_err(|e| format!("Failed to initialize logging: {}", e))
}
