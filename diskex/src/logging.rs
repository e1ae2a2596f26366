//! Logging and tracing initialization for diskex.
//!
//! Operator-facing output (tables, prompts, the progress bar) goes through
//! `println!` and `indicatif`. Tracing is diagnostic only and always writes to
//! stderr so it never tears the progress line on stdout.

use tracing::Level;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Configuration for the logging system.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogConfig {
    /// Output logs as JSON (for machine parsing)
    pub json: bool,
    /// Enable verbose logging (sets default level to DEBUG)
    pub verbose: bool,
}

/// The filter used when `RUST_LOG` is not set.
fn default_directives(verbose: bool) -> String {
    let level = if verbose { Level::DEBUG } else { Level::WARN };
    let level = level.as_str().to_lowercase();
    format!("diskex={level},diskex_core={level}")
}

/// Initialize the tracing subscriber with the given configuration.
///
/// The log level can be overridden at runtime via the `RUST_LOG` environment variable.
pub fn init(config: LogConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(config.verbose)));

    if config.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}
