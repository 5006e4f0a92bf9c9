//! Logging utilities for Winmon components.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

fn filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Initialize tracing with human-readable output.
///
/// Uses the RUST_LOG environment variable to control log levels, falling
/// back to `default_level` when it is unset or unparsable.
pub fn init(default_level: &str) {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter(default_level))
        .init();
}

/// Initialize tracing with JSON formatting (useful for structured logging).
pub fn init_json(default_level: &str) {
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(filter(default_level))
        .init();
}

/// Initialize tracing using a format name from configuration.
///
/// Anything other than `"json"` selects the human-readable formatter.
pub fn init_with_format(format: Option<&str>, default_level: &str) {
    match format {
        Some(f) if f.eq_ignore_ascii_case("json") => init_json(default_level),
        _ => init(default_level),
    }
}
