pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod producer;
pub mod render;
pub mod server;
pub mod signals;
pub mod stats;
pub mod streamlog;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize tracing/logging
///
/// `RUST_LOG` takes precedence over `default_level`. `format` is "json" for
/// structured output; anything else selects the human-readable formatter.
///
/// Note: This function can only be called once.
pub fn init_tracing(default_level: &str, format: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(filter);

    if format == "json" {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry.with(fmt::layer().with_target(true)).init();
    }
}
