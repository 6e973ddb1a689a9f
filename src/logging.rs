//! Structured logging setup.
//!
//! One compact fmt layer on stderr, filtered through `RUST_LOG` when set
//! and the caller's default directive otherwise. Initialization is
//! idempotent so tests and embedding binaries can both call it.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Initializes the global tracing subscriber.
///
/// `default_level` is any `EnvFilter` directive, e.g. `"info"` or
/// `"skyfeed=debug"`. A second call is a no-op success.
pub fn init(default_level: &str) -> Result<(), String> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let fmt_layer = fmt::layer()
        .compact()
        .with_writer(std::io::stderr)
        .with_filter(env_filter);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .try_init()
        .or_else(|e| {
            if e.to_string()
                .contains("a global default trace dispatcher has already been set")
            {
                Ok(())
            } else {
                Err(format!("Failed to initialize tracing: {}", e))
            }
        })
}
