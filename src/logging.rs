use std::env;

use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::{Result, SidecarError};

/// Sets up the logging subscriber for the application.
///
/// The filter comes from `RUST_LOG` and falls back to `info` for this
/// crate and the HTTP trace layer. `LOG_FORMAT=json` selects JSON lines.
///
/// # Arguments
/// * `service` - Name attached to the startup event
pub fn init_logger(service: &str) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{}={},tower_http={}",
            env!("CARGO_CRATE_NAME"),
            Level::INFO,
            Level::INFO
        ))
    });

    let json = env::var("LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let fmt_layer = if json {
        fmt::layer().json().with_target(true).boxed()
    } else {
        fmt::layer()
            .with_target(false)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_level(true)
            .with_ansi(true)
            .compact()
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| SidecarError::Internal(format!("Failed to initialize logger: {}", e)))?;

    tracing::info!(
        service,
        version = env!("CARGO_PKG_VERSION"),
        "Logger initialized"
    );
    Ok(())
}
