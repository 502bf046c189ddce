//! Logging setup for Gatekeeper.
//!
//! Environment variables:
//! - `RUST_LOG`: Log filter, takes priority when set
//! - `GATEKEEPER_LOG_LEVEL`: Log filter used when `RUST_LOG` is unset
//! - `GATEKEEPER_LOG_FORMAT`: `json` for structured output, anything else for
//!   human-readable lines

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "info,gatekeeper_server=debug";

/// Output format of log events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    fn from_env_value(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

fn filter_directives(rust_log: Option<String>, log_level: Option<String>) -> String {
    rust_log
        .or(log_level)
        .filter(|d| !d.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_FILTER.to_string())
}

/// Initialize the global tracing subscriber.
pub fn init() -> anyhow::Result<()> {
    let directives = filter_directives(
        std::env::var("RUST_LOG").ok(),
        std::env::var("GATEKEEPER_LOG_LEVEL").ok(),
    );
    let filter = EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let format = LogFormat::from_env_value(std::env::var("GATEKEEPER_LOG_FORMAT").ok().as_deref());

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(true),
            )
            .try_init()?,
        LogFormat::Pretty => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(true)
                    .with_line_number(true),
            )
            .try_init()?,
    }

    tracing::info!(filter = %directives, format = ?format, "Telemetry initialized");

    Ok(())
}
