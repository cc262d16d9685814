//! Tracing and logging infrastructure.
//!
//! [`setup_tracing`] installs a single console layer that renders every event
//! as one Google structured-log JSON object per line on stdout (see
//! [`stackdriver`]). Trace correlation fields are attached automatically from
//! the active request context.
//!
//! The root level comes from the configured `LOG_LEVEL`; an explicit
//! `RUST_LOG` takes precedence when present. Invalid levels warn and fall
//! back to INFO rather than failing startup.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

mod stackdriver;

pub use stackdriver::StackdriverLogFormat;

/// Initializes the tracing subscriber with Google structured-log output.
///
/// Called once at application startup, before the full settings are
/// validated (the bootstrap settings supply `log_level` and the project id).
/// Re-initialization is tolerated so tests can install their own
/// subscribers.
pub fn setup_tracing(log_level: &str, gcp_project: Option<&str>) {
    let recognized = effective_level(log_level);
    let effective_level = recognized.unwrap_or("info");
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(effective_level)));

    let console_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .event_format(StackdriverLogFormat::new(gcp_project.map(str::to_string)))
        .with_filter(filter);

    let initialized = Registry::default().with(console_layer).try_init().is_ok();

    if recognized.is_none() {
        tracing::warn!("Invalid LOG_LEVEL '{}'. Defaulting to INFO.", log_level);
    }
    if initialized {
        tracing::info!(
            "Logging setup complete. Root level set to {}.",
            effective_level.to_uppercase()
        );
    }
}

/// Maps the configured level name to a tracing filter directive.
/// Unrecognized names yield `None`; the caller falls back to `info`.
fn effective_level(log_level: &str) -> Option<&'static str> {
    match log_level.to_uppercase().as_str() {
        "CRITICAL" | "ERROR" => Some("error"),
        "WARNING" | "WARN" => Some("warn"),
        "INFO" => Some("info"),
        "DEBUG" => Some("debug"),
        "TRACE" => Some("trace"),
        _ => None,
    }
}

/// Root directive plus quieter thresholds for noisy third-party namespaces.
fn default_filter(level: &str) -> String {
    format!("{},hyper=warn,reqwest=warn", level)
}
