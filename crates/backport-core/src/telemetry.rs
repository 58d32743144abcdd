//! Tracing initialisation for backport binaries.
//!
//! Call [`init_tracing`] once at program start. Later calls are ignored,
//! since the global subscriber can only be set once per process.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable consulted before `RUST_LOG`.
pub const LOG_ENV: &str = "BACKPORT_LOG";

/// Initialise the global tracing subscriber.
///
/// * `json`: emit newline-delimited JSON log lines.
/// * `level`: verbosity when neither `BACKPORT_LOG` nor `RUST_LOG` is set.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter = resolve_filter(std::env::var(LOG_ENV).ok(), level);

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false))
            .try_init()
            .ok();
    }
}

fn resolve_filter(directive: Option<String>, level: Level) -> EnvFilter {
    directive
        .and_then(|d| EnvFilter::try_new(d).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(level.as_str()))
}
