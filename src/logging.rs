//! Log output for the bridge binaries.
//!
//! Our own events follow the requested level; dependencies (hyper, axum,
//! reqwest) are held at `warn` unless `RUST_LOG` says otherwise.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Logging format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Compact single-line text.
    #[default]
    Text,
    /// One JSON object per line, event fields flattened.
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "pretty" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("unknown log format: {s}")),
        }
    }
}

/// `warn` for everything, `level` for this crate's targets.
pub fn default_directives(level: &str) -> String {
    format!("warn,piper_bridge={level}")
}

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directives(level)))
        .unwrap_or_else(|_| EnvFilter::new(default_directives("info")))
}

/// Install the global subscriber. Safe to call twice; the second call is a no-op.
pub fn init_logging(level: &str, format: LogFormat) {
    let registry = tracing_subscriber::registry().with(env_filter(level));

    let _ = match format {
        LogFormat::Text => registry
            .with(fmt::layer().compact().with_target(false))
            .try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().flatten_event(true).with_current_span(false))
            .try_init(),
    };
}
