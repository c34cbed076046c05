//! Logging initialisation
//!
//! The plugin usually runs inside a host that already installed a `tracing`
//! subscriber; every initialiser here therefore uses `try_init` and reports
//! whether it took effect instead of panicking.
//!
//! Filter precedence:
//! - `RUST_LOG` if set
//! - the filter from [`LoggingConfig`](crate::config::LoggingConfig)
//! - [`DEFAULT_FILTER`]
//!
//! ```rust
//! use survival_modules::utils::init_logging;
//!
//! init_logging(None);
//! ```

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when neither `RUST_LOG` nor configuration provides one
pub const DEFAULT_FILTER: &str = "info";

fn env_filter(filter: Option<&str>) -> EnvFilter {
    if std::env::var("RUST_LOG").is_ok() {
        return EnvFilter::from_default_env();
    }
    EnvFilter::new(filter.unwrap_or(DEFAULT_FILTER))
}

/// Human-readable logging to stderr
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_logging(filter: Option<&str>) -> bool {
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_ansi(std::env::var("NO_COLOR").is_err()),
        )
        .with(env_filter(filter))
        .try_init()
        .is_ok()
}

/// Logging scoped to the orchestrator plus the given modules' spans
///
/// Handy for a host that only wants lifecycle output, e.g.
/// `init_module_logging(&["claims", "leveling"], "debug")`.
pub fn init_module_logging(module_ids: &[&str], level: &str) -> bool {
    let mut directives = vec![format!("survival_modules={}", level)];
    directives.extend(module_ids.iter().map(|id| format!("[module{{id={}}}]={}", id, level)));
    init_logging(Some(&directives.join(",")))
}

/// JSON logging for log aggregation
#[cfg(feature = "json-logging")]
pub fn init_json_logging(filter: Option<&str>) -> bool {
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .json()
                .with_target(true)
                .with_current_span(true)
                .with_span_list(true),
        )
        .with(env_filter(filter))
        .try_init()
        .is_ok()
}

/// Initialise logging from plugin configuration
pub fn init_logging_from_config(config: Option<&crate::config::LoggingConfig>) -> bool {
    let filter = config.and_then(|c| c.filter.as_deref());

    if config.map(|c| c.json_format).unwrap_or(false) {
        #[cfg(feature = "json-logging")]
        {
            return init_json_logging(filter);
        }
        #[cfg(not(feature = "json-logging"))]
        {
            tracing::warn!("JSON logging requested but the json-logging feature is disabled");
        }
    }
    init_logging(filter)
}
