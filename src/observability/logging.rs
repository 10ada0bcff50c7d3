//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber once per process
//! - Resolve the filter: `RUST_LOG` first, then the configured directives
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging; every event carries fields
//!   rather than formatted text
//! - `--tracing` raises the HTTP layers to debug so each request and
//!   response is logged

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Directives appended when request tracing is on.
const REQUEST_TRACE_DIRECTIVES: &str = "tower_http=debug,bridge_gateway::http=debug";

/// Build the filter used by [`init_logging`].
pub fn build_filter(default_directives: &str, trace_requests: bool) -> EnvFilter {
    let directives = if trace_requests {
        format!("{default_directives},{REQUEST_TRACE_DIRECTIVES}")
    } else {
        default_directives.to_string()
    };

    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives))
}

/// Install the global subscriber. Later calls are ignored.
pub fn init_logging(default_directives: &str, trace_requests: bool) {
    let result = tracing_subscriber::registry()
        .with(build_filter(default_directives, trace_requests))
        .with(tracing_subscriber::fmt::layer())
        .try_init();

    if result.is_err() {
        tracing::debug!("Logging already initialised");
    }
}
