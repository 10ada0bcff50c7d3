//! Delay backend: a stand-in target service for the gateway.
//!
//! # Data Flow
//! ```text
//! GET /{yyyy}/{mm}/{dd}
//!     → server.rs (path match)
//!     → pause.rs (uniform pause in [min, max] ms)
//!     → "Hello world!\nPause: {ms}ms.\n"
//! ```
//!
//! Used by the `delay-server` binary and by the integration tests.

pub mod pause;
pub mod server;

pub use pause::PauseGenerator;
pub use server::{delay_router, is_date_path, serve};

/// Delay backend errors.
#[derive(Debug, thiserror::Error)]
pub enum DelayError {
    #[error("invalid pause: {0}")]
    InvalidPause(&'static str),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Server(#[from] std::io::Error),
}
