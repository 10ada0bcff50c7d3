//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, timeout)
//!     → request.rs (match GET /data, extract year/month/day)
//!     → bridge (outbound call, awaited on a oneshot)
//!     → response.rs (InboundResponse / Rejection → axum Response)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{match_data_request, Rejection};
pub use server::HttpServer;
