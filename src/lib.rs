//! HTTP-to-HTTP bridging gateway library.

pub mod backend;
pub mod bridge;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;

pub use bridge::BridgeHandle;
pub use config::GatewayConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
