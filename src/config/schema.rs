//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files, and
//! every section falls back to its defaults when omitted.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Inbound listener settings.
    pub listener: ListenerConfig,

    /// The backend every `/data` request is bridged to.
    pub target: TargetConfig,

    /// Outbound engine settings.
    pub engine: EngineConfig,

    /// Headers attached to synthesized responses.
    pub response: ResponseConfig,

    /// Logging and metrics.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Host name or IP to bind.
    pub address: String,

    pub port: u16,

    /// Runtime worker threads; 0 means one per available core.
    pub worker_threads: usize,

    /// Deadline for a single inbound request, in seconds.
    pub request_timeout_secs: u64,
}

impl ListenerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            address: "localhost".to_string(),
            port: 8080,
            worker_threads: 0,
            request_timeout_secs: 60,
        }
    }
}

/// Target backend location.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TargetConfig {
    pub address: String,
    pub port: u16,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            address: "localhost".to_string(),
            port: 8090,
        }
    }
}

/// Per-transfer settings applied by the outbound engine.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Connection establishment timeout in milliseconds.
    pub connect_timeout_ms: u64,

    /// Whole-transfer timeout in milliseconds.
    pub transfer_timeout_ms: u64,

    pub user_agent: String,
}

impl EngineConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_millis(self.transfer_timeout_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5_000,
            transfer_timeout_ms: 30_000,
            user_agent: concat!("bridge-gateway/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Synthesized response settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ResponseConfig {
    /// Value of the `Server` header.
    pub server_name: String,
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self {
            server_name: "bridge-gateway".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log every inbound request and response.
    pub trace_requests: bool,

    /// `EnvFilter` directives used when `RUST_LOG` is unset.
    pub log_filter: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            trace_requests: false,
            log_filter: "bridge_gateway=info,tower_http=info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
