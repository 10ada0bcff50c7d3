//! Startup orchestration.
//!
//! # Responsibilities
//! - Bind the inbound listener
//! - Start the bridge task, then the HTTP server on top of it
//! - Wait for both to stop after shutdown
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - The bridge starts before the listener accepts traffic
//! - Must run inside a `LocalSet`; the bridge task is pinned to it

use tokio::net::TcpListener;

use crate::bridge::{spawn_curl_bridge, EngineError};
use crate::config::loader::ConfigError;
use crate::config::{GatewayConfig, ListenerConfig};
use crate::http::HttpServer;
use crate::lifecycle::Shutdown;

/// Fatal gateway errors.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("outbound engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("HTTP server error: {0}")]
    Server(#[from] std::io::Error),

    #[error("bridge task failed: {0}")]
    BridgeTask(#[from] tokio::task::JoinError),

    #[error("metrics exporter error: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),
}

/// Bind the inbound listener described by `config`.
pub async fn bind_listener(config: &ListenerConfig) -> Result<TcpListener, GatewayError> {
    let address = format!("{}:{}", config.address, config.port);
    let listener = TcpListener::bind((config.address.as_str(), config.port))
        .await
        .map_err(|source| GatewayError::Bind {
            address: address.clone(),
            source,
        })?;

    tracing::info!(
        address = %address,
        local_addr = ?listener.local_addr().ok(),
        "Listening for connections"
    );
    Ok(listener)
}

/// Serve bridged requests on `listener` until `shutdown` fires.
pub async fn run_gateway(
    config: GatewayConfig,
    listener: TcpListener,
    shutdown: &Shutdown,
) -> Result<(), GatewayError> {
    let (bridge, bridge_task) = spawn_curl_bridge(
        config.engine.clone(),
        &config.response.server_name,
        shutdown.subscribe(),
    )?;

    tracing::info!(
        target_address = %config.target.address,
        target_port = config.target.port,
        "Bridging /data requests"
    );

    let server = HttpServer::new(&config, bridge);
    let served = server.run(listener, shutdown.subscribe()).await;

    // Stop the bridge even if the server failed on its own.
    shutdown.trigger();
    bridge_task.await?;

    served?;
    tracing::info!("Gateway stopped");
    Ok(())
}
