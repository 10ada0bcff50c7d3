//! HTTP-to-HTTP bridging gateway.
//!
//! Accepts `GET /data?year=YYYY&month=MM&day=DD` and answers it with the
//! result of `GET http://{target}/{YYYY}/{MM}/{DD}`, performed on a
//! reactor-integrated libcurl multi handle.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌──────────────────────────────────────────────────────┐
//!                      │                   BRIDGE GATEWAY                     │
//!                      │                                                      │
//!   Client Request     │  ┌──────────┐   ┌──────────┐   ┌──────────────────┐  │
//!   ───────────────────┼─▶│   http   │──▶│ dispatch │──▶│  bridge task     │  │
//!                      │  │ (worker  │   │  submit  │   │  (LocalSet)      │  │
//!                      │  │  pool)   │   └──────────┘   │  adapter+engine  │──┼──▶ Target
//!                      │  │          │                  │  registry, timer │◀─┼─── Service
//!   Client Response    │  │          │   ┌──────────┐   │                  │  │
//!   ◀──────────────────┼──│          │◀──│ drainer  │◀──│  completions     │  │
//!                      │  └──────────┘   └──────────┘   └──────────────────┘  │
//!                      │                                                      │
//!                      │   config · lifecycle · observability                 │
//!                      └──────────────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

use bridge_gateway::bridge::CurlGlobal;
use bridge_gateway::config::loader::{load_config, ConfigError};
use bridge_gateway::config::validation::validate_config;
use bridge_gateway::config::GatewayConfig;
use bridge_gateway::lifecycle::{bind_listener, run_gateway, signals, GatewayError, Shutdown};
use bridge_gateway::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "bridge-gateway")]
#[command(about = "Bridges GET /data requests to a date-addressed backend", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(short, long)]
    address: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Target service address
    #[arg(short = 'T', long)]
    target_address: Option<String>,

    /// Target service port
    #[arg(short = 'P', long)]
    target_port: Option<u16>,

    /// Log every inbound request and response
    #[arg(short, long)]
    tracing: bool,
}

impl Cli {
    /// Load the file (or defaults) and apply command-line overrides.
    fn into_config(self) -> Result<GatewayConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => GatewayConfig::default(),
        };

        if let Some(address) = self.address {
            config.listener.address = address;
        }
        if let Some(port) = self.port {
            config.listener.port = port;
        }
        if let Some(address) = self.target_address {
            config.target.address = address;
        }
        if let Some(port) = self.target_port {
            config.target.port = port;
        }
        if self.tracing {
            config.observability.trace_requests = true;
        }

        validate_config(&config).map_err(ConfigError::Validation)?;
        Ok(config)
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Cli::parse().into_config()?;

    logging::init_logging(
        &config.observability.log_filter,
        config.observability.trace_requests,
    );

    tracing::info!("bridge-gateway v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        listener = %format!("{}:{}", config.listener.address, config.listener.port),
        target = %format!("{}:{}", config.target.address, config.target.port),
        worker_threads = config.listener.worker_threads,
        trace_requests = config.observability.trace_requests,
        "Configuration loaded"
    );

    // Outlives the runtime, and with it every engine.
    let _curl = CurlGlobal::acquire()?;

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    if config.listener.worker_threads > 0 {
        builder.worker_threads(config.listener.worker_threads);
    }
    let runtime = builder.enable_all().build()?;

    let local = tokio::task::LocalSet::new();
    local.block_on(&runtime, serve(config))?;

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn serve(config: GatewayConfig) -> Result<(), GatewayError> {
    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = bind_listener(&config.listener).await?;

    let shutdown = Shutdown::new();
    tokio::spawn(signals::watch_signals(shutdown.clone()));

    run_gateway(config, listener, &shutdown).await
}
