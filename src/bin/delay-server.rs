//! Delay backend: replies to `GET /{yyyy}/{mm}/{dd}` after a random pause.

use clap::Parser;

use bridge_gateway::backend::{delay_router, serve, DelayError, PauseGenerator};
use bridge_gateway::lifecycle::{signals, Shutdown};
use bridge_gateway::observability::logging;

#[derive(Parser)]
#[command(name = "delay-server")]
#[command(about = "Backend that answers date requests after a random pause", long_about = None)]
struct Cli {
    /// Address to listen on
    #[arg(short, long, default_value = "localhost")]
    address: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = 8090)]
    port: u16,

    /// Minimal pause before a response, milliseconds
    #[arg(short = 'm', long, default_value_t = 4000)]
    min_pause: u64,

    /// Maximal pause before a response, milliseconds
    #[arg(short = 'M', long, default_value_t = 6000)]
    max_pause: u64,

    /// Log every request and response
    #[arg(short, long)]
    tracing: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    logging::init_logging("bridge_gateway=info,tower_http=info", cli.tracing);

    let pauses = PauseGenerator::new(cli.min_pause, cli.max_pause)?;

    let address = format!("{}:{}", cli.address, cli.port);
    let listener = tokio::net::TcpListener::bind((cli.address.as_str(), cli.port))
        .await
        .map_err(|source| DelayError::Bind { address, source })?;

    tracing::info!(
        min_pause_ms = cli.min_pause,
        max_pause_ms = cli.max_pause,
        "delay-server starting"
    );

    let shutdown = Shutdown::new();
    tokio::spawn(signals::watch_signals(shutdown.clone()));

    serve(listener, delay_router(pauses, cli.tracing), shutdown.subscribe())
        .await
        .map_err(DelayError::Server)?;
    Ok(())
}
