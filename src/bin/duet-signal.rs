use clap::Parser;
use duet::{ws, SignalingHub};
use log::{error, info};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Signaling hub pairing two participants for a direct peer-to-peer connection.
#[derive(Debug, Parser)]
#[command(name = "duet-signal", version, about)]
struct Cli {
    /// Address the WebSocket endpoint listens on.
    #[arg(long, env = "DUET_BIND", default_value = "0.0.0.0:3000")]
    bind: String,
}

#[tokio::main]
async fn main() {
    // RUST_LOG overrides the default level
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let listener = match TcpListener::bind(&cli.bind).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("failed to bind {}: {e}", cli.bind);
            std::process::exit(1);
        }
    };
    info!("starting signaling hub on {}", cli.bind);

    if let Err(e) = ws::serve(listener, SignalingHub::new()).await {
        error!("signaling hub stopped: {e}");
        std::process::exit(1);
    }
}
