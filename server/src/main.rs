use clap::Parser;
use log::{error, info};
use server::network::{BoxError, Server};
use std::time::Duration;

/// Signaling relay for peer-to-peer snake.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// UDP port to listen on
    #[arg(short, long, default_value = "9000")]
    port: u16,

    /// Maximum number of registered peers
    #[arg(short, long, default_value = "64")]
    max_clients: usize,

    /// Seconds without a heartbeat before a peer is forgotten
    #[arg(short, long, default_value = "10", value_parser = clap::value_parser!(u64).range(1..))]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Starting relay...");
    info!(
        "Max peers: {}, heartbeat timeout: {}s",
        args.max_clients, args.timeout_secs
    );

    let address = format!("{}:{}", args.host, args.port);
    let mut server = Server::new(
        &address,
        Duration::from_secs(args.timeout_secs),
        args.max_clients,
    )
    .await?;

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Relay stopped: {}", e);
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    Ok(())
}
