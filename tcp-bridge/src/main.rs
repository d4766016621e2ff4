use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use clap::Parser;
use srudp::config::SrudpConfig;
use tcp_bridge::server::BridgeServer;
use tracing::{info, Level};

/// Exposes SRUDP to TCP clients through a line-based command protocol
#[derive(Parser)]
#[command(version)]
struct Args {
    /// TCP address to accept bridge connections on
    #[arg(long, default_value = "127.0.0.1:9000")]
    bind: SocketAddr,
    /// how long to wait for an ACK before re-transmitting
    #[arg(long, default_value_t = 500)]
    ack_timeout_ms: u64,
    /// how long a transaction may take before it fails
    #[arg(long, default_value_t = 5000)]
    connection_timeout_ms: u64,
    /// maximum payload bytes per DATA packet
    #[arg(long, default_value_t = 500)]
    max_payload: usize,
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        // .with_max_level(Level::DEBUG)
        .with_thread_ids(true)
        .try_init()
        .ok();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let args = Args::parse();
    let config = Arc::new(SrudpConfig {
        ack_timeout: Duration::from_millis(args.ack_timeout_ms),
        connection_timeout: Duration::from_millis(args.connection_timeout_ms),
        max_payload_len: args.max_payload,
    });

    let server = Arc::new(BridgeServer::bind(args.bind, config).await?);

    let cloned = server.clone();
    let accept_loop = tokio::spawn(async move { cloned.run().await });

    tokio::signal::ctrl_c().await?;
    info!("received Ctrl-C");
    server.stop();
    accept_loop.await?;
    Ok(())
}
