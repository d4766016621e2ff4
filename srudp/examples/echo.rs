use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use clap::{Parser, Subcommand};
use srudp::client::Client;
use srudp::config::SrudpConfig;
use srudp::listener::Listener;
use tracing::{info, warn, Level};

/// Echo server and client on top of SRUDP
#[derive(Parser)]
struct Args {
    #[arg(long, default_value_t = 500)]
    ack_timeout_ms: u64,
    #[arg(long, default_value_t = 5000)]
    connection_timeout_ms: u64,
    #[arg(long, default_value_t = 500)]
    max_payload: usize,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// echo every line received on the address until the peer disconnects
    Server {
        #[arg(long, default_value = "127.0.0.1:9100")]
        bind: SocketAddr,
    },
    /// send lines to an echo server and print the replies
    Client {
        #[arg(long, default_value = "127.0.0.1:9100")]
        server: SocketAddr,
        lines: Vec<String>,
    },
}

fn init_logging() {
    tracing_subscriber::fmt()
        // .with_max_level(Level::TRACE)
        .with_max_level(Level::DEBUG)
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
    config.validate()?;

    match args.mode {
        Mode::Server { bind } => run_server(bind, config).await,
        Mode::Client { server, lines } => run_client(server, config, lines).await,
    }
}

async fn run_server(bind: SocketAddr, config: Arc<SrudpConfig>) -> anyhow::Result<()> {
    let listener = Listener::new(bind, config, Arc::new(|mut client: Client| async move {
        info!("echoing for {:?}", client.remote_addr());
        while let Ok(line) = client.read_line().await {
            let reply = format!("{}\r\n", line);
            if let Err(e) = client.write(reply.as_bytes()).await {
                warn!("echo failed: {}", e);
                break;
            }
        }
        info!("session with {:?} ended", client.remote_addr());
    })).await?;

    listener.recv_loop().await;
    Ok(())
}

async fn run_client(server: SocketAddr, config: Arc<SrudpConfig>, lines: Vec<String>) -> anyhow::Result<()> {
    let mut client = Client::new(server, config);
    client.connect().await?;

    for line in lines {
        client.write(format!("{}\r\n", line).as_bytes()).await?;
        let echoed = client.read_line().await?;
        println!("{}", echoed);
    }

    client.disconnect().await?;
    Ok(())
}
