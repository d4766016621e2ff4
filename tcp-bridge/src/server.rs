use std::net::SocketAddr;
use std::sync::Arc;
use anyhow::Context;
use srudp::config::SrudpConfig;
use tokio::io::BufStream;
use tokio::net::TcpListener;
use tokio::select;
use tokio::sync::watch;
use tracing::{debug, error, info, span, Instrument, Level};
use crate::session::BridgeSession;

/// Accepts TCP connections and serves the bridge protocol on each of them in a separate task
pub struct BridgeServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: Arc<SrudpConfig>,
    stop_sender: watch::Sender<bool>,
}

impl BridgeServer {
    pub async fn bind(addr: SocketAddr, config: Arc<SrudpConfig>) -> anyhow::Result<BridgeServer> {
        config.validate()?;

        let listener = TcpListener::bind(addr).await
            .with_context(|| format!("binding bridge to {:?}", addr))?;
        let local_addr = listener.local_addr()?;
        info!("bridge listening on {:?}", local_addr);

        let (stop_sender, _) = watch::channel(false);
        Ok(BridgeServer {
            listener,
            local_addr,
            config,
            stop_sender,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Ends the accept loop, and makes running sessions close before their next command
    pub fn stop(&self) {
        info!("stopping bridge on {:?}", self.local_addr);
        self.stop_sender.send_replace(true);
    }

    pub async fn run(&self) {
        let mut stop_receiver = self.stop_sender.subscribe();
        loop {
            if *stop_receiver.borrow_and_update() {
                break;
            }

            select! {
                changed = stop_receiver.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer_addr)) => {
                            if let Err(e) = stream.set_nodelay(true) {
                                debug!("could not set TCP_NODELAY for {:?}: {}", peer_addr, e);
                            }

                            let session = BridgeSession::new(BufStream::new(stream), self.config.clone(), self.stop_sender.subscribe());
                            let span = span!(Level::INFO, "bridge_session", peer = ?peer_addr);
                            tokio::spawn(async move {
                                info!("accepted TCP connection");
                                if let Err(e) = session.run().await {
                                    debug!("bridge session terminated: {}", e);
                                }
                                info!("closed TCP connection");
                            }.instrument(span));
                        }
                        Err(e) => error!("error accepting TCP connection: {}", e),
                    }
                }
            }
        }

        info!("bridge on {:?} terminated", self.local_addr);
    }
}
