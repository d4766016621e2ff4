use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use anyhow::Context;
use async_trait::async_trait;
use rustc_hash::FxHashMap;
use tokio::net::UdpSocket;
use tokio::select;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, span, trace, Instrument, Level};
use uuid::Uuid;
use crate::client::Client;
use crate::config::SrudpConfig;
use crate::packet::{Packet, PacketKind, MAX_DATAGRAM_LEN};
use crate::packet_id::PacketId;
use crate::socket::bind_udp_socket;

/// Application callback for incoming connections. It is called in a separate task for each
///  session, with a managed [Client] that is already `Connected`.
///
/// The session lasts until the callback returns, or until the client's packet queue is dropped.
///
/// Any `Fn(Client) -> impl Future<Output = ()>` closure is a `SessionHandler`.
#[async_trait]
pub trait SessionHandler: Send + Sync + 'static {
    async fn on_client_connected(&self, client: Client);
}

#[async_trait]
impl<F, Fut> SessionHandler for F
where
    F: Fn(Client) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn on_client_connected(&self, client: Client) {
        (self)(client).await
    }
}

type SessionTable = Arc<Mutex<FxHashMap<SocketAddr, mpsc::UnboundedSender<Packet>>>>;

/// A Listener owns a UDP socket and accepts SRUDP connections on it. All sessions share the
///  socket: the listener's receive loop routes incoming packets to the session registered for
///  their source address.
pub struct Listener {
    config: Arc<SrudpConfig>,
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    handler: Arc<dyn SessionHandler>,
    sessions: SessionTable,
    stop_sender: watch::Sender<bool>,
}

impl Listener {
    pub async fn new(bind_addr: SocketAddr, config: Arc<SrudpConfig>, handler: Arc<dyn SessionHandler>) -> anyhow::Result<Listener> {
        config.validate()?;

        let socket = bind_udp_socket(bind_addr)
            .with_context(|| format!("binding listener socket to {:?}", bind_addr))?;
        let local_addr = socket.local_addr()?;
        info!("listening on {:?}", local_addr);

        let (stop_sender, _) = watch::channel(false);
        Ok(Listener {
            config,
            socket: Arc::new(socket),
            local_addr,
            handler,
            sessions: Default::default(),
            stop_sender,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// the number of sessions whose handler has not returned yet
    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    /// Makes [Listener::recv_loop] return. Running sessions are not affected.
    pub fn stop(&self) {
        info!("stopping listener on {:?}", self.local_addr);
        self.stop_sender.send_replace(true);
    }

    /// Receives datagrams until [Listener::stop] is called.
    pub async fn recv_loop(&self) {
        info!("starting receive loop");

        let mut stop_receiver = self.stop_sender.subscribe();
        let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
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
                received = self.socket.recv_from(&mut buf) => {
                    match received {
                        Ok((num_read, from)) => self.on_datagram(&buf[..num_read], from).await,
                        Err(e) => error!("socket error: {}", e),
                    }
                }
            }
        }

        info!("receive loop on {:?} terminated", self.local_addr);
    }

    async fn on_datagram(&self, buf: &[u8], from: SocketAddr) {
        let packet = match Packet::deser(buf) {
            Ok(packet) => packet,
            Err(e) => {
                debug!("malformed datagram from {:?}: {} - dropping", from, e);
                return;
            }
        };
        trace!("received {} from {:?}", packet, from);

        let packet = {
            let mut sessions = self.sessions.lock().unwrap();
            match sessions.get(&from) {
                Some(queue) => match queue.send(packet) {
                    Ok(()) => return,
                    Err(mpsc::error::SendError(packet)) => {
                        debug!("session for {:?} stopped receiving - treating it as a new peer", from);
                        sessions.remove(&from);
                        packet
                    }
                },
                None => packet,
            }
        };

        if packet.kind == PacketKind::Connect && packet.id == PacketId::ZERO {
            self.accept(from).await;
        }
        else {
            debug!("{} from {:?} without a session - dropping", packet, from);
        }
    }

    async fn accept(&self, peer_addr: SocketAddr) {
        let session_id = Uuid::new_v4();
        let span = span!(Level::INFO, "session", %session_id, peer = ?peer_addr);
        info!(parent: &span, "accepting connection from {:?}", peer_addr);

        let (queue_sender, queue_receiver) = mpsc::unbounded_channel();
        let mut client = Client::new_managed(
            peer_addr,
            self.local_addr,
            self.config.clone(),
            Arc::new(self.socket.clone()),
            queue_receiver,
        );
        client.accept()
            .instrument(span.clone())
            .await;

        self.sessions.lock().unwrap()
            .insert(peer_addr, queue_sender.clone());
        let guard = SessionGuard {
            sessions: self.sessions.clone(),
            peer_addr,
            queue_sender,
        };

        let handler = self.handler.clone();
        tokio::spawn(async move {
            let _guard = guard;
            handler.on_client_connected(client).await;
            debug!("session handler returned");
        }.instrument(span));
    }
}

/// Unregisters a session when its handler task finishes, even if it panics. A newer session
///  for the same peer is left alone.
struct SessionGuard {
    sessions: SessionTable,
    peer_addr: SocketAddr,
    queue_sender: mpsc::UnboundedSender<Packet>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let mut sessions = self.sessions.lock()
            .unwrap_or_else(PoisonError::into_inner);
        let is_own_session = sessions.get(&self.peer_addr)
            .is_some_and(|queue| queue.same_channel(&self.queue_sender));
        if is_own_session {
            sessions.remove(&self.peer_addr);
        }
    }
}
