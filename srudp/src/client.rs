use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use bytes::{Buf, Bytes, BytesMut};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tracing::{debug, info, trace, warn};
use crate::config::SrudpConfig;
use crate::error::{TransactionError, TransactionResult};
use crate::packet::{Packet, PacketKind, HEADER_LEN, MAX_DATAGRAM_LEN};
use crate::packet_id::PacketId;
use crate::send_socket::SendSocket;
use crate::socket::bind_udp_socket;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Where a client's incoming packets come from
enum Inbound {
    /// the client's own socket, for clients that initiated the connection
    Socket {
        socket: Arc<UdpSocket>,
        buf: Vec<u8>,
    },
    /// packets routed to the client by a [crate::listener::Listener] that owns the socket
    Queue(mpsc::UnboundedReceiver<Packet>),
}

impl Inbound {
    /// Returns the next packet from `peer_addr`, or `None` if there is none before `deadline`.
    async fn recv_until(&mut self, deadline: Instant, peer_addr: SocketAddr) -> Option<Packet> {
        match self {
            Inbound::Queue(queue) => {
                match time::timeout_at(deadline, queue.recv()).await {
                    Ok(Some(packet)) => Some(packet),
                    Ok(None) => {
                        debug!("inbound queue was closed by the listener");
                        time::sleep_until(deadline).await;
                        None
                    }
                    Err(_) => None,
                }
            }
            Inbound::Socket { socket, buf } => loop {
                let (num_read, from) = match time::timeout_at(deadline, socket.recv_from(buf)).await {
                    Err(_) => return None,
                    Ok(Ok(x)) => x,
                    Ok(Err(e)) => {
                        debug!("error receiving from UDP socket: {}", e);
                        continue;
                    }
                };

                if from != peer_addr {
                    debug!("ignoring datagram from unrelated address {:?}", from);
                    continue;
                }

                match Packet::deser(&buf[..num_read]) {
                    Ok(packet) => return Some(packet),
                    Err(e) => debug!("dropping malformed datagram from {:?}: {}", from, e),
                }
            }
        }
    }
}

struct ClientIo {
    send_socket: Arc<dyn SendSocket>,
    inbound: Inbound,
}

/// One end of an SRUDP connection.
///
/// A client either initiates a connection itself, owning a dedicated UDP socket for it (see
///  [Client::new] and [Client::connect]), or it is created by a [crate::listener::Listener] for
///  an incoming connection and handed to the application in `Connected` state. Such a *managed*
///  client shares the listener's socket, receiving its packets through a queue.
///
/// All operations block (asynchronously) until they succeed or the connection timeout expires.
///  There is at most one unacknowledged packet per direction at any time.
pub struct Client {
    config: Arc<SrudpConfig>,
    state: ClientState,
    tx_id: PacketId,
    rx_id: PacketId,
    managed: bool,
    /// received data that was not yet consumed by `read_line`
    pending: BytesMut,
    local_addr: Option<SocketAddr>,
    remote_addr: SocketAddr,
    io: Option<ClientIo>,
}

impl Client {
    pub fn new(remote_addr: SocketAddr, config: Arc<SrudpConfig>) -> Client {
        Client {
            config,
            state: ClientState::Disconnected,
            tx_id: PacketId::ZERO,
            rx_id: PacketId::ZERO,
            managed: false,
            pending: BytesMut::new(),
            local_addr: None,
            remote_addr,
            io: None,
        }
    }

    pub(crate) fn new_managed(
        remote_addr: SocketAddr,
        local_addr: SocketAddr,
        config: Arc<SrudpConfig>,
        send_socket: Arc<dyn SendSocket>,
        inbound: mpsc::UnboundedReceiver<Packet>,
    ) -> Client {
        Client {
            managed: true,
            local_addr: Some(local_addr),
            io: Some(ClientIo {
                send_socket,
                inbound: Inbound::Queue(inbound),
            }),
            ..Client::new(remote_addr, config)
        }
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// The local address of the socket the client uses, if it has one
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn is_managed(&self) -> bool {
        self.managed
    }

    pub fn config(&self) -> &SrudpConfig {
        &self.config
    }

    /// Active open: binds a dedicated ephemeral socket and performs the handshake with the
    ///  remote address.
    pub async fn connect(&mut self) -> TransactionResult {
        if self.managed {
            return Err(TransactionError::Managed);
        }
        if self.state != ClientState::Disconnected {
            return Err(TransactionError::AlreadyConnected);
        }

        let bind_addr = match self.remote_addr {
            SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
        };
        let socket = Arc::new(bind_udp_socket(bind_addr)?);
        self.local_addr = Some(socket.local_addr()?);
        self.io = Some(ClientIo {
            send_socket: Arc::new(socket.clone()),
            inbound: Inbound::Socket {
                socket,
                buf: vec![0; MAX_DATAGRAM_LEN],
            },
        });

        info!("connecting to {:?} from {:?}", self.remote_addr, self.local_addr);
        self.state = ClientState::Connecting;
        match self.send_reliably(Packet::connect()).await {
            Ok(()) => {
                self.state = ClientState::Connected;
                info!("connected to {:?}", self.remote_addr);
                Ok(())
            }
            Err(e) => {
                warn!("connecting to {:?} failed: {}", self.remote_addr, e);
                self.force_disconnect();
                Err(e)
            }
        }
    }

    /// Passive side of the handshake, called by the listener after it received a CONNECT
    pub(crate) async fn accept(&mut self) {
        self.state = ClientState::Connecting;
        self.send_ack(self.rx_id).await;
        self.rx_id = self.rx_id.next();
        self.state = ClientState::Connected;
    }

    /// Sends a message, splitting it into several DATA packets if it exceeds the configured
    ///  payload size. Each fragment must be acknowledged before the next one is sent.
    pub async fn write(&mut self, data: &[u8]) -> TransactionResult {
        if self.state != ClientState::Connected {
            return Err(TransactionError::NotConnected);
        }
        if data.is_empty() || data.len() > u16::MAX as usize {
            return Err(TransactionError::MessageSize(data.len()));
        }

        let mut len_left = data.len();
        for chunk in data.chunks(self.max_chunk_len()) {
            len_left -= chunk.len();
            let packet = Packet::data(self.tx_id, len_left as u16, Bytes::copy_from_slice(chunk));
            self.send_reliably(packet).await?;
        }
        Ok(())
    }

    fn max_chunk_len(&self) -> usize {
        self.config.max_payload_len.clamp(1, MAX_DATAGRAM_LEN - HEADER_LEN)
    }

    /// Receives the next complete message. Data left over from [Client::read_line] is returned
    ///  in front of it.
    ///
    /// If there is no progress for the connection timeout, the connection is considered dead
    ///  and the client disconnects.
    pub async fn read(&mut self) -> TransactionResult<Bytes> {
        let message = self.read_message().await?;

        if self.pending.is_empty() {
            Ok(message.freeze())
        }
        else {
            let mut result = std::mem::take(&mut self.pending);
            result.extend_from_slice(&message);
            Ok(result.freeze())
        }
    }

    /// Reads a line of ASCII text terminated by CRLF, returning it without the terminator. This
    ///  may span several messages, and data after the terminator is kept for the next call.
    pub async fn read_line(&mut self) -> TransactionResult<String> {
        loop {
            if let Some(pos) = self.pending.windows(2).position(|w| w == b"\r\n") {
                let line = self.pending.split_to(pos);
                self.pending.advance(2);
                return Ok(line.iter().map(|&b| b as char).collect());
            }

            let message = self.read_message().await?;
            self.pending.extend_from_slice(&message);
        }
    }

    /// Sends DISCONNECT and resets the client regardless of whether the peer acknowledged it
    pub async fn disconnect(&mut self) -> TransactionResult {
        if self.state == ClientState::Disconnected {
            return Err(TransactionError::NotConnected);
        }

        debug!("disconnecting from {:?}", self.remote_addr);
        self.state = ClientState::Disconnecting;
        let result = self.send_reliably(Packet::disconnect(self.tx_id)).await;
        self.force_disconnect();
        result
    }

    fn force_disconnect(&mut self) {
        self.state = ClientState::Disconnected;
        self.tx_id = PacketId::ZERO;
        self.rx_id = PacketId::ZERO;
        self.local_addr = None;
        self.pending.clear();
        if !self.managed {
            // closes the dedicated socket
            self.io = None;
        }
    }

    async fn read_message(&mut self) -> TransactionResult<BytesMut> {
        if self.state != ClientState::Connected {
            return Err(TransactionError::NotConnected);
        }

        let mut deadline = Instant::now() + self.config.connection_timeout;
        let mut message = BytesMut::new();
        let mut message_len = None;

        loop {
            if self.state != ClientState::Connected {
                return Err(TransactionError::Closed);
            }

            let Some(packet) = self.recv_until(deadline).await else {
                warn!("no data from {:?} for {:?} - disconnecting", self.remote_addr, self.config.connection_timeout);
                if let Err(e) = self.disconnect().await {
                    debug!("disconnect after read timeout failed: {}", e);
                }
                return Err(TransactionError::Timeout);
            };

            if packet.kind != PacketKind::Data || packet.id != self.rx_id {
                self.on_out_of_band_packet(packet).await;
                continue;
            }

            let payload = packet.payload.unwrap_or_default();
            if payload.is_empty() || payload.len() != packet.data_len as usize {
                warn!("DATA packet {} from {:?} has {} payload bytes but data len {} - dropping", packet.id, self.remote_addr, payload.len(), packet.data_len);
                continue;
            }

            let total = message.len() + packet.data_len as usize + packet.data_len_left as usize;
            if let Some(expected_total) = message_len {
                if total != expected_total {
                    warn!("DATA packet {} from {:?} does not continue the message of {} bytes - dropping", packet.id, self.remote_addr, expected_total);
                    continue;
                }
            }
            let expected_total = *message_len.get_or_insert(total);

            trace!("received fragment {} from {:?}: {} bytes, {} bytes left", packet.id, self.remote_addr, packet.data_len, packet.data_len_left);
            if message.is_empty() {
                message.reserve(expected_total);
            }
            message.extend_from_slice(&payload);
            deadline = Instant::now() + self.config.connection_timeout;

            self.send_ack(self.rx_id).await;
            self.rx_id = self.rx_id.next();

            if message.len() == expected_total {
                return Ok(message);
            }
        }
    }

    /// Sends a non-ACK packet that carries the current tx id, and waits for its ACK,
    ///  re-transmitting until the connection timeout expires.
    async fn send_reliably(&mut self, packet: Packet) -> TransactionResult {
        debug_assert_ne!(packet.kind, PacketKind::Ack);
        debug_assert_eq!(packet.id, self.tx_id);

        if self.state == ClientState::Disconnected {
            return Err(TransactionError::NotConnected);
        }

        let packet_buf = packet.to_bytes();
        let deadline = Instant::now() + self.config.connection_timeout;
        let mut num_attempts = 0u32;

        while self.state != ClientState::Disconnected && Instant::now() <= deadline {
            let Some(io) = &self.io else {
                return Err(TransactionError::NotConnected);
            };
            if num_attempts > 0 {
                debug!("no ACK for {:?} {} from {:?} - re-transmitting", packet.kind, packet.id, self.remote_addr);
            }
            num_attempts += 1;
            trace!("sending {} to {:?}", packet, self.remote_addr);
            io.send_socket.do_send_packet(self.remote_addr, &packet_buf).await;

            let ack_deadline = Instant::now() + self.config.ack_timeout;
            while self.state != ClientState::Disconnected {
                let Some(received) = self.recv_until(ack_deadline).await else {
                    break;
                };

                if received.kind == PacketKind::Ack && received.id == self.tx_id {
                    trace!("{:?} {} was acknowledged", packet.kind, packet.id);
                    self.tx_id = self.tx_id.next();
                    return Ok(());
                }
                self.on_out_of_band_packet(received).await;
            }
        }

        if self.state == ClientState::Disconnected {
            Err(TransactionError::Closed)
        }
        else {
            warn!("{:?} {} to {:?} was not acknowledged after {} attempts", packet.kind, packet.id, self.remote_addr, num_attempts);
            Err(TransactionError::Timeout)
        }
    }

    /// Handles packets that are not what the client is currently waiting for
    async fn on_out_of_band_packet(&mut self, packet: Packet) {
        if packet.kind == PacketKind::Disconnect && packet.id == self.rx_id {
            info!("{:?} disconnected", self.remote_addr);
            self.state = ClientState::Disconnecting;
            self.send_ack(packet.id).await;
            self.force_disconnect();
        }
        else if packet.kind != PacketKind::Ack && packet.id == self.rx_id.prev() {
            // the peer did not get our ACK and re-transmitted
            debug!("received duplicate {} from {:?} - re-sending ACK", packet, self.remote_addr);
            self.send_ack(packet.id).await;
        }
        else {
            debug!("ignoring unexpected packet {} from {:?}", packet, self.remote_addr);
        }
    }

    /// ACKs are sent exactly once - they are not acknowledged themselves
    async fn send_ack(&self, id: PacketId) {
        if self.state == ClientState::Disconnected {
            return;
        }
        if let Some(io) = &self.io {
            trace!("sending ACK {} to {:?}", id, self.remote_addr);
            io.send_socket.do_send_packet(self.remote_addr, &Packet::ack(id).to_bytes()).await;
        }
    }

    async fn recv_until(&mut self, deadline: Instant) -> Option<Packet> {
        let remote_addr = self.remote_addr;
        match &mut self.io {
            Some(io) => io.inbound.recv_until(deadline, remote_addr).await,
            None => None,
        }
    }
}
