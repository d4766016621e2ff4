use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use async_trait::async_trait;
use tokio::runtime::{Builder, Runtime};
use tokio::sync::mpsc;
use crate::client::Client;
use crate::config::SrudpConfig;
use crate::packet::{Packet, PacketKind};
use crate::send_socket::SendSocket;

pub const PEER_ADDR: ([u8; 4], u16) = ([1, 2, 3, 4], 9);
pub const SELF_ADDR: ([u8; 4], u16) = ([1, 2, 3, 4], 8);

/// Stands in for the remote peer of a managed client: it records everything the client
///  sends, and optionally acknowledges it immediately by pushing an ACK into the client's
///  inbound queue.
pub struct ScriptedPeer {
    sent: Mutex<Vec<Packet>>,
    inbound: mpsc::UnboundedSender<Packet>,
    auto_ack: bool,
}

impl ScriptedPeer {
    pub fn sent(&self) -> Vec<Packet> {
        self.sent.lock().unwrap().clone()
    }

    pub fn clear_sent(&self) {
        self.sent.lock().unwrap().clear();
    }

    pub fn sent_of_kind(&self, kind: PacketKind) -> Vec<Packet> {
        self.sent().into_iter()
            .filter(|p| p.kind == kind)
            .collect()
    }

    /// push a packet into the client's inbound queue, as if it was received from the peer
    pub fn push(&self, packet: Packet) {
        self.inbound.send(packet).unwrap();
    }
}

#[async_trait]
impl SendSocket for ScriptedPeer {
    async fn do_send_packet(&self, to: SocketAddr, packet_buf: &[u8]) {
        assert_eq!(to, SocketAddr::from(PEER_ADDR));

        let packet = Packet::deser(packet_buf).unwrap();
        if self.auto_ack && packet.kind != PacketKind::Ack {
            // the client may have dropped its queue after a teardown
            let _ = self.inbound.send(Packet::ack(packet.id));
        }
        self.sent.lock().unwrap().push(packet);
    }
}

pub fn test_config() -> Arc<SrudpConfig> {
    Arc::new(SrudpConfig {
        ack_timeout: Duration::from_millis(100),
        connection_timeout: Duration::from_secs(1),
        max_payload_len: 500,
    })
}

/// A managed client that completed the passive handshake, i.e. that is `Connected` with
///  rx id 1 and tx id 0. The handshake ACK is not part of `ScriptedPeer::sent()`.
pub async fn connected_client(config: Arc<SrudpConfig>, auto_ack: bool) -> (Client, Arc<ScriptedPeer>) {
    let (inbound_sender, inbound_receiver) = mpsc::unbounded_channel();
    let peer = Arc::new(ScriptedPeer {
        sent: Default::default(),
        inbound: inbound_sender,
        auto_ack,
    });

    let mut client = Client::new_managed(
        SocketAddr::from(PEER_ADDR),
        SocketAddr::from(SELF_ADDR),
        config,
        peer.clone(),
        inbound_receiver,
    );
    client.accept().await;
    peer.clear_sent();

    (client, peer)
}

pub fn paused_runtime() -> Runtime {
    Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .unwrap()
}
