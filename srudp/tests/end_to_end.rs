use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use bytes::Bytes;
use srudp::client::{Client, ClientState};
use srudp::config::SrudpConfig;
use srudp::error::TransactionError;
use srudp::listener::{Listener, SessionHandler};
use srudp::packet::{Packet, PacketKind};
use srudp::packet_id::PacketId;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Instant};
use tracing::Level;

#[ctor::ctor]
fn init_test_logging() {
    tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(Level::DEBUG)
        .try_init()
        .ok();
}

fn config() -> Arc<SrudpConfig> {
    Arc::new(SrudpConfig {
        ack_timeout: Duration::from_millis(50),
        connection_timeout: Duration::from_secs(1),
        max_payload_len: 500,
    })
}

async fn start_listener<H: SessionHandler>(handler: H) -> Arc<Listener> {
    let listener = Listener::new(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)), config(), Arc::new(handler))
        .await
        .unwrap();
    let listener = Arc::new(listener);

    let cloned = listener.clone();
    tokio::spawn(async move { cloned.recv_loop().await });
    listener
}

async fn connected_client(listener: &Listener) -> Client {
    let mut client = Client::new(listener.local_addr(), config());
    client.connect().await.unwrap();
    assert_eq!(client.state(), ClientState::Connected);
    client
}

#[tokio::test]
async fn test_ping_pong() {
    let (result_sender, mut results) = mpsc::unbounded_channel();
    let listener = start_listener(move |mut session: Client| {
        let result_sender = result_sender.clone();
        async move {
            let message = session.read().await.unwrap();
            session.write(b"pong").await.unwrap();
            result_sender.send(message).unwrap();

            // the peer's DISCONNECT ends the session
            let after_disconnect = session.read().await;
            assert!(matches!(after_disconnect, Err(TransactionError::Closed)));
            assert_eq!(session.state(), ClientState::Disconnected);
        }
    }).await;

    let mut client = connected_client(&listener).await;
    assert!(client.local_addr().is_some());

    client.write(b"ping").await.unwrap();
    assert_eq!(&client.read().await.unwrap()[..], b"pong");
    assert_eq!(&results.recv().await.unwrap()[..], b"ping");

    client.disconnect().await.unwrap();
    assert_eq!(client.state(), ClientState::Disconnected);
    assert_eq!(client.local_addr(), None);

    sleep(Duration::from_millis(100)).await;
    assert_eq!(listener.session_count(), 0);
    listener.stop();
}

#[tokio::test]
async fn test_fragmented_message() {
    let (result_sender, mut results) = mpsc::unbounded_channel();
    let listener = start_listener(move |mut session: Client| {
        let result_sender = result_sender.clone();
        async move {
            if let Ok(message) = session.read().await {
                result_sender.send(message).unwrap();
            }
        }
    }).await;

    let message: Vec<u8> = (0..1500).map(|i| (i % 251) as u8).collect();

    let mut client = connected_client(&listener).await;
    client.write(&message).await.unwrap();

    let received = results.recv().await.unwrap();
    assert_eq!(received.len(), 1500);
    assert_eq!(&received[..], message.as_slice());

    listener.stop();
}

#[tokio::test]
async fn test_lines_across_messages() {
    let listener = start_listener(|mut session: Client| async move {
        session.write(b"hel").await.unwrap();
        session.write(b"lo\r\nworld").await.unwrap();
        session.write(b"\r\n").await.unwrap();
        let _ = session.read().await;
    }).await;

    let mut client = connected_client(&listener).await;
    assert_eq!(client.read_line().await.unwrap(), "hello");
    assert_eq!(client.read_line().await.unwrap(), "world");

    client.disconnect().await.unwrap();
    listener.stop();
}

/// A hand-written passive peer that acknowledges everything and records the DATA ids it sees
#[tokio::test]
async fn test_ids_are_consecutive() {
    let server = UdpSocket::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0))).await.unwrap();
    let server_addr = server.local_addr().unwrap();

    let server_task = tokio::spawn(async move {
        let mut ids = Vec::new();
        let mut buf = [0u8; 2048];
        loop {
            let (n, from) = server.recv_from(&mut buf).await.unwrap();
            let packet = Packet::deser(&buf[..n]).unwrap();
            server.send_to(&Packet::ack(packet.id).to_bytes(), from).await.unwrap();
            match packet.kind {
                PacketKind::Data if ids.last() != Some(&packet.id) => ids.push(packet.id),
                PacketKind::Disconnect => return ids,
                _ => {}
            }
        }
    });

    let mut client = Client::new(server_addr, config());
    client.connect().await.unwrap();
    let messages: [&[u8]; 3] = [b"a", &[7u8; 1200], b"bc"];
    for message in messages {
        client.write(message).await.unwrap();
    }
    client.disconnect().await.unwrap();

    let ids = server_task.await.unwrap();
    let expected: Vec<PacketId> = (1..=5).map(PacketId::from_raw).collect();
    assert_eq!(ids, expected);
}

#[tokio::test]
async fn test_connect_timeout() {
    let silent = UdpSocket::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0))).await.unwrap();

    let mut client = Client::new(silent.local_addr().unwrap(), config());
    let start = Instant::now();
    let result = client.connect().await;

    assert!(matches!(result, Err(TransactionError::Timeout)));
    assert!(start.elapsed() >= Duration::from_secs(1));
    assert_eq!(client.state(), ClientState::Disconnected);
    assert_eq!(client.local_addr(), None);

    // the silent peer saw CONNECT re-transmitted
    let mut buf = [0u8; 64];
    let (n, _) = silent.recv_from(&mut buf).await.unwrap();
    assert_eq!(Packet::deser(&buf[..n]).unwrap(), Packet::connect());
}

#[tokio::test]
async fn test_connect_twice() {
    let listener = start_listener(|mut session: Client| async move {
        let _ = session.read().await;
    }).await;

    let mut client = connected_client(&listener).await;
    assert!(matches!(client.connect().await, Err(TransactionError::AlreadyConnected)));
    assert_eq!(client.state(), ClientState::Connected);

    client.disconnect().await.unwrap();
    listener.stop();
}

#[tokio::test]
async fn test_disconnect_twice() {
    let listener = start_listener(|mut session: Client| async move {
        let _ = session.read().await;
    }).await;

    let mut client = connected_client(&listener).await;
    client.disconnect().await.unwrap();

    let second = timeout(Duration::from_secs(5), client.disconnect()).await.unwrap();
    assert!(matches!(second, Err(TransactionError::NotConnected)));
    assert_eq!(client.state(), ClientState::Disconnected);

    // reconnecting after a disconnect starts over with a fresh socket and fresh ids
    client.connect().await.unwrap();
    client.disconnect().await.unwrap();

    listener.stop();
}

#[tokio::test]
async fn test_session_disconnects_client() {
    let listener = start_listener(|mut session: Client| async move {
        session.disconnect().await.unwrap();
    }).await;

    let mut client = connected_client(&listener).await;
    let result = client.read().await;

    assert!(matches!(result, Err(TransactionError::Closed)));
    assert_eq!(client.state(), ClientState::Disconnected);
    listener.stop();
}

#[tokio::test]
async fn test_read_timeout_disconnects() {
    let listener = start_listener(|mut session: Client| async move {
        // keeps the session alive without sending anything
        let _ = session.read().await;
    }).await;

    let mut client = connected_client(&listener).await;
    let result = client.read().await;

    assert!(matches!(result, Err(TransactionError::Timeout)));
    assert_eq!(client.state(), ClientState::Disconnected);
    assert!(matches!(client.write(b"x").await, Err(TransactionError::NotConnected)));

    listener.stop();
}

#[tokio::test]
async fn test_concurrent_sessions() {
    let listener = start_listener(|mut session: Client| async move {
        while let Ok(message) = session.read().await {
            let mut reply = message.to_vec();
            reply.reverse();
            if session.write(&reply).await.is_err() {
                break;
            }
        }
    }).await;

    let mut tasks = Vec::new();
    for i in 0..4u8 {
        let addr = listener.local_addr();
        tasks.push(tokio::spawn(async move {
            let mut client = Client::new(addr, config());
            client.connect().await.unwrap();
            for j in 0..3u8 {
                client.write(&[i, j, 0xff]).await.unwrap();
                let reply = client.read().await.unwrap();
                assert_eq!(reply, Bytes::from(vec![0xff, j, i]));
            }
            client.disconnect().await.unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    sleep(Duration::from_millis(100)).await;
    assert_eq!(listener.session_count(), 0);
    listener.stop();
}

#[tokio::test]
async fn test_datagrams_from_other_addresses_are_ignored() {
    let listener = start_listener(|mut session: Client| async move {
        sleep(Duration::from_millis(200)).await;
        if session.write(b"real").await.is_ok() {
            let _ = session.read().await;
        }
    }).await;

    let mut client = connected_client(&listener).await;
    let client_port = client.local_addr().unwrap().port();

    // the DATA packet the client expects next, but sent from an address other than its peer's
    let stray = UdpSocket::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0))).await.unwrap();
    let forged = Packet::data(PacketId::ZERO, 0, Bytes::from_static(b"stray"));
    stray.send_to(&forged.to_bytes(), SocketAddr::from((Ipv4Addr::LOCALHOST, client_port))).await.unwrap();

    assert_eq!(&client.read().await.unwrap()[..], b"real");

    // ... and it was not acknowledged either
    let mut buf = [0u8; 64];
    assert!(timeout(Duration::from_millis(100), stray.recv_from(&mut buf)).await.is_err());

    client.disconnect().await.unwrap();
    listener.stop();
}
