use std::net::SocketAddr;
use std::sync::Arc;
use srudp::client::{Client, ClientState};
use srudp::config::SrudpConfig;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::select;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use crate::command::Command;
use crate::BRIDGE_VERSION;

pub const ERR_ALREADY_CONNECTED: &str = "AlreadyConnected";
pub const ERR_NOT_CONNECTED: &str = "NotConnected";
pub const ERR_TRANSACTION_FAILED: &str = "TransactionFailed";
pub const ERR_BAD_SYNTAX: &str = "BadSyntax (? or help to show syntax)";

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Close,
}

/// One TCP connection of the bridge. It executes commands line by line, holding at most one
///  SRUDP client at a time on behalf of the TCP peer.
pub struct BridgeSession<S> {
    stream: S,
    config: Arc<SrudpConfig>,
    srudp: Option<Client>,
    stop_receiver: watch::Receiver<bool>,
}

impl<S: AsyncBufRead + AsyncWrite + Unpin> BridgeSession<S> {
    pub fn new(stream: S, config: Arc<SrudpConfig>, stop_receiver: watch::Receiver<bool>) -> BridgeSession<S> {
        BridgeSession {
            stream,
            config,
            srudp: None,
            stop_receiver,
        }
    }

    /// Serves commands until the TCP peer closes the connection or sends `quit`, or the bridge
    ///  is stopped. An SRUDP connection that is still open at that point is disconnected.
    pub async fn run(mut self) -> anyhow::Result<()> {
        loop {
            if *self.stop_receiver.borrow_and_update() {
                info!("bridge is stopping - closing session");
                break;
            }

            let line = select! {
                line = read_command_line(&mut self.stream) => line?,
                changed = self.stop_receiver.changed() => {
                    if changed.is_err() {
                        debug!("bridge was dropped - closing session");
                        break;
                    }
                    continue;
                }
            };
            let Some(line) = line else {
                debug!("TCP peer closed the connection");
                break;
            };
            if line.is_empty() {
                continue;
            }

            let flow = match Command::parse(&line) {
                Ok(command) => {
                    debug!("executing {:?}", command);
                    self.execute(command).await?
                }
                Err(e) => {
                    debug!("{}", e);
                    self.reply_error(ERR_BAD_SYNTAX).await?;
                    Flow::Continue
                }
            };
            if flow == Flow::Close {
                return Ok(());
            }
        }

        self.close_srudp().await;
        Ok(())
    }

    async fn execute(&mut self, command: Command) -> anyhow::Result<Flow> {
        match command {
            Command::Connect(addr) => self.on_connect(SocketAddr::V4(addr)).await?,
            Command::WriteLine(text) => self.on_write(text.as_bytes()).await?,
            Command::ReadLine => self.on_read_line().await?,
            Command::WriteBinary(len) => {
                // the raw bytes are part of the request, so they are consumed in any case
                let mut message = vec![0u8; len];
                self.stream.read_exact(&mut message).await?;
                self.on_write(&message).await?;
            }
            Command::ReadBinary => self.on_read_binary().await?,
            Command::Version => self.reply_ok(format!("{}\n", BRIDGE_VERSION).as_bytes()).await?,
            Command::Disconnect => self.on_disconnect().await?,
            Command::Quit => {
                self.close_srudp().await;
                self.reply_ok(b"").await?;
                return Ok(Flow::Close);
            }
            Command::Help => {
                let help = format!("SRUDP TCP bridge v{}: conn <ip> <port> | waln <text> | raln | wbin <n> <bytes> | rbin | vers | disc | quit\n", BRIDGE_VERSION);
                self.reply_ok(help.as_bytes()).await?;
            }
        }
        Ok(Flow::Continue)
    }

    async fn on_connect(&mut self, addr: SocketAddr) -> anyhow::Result<()> {
        if self.srudp.is_some() {
            return self.reply_error(ERR_ALREADY_CONNECTED).await;
        }

        let mut client = Client::new(addr, self.config.clone());
        match client.connect().await {
            Ok(()) => {
                info!("SRUDP connection to {:?} established", addr);
                self.srudp = Some(client);
                self.reply_ok(b"").await
            }
            Err(e) => {
                warn!("SRUDP connection to {:?} failed: {}", addr, e);
                self.reply_error(ERR_TRANSACTION_FAILED).await
            }
        }
    }

    async fn on_write(&mut self, message: &[u8]) -> anyhow::Result<()> {
        let Some(client) = self.connected_client() else {
            return self.reply_error(ERR_NOT_CONNECTED).await;
        };

        let result = client.write(message).await;
        self.forget_if_disconnected();
        match result {
            Ok(()) => self.reply_ok(b"").await,
            Err(e) => {
                debug!("SRUDP write failed: {}", e);
                self.reply_error(ERR_TRANSACTION_FAILED).await
            }
        }
    }

    async fn on_read_line(&mut self) -> anyhow::Result<()> {
        let Some(client) = self.connected_client() else {
            return self.reply_error(ERR_NOT_CONNECTED).await;
        };

        let result = client.read_line().await;
        self.forget_if_disconnected();
        match result {
            Ok(line) => {
                let mut payload: Vec<u8> = line.chars().map(|c| c as u32 as u8).collect();
                payload.push(b'\n');
                self.reply_ok(&payload).await
            }
            Err(e) => {
                debug!("SRUDP read failed: {}", e);
                self.reply_error(ERR_TRANSACTION_FAILED).await
            }
        }
    }

    async fn on_read_binary(&mut self) -> anyhow::Result<()> {
        let Some(client) = self.connected_client() else {
            return self.reply_error(ERR_NOT_CONNECTED).await;
        };

        let result = client.read().await;
        self.forget_if_disconnected();
        match result {
            Ok(message) => {
                let mut payload = format!("{}\n", message.len()).into_bytes();
                payload.extend_from_slice(&message);
                self.reply_ok(&payload).await
            }
            Err(e) => {
                debug!("SRUDP read failed: {}", e);
                self.reply_error(ERR_TRANSACTION_FAILED).await
            }
        }
    }

    /// The session is dropped whether the peer acknowledged the DISCONNECT or not
    async fn on_disconnect(&mut self) -> anyhow::Result<()> {
        let Some(mut client) = self.srudp.take() else {
            return self.reply_error(ERR_NOT_CONNECTED).await;
        };

        if client.state() == ClientState::Disconnected {
            // the peer tore the connection down already
            return self.reply_ok(b"").await;
        }
        match client.disconnect().await {
            Ok(()) => self.reply_ok(b"").await,
            Err(e) => {
                debug!("SRUDP disconnect failed: {}", e);
                self.reply_error(ERR_TRANSACTION_FAILED).await
            }
        }
    }

    fn connected_client(&mut self) -> Option<&mut Client> {
        self.srudp.as_mut()
            .filter(|c| c.state() == ClientState::Connected)
    }

    /// A client that went to `Disconnected` (read timeout, passive disconnect) is dropped, so
    ///  that a new `conn` is possible.
    fn forget_if_disconnected(&mut self) {
        if self.srudp.as_ref().is_some_and(|c| c.state() == ClientState::Disconnected) {
            debug!("SRUDP connection is gone");
            self.srudp = None;
        }
    }

    async fn close_srudp(&mut self) {
        if let Some(mut client) = self.srudp.take() {
            if client.state() != ClientState::Disconnected {
                if let Err(e) = client.disconnect().await {
                    debug!("SRUDP disconnect failed: {}", e);
                }
            }
        }
    }

    async fn reply_ok(&mut self, payload: &[u8]) -> anyhow::Result<()> {
        self.stream.write_all(b"OK\n").await?;
        self.stream.write_all(payload).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn reply_error(&mut self, code: &str) -> anyhow::Result<()> {
        self.stream.write_all(format!("ERR {}\n", code).as_bytes()).await?;
        self.stream.flush().await?;
        Ok(())
    }
}

/// Returns the next line without its LF or CRLF terminator, or `None` at EOF
async fn read_command_line<S: AsyncBufRead + Unpin>(stream: &mut S) -> anyhow::Result<Option<String>> {
    let mut buf = Vec::new();
    if stream.read_until(b'\n', &mut buf).await? == 0 {
        return Ok(None);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    }
    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}
