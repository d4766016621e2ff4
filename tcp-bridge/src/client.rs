use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tracing::trace;

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("the bridge already has an SRUDP connection")]
    AlreadyConnected,
    #[error("the bridge has no SRUDP connection")]
    NotConnected,
    #[error("SRUDP transaction failed")]
    TransactionFailed,
    #[error("bridge reported an error: {0}")]
    Unspecified(String),
    #[error("malformed reply from bridge")]
    Malformed,
    #[error("I/O error talking to the bridge: {0}")]
    Io(#[from] io::Error),
}

pub type BridgeResult<T = ()> = Result<T, BridgeError>;

/// Client side of the bridge protocol, for applications that reach SRUDP devices through a
///  bridge instead of speaking UDP themselves.
pub struct BridgeClient<S = BufStream<TcpStream>> {
    stream: S,
}

impl BridgeClient {
    pub async fn connect_to_bridge(addr: SocketAddr) -> BridgeResult<BridgeClient> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(BridgeClient::new(BufStream::new(stream)))
    }
}

impl<S: AsyncBufRead + AsyncWrite + Unpin> BridgeClient<S> {
    pub fn new(stream: S) -> BridgeClient<S> {
        BridgeClient { stream }
    }

    /// Makes the bridge open an SRUDP connection to `ip:port`
    pub async fn connect(&mut self, ip: Ipv4Addr, port: u16) -> BridgeResult {
        self.send_command(&format!("conn {} {}", ip, port), &[]).await?;
        self.check_reply().await
    }

    /// Sends `line` as one SRUDP message. The bridge adds no terminator, so include one if the
    ///  peer expects it. The line itself must not contain `\n`.
    pub async fn write_line(&mut self, line: &str) -> BridgeResult {
        self.send_command(&format!("waln {}", line), &[]).await?;
        self.check_reply().await
    }

    /// NB: a single message should not exceed the SRUDP peer's receive capacity
    pub async fn write_bytes(&mut self, data: &[u8]) -> BridgeResult {
        self.send_command(&format!("wbin {}", data.len()), data).await?;
        self.check_reply().await
    }

    pub async fn read_line(&mut self) -> BridgeResult<String> {
        self.send_command("raln", &[]).await?;
        self.check_reply().await?;
        self.read_reply_line().await
    }

    pub async fn read_bytes(&mut self) -> BridgeResult<Vec<u8>> {
        self.send_command("rbin", &[]).await?;
        self.check_reply().await?;

        let len: usize = self.read_reply_line().await?
            .parse()
            .map_err(|_| BridgeError::Malformed)?;
        let mut buf = vec![0u8; len];
        self.stream.read_exact(&mut buf).await?;
        Ok(buf)
    }

    pub async fn version(&mut self) -> BridgeResult<String> {
        self.send_command("vers", &[]).await?;
        self.check_reply().await?;
        self.read_reply_line().await
    }

    pub async fn disconnect(&mut self) -> BridgeResult {
        self.send_command("disc", &[]).await?;
        self.check_reply().await
    }

    /// Ends the TCP session, disconnecting any SRUDP connection
    pub async fn quit(mut self) -> BridgeResult {
        self.send_command("quit", &[]).await?;
        self.check_reply().await
    }

    async fn send_command(&mut self, command: &str, raw: &[u8]) -> BridgeResult {
        trace!("sending bridge command {:?}", command);
        self.stream.write_all(command.as_bytes()).await?;
        self.stream.write_all(b"\n").await?;
        self.stream.write_all(raw).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn check_reply(&mut self) -> BridgeResult {
        let reply = self.read_reply_line().await?;
        if reply == "OK" {
            return Ok(());
        }

        match reply.strip_prefix("ERR") {
            Some(code) => match code.trim() {
                "AlreadyConnected" => Err(BridgeError::AlreadyConnected),
                "NotConnected" => Err(BridgeError::NotConnected),
                "TransactionFailed" => Err(BridgeError::TransactionFailed),
                other => Err(BridgeError::Unspecified(other.to_string())),
            },
            None => Err(BridgeError::Malformed),
        }
    }

    async fn read_reply_line(&mut self) -> BridgeResult<String> {
        let mut buf = Vec::new();
        if self.stream.read_until(b'\n', &mut buf).await? == 0 {
            return Err(BridgeError::Malformed);
        }
        if buf.last() == Some(&b'\n') {
            buf.pop();
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
        }
        Ok(buf.iter().map(|&b| b as char).collect())
    }
}
