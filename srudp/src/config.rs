use std::time::Duration;
use anyhow::bail;
use crate::packet::{HEADER_LEN, MAX_DATAGRAM_LEN};

/// Timing and size parameters shared by all clients and listeners of an application.
///
/// Both peers of a connection should agree on `max_payload_len`, or at least the receiving
///  side must be able to receive datagrams of the sender's configured size.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SrudpConfig {
    /// The time to wait for an ACK before re-transmitting a packet.
    pub ack_timeout: Duration,

    /// The total time budget for a single send or read operation. A send fails if it is not
    ///  acknowledged within this time, re-transmissions included. A read fails (and disconnects)
    ///  if there is no progress for this long.
    pub connection_timeout: Duration,

    /// This is the maximum number of payload bytes in a single DATA packet. Longer messages are
    ///  fragmented.
    ///
    /// Peers are often embedded devices with small receive buffers, so the default is
    ///  conservative. Sockets are created with the "don't fragment" flag, so the resulting
    ///  packet size (`max_payload_len` + 7 bytes of header) must fit the path MTU.
    pub max_payload_len: usize,
}

impl Default for SrudpConfig {
    fn default() -> Self {
        SrudpConfig {
            ack_timeout: Duration::from_millis(500),
            connection_timeout: Duration::from_secs(5),
            max_payload_len: 500,
        }
    }
}

impl SrudpConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.ack_timeout.is_zero() {
            bail!("ACK timeout must be positive");
        }
        if self.connection_timeout < self.ack_timeout {
            bail!("connection timeout {:?} is shorter than the ACK timeout {:?}", self.connection_timeout, self.ack_timeout);
        }
        if self.max_payload_len == 0 {
            bail!("max payload length must be positive");
        }
        if self.max_payload_len > MAX_DATAGRAM_LEN - HEADER_LEN {
            bail!("max payload length {} does not fit into a UDP datagram", self.max_payload_len);
        }

        Ok(())
    }
}
