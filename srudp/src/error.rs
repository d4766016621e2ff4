use crate::packet::PacketKind;
use crate::packet_id::PacketId;

/// A datagram or a locally constructed packet that violates the packet format
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PacketError {
    #[error("packet of {0} bytes is shorter than the header")]
    TooShort(usize),
    #[error("opcode {0:#04x} has no recognized bit set")]
    UnknownOpcode(u8),
    #[error("{0:?} packets carry no payload")]
    UnexpectedPayload(PacketKind),
    #[error("DATA packets require a non-empty payload")]
    MissingPayload,
    #[error("CONNECT packets must have id 0, was {0}")]
    NonZeroConnectId(PacketId),
}

/// The reason a session level operation (connect, write, read, disconnect) failed.
///
/// Unreliability of the network is handled inside the protocol and surfaces only as `Timeout`.
#[derive(Debug, thiserror::Error)]
pub enum TransactionError {
    #[error("client is already connecting or connected")]
    AlreadyConnected,
    #[error("client is not connected")]
    NotConnected,
    #[error("operation is not supported for a listener managed client")]
    Managed,
    #[error("no response from peer within the connection timeout")]
    Timeout,
    #[error("connection was closed by the peer")]
    Closed,
    #[error("message length {0} is outside the supported range of 1 to 65535 bytes")]
    MessageSize(usize),
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
}

/// `Ok` is a successful transaction, `Err` a failed one
pub type TransactionResult<T = ()> = Result<T, TransactionError>;
