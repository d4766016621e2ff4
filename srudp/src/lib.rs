//! Simple Reliable UDP (SRUDP) is a small connection oriented protocol on top of plain UDP
//!  datagrams. It provides ordered, acknowledged delivery of *messages* between two peers,
//!  while staying simple enough to be implemented on embedded devices that only have a raw
//!  UDP socket to work with.
//!
//! ## Design goals
//!
//! * TCP-like semantics: handshake, ordered acknowledged data, graceful teardown
//! * Strictly one outstanding packet per direction (stop-and-wait)
//!   * no pipelining, no congestion control, no flow control beyond that
//! * The abstraction is sending / receiving *messages*. Messages bigger than the configured
//!   payload size are split into fragments by the sender and re-assembled by the receiver
//! * No IP-level fragmentation: sockets are created with the "don't fragment" option
//! * One UDP socket on the server side serves an arbitrary number of peers, demultiplexed by
//!   the peer's socket address
//!
//! ## Header
//!
//! Packet header (inside a UDP packet) - all numbers in network byte order (BE):
//! ```ascii
//! 0:  opcode (u8), exactly one bit set:
//!     * bit 0: CONNECT
//!     * bit 1: ACK
//!     * bit 2: DATA
//!     * bit 3: DISCONNECT
//! 1:  id (u16): sequence number of this packet in its direction. ACK packets echo the id
//!      of the packet they acknowledge
//! 3:  data len (u16): number of payload bytes in *this* packet
//! 5:  data len left (u16): number of bytes of the same message that follow in subsequent
//!      packets. This is 0 for the last (or only) fragment of a message
//! 7:  payload - DATA packets only
//!```
//!
//! `data len + data len left` of a message's first fragment is the message's total length.
//!
//! ## Conversation
//!
//! ```ascii
//!  client                         listener
//!    | -- CONNECT id=0 ------------> |   passive handshake, session is created
//!    | <------------- ACK id=0 ----- |
//!    | -- DATA id=1 (len 4, left 0)> |
//!    | <------------- ACK id=1 ----- |
//!    | <----- DATA id=0 (len 4) ---- |   ids are counted independently per direction
//!    | -- ACK id=0 ----------------> |
//!    | -- DISCONNECT id=2 ---------> |
//!    | <------------- ACK id=2 ----- |
//! ```
//!
//! Every packet except ACK is re-transmitted until it is acknowledged or the connection
//!  timeout expires. ACKs are fire-and-forget: if an ACK gets lost, the peer re-transmits the
//!  packet, which the receiver recognizes as a duplicate of the previous id and simply
//!  acknowledges again.

pub mod checksum;
pub mod client;
pub mod config;
pub mod error;
pub mod listener;
pub mod packet;
pub mod packet_id;
mod send_socket;
mod socket;

#[cfg(test)]
mod test_util;
