//! A TCP-to-SRUDP bridge, for applications that cannot (or do not want to) speak UDP.
//!
//! The bridge accepts TCP connections and lets each of them drive one SRUDP client through a
//!  line-based command protocol. Every command is answered by `OK` (plus the command's payload,
//!  if any) or by `ERR <code>`:
//!
//! ```ascii
//! conn <ip> <port>    connect to an SRUDP peer                  OK | ERR AlreadyConnected | ERR TransactionFailed
//! waln <text>         send <text> as is, without terminator     OK | ERR NotConnected | ERR TransactionFailed
//! raln                receive a CRLF-terminated line            OK \n <line> \n
//! wbin <n>            send the n raw bytes following the line   OK | ERR NotConnected | ERR TransactionFailed
//! rbin                receive a message                         OK \n <n> \n <n raw bytes>
//! vers                bridge version                            OK \n <version> \n
//! disc                disconnect from the SRUDP peer            OK | ERR NotConnected | ERR TransactionFailed
//! quit                disconnect and close the TCP connection   OK
//! help, ?             short syntax description                  OK \n <text> \n
//! ```
//!
//! Anything else is answered with `ERR BadSyntax (? or help to show syntax)`. Blank lines are
//!  ignored, and lines may be terminated by LF or CRLF.
//!
//! [client::BridgeClient] is the counterpart for applications talking to a bridge.

pub mod client;
pub mod command;
pub mod server;
pub mod session;

pub const BRIDGE_VERSION: &str = env!("CARGO_PKG_VERSION");
