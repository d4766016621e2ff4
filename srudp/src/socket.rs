use std::io;
use std::net::SocketAddr;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::{debug, warn};

/// Creates a non-blocking UDP socket bound to `addr`, with IP-level fragmentation disabled.
///
/// NB: must be called from inside a tokio runtime
pub(crate) fn bind_udp_socket(addr: SocketAddr) -> io::Result<UdpSocket> {
    let domain = match addr {
        SocketAddr::V4(_) => Domain::IPV4,
        SocketAddr::V6(_) => Domain::IPV6,
    };

    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    if let Err(e) = set_dont_fragment(&socket, addr.is_ipv6()) {
        warn!("failed to set 'don't fragment' on UDP socket for {:?}: {}", addr, e);
    }
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;

    let socket = UdpSocket::from_std(socket.into())?;
    debug!("bound UDP socket to {:?}", socket.local_addr()?);
    Ok(socket)
}

#[cfg(target_os = "linux")]
fn set_dont_fragment(socket: &Socket, is_ipv6: bool) -> io::Result<()> {
    use std::mem::size_of_val;
    use std::os::fd::AsRawFd;

    let (level, name, value) = if is_ipv6 {
        (libc::IPPROTO_IPV6, libc::IPV6_MTU_DISCOVER, libc::IPV6_PMTUDISC_DO)
    }
    else {
        (libc::IPPROTO_IP, libc::IP_MTU_DISCOVER, libc::IP_PMTUDISC_DO)
    };

    let ret = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            level,
            name,
            &value as *const _ as *const libc::c_void,
            size_of_val(&value) as libc::socklen_t,
        )
    };

    if ret == -1 {
        Err(io::Error::last_os_error())
    }
    else {
        Ok(())
    }
}

#[cfg(not(target_os = "linux"))]
fn set_dont_fragment(_socket: &Socket, _is_ipv6: bool) -> io::Result<()> {
    debug!("'don't fragment' is not supported on this platform - relying on the OS default");
    Ok(())
}
