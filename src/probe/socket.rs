use anyhow::{Result, anyhow};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::mem::MaybeUninit;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// Socket capability level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketCapability {
    /// Raw ICMP: sees echo replies and ICMP errors from routers
    Raw,
    /// Unprivileged ICMP: echo replies only
    Dgram,
}

/// Socket with metadata about type (for DGRAM-aware parsing)
#[derive(Debug)]
pub struct SocketInfo {
    pub socket: Socket,
    /// True if SOCK_DGRAM (no IP header in received packets)
    pub is_dgram: bool,
}

/// Check socket permissions and return capability level
///
/// Prefers RAW, falls back to unprivileged DGRAM ICMP.
pub fn check_permissions() -> Result<SocketCapability> {
    if create_raw_icmp_socket(false).is_ok() {
        return Ok(SocketCapability::Raw);
    }

    if create_dgram_icmp_socket(false).is_ok() {
        tracing::warn!("using unprivileged ICMP sockets; unreachable replies will show as timeouts");
        return Ok(SocketCapability::Dgram);
    }

    let binary_path = std::env::current_exe()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| "pingpoll".to_string());

    Err(anyhow!(
        "Insufficient permissions for ICMP sockets.\n\n\
         Fix options:\n\
         \u{2022} Run with sudo: sudo pingpoll <host>\n\
         \u{2022} Add capability: sudo setcap cap_net_raw+ep {}\n\
         \u{2022} Enable unprivileged ICMP: sudo sysctl -w net.ipv4.ping_group_range='0 65534'",
        binary_path
    ))
}

/// Create a raw ICMP socket
pub fn create_raw_icmp_socket(ipv6: bool) -> Result<Socket> {
    let (domain, protocol) = if ipv6 {
        (Domain::IPV6, Protocol::ICMPV6)
    } else {
        (Domain::IPV4, Protocol::ICMPV4)
    };

    let socket = Socket::new(domain, Type::RAW, Some(protocol))?;
    socket.set_nonblocking(false)?;
    socket.set_read_timeout(Some(Duration::from_secs(1)))?;
    Ok(socket)
}

/// Create an unprivileged ICMP socket (SOCK_DGRAM)
pub fn create_dgram_icmp_socket(ipv6: bool) -> Result<Socket> {
    let (domain, protocol) = if ipv6 {
        (Domain::IPV6, Protocol::ICMPV6)
    } else {
        (Domain::IPV4, Protocol::ICMPV4)
    };

    let socket = Socket::new(domain, Type::DGRAM, Some(protocol))?;
    socket.set_nonblocking(false)?;
    socket.set_read_timeout(Some(Duration::from_secs(1)))?;
    Ok(socket)
}

/// Create the socket a transport sends and receives on
///
/// DGRAM replies are only delivered to the socket that sent the request,
/// so callers clone this one for their receiver rather than opening a
/// second socket.
pub fn create_icmp_socket(ipv6: bool) -> Result<SocketInfo> {
    if let Ok(socket) = create_raw_icmp_socket(ipv6) {
        if let Err(e) = socket.set_recv_buffer_size(1024 * 1024) {
            tracing::debug!("could not set receive buffer to 1MB: {}", e);
        }
        return Ok(SocketInfo {
            socket,
            is_dgram: false,
        });
    }

    let socket = create_dgram_icmp_socket(ipv6)?;
    let _ = socket.set_recv_buffer_size(1024 * 1024);
    Ok(SocketInfo {
        socket,
        is_dgram: true,
    })
}

/// Send ICMP packet to target
pub fn send_icmp(socket: &Socket, packet: &[u8], target: IpAddr) -> Result<usize> {
    let addr = SocketAddr::new(target, 0);
    let sock_addr = SockAddr::from(addr);
    let sent = socket.send_to(packet, &sock_addr)?;
    Ok(sent)
}

/// Receive one ICMP message, returning its length and sender
///
/// Raw errors are returned so the caller can tell read timeouts apart
/// from real failures.
pub fn recv_icmp(socket: &Socket, buffer: &mut [u8]) -> io::Result<(usize, IpAddr)> {
    // SAFETY: MaybeUninit<u8> has the same layout as u8, and an initialized
    // buffer stays valid when viewed as possibly-uninitialized.
    let uninit = unsafe { &mut *(buffer as *mut [u8] as *mut [MaybeUninit<u8>]) };
    let (len, addr) = socket.recv_from(uninit)?;
    let source = addr
        .as_socket()
        .map(|a| a.ip())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "non-IP source address"))?;
    Ok((len, source))
}

/// True for the errors a blocking socket reports when its read timeout fires
pub fn is_timeout(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}
