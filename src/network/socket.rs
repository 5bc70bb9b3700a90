//! Socket helpers for probe transmission and ICMP reception

use crate::network::capture::{FrameReader, CAPTURE_POLL_INTERVAL};
use crate::network::interface::is_link_local;
use crate::network::packet::build_syn_segment;
use crate::network::AddressFamily;
use crate::ScanError;
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, Read};
use std::net::{IpAddr, SocketAddr, SocketAddrV6};

/// Build a socket address, attaching `scope_id` to link-local IPv6 addresses
pub fn scoped_addr(ip: IpAddr, port: u16, scope_id: u32) -> SocketAddr {
    match ip {
        IpAddr::V6(v6) if is_link_local(&ip) => SocketAddr::V6(SocketAddrV6::new(v6, port, 0, scope_id)),
        _ => SocketAddr::new(ip, port),
    }
}

/// Emits the opening segment of a TCP handshake
pub trait SynSender: Send + Sync {
    fn send_syn(&self, source: SocketAddr, dest: SocketAddr) -> io::Result<()>;
}

/// Sends crafted SYN segments on a raw TCP socket.
///
/// The kernel supplies the IP header and never sees a connection, so a SYN+ACK
/// from the target is answered with the host's own RST and the handshake is
/// never completed. Needs CAP_NET_RAW.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawSynSender;

impl SynSender for RawSynSender {
    fn send_syn(&self, source: SocketAddr, dest: SocketAddr) -> io::Result<()> {
        let segment = build_syn_segment(source, dest, rand::random()).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "source and destination families differ")
        })?;

        let socket = Socket::new(Domain::for_address(dest), Type::from(libc::SOCK_RAW), Some(Protocol::TCP))?;

        // Raw IPv6 sockets reject a destination port other than 0 or the protocol
        let mut bind_addr = source;
        bind_addr.set_port(0);
        socket.bind(&bind_addr.into())?;
        let mut raw_dest = dest;
        raw_dest.set_port(0);

        let sent = socket.send_to(&segment, &raw_dest.into())?;
        if sent != segment.len() {
            return Err(io::Error::new(io::ErrorKind::WriteZero, "short raw TCP write"));
        }
        Ok(())
    }
}

/// Open a raw ICMP (or ICMPv6) socket for receiving unreachable messages
pub fn open_icmp_socket(family: AddressFamily) -> crate::Result<Socket> {
    let (domain, protocol) = match family {
        AddressFamily::Ipv4 => (Domain::IPV4, Protocol::ICMPV4),
        AddressFamily::Ipv6 => (Domain::IPV6, Protocol::ICMPV6),
    };

    let socket = Socket::new(domain, Type::from(libc::SOCK_RAW), Some(protocol))
        .map_err(|e| ScanError::from_socket_error("raw ICMP socket", e))?;
    socket
        .set_read_timeout(Some(CAPTURE_POLL_INTERVAL))
        .map_err(|e| ScanError::NetworkError(e.to_string()))?;

    Ok(socket)
}

/// Reads whole ICMP packets from a raw socket
pub struct IcmpSocketReader {
    socket: Socket,
    buf: Vec<u8>,
}

impl IcmpSocketReader {
    pub fn new(socket: Socket) -> Self {
        Self {
            socket,
            buf: vec![0u8; 4096],
        }
    }
}

impl FrameReader for IcmpSocketReader {
    fn next_frame(&mut self) -> io::Result<Option<Vec<u8>>> {
        match (&self.socket).read(&mut self.buf) {
            Ok(size) => Ok(Some(self.buf[..size].to_vec())),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
