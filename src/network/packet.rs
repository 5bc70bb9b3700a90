//! Frame and packet parsing for probe correlation
//!
//! TCP replies are read from link-layer frames captured on the scan interface.
//! ICMP errors are read from raw ICMP sockets: IPv4 sockets hand over the IP header
//! as well, ICMPv6 sockets deliver the bare message.
//!
//! IPv6 extension headers are not walked. A segment behind a hop-by-hop or routing
//! header is simply not recognised.

use crate::network::PortState;
use pnet::packet::ethernet::{EtherTypes, EthernetPacket};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::ipv6::Ipv6Packet;
use pnet::packet::tcp::{self, MutableTcpPacket, TcpFlags, TcpPacket};
use pnet::packet::udp::UdpPacket;
use pnet::packet::Packet;
use std::net::{IpAddr, SocketAddr};

pub const TCP_FIN: u8 = 0x01;
pub const TCP_SYN: u8 = 0x02;
pub const TCP_RST: u8 = 0x04;
pub const TCP_ACK: u8 = 0x10;

/// Offset of the flags byte inside a TCP header
const TCP_FLAGS_OFFSET: usize = 13;
const IPV6_HEADER_LEN: usize = 40;
const ICMP_HEADER_LEN: usize = 8;
const TCP_HEADER_LEN: usize = 20;
const SYN_WINDOW: u16 = 1024;

const ICMPV4_DEST_UNREACHABLE: u8 = 3;
const ICMPV4_PORT_UNREACHABLE: u8 = 3;
const ICMPV6_DEST_UNREACHABLE: u8 = 1;
const ICMPV6_PORT_UNREACHABLE: u8 = 4;

/// Header fields of a captured TCP segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpSegment {
    pub source_ip: IpAddr,
    pub dest_ip: IpAddr,
    pub source_port: u16,
    pub dest_port: u16,
    pub flags: u8,
}

impl TcpSegment {
    pub fn is_syn_ack(&self) -> bool {
        (self.flags & (TCP_SYN | TCP_ACK)) == (TCP_SYN | TCP_ACK)
    }

    pub fn is_rst(&self) -> bool {
        (self.flags & TCP_RST) != 0
    }

    /// Terminal state carried by this segment, if any. RST wins over SYN+ACK.
    pub fn verdict(&self) -> Option<PortState> {
        if self.is_rst() {
            Some(PortState::Closed)
        } else if self.is_syn_ack() {
            Some(PortState::Open)
        } else {
            None
        }
    }
}

/// Parse an Ethernet frame carrying IPv4 or IPv6 + TCP
pub fn parse_tcp_frame(frame: &[u8]) -> Option<TcpSegment> {
    let ethernet = EthernetPacket::new(frame)?;
    let payload = ethernet.payload();

    let (source_ip, dest_ip, tcp_bytes) = match ethernet.get_ethertype() {
        EtherTypes::Ipv4 => {
            let ip = Ipv4Packet::new(payload)?;
            if ip.get_version() != 4 || ip.get_next_level_protocol() != IpNextHeaderProtocols::Tcp {
                return None;
            }
            let header_len = (ip.get_header_length() as usize) * 4;
            if header_len < 20 || header_len > payload.len() {
                return None;
            }
            (
                IpAddr::V4(ip.get_source()),
                IpAddr::V4(ip.get_destination()),
                &payload[header_len..],
            )
        }
        EtherTypes::Ipv6 => {
            let ip = Ipv6Packet::new(payload)?;
            if ip.get_version() != 6 || ip.get_next_header() != IpNextHeaderProtocols::Tcp {
                return None;
            }
            (
                IpAddr::V6(ip.get_source()),
                IpAddr::V6(ip.get_destination()),
                &payload[IPV6_HEADER_LEN..],
            )
        }
        _ => return None,
    };

    let tcp = TcpPacket::new(tcp_bytes)?;
    Some(TcpSegment {
        source_ip,
        dest_ip,
        source_port: tcp.get_source(),
        dest_port: tcp.get_destination(),
        flags: tcp_bytes[TCP_FLAGS_OFFSET],
    })
}

/// The original datagram echoed back inside an ICMP port-unreachable message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortUnreachable {
    pub original_dest: IpAddr,
    pub original_source_port: u16,
    pub original_dest_port: u16,
}

/// Parse an IPv4 packet as read from a raw ICMP socket
pub fn parse_icmpv4_port_unreachable(packet: &[u8]) -> Option<PortUnreachable> {
    let ip = Ipv4Packet::new(packet)?;
    if ip.get_next_level_protocol() != IpNextHeaderProtocols::Icmp {
        return None;
    }
    let header_len = (ip.get_header_length() as usize) * 4;
    if header_len < 20 || packet.len() < header_len + ICMP_HEADER_LEN {
        return None;
    }

    let icmp = &packet[header_len..];
    if icmp[0] != ICMPV4_DEST_UNREACHABLE || icmp[1] != ICMPV4_PORT_UNREACHABLE {
        return None;
    }

    let original = &icmp[ICMP_HEADER_LEN..];
    let inner = Ipv4Packet::new(original)?;
    if inner.get_next_level_protocol() != IpNextHeaderProtocols::Udp {
        return None;
    }
    let inner_len = (inner.get_header_length() as usize) * 4;
    if inner_len < 20 || inner_len > original.len() {
        return None;
    }
    let udp = UdpPacket::new(&original[inner_len..])?;

    Some(PortUnreachable {
        original_dest: IpAddr::V4(inner.get_destination()),
        original_source_port: udp.get_source(),
        original_dest_port: udp.get_destination(),
    })
}

/// Parse an ICMPv6 message as read from a raw ICMPv6 socket (no IPv6 header)
pub fn parse_icmpv6_port_unreachable(message: &[u8]) -> Option<PortUnreachable> {
    if message.len() < ICMP_HEADER_LEN {
        return None;
    }
    if message[0] != ICMPV6_DEST_UNREACHABLE || message[1] != ICMPV6_PORT_UNREACHABLE {
        return None;
    }

    let original = &message[ICMP_HEADER_LEN..];
    let inner = Ipv6Packet::new(original)?;
    if inner.get_next_header() != IpNextHeaderProtocols::Udp {
        return None;
    }
    let udp = UdpPacket::new(&original[IPV6_HEADER_LEN..])?;

    Some(PortUnreachable {
        original_dest: IpAddr::V6(inner.get_destination()),
        original_source_port: udp.get_source(),
        original_dest_port: udp.get_destination(),
    })
}

/// Dispatch on the family of the probed address
pub fn parse_port_unreachable(target: &IpAddr, packet: &[u8]) -> Option<PortUnreachable> {
    match target {
        IpAddr::V4(_) => parse_icmpv4_port_unreachable(packet),
        IpAddr::V6(_) => parse_icmpv6_port_unreachable(packet),
    }
}

/// Build a bare 20-byte TCP SYN header for `source -> dest`, checksummed over
/// the pseudo header of their family. `None` when the families differ.
pub fn build_syn_segment(source: SocketAddr, dest: SocketAddr, sequence: u32) -> Option<Vec<u8>> {
    let mut buffer = vec![0u8; TCP_HEADER_LEN];
    let mut segment = MutableTcpPacket::new(&mut buffer)?;
    segment.set_source(source.port());
    segment.set_destination(dest.port());
    segment.set_sequence(sequence);
    segment.set_acknowledgement(0);
    segment.set_data_offset(5);
    segment.set_flags(TcpFlags::SYN);
    segment.set_window(SYN_WINDOW);
    segment.set_urgent_ptr(0);

    let checksum = match (source.ip(), dest.ip()) {
        (IpAddr::V4(src), IpAddr::V4(dst)) => tcp::ipv4_checksum(&segment.to_immutable(), &src, &dst),
        (IpAddr::V6(src), IpAddr::V6(dst)) => tcp::ipv6_checksum(&segment.to_immutable(), &src, &dst),
        _ => return None,
    };
    segment.set_checksum(checksum);

    Some(buffer)
}
