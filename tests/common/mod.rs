//! Crafted frames and fake peers shared by the integration tests

#![allow(dead_code)]

use l4scan::network::capture::{CaptureHandle, CaptureHub, CaptureSource};
use l4scan::network::socket::SynSender;
use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Ethernet frame carrying a TCP segment `from -> to` with `flags`
pub fn tcp_frame(from: SocketAddr, to: SocketAddr, flags: u8) -> Vec<u8> {
    let mut tcp = vec![0u8; 20];
    tcp[0..2].copy_from_slice(&from.port().to_be_bytes());
    tcp[2..4].copy_from_slice(&to.port().to_be_bytes());
    tcp[12] = 0x50;
    tcp[13] = flags;

    let mut frame = vec![0u8; 12];
    match (from.ip(), to.ip()) {
        (IpAddr::V4(src), IpAddr::V4(dst)) => {
            frame.extend_from_slice(&0x0800u16.to_be_bytes());
            let mut ip = vec![0u8; 20];
            ip[0] = 0x45;
            ip[2..4].copy_from_slice(&40u16.to_be_bytes());
            ip[8] = 64;
            ip[9] = 6;
            ip[12..16].copy_from_slice(&src.octets());
            ip[16..20].copy_from_slice(&dst.octets());
            frame.extend_from_slice(&ip);
        }
        (IpAddr::V6(src), IpAddr::V6(dst)) => {
            frame.extend_from_slice(&0x86DDu16.to_be_bytes());
            frame.extend_from_slice(&ipv6_header(src.octets(), dst.octets(), 6, 20));
        }
        _ => panic!("mixed address families"),
    }
    frame.extend_from_slice(&tcp);
    frame
}

fn ipv6_header(src: [u8; 16], dst: [u8; 16], next_header: u8, payload_len: u16) -> Vec<u8> {
    let mut ip = vec![0u8; 40];
    ip[0] = 0x60;
    ip[4..6].copy_from_slice(&payload_len.to_be_bytes());
    ip[6] = next_header;
    ip[7] = 64;
    ip[8..24].copy_from_slice(&src);
    ip[24..40].copy_from_slice(&dst);
    ip
}

/// Port unreachable quoting the datagram `from -> to`, as a raw ICMP socket
/// of the matching family would deliver it
pub fn port_unreachable(from: SocketAddr, to: SocketAddr) -> Vec<u8> {
    let mut udp = vec![0u8; 8];
    udp[0..2].copy_from_slice(&from.port().to_be_bytes());
    udp[2..4].copy_from_slice(&to.port().to_be_bytes());
    udp[4..6].copy_from_slice(&9u16.to_be_bytes());

    match (from.ip(), to.ip()) {
        (IpAddr::V4(src), IpAddr::V4(dst)) => {
            let mut packet = vec![0u8; 20];
            packet[0] = 0x45;
            packet[9] = 1;
            packet[12..16].copy_from_slice(&dst.octets());
            packet[16..20].copy_from_slice(&src.octets());
            packet.extend_from_slice(&[3, 3, 0, 0, 0, 0, 0, 0]);
            let mut inner = vec![0u8; 20];
            inner[0] = 0x45;
            inner[9] = 17;
            inner[12..16].copy_from_slice(&src.octets());
            inner[16..20].copy_from_slice(&dst.octets());
            packet.extend_from_slice(&inner);
            packet.extend_from_slice(&udp);
            packet
        }
        (IpAddr::V6(src), IpAddr::V6(dst)) => {
            let mut message = vec![1, 4, 0, 0, 0, 0, 0, 0];
            message.extend_from_slice(&ipv6_header(src.octets(), dst.octets(), 17, 9));
            message.extend_from_slice(&udp);
            message
        }
        _ => panic!("mixed address families"),
    }
}

/// Capture source handing out one externally fed hub
pub struct SharedHub(pub Arc<CaptureHub>);

impl CaptureSource for SharedHub {
    fn open(&self, _target: IpAddr) -> l4scan::Result<CaptureHandle> {
        Ok(CaptureHandle::detached(Arc::clone(&self.0)))
    }
}

/// TCP peer answering SYNs per destination port; unlisted ports stay silent
pub struct ScriptedPeer {
    hub: Arc<CaptureHub>,
    replies: HashMap<u16, u8>,
    sent: AtomicUsize,
}

impl ScriptedPeer {
    pub fn new(hub: Arc<CaptureHub>, replies: &[(u16, u8)]) -> Arc<Self> {
        Arc::new(Self {
            hub,
            replies: replies.iter().copied().collect(),
            sent: AtomicUsize::new(0),
        })
    }

    pub fn sent(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }
}

impl SynSender for ScriptedPeer {
    fn send_syn(&self, source: SocketAddr, dest: SocketAddr) -> io::Result<()> {
        self.sent.fetch_add(1, Ordering::SeqCst);
        if let Some(&flags) = self.replies.get(&dest.port()) {
            // Noise from another conversation first, then the real answer
            let stray = SocketAddr::new(source.ip(), source.port().wrapping_add(1));
            self.hub.dispatch(&tcp_frame(dest, stray, flags));
            self.hub.dispatch(&tcp_frame(dest, source, flags));
        }
        Ok(())
    }
}
