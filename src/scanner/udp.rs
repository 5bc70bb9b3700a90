//! UDP scan by ICMP port-unreachable observation
//!
//! A one-byte datagram is sent to each port. A port-unreachable error quoting
//! our datagram means closed; silence until the timeout means open.
//!
//! Silence only means open while the ICMP socket is alive. Once it dies the
//! remaining ports are reported closed and the session carries a warning.

use crate::config::ScanConfig;
use crate::error::RecoveryStrategy;
use crate::network::capture::{CaptureHandle, CaptureHub, CaptureSource, Reception};
use crate::network::packet::parse_port_unreachable;
use crate::network::socket::{open_icmp_socket, scoped_addr, IcmpSocketReader};
use crate::network::{AddressFamily, PortState, Protocol};
use crate::scanner::{probe_bounded, LocalEndpoint, PortScanner, ScanSession};
use async_trait::async_trait;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::Instant;

const PROBE_PAYLOAD: [u8; 1] = [0x00];

/// Raw ICMP/ICMPv6 socket admitting only errors about datagrams sent to the target
#[derive(Debug, Clone, Copy, Default)]
pub struct IcmpCapture;

impl CaptureSource for IcmpCapture {
    fn open(&self, target: IpAddr) -> crate::Result<CaptureHandle> {
        let socket = open_icmp_socket(AddressFamily::of(&target))?;
        Ok(CaptureHandle::spawn(IcmpSocketReader::new(socket), move |packet| {
            parse_port_unreachable(&target, packet).map_or(false, |notice| notice.original_dest == target)
        }))
    }
}

pub struct UdpIcmpScanner {
    capture: Box<dyn CaptureSource>,
    timeout: Duration,
    threads: usize,
}

impl UdpIcmpScanner {
    pub fn new(capture: Box<dyn CaptureSource>, config: &ScanConfig) -> Self {
        Self {
            capture,
            timeout: config.timeout_duration(),
            threads: config.threads,
        }
    }

    async fn probe(&self, hub: &Arc<CaptureHub>, local: LocalEndpoint, target: IpAddr, port: u16) -> PortState {
        let socket = match UdpSocket::bind(scoped_addr(local.ip, 0, local.scope_id)).await {
            Ok(socket) => socket,
            Err(e) => {
                log::debug!("UDP bind on {} failed: {}", local.ip, e);
                return PortState::Closed;
            }
        };
        let local_port = match socket.local_addr() {
            Ok(addr) => addr.port(),
            Err(e) => {
                log::debug!("UDP local address unavailable: {}", e);
                return PortState::Closed;
            }
        };

        // Correlated strictly by the source port quoted back in the error
        let mut notices = hub.subscribe(move |packet| {
            parse_port_unreachable(&target, packet).map_or(false, |notice| {
                notice.original_source_port == local_port && notice.original_dest_port == port
            })
        });

        let dest = scoped_addr(target, port, local.scope_id);
        if let Err(e) = socket.send_to(&PROBE_PAYLOAD, dest).await {
            log::debug!("UDP send to {} failed: {}", dest, e);
            return PortState::Closed;
        }

        match notices.recv_until(Instant::now() + self.timeout).await {
            Reception::Frame(_) => {
                log::debug!("{} port unreachable", dest);
                PortState::Closed
            }
            Reception::TimedOut => PortState::Open,
            Reception::CaptureFailed(reason) => {
                log::debug!("{} ICMP receive lost: {}", dest, reason);
                PortState::Closed
            }
        }
    }
}

#[async_trait]
impl PortScanner for UdpIcmpScanner {
    fn protocol(&self) -> Protocol {
        Protocol::Udp
    }

    async fn scan(
        &self,
        local: LocalEndpoint,
        target: IpAddr,
        ports: &[u16],
        session: &mut ScanSession,
    ) -> crate::Result<()> {
        let capture = match self.capture.open(target) {
            Ok(capture) => capture,
            Err(e) if e.recovery_strategy() == RecoveryStrategy::Degrade => {
                log::warn!("ICMP receive socket for {} unavailable: {}", target, e);
                session.warn(format!("{}: ICMP receive socket unavailable: {}", target, e));
                session.record_all(Protocol::Udp, ports, PortState::Closed);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let hub = Arc::clone(capture.hub());
        let results = probe_bounded(ports, self.threads, |port| self.probe(&hub, local, target, port)).await;
        for (port, state) in results {
            session.record(Protocol::Udp, port, state);
        }

        if let Some(reason) = hub.failure() {
            log::warn!("ICMP receive socket for {} failed mid-scan: {}", target, reason);
            session.warn(format!("{}: ICMP receive failed during scan: {}", target, reason));
        }
        Ok(())
    }
}
