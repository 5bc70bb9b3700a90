//! Half-open TCP SYN scan
//!
//! A crafted SYN goes out on a raw socket and the target's answer is read off
//! a promiscuous capture of the scan interface: SYN+ACK means open, RST means
//! closed. No socket owns the source port, so the handshake is never completed.
//! One retransmission is attempted before a port is declared filtered.

use crate::config::ScanConfig;
use crate::error::RecoveryStrategy;
use crate::network::capture::{CaptureHandle, CaptureHub, CaptureSource, DatalinkReader, Reception};
use crate::network::ephemeral::EphemeralPortPool;
use crate::network::interface::is_ipv6_link_local;
use crate::network::packet::parse_tcp_frame;
use crate::network::socket::{scoped_addr, RawSynSender, SynSender};
use crate::network::{PortState, Protocol};
use crate::scanner::{probe_bounded, LocalEndpoint, PortScanner, ScanSession};
use async_trait::async_trait;
use pnet::datalink::NetworkInterface;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Captures TCP traffic coming from the target on one interface
pub struct InterfaceCapture {
    interface: NetworkInterface,
}

impl InterfaceCapture {
    pub fn new(interface: NetworkInterface) -> Self {
        Self { interface }
    }
}

impl CaptureSource for InterfaceCapture {
    fn open(&self, target: IpAddr) -> crate::Result<CaptureHandle> {
        let reader = DatalinkReader::open(&self.interface)?;
        Ok(CaptureHandle::spawn(reader, move |frame| {
            parse_tcp_frame(frame).map_or(false, |segment| segment.source_ip == target)
        }))
    }
}

/// True for frames answering the probe `source_port -> target:target_port`
fn answers_probe(frame: &[u8], target: IpAddr, target_port: u16, source_port: u16) -> bool {
    parse_tcp_frame(frame).map_or(false, |segment| {
        segment.source_ip == target
            && segment.source_port == target_port
            && segment.dest_port == source_port
    })
}

/// IPv6 scan from a link-local address to a routed address cannot get replies
fn unroutable(local: IpAddr, target: IpAddr) -> bool {
    match (local, target) {
        (IpAddr::V6(local), IpAddr::V6(target)) => {
            is_ipv6_link_local(&local) && !is_ipv6_link_local(&target)
        }
        _ => false,
    }
}

pub struct TcpSynScanner {
    capture: Box<dyn CaptureSource>,
    sender: Arc<dyn SynSender>,
    ports: Arc<EphemeralPortPool>,
    timeout: Duration,
    retry_window: Duration,
    threads: usize,
}

impl TcpSynScanner {
    pub fn new(capture: Box<dyn CaptureSource>, sender: Arc<dyn SynSender>, config: &ScanConfig) -> Self {
        Self {
            capture,
            sender,
            ports: EphemeralPortPool::new(),
            timeout: config.timeout_duration(),
            retry_window: config.retry_duration(),
            threads: config.threads,
        }
    }

    /// Scanner that captures on `interface` and sends crafted SYNs on a raw socket
    pub fn for_interface(interface: NetworkInterface, config: &ScanConfig) -> Self {
        Self::new(
            Box::new(InterfaceCapture::new(interface)),
            Arc::new(RawSynSender),
            config,
        )
    }

    pub fn with_port_pool(mut self, ports: Arc<EphemeralPortPool>) -> Self {
        self.ports = ports;
        self
    }

    async fn probe(&self, hub: &Arc<CaptureHub>, local: LocalEndpoint, target: IpAddr, port: u16) -> PortState {
        let Some(lease) = self.ports.lease() else {
            log::warn!("Ephemeral port range exhausted, {}:{} left filtered", target, port);
            return PortState::Filtered;
        };
        let source_port = lease.port();
        let mut replies = hub.subscribe(move |frame| answers_probe(frame, target, port, source_port));

        let source = scoped_addr(local.ip, source_port, local.scope_id);
        let dest = scoped_addr(target, port, local.scope_id);

        for (attempt, window) in [self.timeout, self.retry_window].into_iter().enumerate() {
            if let Err(e) = self.sender.send_syn(source, dest) {
                log::debug!("SYN {} -> {} failed: {}", source, dest, e);
            }

            let deadline = Instant::now() + window;
            loop {
                match replies.recv_until(deadline).await {
                    Reception::Frame(frame) => {
                        if let Some(state) = parse_tcp_frame(&frame).and_then(|segment| segment.verdict()) {
                            log::debug!("{}:{} {} after {} send(s)", target, port, state, attempt + 1);
                            return state;
                        }
                    }
                    Reception::TimedOut => break,
                    Reception::CaptureFailed(reason) => {
                        log::debug!("{}:{} capture lost: {}", target, port, reason);
                        return PortState::Filtered;
                    }
                }
            }
        }

        log::debug!("{}:{} no reply after retry", target, port);
        PortState::Filtered
    }
}

#[async_trait]
impl PortScanner for TcpSynScanner {
    fn protocol(&self) -> Protocol {
        Protocol::Tcp
    }

    async fn scan(
        &self,
        local: LocalEndpoint,
        target: IpAddr,
        ports: &[u16],
        session: &mut ScanSession,
    ) -> crate::Result<()> {
        if unroutable(local.ip, target) {
            log::warn!(
                "Only a link-local IPv6 address is available, TCP ports of {} reported filtered",
                target
            );
            session.warn(format!("{}: no routable IPv6 source address, TCP not probed", target));
            session.record_all(Protocol::Tcp, ports, PortState::Filtered);
            return Ok(());
        }

        let capture = match self.capture.open(target) {
            Ok(capture) => capture,
            Err(e) if e.recovery_strategy() == RecoveryStrategy::Degrade => {
                log::warn!("TCP capture for {} unavailable: {}", target, e);
                session.warn(format!("{}: TCP capture unavailable: {}", target, e));
                session.record_all(Protocol::Tcp, ports, PortState::Filtered);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let hub = Arc::clone(capture.hub());
        let results = probe_bounded(ports, self.threads, |port| self.probe(&hub, local, target, port)).await;
        for (port, state) in results {
            session.record(Protocol::Tcp, port, state);
        }

        if let Some(reason) = hub.failure() {
            log::warn!("TCP capture for {} failed mid-scan: {}", target, reason);
            session.warn(format!("{}: TCP capture failed during scan: {}", target, reason));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::packet::{TCP_ACK, TCP_RST, TCP_SYN};
    use crate::ScanError;
    use std::io;
    use std::net::{Ipv4Addr, SocketAddr};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn reply_frame(from: SocketAddr, to: SocketAddr, flags: u8) -> Vec<u8> {
        let (IpAddr::V4(src), IpAddr::V4(dst)) = (from.ip(), to.ip()) else {
            panic!("IPv4 only");
        };
        let mut frame = vec![0u8; 14 + 20 + 20];
        frame[12..14].copy_from_slice(&0x0800u16.to_be_bytes());
        frame[14] = 0x45;
        frame[14 + 9] = 6;
        frame[14 + 12..14 + 16].copy_from_slice(&src.octets());
        frame[14 + 16..14 + 20].copy_from_slice(&dst.octets());
        frame[34..36].copy_from_slice(&from.port().to_be_bytes());
        frame[36..38].copy_from_slice(&to.port().to_be_bytes());
        frame[34 + 12] = 0x50;
        frame[34 + 13] = flags;
        frame
    }

    /// Peer that answers every SYN with fixed flags, or stays silent
    struct FakePeer {
        hub: Arc<CaptureHub>,
        reply: Option<u8>,
        sent: AtomicUsize,
    }

    impl SynSender for FakePeer {
        fn send_syn(&self, source: SocketAddr, dest: SocketAddr) -> io::Result<()> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            if let Some(flags) = self.reply {
                self.hub.dispatch(&reply_frame(dest, source, flags));
            }
            Ok(())
        }
    }

    struct SharedHub(Arc<CaptureHub>);

    impl CaptureSource for SharedHub {
        fn open(&self, _target: IpAddr) -> crate::Result<CaptureHandle> {
            Ok(CaptureHandle::detached(Arc::clone(&self.0)))
        }
    }

    struct NoCapture;

    impl CaptureSource for NoCapture {
        fn open(&self, _target: IpAddr) -> crate::Result<CaptureHandle> {
            Err(ScanError::CaptureUnavailable("eth9: permission denied".to_string()))
        }
    }

    const TARGET: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 10));

    fn local() -> LocalEndpoint {
        LocalEndpoint::new(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)), 2)
    }

    fn scanner(reply: Option<u8>) -> (TcpSynScanner, Arc<FakePeer>, Arc<CaptureHub>) {
        let hub = CaptureHub::new();
        let peer = Arc::new(FakePeer {
            hub: Arc::clone(&hub),
            reply,
            sent: AtomicUsize::new(0),
        });
        let config = ScanConfig::new("eth0", "192.0.2.10");
        let scanner = TcpSynScanner::new(Box::new(SharedHub(Arc::clone(&hub))), peer.clone(), &config);
        (scanner, peer, hub)
    }

    #[tokio::test(start_paused = true)]
    async fn test_rst_peer_is_closed() {
        let (scanner, _peer, _hub) = scanner(Some(TCP_RST | TCP_ACK));
        let mut session = ScanSession::new(TARGET);
        scanner.scan(local(), TARGET, &[22, 80, 443], &mut session).await.unwrap();

        for port in [22, 80, 443] {
            assert_eq!(session.state(Protocol::Tcp, port), Some(PortState::Closed));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_syn_ack_peer_is_open_with_one_syn_each() {
        let (scanner, peer, _hub) = scanner(Some(TCP_SYN | TCP_ACK));
        let mut session = ScanSession::new(TARGET);
        scanner.scan(local(), TARGET, &[8080, 8443], &mut session).await.unwrap();

        assert_eq!(session.state(Protocol::Tcp, 8080), Some(PortState::Open));
        assert_eq!(session.state(Protocol::Tcp, 8443), Some(PortState::Open));
        assert_eq!(peer.sent.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_peer_filtered_after_retry() {
        let (scanner, peer, _hub) = scanner(None);
        let mut session = ScanSession::new(TARGET);
        let started = Instant::now();
        scanner.scan(local(), TARGET, &[25], &mut session).await.unwrap();

        assert_eq!(session.state(Protocol::Tcp, 25), Some(PortState::Filtered));
        assert!(started.elapsed() >= Duration::from_millis(5000 + 500));
        assert_eq!(peer.sent.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bare_syn_is_not_a_verdict() {
        let (scanner, _peer, _hub) = scanner(Some(TCP_SYN));
        let mut session = ScanSession::new(TARGET);
        scanner.scan(local(), TARGET, &[21], &mut session).await.unwrap();
        assert_eq!(session.state(Protocol::Tcp, 21), Some(PortState::Filtered));
    }

    #[tokio::test(start_paused = true)]
    async fn test_leases_and_subscriptions_released() {
        let (scanner, _peer, hub) = scanner(None);
        let pool = EphemeralPortPool::new();
        let scanner = scanner.with_port_pool(Arc::clone(&pool));
        let mut session = ScanSession::new(TARGET);
        scanner.scan(local(), TARGET, &[1, 2, 3, 4], &mut session).await.unwrap();

        assert_eq!(session.len(), 4);
        assert_eq!(hub.subscriber_count(), 0);
        assert_eq!(pool.leased(), 0);
    }

    #[tokio::test]
    async fn test_link_local_source_sends_nothing() {
        let (scanner, peer, _hub) = scanner(Some(TCP_SYN | TCP_ACK));
        let target: IpAddr = "2001:db8::5".parse().unwrap();
        let local = LocalEndpoint::new("fe80::1".parse().unwrap(), 2);
        let mut session = ScanSession::new(target);
        scanner.scan(local, target, &[22, 80], &mut session).await.unwrap();

        assert_eq!(session.state(Protocol::Tcp, 22), Some(PortState::Filtered));
        assert_eq!(session.state(Protocol::Tcp, 80), Some(PortState::Filtered));
        assert_eq!(peer.sent.load(Ordering::SeqCst), 0);
        assert_eq!(session.warnings().len(), 1);
    }

    #[tokio::test]
    async fn test_capture_failure_marks_filtered() {
        let config = ScanConfig::new("eth9", "192.0.2.10");
        let scanner = TcpSynScanner::new(Box::new(NoCapture), Arc::new(RawSynSender), &config);
        let mut session = ScanSession::new(TARGET);
        scanner.scan(local(), TARGET, &[22, 80], &mut session).await.unwrap();

        assert_eq!(session.state(Protocol::Tcp, 22), Some(PortState::Filtered));
        assert_eq!(session.state(Protocol::Tcp, 80), Some(PortState::Filtered));
        assert!(session.warnings()[0].contains("capture unavailable"));
    }

    /// Peer that kills the capture instead of answering
    struct CaptureKiller {
        hub: Arc<CaptureHub>,
    }

    impl SynSender for CaptureKiller {
        fn send_syn(&self, _source: SocketAddr, _dest: SocketAddr) -> io::Result<()> {
            self.hub.fail("eth0: network is down");
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_lost_mid_scan_is_filtered_and_reported() {
        let hub = CaptureHub::new();
        let sender = Arc::new(CaptureKiller { hub: Arc::clone(&hub) });
        let config = ScanConfig::new("eth0", "192.0.2.10");
        let scanner = TcpSynScanner::new(Box::new(SharedHub(Arc::clone(&hub))), sender, &config);

        let mut session = ScanSession::new(TARGET);
        let started = Instant::now();
        scanner.scan(local(), TARGET, &[22, 80], &mut session).await.unwrap();

        assert_eq!(session.state(Protocol::Tcp, 22), Some(PortState::Filtered));
        assert_eq!(session.state(Protocol::Tcp, 80), Some(PortState::Filtered));
        assert!(started.elapsed() < Duration::from_millis(5000));
        assert!(session.warnings()[0].contains("network is down"));
    }

    struct MissingInterface;

    impl CaptureSource for MissingInterface {
        fn open(&self, _target: IpAddr) -> crate::Result<CaptureHandle> {
            Err(ScanError::InterfaceNotFound("eth9".to_string()))
        }
    }

    #[tokio::test]
    async fn test_non_degradable_capture_error_propagates() {
        let config = ScanConfig::new("eth9", "192.0.2.10");
        let scanner = TcpSynScanner::new(Box::new(MissingInterface), Arc::new(RawSynSender), &config);
        let mut session = ScanSession::new(TARGET);

        let result = scanner.scan(local(), TARGET, &[22], &mut session).await;
        assert!(matches!(result, Err(ScanError::InterfaceNotFound(_))));
        assert!(session.is_empty());
    }

    #[test]
    fn test_reply_matches_ports() {
        let frame = reply_frame(
            SocketAddr::new(TARGET, 80),
            "192.0.2.1:50000".parse().unwrap(),
            TCP_RST,
        );
        assert!(answers_probe(&frame, TARGET, 80, 50000));
        assert!(!answers_probe(&frame, TARGET, 81, 50000));
        assert!(!answers_probe(&frame, TARGET, 80, 50001));
        assert!(!answers_probe(&frame, IpAddr::V4(Ipv4Addr::LOCALHOST), 80, 50000));
    }
}
