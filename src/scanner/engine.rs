//! Scan orchestration across resolved target addresses

use crate::config::ScanConfig;
use crate::error::RecoveryStrategy;
use crate::network::interface::InterfaceResolver;
use crate::network::{AddressFamily, Protocol};
use crate::scanner::tcp::TcpSynScanner;
use crate::scanner::udp::{IcmpCapture, UdpIcmpScanner};
use crate::scanner::{dedup_ports, LocalEndpoint, PortScanner, ScanSession};
use crate::utils::target::resolve_host;
use std::net::IpAddr;

/// Drives the TCP and UDP engines over every address of the target
pub struct ScanEngine {
    config: ScanConfig,
    resolver: InterfaceResolver,
    tcp: Box<dyn PortScanner>,
    udp: Box<dyn PortScanner>,
}

impl ScanEngine {
    /// Build an engine over the host's interfaces
    pub fn new(config: ScanConfig) -> crate::Result<Self> {
        config.validate()?;
        let resolver = InterfaceResolver::from_system();
        let interface = resolver.find(&config.interface)?.clone();

        let tcp = Box::new(TcpSynScanner::for_interface(interface, &config));
        let udp = Box::new(UdpIcmpScanner::new(Box::new(IcmpCapture), &config));
        Ok(Self::with_scanners(config, resolver, tcp, udp))
    }

    pub fn with_scanners(
        config: ScanConfig,
        resolver: InterfaceResolver,
        tcp: Box<dyn PortScanner>,
        udp: Box<dyn PortScanner>,
    ) -> Self {
        Self {
            config,
            resolver,
            tcp,
            udp,
        }
    }

    /// Resolve the configured target and scan every address it maps to
    pub async fn run(&self) -> crate::Result<Vec<ScanSession>> {
        let addresses = resolve_host(&self.config.target).await?;
        log::info!("{} resolved to {:?}", self.config.target, addresses);
        self.scan(&addresses).await
    }

    /// Scan addresses one after another.
    ///
    /// A target that cannot be scanned at all is skipped when others remain.
    /// If no target produced a session the first error is returned.
    pub async fn scan(&self, addresses: &[IpAddr]) -> crate::Result<Vec<ScanSession>> {
        let tcp_ports = dedup_ports(&self.config.tcp_ports);
        let udp_ports = dedup_ports(&self.config.udp_ports);

        let mut sessions = Vec::with_capacity(addresses.len());
        let mut first_error = None;

        for &ip in addresses {
            match self.scan_target(ip, &tcp_ports, &udp_ports).await {
                Ok(session) => sessions.push(session),
                Err(e) => {
                    if addresses.len() == 1 || e.recovery_strategy() == RecoveryStrategy::Abort {
                        return Err(e);
                    }
                    log::warn!("Skipping {}: {}", ip, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) if sessions.is_empty() => Err(e),
            _ => Ok(sessions),
        }
    }

    async fn scan_target(&self, ip: IpAddr, tcp_ports: &[u16], udp_ports: &[u16]) -> crate::Result<ScanSession> {
        let interface = &self.config.interface;
        let local = LocalEndpoint::new(
            self.resolver.resolve(interface, AddressFamily::of(&ip))?,
            self.resolver.index_of(interface)?,
        );
        log::info!(
            "Scanning {} from {} ({} TCP, {} UDP ports)",
            ip,
            local.ip,
            tcp_ports.len(),
            udp_ports.len()
        );

        let mut session = ScanSession::new(ip);
        for scanner in [&self.tcp, &self.udp] {
            let ports = match scanner.protocol() {
                Protocol::Tcp => tcp_ports,
                Protocol::Udp => udp_ports,
            };
            if !ports.is_empty() {
                scanner.scan(local, ip, ports, &mut session).await?;
            }
        }
        Ok(session)
    }
}
