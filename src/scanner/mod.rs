//! Scan engines and the per-target session they fill in

pub mod engine;
pub mod tcp;
pub mod udp;

use crate::network::{PortResult, PortState, Protocol, ScanTarget};
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Where probes leave from: the interface address plus its index for link-local scopes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalEndpoint {
    pub ip: IpAddr,
    pub scope_id: u32,
}

impl LocalEndpoint {
    pub fn new(ip: IpAddr, scope_id: u32) -> Self {
        Self { ip, scope_id }
    }
}

/// Classification results for one target address
#[derive(Debug, Clone)]
pub struct ScanSession {
    pub ip: IpAddr,
    states: BTreeMap<(Protocol, u16), PortState>,
    warnings: Vec<String>,
}

impl ScanSession {
    pub fn new(ip: IpAddr) -> Self {
        Self {
            ip,
            states: BTreeMap::new(),
            warnings: Vec::new(),
        }
    }

    /// Record the terminal state of a port.
    ///
    /// A port is classified once. A second classification is refused and
    /// `false` is returned; the first state stands.
    pub fn record(&mut self, protocol: Protocol, port: u16, state: PortState) -> bool {
        if let Some(existing) = self.states.get(&(protocol, port)) {
            log::debug!(
                "{} {}/{} already {}, ignoring {}",
                self.ip, port, protocol, existing, state
            );
            return false;
        }
        self.states.insert((protocol, port), state);
        true
    }

    /// Record the same state for every port in `ports`
    pub fn record_all(&mut self, protocol: Protocol, ports: &[u16], state: PortState) {
        for &port in ports {
            self.record(protocol, port, state);
        }
    }

    pub fn state(&self, protocol: Protocol, port: u16) -> Option<PortState> {
        self.states.get(&(protocol, port)).copied()
    }

    /// Results in report order: TCP ascending, then UDP ascending
    pub fn results(&self) -> Vec<PortResult> {
        self.states
            .iter()
            .map(|(&(protocol, port), &state)| {
                PortResult::new(ScanTarget::new(self.ip, port, protocol), state)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }
}

/// A protocol-specific scan engine
#[async_trait]
pub trait PortScanner: Send + Sync {
    fn protocol(&self) -> Protocol;

    /// Classify every port of `target` into `session`.
    ///
    /// A capture that cannot be opened for reasons the scan can live with is
    /// recorded as a session warning; anything else is returned.
    async fn scan(
        &self,
        local: LocalEndpoint,
        target: IpAddr,
        ports: &[u16],
        session: &mut ScanSession,
    ) -> crate::Result<()>;
}

/// Run one probe per port with at most `limit` in flight
pub(crate) async fn probe_bounded<F, Fut>(
    ports: &[u16],
    limit: usize,
    probe: F,
) -> Vec<(u16, PortState)>
where
    F: Fn(u16) -> Fut,
    Fut: Future<Output = PortState>,
{
    let semaphore = Arc::new(Semaphore::new(limit.max(1)));
    let probes = ports.iter().map(|&port| {
        let semaphore = Arc::clone(&semaphore);
        let probe = probe(port);
        async move {
            let _permit = semaphore.acquire().await;
            (port, probe.await)
        }
    });

    join_all(probes).await
}

/// Order-preserving de-duplication of a port list
pub fn dedup_ports(ports: &[u16]) -> Vec<u16> {
    let mut seen = std::collections::HashSet::with_capacity(ports.len());
    ports.iter().copied().filter(|port| seen.insert(*port)).collect()
}
