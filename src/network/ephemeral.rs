//! Ephemeral source port allocation
//!
//! Concurrent probes are told apart by their source port, so two in-flight probes
//! must never share one. Ports are drawn at random and tracked in an in-use set
//! until the lease drops.

use rand::Rng;
use std::collections::HashSet;
use std::ops::Range;
use std::sync::{Arc, Mutex, MutexGuard};

/// IANA dynamic range, upper bound exclusive
pub const EPHEMERAL_PORTS: Range<u16> = 49152..65535;

const RANDOM_ATTEMPTS: usize = 16;

#[derive(Debug)]
pub struct EphemeralPortPool {
    range: Range<u16>,
    in_use: Mutex<HashSet<u16>>,
}

impl EphemeralPortPool {
    pub fn new() -> Arc<Self> {
        Self::with_range(EPHEMERAL_PORTS)
    }

    pub fn with_range(range: Range<u16>) -> Arc<Self> {
        Arc::new(Self {
            range,
            in_use: Mutex::new(HashSet::new()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<u16>> {
        self.in_use.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Reserve a free port, `None` when the whole range is leased
    pub fn lease(self: &Arc<Self>) -> Option<PortLease> {
        let mut in_use = self.lock();
        if in_use.len() >= self.range.len() {
            return None;
        }

        let mut rng = rand::thread_rng();
        let mut port = None;
        for _ in 0..RANDOM_ATTEMPTS {
            let candidate = rng.gen_range(self.range.clone());
            if !in_use.contains(&candidate) {
                port = Some(candidate);
                break;
            }
        }

        // Dense pool: walk from a random start instead of retrying forever
        let port = match port {
            Some(port) => port,
            None => {
                let start = rng.gen_range(self.range.clone());
                (start..self.range.end)
                    .chain(self.range.start..start)
                    .find(|candidate| !in_use.contains(candidate))?
            }
        };

        in_use.insert(port);
        Some(PortLease {
            port,
            pool: Arc::clone(self),
        })
    }

    pub fn leased(&self) -> usize {
        self.lock().len()
    }

    fn release(&self, port: u16) {
        self.lock().remove(&port);
    }
}

/// An exclusively held source port, returned to the pool on drop
#[derive(Debug)]
pub struct PortLease {
    port: u16,
    pool: Arc<EphemeralPortPool>,
}

impl PortLease {
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Drop for PortLease {
    fn drop(&mut self) {
        self.pool.release(self.port);
    }
}
