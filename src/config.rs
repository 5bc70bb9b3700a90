//! Configuration module for the l4scan scanner

use crate::ScanError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_RETRY_WINDOW_MS: u64 = 500;
pub const DEFAULT_THREADS: usize = 256;

/// Main configuration structure for scanning operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Interface the probes leave from and replies are captured on
    pub interface: String,

    /// Host name or literal address
    pub target: String,

    /// TCP ports, scanned with half-open SYN probes
    pub tcp_ports: Vec<u16>,

    /// UDP ports, scanned by waiting for ICMP port unreachable
    pub udp_ports: Vec<u16>,

    /// Per-probe wait in milliseconds
    pub timeout: u64,

    /// Wait after the single SYN retransmission, in milliseconds
    pub retry_window: u64,

    /// Concurrent probes per target
    pub threads: usize,

    /// Raise the open file limit to this value before scanning
    pub ulimit: Option<u64>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            interface: String::new(),
            target: String::new(),
            tcp_ports: Vec::new(),
            udp_ports: Vec::new(),
            timeout: DEFAULT_TIMEOUT_MS,
            retry_window: DEFAULT_RETRY_WINDOW_MS,
            threads: DEFAULT_THREADS,
            ulimit: None,
        }
    }
}

impl ScanConfig {
    /// Create a new scan configuration
    pub fn new(interface: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            target: target.into(),
            ..Default::default()
        }
    }

    pub fn with_tcp_ports(mut self, ports: Vec<u16>) -> Self {
        self.tcp_ports = ports;
        self
    }

    pub fn with_udp_ports(mut self, ports: Vec<u16>) -> Self {
        self.udp_ports = ports;
        self
    }

    pub fn with_timeout(mut self, timeout: u64) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry_window(mut self, retry_window: u64) -> Self {
        self.retry_window = retry_window;
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Get timeout as Duration
    pub fn timeout_duration(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }

    /// Retry window as Duration, always shorter than the timeout
    pub fn retry_duration(&self) -> Duration {
        let window = if self.retry_window < self.timeout {
            self.retry_window
        } else {
            self.timeout / 2
        };
        Duration::from_millis(window)
    }

    /// Load configuration from TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            ScanError::ConfigError(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        toml::from_str(&content)
            .map_err(|e| ScanError::ConfigError(format!("Failed to parse TOML: {}", e)))
    }

    /// `~/.l4scan.toml`
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".l4scan.toml"))
    }

    /// Load configuration from the default location, falling back to defaults
    pub fn load_default_config() -> Self {
        if let Some(path) = Self::default_config_path() {
            if path.exists() {
                match Self::from_toml_file(&path) {
                    Ok(config) => {
                        log::info!("Loaded config from {}", path.display());
                        return config;
                    }
                    Err(e) => log::warn!("Ignoring {}: {}", path.display(), e),
                }
            }
        }

        Self::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.interface.is_empty() {
            return Err(ScanError::ConfigError("Interface must be specified".to_string()));
        }

        if self.target.is_empty() {
            return Err(ScanError::ConfigError("Target cannot be empty".to_string()));
        }

        if self.tcp_ports.is_empty() && self.udp_ports.is_empty() {
            return Err(ScanError::ConfigError(
                "At least one TCP or UDP port must be specified".to_string(),
            ));
        }

        if self.tcp_ports.iter().chain(&self.udp_ports).any(|&port| port == 0) {
            return Err(ScanError::PortRangeError("Port 0 is not valid".to_string()));
        }

        if self.timeout == 0 {
            return Err(ScanError::ConfigError("Timeout must be greater than 0".to_string()));
        }

        if self.threads == 0 {
            return Err(ScanError::ConfigError("Thread count must be greater than 0".to_string()));
        }

        Ok(())
    }
}
