//! l4scan - TCP SYN and UDP port scanner
//!
//! TCP ports are classified by a half-open SYN exchange observed on a packet
//! capture, UDP ports by waiting for ICMP port-unreachable errors.

pub mod config;
pub mod error;
pub mod network;
pub mod output;
pub mod scanner;
pub mod utils;

// Re-export commonly used types
pub use config::ScanConfig;
pub use error::{RecoveryStrategy, ScanError};
pub use network::{PortResult, PortState, Protocol, ScanTarget};
pub use scanner::engine::ScanEngine;
pub use scanner::ScanSession;

pub type Result<T> = std::result::Result<T, ScanError>;
