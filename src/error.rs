//! Error handling for the l4scan scanner
//!
//! Errors are split by how far they reach: a per-port fault is always folded into a
//! terminal port state by the engines, a resource fault that blocks one target only
//! degrades or skips that target, and only host resolution failures abort the run.

use std::io;
use thiserror::Error;

/// Main error type for scanning operations
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Interface `{0}` not found")]
    InterfaceNotFound(String),

    #[error("No {family} address found on interface `{interface}`")]
    NoAddressOfFamily {
        interface: String,
        family: crate::network::AddressFamily,
    },

    #[error("Capture unavailable: {0}")]
    CaptureUnavailable(String),

    #[error("Permission denied: {0}")]
    PermissionError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Failed to resolve host `{0}`")]
    ResolutionError(String),

    #[error("Port range error: {0}")]
    PortRangeError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
}

/// How the orchestrator reacts to an error raised while scanning one target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStrategy {
    /// Classify the affected ports with the engine's fallback state and continue
    Degrade,
    /// Drop this target, keep scanning the others
    SkipTarget,
    /// Abort the whole invocation
    Abort,
}

impl ScanError {
    /// Map a socket creation failure, keeping permission problems distinguishable
    pub fn from_socket_error(context: &str, error: io::Error) -> Self {
        if error.kind() == io::ErrorKind::PermissionDenied {
            ScanError::PermissionError(format!("{}: {}", context, error))
        } else {
            ScanError::NetworkError(format!("{}: {}", context, error))
        }
    }

    /// Determine the recovery strategy for a given error
    pub fn recovery_strategy(&self) -> RecoveryStrategy {
        match self {
            ScanError::CaptureUnavailable(_)
            | ScanError::PermissionError(_)
            | ScanError::NetworkError(_)
            | ScanError::IoError(_) => RecoveryStrategy::Degrade,
            ScanError::InterfaceNotFound(_) | ScanError::NoAddressOfFamily { .. } => {
                RecoveryStrategy::SkipTarget
            }
            ScanError::ResolutionError(_)
            | ScanError::PortRangeError(_)
            | ScanError::ConfigError(_) => RecoveryStrategy::Abort,
        }
    }
}
