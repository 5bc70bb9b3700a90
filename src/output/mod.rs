//! Output formatting and management

use crate::network::PortResult;
use crate::scanner::ScanSession;
use std::io::{self, Write};

/// Output format options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// `<ip> <port> <tcp|udp> <state>`
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Writes scan sessions in the selected format
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputManager {
    format: OutputFormat,
}

impl OutputManager {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn format_result(&self, result: &PortResult) -> io::Result<String> {
        match self.format {
            OutputFormat::Text => Ok(result.to_string()),
            OutputFormat::Json => serde_json::to_string(result).map_err(io::Error::from),
        }
    }

    /// Write every session's results, in report order, one line each
    pub fn write_sessions<W: Write>(&self, out: &mut W, sessions: &[ScanSession]) -> io::Result<()> {
        for session in sessions {
            for result in session.results() {
                writeln!(out, "{}", self.format_result(&result)?)?;
            }
        }
        out.flush()
    }

    /// Scan-level warnings, meant for stderr
    pub fn write_warnings<W: Write>(&self, out: &mut W, sessions: &[ScanSession]) -> io::Result<()> {
        for warning in sessions.iter().flat_map(|session| session.warnings()) {
            writeln!(out, "Warning: {}", warning)?;
        }
        Ok(())
    }
}
