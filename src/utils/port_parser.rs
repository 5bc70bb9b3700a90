//! Port specification parsing
//!
//! A specification is a comma separated list of single ports (`80`) and
//! inclusive ranges (`8000-8002`). Ports keep the order they are written in;
//! repeats are dropped.

use crate::ScanError;
use std::collections::HashSet;

fn parse_port(value: &str, part: &str) -> crate::Result<u16> {
    let port: u16 = value.parse().map_err(|e| {
        ScanError::PortRangeError(format!("Invalid port '{}' in '{}': {}", value, part, e))
    })?;
    if port == 0 {
        return Err(ScanError::PortRangeError("Port 0 is not valid".to_string()));
    }
    Ok(port)
}

/// Parse a port specification such as `"22,80,8000-8002"`
pub fn parse_port_spec(spec: &str) -> crate::Result<Vec<u16>> {
    let mut ports = Vec::new();
    let mut seen = HashSet::new();

    for part in spec.split(',') {
        let part = part.trim();
        if part.is_empty() {
            return Err(ScanError::PortRangeError(format!(
                "Empty port entry in '{}'",
                spec
            )));
        }

        let (start, end) = match part.split_once('-') {
            Some((start, end)) => {
                if start.trim().is_empty() || end.trim().is_empty() {
                    return Err(ScanError::PortRangeError(format!(
                        "Invalid port range '{}': both ends are required",
                        part
                    )));
                }
                (parse_port(start.trim(), part)?, parse_port(end.trim(), part)?)
            }
            None => {
                let port = parse_port(part, part)?;
                (port, port)
            }
        };

        if start > end {
            return Err(ScanError::PortRangeError(format!(
                "Start port {} cannot be greater than end port {}",
                start, end
            )));
        }

        ports.extend((start..=end).filter(|port| seen.insert(*port)));
    }

    Ok(ports)
}

/// Parse several specifications, appending them in order
pub fn parse_port_specs<'a, I>(specs: I) -> crate::Result<Vec<u16>>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut ports = Vec::new();
    for spec in specs {
        ports.extend(parse_port_spec(spec)?);
    }
    Ok(crate::scanner::dedup_ports(&ports))
}
