//! Target host resolution

use crate::ScanError;
use std::net::IpAddr;

/// Resolve a host name or literal address to the addresses to scan.
///
/// Literal addresses are returned as-is. Names go through the system resolver;
/// the result keeps resolver order without repeats.
pub async fn resolve_host(host: &str) -> crate::Result<Vec<IpAddr>> {
    let host = host.trim();
    let literal = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = literal.parse::<IpAddr>() {
        return Ok(vec![ip]);
    }
    if host.is_empty() {
        return Err(ScanError::ResolutionError(host.to_string()));
    }

    let resolved = tokio::net::lookup_host((host, 0)).await.map_err(|e| {
        log::debug!("Lookup of {} failed: {}", host, e);
        ScanError::ResolutionError(host.to_string())
    })?;

    let mut addresses: Vec<IpAddr> = Vec::new();
    for addr in resolved {
        if !addresses.contains(&addr.ip()) {
            addresses.push(addr.ip());
        }
    }

    if addresses.is_empty() {
        return Err(ScanError::ResolutionError(host.to_string()));
    }
    Ok(addresses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[tokio::test]
    async fn test_literal_addresses() {
        let addresses = tokio_test::assert_ok!(resolve_host("192.0.2.4").await);
        assert_eq!(addresses, vec![IpAddr::V4(Ipv4Addr::new(192, 0, 2, 4))]);
        assert_eq!(
            resolve_host("[::1]").await.unwrap(),
            vec![IpAddr::V6(Ipv6Addr::LOCALHOST)]
        );
    }

    #[tokio::test]
    async fn test_localhost_resolves() {
        let addresses = resolve_host("localhost").await.unwrap();
        assert!(!addresses.is_empty());
        assert!(addresses.iter().all(|ip| ip.is_loopback()));
    }

    #[tokio::test]
    async fn test_unresolvable_name() {
        let error = tokio_test::assert_err!(resolve_host("does-not-exist.invalid").await);
        assert!(matches!(error, ScanError::ResolutionError(_)));
        assert!(matches!(resolve_host("").await, Err(ScanError::ResolutionError(_))));
    }
}
