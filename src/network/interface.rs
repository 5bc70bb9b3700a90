//! Local interface resolution

use crate::network::AddressFamily;
use crate::ScanError;
use ipnetwork::IpNetwork;
use pnet::datalink::{self, NetworkInterface};
use std::net::{IpAddr, Ipv6Addr};

/// `fe80::/10`
pub fn is_ipv6_link_local(ip: &Ipv6Addr) -> bool {
    (ip.segments()[0] & 0xffc0) == 0xfe80
}

pub fn is_link_local(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_link_local(),
        IpAddr::V6(v6) => is_ipv6_link_local(v6),
    }
}

/// Read-only view over the host's network interfaces
#[derive(Debug, Clone)]
pub struct InterfaceResolver {
    interfaces: Vec<NetworkInterface>,
}

impl InterfaceResolver {
    /// Snapshot the interfaces currently present on the host
    pub fn from_system() -> Self {
        Self::new(datalink::interfaces())
    }

    pub fn new(interfaces: Vec<NetworkInterface>) -> Self {
        Self { interfaces }
    }

    /// Case-insensitive exact match on the interface name
    pub fn find(&self, name: &str) -> crate::Result<&NetworkInterface> {
        self.interfaces
            .iter()
            .find(|iface| iface.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| ScanError::InterfaceNotFound(name.to_string()))
    }

    /// Interface index, used as scope id for link-local IPv6 destinations
    pub fn index_of(&self, name: &str) -> crate::Result<u32> {
        self.find(name).map(|iface| iface.index)
    }

    /// Resolve the local address bound to `name` for the requested family.
    ///
    /// IPv6 prefers a global (non link-local) address and falls back to whatever
    /// IPv6 address is bound.
    pub fn resolve(&self, name: &str, family: AddressFamily) -> crate::Result<IpAddr> {
        let iface = self.find(name)?;
        let mut candidates = iface
            .ips
            .iter()
            .map(IpNetwork::ip)
            .filter(|ip| family.matches(ip));

        let chosen = match family {
            AddressFamily::Ipv4 => candidates.next(),
            AddressFamily::Ipv6 => {
                let all: Vec<IpAddr> = candidates.collect();
                all.iter()
                    .find(|ip| !is_link_local(ip))
                    .or_else(|| all.first())
                    .copied()
            }
        };

        chosen.ok_or_else(|| ScanError::NoAddressOfFamily {
            interface: iface.name.clone(),
            family,
        })
    }

    /// Interfaces that are up, for listing
    pub fn active_interfaces(&self) -> impl Iterator<Item = &NetworkInterface> {
        self.interfaces.iter().filter(|iface| iface.is_up())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn iface(name: &str, ips: &[&str]) -> NetworkInterface {
        NetworkInterface {
            name: name.to_string(),
            description: String::new(),
            index: 3,
            mac: None,
            ips: ips.iter().map(|ip| ip.parse().unwrap()).collect(),
            flags: 0,
        }
    }

    #[test]
    fn test_case_insensitive_lookup() {
        let resolver = InterfaceResolver::new(vec![iface("Eth0", &["192.168.1.20/24"])]);
        let ip = resolver.resolve("eth0", AddressFamily::Ipv4).unwrap();
        assert_eq!(ip, IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20)));
        assert_eq!(resolver.index_of("ETH0").unwrap(), 3);
    }

    #[test]
    fn test_interface_not_found() {
        let resolver = InterfaceResolver::new(vec![iface("eth0", &["192.168.1.20/24"])]);
        let err = resolver.resolve("eth", AddressFamily::Ipv4).unwrap_err();
        assert!(matches!(err, ScanError::InterfaceNotFound(name) if name == "eth"));
    }

    #[test]
    fn test_no_address_of_family() {
        let resolver = InterfaceResolver::new(vec![iface("eth0", &["192.168.1.20/24"])]);
        let err = resolver.resolve("eth0", AddressFamily::Ipv6).unwrap_err();
        assert!(matches!(err, ScanError::NoAddressOfFamily { family: AddressFamily::Ipv6, .. }));
    }

    #[test]
    fn test_ipv6_prefers_global() {
        let resolver = InterfaceResolver::new(vec![iface(
            "eth0",
            &["fe80::1c2:3ff:fe04:506/64", "192.168.1.20/24", "2001:db8::20/64"],
        )]);
        let ip = resolver.resolve("eth0", AddressFamily::Ipv6).unwrap();
        assert_eq!(ip, "2001:db8::20".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_ipv6_falls_back_to_link_local() {
        let resolver = InterfaceResolver::new(vec![iface("eth0", &["fe80::1/64", "10.0.0.2/8"])]);
        let ip = resolver.resolve("eth0", AddressFamily::Ipv6).unwrap();
        assert!(is_link_local(&ip));
    }

    #[test]
    fn test_link_local_detection() {
        assert!(is_ipv6_link_local(&"fe80::abcd".parse().unwrap()));
        assert!(is_ipv6_link_local(&"febf::1".parse().unwrap()));
        assert!(!is_ipv6_link_local(&"fec0::1".parse().unwrap()));
        assert!(!is_ipv6_link_local(&Ipv6Addr::LOCALHOST));
    }
}
