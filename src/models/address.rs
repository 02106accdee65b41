// src/models/address.rs

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;
use std::sync::LazyLock;

use ipnetwork::{Ipv4Network, Ipv6Network};

/// IPv4 ranges that are never attributed to a public network
const V4_NON_GLOBAL: &[&str] = &[
    "0.0.0.0/8",       // "this network"
    "10.0.0.0/8",      // private
    "100.64.0.0/10",   // shared address space (CGNAT)
    "127.0.0.0/8",     // loopback
    "169.254.0.0/16",  // link-local
    "172.16.0.0/12",   // private
    "192.0.0.0/24",    // IETF protocol assignments
    "192.0.2.0/24",    // TEST-NET-1
    "192.168.0.0/16",  // private
    "198.18.0.0/15",   // benchmarking
    "198.51.100.0/24", // TEST-NET-2
    "203.0.113.0/24",  // TEST-NET-3
    "224.0.0.0/4",     // multicast
    "240.0.0.0/4",     // reserved, includes broadcast
];

/// Globally reachable hosts carved out of 192.0.0.0/24
const V4_GLOBAL_EXCEPTIONS: &[&str] = &["192.0.0.9/32", "192.0.0.10/32"];

const V6_NON_GLOBAL: &[&str] = &[
    "64:ff9b:1::/48", // local-use translation
    "100::/64",       // discard-only
    "2001::/23",      // IETF protocol assignments
    "2001:db8::/32",  // documentation
    "2002::/16",      // 6to4
    "3fff::/20",      // documentation
    "fc00::/7",       // unique local
    "fe80::/10",      // link-local
    "ff00::/8",       // multicast
];

/// Globally reachable blocks inside 2001::/23
const V6_GLOBAL_EXCEPTIONS: &[&str] = &[
    "2001:1::1/128",   // port control protocol anycast
    "2001:1::2/128",   // TURN anycast
    "2001:3::/32",     // AMT
    "2001:4:112::/48", // AS112-v6
    "2001:20::/28",    // ORCHIDv2
    "2001:30::/28",    // drone remote ID
];

static V4_NON_GLOBAL_NETS: LazyLock<Vec<Ipv4Network>> = LazyLock::new(|| networks(V4_NON_GLOBAL));
static V4_EXCEPTION_NETS: LazyLock<Vec<Ipv4Network>> = LazyLock::new(|| networks(V4_GLOBAL_EXCEPTIONS));
static V6_NON_GLOBAL_NETS: LazyLock<Vec<Ipv6Network>> = LazyLock::new(|| networks(V6_NON_GLOBAL));
static V6_EXCEPTION_NETS: LazyLock<Vec<Ipv6Network>> = LazyLock::new(|| networks(V6_GLOBAL_EXCEPTIONS));

fn networks<N: FromStr>(cidrs: &[&str]) -> Vec<N> {
    cidrs.iter().filter_map(|cidr| cidr.parse().ok()).collect()
}

/// Whether `address` parses as an IP address that is globally routable.
///
/// Malformed input is simply not enrichable.
pub fn is_enrichable(address: &str) -> bool {
    address
        .parse::<IpAddr>()
        .map(|ip| is_global(&ip))
        .unwrap_or(false)
}

/// Global-routability check for a parsed address
pub fn is_global(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_global_v4(*v4),
        IpAddr::V6(v6) => is_global_v6(*v6),
    }
}

fn is_global_v4(ip: Ipv4Addr) -> bool {
    if V4_EXCEPTION_NETS.iter().any(|net| net.contains(ip)) {
        return true;
    }

    !V4_NON_GLOBAL_NETS.iter().any(|net| net.contains(ip))
}

fn is_global_v6(ip: Ipv6Addr) -> bool {
    if ip.is_unspecified() || ip.is_loopback() {
        return false;
    }

    // ::ffff:a.b.c.d is judged by the embedded IPv4 address
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_global_v4(v4);
    }

    if V6_EXCEPTION_NETS.iter().any(|net| net.contains(ip)) {
        return true;
    }

    !V6_NON_GLOBAL_NETS.iter().any(|net| net.contains(ip))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_tables_parse_completely() {
        assert_eq!(V4_NON_GLOBAL_NETS.len(), V4_NON_GLOBAL.len());
        assert_eq!(V4_EXCEPTION_NETS.len(), V4_GLOBAL_EXCEPTIONS.len());
        assert_eq!(V6_NON_GLOBAL_NETS.len(), V6_NON_GLOBAL.len());
        assert_eq!(V6_EXCEPTION_NETS.len(), V6_GLOBAL_EXCEPTIONS.len());
    }

    #[test]
    fn test_ipv6_exceptions_inside_ietf_block() {
        assert!(is_enrichable("2001:4:112::1"));
        assert!(is_enrichable("2001:1::1"));
        assert!(!is_enrichable("2001:1::3"));
        assert!(!is_enrichable("2001:2::1"));
    }

    #[test]
    fn test_public_addresses_are_enrichable() {
        for ip in ["8.8.8.8", "1.1.1.1", "192.0.0.9", "2606:4700:4700::1111", "2001:4860:4860::8888"] {
            assert!(is_enrichable(ip), "{ip} should be enrichable");
        }
    }

    #[test]
    fn test_private_and_loopback_are_not_enrichable() {
        for ip in ["10.0.0.5", "172.16.4.1", "172.31.255.255", "192.168.1.1", "127.0.0.1", "::1", "fd12:3456::1"] {
            assert!(!is_enrichable(ip), "{ip} should not be enrichable");
        }
    }

    #[test]
    fn test_link_local_and_multicast_are_not_enrichable() {
        for ip in ["169.254.10.1", "fe80::1", "224.0.0.1", "239.255.255.250", "ff02::1"] {
            assert!(!is_enrichable(ip), "{ip} should not be enrichable");
        }
    }

    #[test]
    fn test_reserved_ranges_are_not_enrichable() {
        for ip in [
            "0.0.0.0",
            "255.255.255.255",
            "240.0.0.1",
            "100.64.0.1",
            "192.0.2.1",
            "198.51.100.7",
            "203.0.113.9",
            "198.18.0.1",
            "192.0.0.1",
            "::",
            "2001:db8::1",
            "100::1",
            "2002::1",
        ] {
            assert!(!is_enrichable(ip), "{ip} should not be enrichable");
        }
    }

    #[test]
    fn test_ipv4_mapped_uses_embedded_address() {
        assert!(is_enrichable("::ffff:8.8.8.8"));
        assert!(!is_enrichable("::ffff:192.168.1.1"));
    }

    #[test]
    fn test_malformed_strings_are_not_enrichable() {
        let long = "A".repeat(10_000);
        for ip in [
            "",
            "not.an.ip",
            "256.1.1.1",
            "1.1.1",
            "1.1.1.1.1",
            " 8.8.8.8 ",
            "8.8.8.8\n",
            "8.8.8.8\0",
            "8.8.8.0/24",
            long.as_str(),
        ] {
            assert!(!is_enrichable(ip), "{ip:?} should not be enrichable");
        }
    }

    #[test]
    fn test_boundaries_of_private_block() {
        assert!(is_enrichable("172.15.255.255"));
        assert!(!is_enrichable("172.16.0.0"));
        assert!(is_enrichable("172.32.0.0"));
        assert!(is_enrichable("100.128.0.0"));
    }
}
