//! Per-client DNS server ordering.

use std::net::Ipv6Addr;

/// Rotate `servers` so the list starts at `last_octet(addr) % len`.
///
/// A given leased address always sees the same order.
pub fn mix(addr: &Ipv6Addr, servers: &[Ipv6Addr]) -> Vec<Ipv6Addr> {
    if servers.is_empty() {
        return Vec::new();
    }
    let offset = usize::from(addr.octets()[15]) % servers.len();
    let mut ordered = Vec::with_capacity(servers.len());
    ordered.extend_from_slice(&servers[offset..]);
    ordered.extend_from_slice(&servers[..offset]);
    ordered
}
