//! Address selection and hostname resolution for a lease.

use crate::config::HostnamePolicy;
use ipnet::Ipv6Net;
use std::net::Ipv6Addr;
use std::path::PathBuf;
use tracing::debug;

/// First host route inside `accepted`, in routing table order.
pub fn pick_address(routes: &[Ipv6Net], accepted: &Ipv6Net) -> Option<Ipv6Addr> {
    routes
        .iter()
        .map(|route| route.addr())
        .find(|addr| accepted.contains(addr))
}

/// Host label derived from an address, e.g. `2001:db8::ab` -> `2001-db8--ab`.
pub fn dynamic_hostname(addr: &Ipv6Addr) -> String {
    addr.to_string().replace([':', '.'], "-")
}

/// Host and domain handed to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hostname {
    pub host: String,
    pub domain: String,
}

impl std::fmt::Display for Hostname {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.host, self.domain)
    }
}

fn override_path(prefix: &std::path::Path, if_name: &str) -> PathBuf {
    let mut path = prefix.as_os_str().to_owned();
    path.push(if_name);
    PathBuf::from(path)
}

/// Parse `hostname` or `hostname.domain`. Returns `None` for an empty host.
fn parse_override(content: &str) -> Option<(String, Option<String>)> {
    let content = content.trim();
    let (host, domain) = match content.split_once('.') {
        Some((host, domain)) => (host, Some(domain)),
        None => (content, None),
    };
    if host.is_empty() {
        return None;
    }
    let domain = domain.filter(|d| !d.is_empty()).map(str::to_string);
    Some((host.to_string(), domain))
}

/// Resolve the hostname for a lease on `if_name`.
///
/// Precedence: per-interface override file, then the address-derived name
/// when dynamic mode is on, then the static default. An unreadable or
/// malformed override file falls through.
pub async fn resolve_hostname(policy: &HostnamePolicy, if_name: &str, addr: &Ipv6Addr) -> Hostname {
    let mut hostname = Hostname {
        host: policy.hostname.clone(),
        domain: policy.domain_name.clone(),
    };

    if policy.dynamic {
        hostname.host = dynamic_hostname(addr);
    }

    if let Some(prefix) = &policy.override_prefix {
        let path = override_path(prefix, if_name);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => match parse_override(&content) {
                Some((host, domain)) => {
                    hostname.host = host;
                    if let Some(domain) = domain {
                        hostname.domain = domain;
                    }
                }
                None => debug!(path = %path.display(), "Ignoring malformed hostname override"),
            },
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Unable to read hostname override")
            }
        }
    }

    hostname
}
