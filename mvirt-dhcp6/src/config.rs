//! Listener configuration.
//!
//! Built once at startup from the command line and shared read-only by every
//! listener through an `Arc`.

use crate::error::ConfigError;
use ipnet::Ipv6Net;
use regex::Regex;
use std::net::Ipv6Addr;
use std::path::PathBuf;

/// DNS server handed out when none is configured (Quad9).
pub const DEFAULT_DNS_SERVER: Ipv6Addr = Ipv6Addr::new(0x2620, 0xfe, 0, 0, 0, 0, 0, 0x9);

/// Default preferred lifetime in seconds.
pub const DEFAULT_LEASE_TIME: u32 = 3600;

pub const DEFAULT_HOSTNAME: &str = "localhost";

pub const DEFAULT_DOMAIN_NAME: &str = "local";

/// Path prefix for per-interface hostname override files.
pub const DEFAULT_OVERRIDE_FILE_PREFIX: &str = "/var/lib/dhcpv6d-unnumbered/hostname.";

/// Boot file URLs offered to network-booting clients.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootUrls {
    /// Generic HTTP boot URL, used when no architecture specific URL applies.
    pub http: Option<String>,
    /// URL for legacy BIOS / UNDI clients.
    pub bios: Option<String>,
    /// URL for UEFI clients.
    pub uefi: Option<String>,
    /// URL for clients announcing the iPXE user class.
    pub ipxe: Option<String>,
}

impl BootUrls {
    /// Build from raw flag values. Empty strings count as not configured.
    pub fn new(
        http: Option<String>,
        bios: Option<String>,
        uefi: Option<String>,
        ipxe: Option<String>,
    ) -> Self {
        BootUrls {
            http: non_empty(http),
            bios: non_empty(bios),
            uefi: non_empty(uefi),
            ipxe: non_empty(ipxe),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Hostname handed out in the FQDN option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostnamePolicy {
    /// Static fallback hostname.
    pub hostname: String,
    /// Static domain, also used for the domain search list.
    pub domain_name: String,
    /// Derive the hostname from the leased address.
    pub dynamic: bool,
    /// Read `<prefix><interface name>` for a per-interface override.
    pub override_prefix: Option<PathBuf>,
}

impl Default for HostnamePolicy {
    fn default() -> Self {
        HostnamePolicy {
            hostname: DEFAULT_HOSTNAME.to_string(),
            domain_name: DEFAULT_DOMAIN_NAME.to_string(),
            dynamic: false,
            override_prefix: None,
        }
    }
}

/// Immutable configuration shared by all listeners.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Interfaces whose name matches are served.
    pub interface_pattern: Regex,
    /// Host routes must fall inside this prefix to be leased.
    pub accept_prefix: Ipv6Net,
    /// Recursive DNS servers, never empty.
    pub dns_servers: Vec<Ipv6Addr>,
    /// Preferred lifetime in seconds. The valid lifetime is always twice this.
    pub lease_time: u32,
    pub hostname: HostnamePolicy,
    pub boot: BootUrls,
}

impl ListenerConfig {
    /// Create a configuration with the two mandatory settings.
    ///
    /// The accepted prefix is truncated to its network address, so
    /// `2001:db8:1::5/64` is stored as `2001:db8:1::/64`.
    pub fn new(interface_pattern: &str, accept_prefix: &str) -> Result<Self, ConfigError> {
        let pattern = Regex::new(interface_pattern)
            .map_err(|e| ConfigError::InvalidPattern(interface_pattern.to_string(), e))?;
        let prefix: Ipv6Net = accept_prefix
            .trim()
            .parse()
            .map_err(|e| ConfigError::InvalidPrefix(accept_prefix.to_string(), e))?;

        Ok(ListenerConfig {
            interface_pattern: pattern,
            accept_prefix: prefix.trunc(),
            dns_servers: vec![DEFAULT_DNS_SERVER],
            lease_time: DEFAULT_LEASE_TIME,
            hostname: HostnamePolicy::default(),
            boot: BootUrls::default(),
        })
    }

    /// Set the DNS servers. An empty list keeps the default server.
    pub fn with_dns(mut self, servers: Vec<Ipv6Addr>) -> Self {
        if !servers.is_empty() {
            self.dns_servers = servers;
        }
        self
    }

    /// Set the preferred lifetime in seconds.
    pub fn with_lease_time(mut self, seconds: u32) -> Result<Self, ConfigError> {
        if seconds == 0 {
            return Err(ConfigError::ZeroLeaseTime);
        }
        self.lease_time = seconds;
        Ok(self)
    }

    pub fn with_hostname(mut self, policy: HostnamePolicy) -> Self {
        self.hostname = policy;
        self
    }

    pub fn with_boot_urls(mut self, boot: BootUrls) -> Self {
        self.boot = boot;
        self
    }

    /// Check whether an interface name matches the acceptance pattern.
    pub fn qualifies(&self, if_name: &str) -> bool {
        self.interface_pattern.is_match(if_name)
    }

    pub fn preferred_lifetime(&self) -> u32 {
        self.lease_time
    }

    pub fn valid_lifetime(&self) -> u32 {
        self.lease_time.saturating_mul(2)
    }
}

/// Parse DNS server flags into IPv6 addresses.
pub fn parse_dns_servers(values: &[String]) -> Result<Vec<Ipv6Addr>, ConfigError> {
    values
        .iter()
        .map(|v| {
            v.trim()
                .parse::<Ipv6Addr>()
                .map_err(|_| ConfigError::InvalidDnsServer(v.clone()))
        })
        .collect()
}
