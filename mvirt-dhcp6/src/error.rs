//! Error types for mvirt-dhcp6.

use std::io;
use thiserror::Error;

/// Startup configuration errors. All of them are fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unable to parse interface regex '{0}': {1}")]
    InvalidPattern(String, regex::Error),

    #[error("Unable to parse accept-prefix '{0}': {1}")]
    InvalidPrefix(String, ipnet::AddrParseError),

    #[error("Invalid DNS server '{0}'")]
    InvalidDnsServer(String),

    #[error("Lease time must be greater than zero")]
    ZeroLeaseTime,

    #[error("Invalid log level '{0}'")]
    InvalidLogLevel(String),
}

/// Errors talking to the kernel over rtnetlink.
#[derive(Debug, Error)]
pub enum NetlinkError {
    #[error("Failed to open netlink connection: {0}")]
    Connection(io::Error),

    #[error("Failed to subscribe to link events: {0}")]
    Subscribe(io::Error),

    #[error("Netlink request failed: {0}")]
    Request(String),

    #[error("Interface with index {0} not found")]
    LinkNotFound(u32),
}

/// Errors constructing or running a listener.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("Unable to get interface: {0}")]
    Link(#[from] NetlinkError),

    #[error("Socket error: {0}")]
    Socket(#[from] io::Error),

    #[error("Listener closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, ListenerError>;
