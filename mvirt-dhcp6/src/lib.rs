//! mvirt-dhcp6 - DHCPv6 responder for unnumbered tap interfaces.
//!
//! Interfaces carry no prefix of their own. Instead each one has a single
//! /128 host route in the kernel routing table, and that address is leased
//! back to whatever client asks on the interface. Network-boot clients also
//! get a boot file URL matched to their architecture.
//!
//! ## Architecture
//!
//! ```text
//!  netlink link events
//!          |
//!          v
//!      Registry ---- qualifies + is_ready ----> add / close
//!          |
//!          v
//!      Listener (one per interface, [::]:547, ff02::1:2)
//!          |  one task per datagram
//!          v
//!      Handler ---- host routes ----> RouteTable (netlink)
//!          |   \--- hostname -------> resolver
//!          |    \-- DNS order ------> dns::mix
//!          v
//!      reply sent on the receiving socket
//! ```

pub mod config;
pub mod dns;
pub mod error;
pub mod handler;
pub mod link;
pub mod listener;
pub mod netlink;
pub mod options;
pub mod pool;
pub mod registry;
pub mod resolver;

pub use config::{BootUrls, HostnamePolicy, ListenerConfig};
pub use error::{ConfigError, ListenerError, NetlinkError};
pub use handler::{Handler, RecvMeta};
pub use link::{LinkEvent, LinkState};
pub use listener::{Listener, ListenerFactory};
pub use netlink::{NetlinkHandle, RouteTable};
pub use pool::BufferPool;
pub use registry::{Endpoint, EndpointFactory, Registry};
