//! Kernel link and route queries over rtnetlink.

use crate::error::NetlinkError;
use crate::link::{LinkEvent, LinkState};
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use ipnet::Ipv6Net;
use netlink_packet_core::NetlinkPayload;
use netlink_packet_route::RouteNetlinkMessage;
use netlink_packet_route::route::{
    RouteAddress, RouteAttribute, RouteHeader, RouteMessage, RouteType,
};
use netlink_sys::{AsyncSocket, SocketAddr};
use rtnetlink::constants::RTMGRP_LINK;
use rtnetlink::{Handle, IpVersion};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Capacity of the link event channel.
const EVENT_QUEUE: usize = 256;

/// Source of IPv6 host routes for an interface.
#[async_trait]
pub trait RouteTable: Send + Sync {
    /// All /128 routes out of `index`, in kernel table order.
    async fn host_routes(&self, index: u32) -> Result<Vec<Ipv6Net>, NetlinkError>;
}

/// Handle for netlink queries.
#[derive(Clone)]
pub struct NetlinkHandle {
    handle: Handle,
}

impl NetlinkHandle {
    /// Open a netlink connection and drive it on the runtime.
    pub async fn new() -> Result<Self, NetlinkError> {
        let (connection, handle, _) =
            rtnetlink::new_connection().map_err(NetlinkError::Connection)?;

        tokio::spawn(connection);

        Ok(Self { handle })
    }

    /// Look up a single link by index.
    pub async fn link(&self, index: u32) -> Result<LinkState, NetlinkError> {
        let mut links = self.handle.link().get().match_index(index).execute();
        match links.try_next().await {
            Ok(Some(msg)) => Ok(LinkState::from_message(&msg)),
            Ok(None) => Err(NetlinkError::LinkNotFound(index)),
            Err(rtnetlink::Error::NetlinkError(e)) if e.raw_code() == -libc::ENODEV => {
                Err(NetlinkError::LinkNotFound(index))
            }
            Err(e) => Err(NetlinkError::Request(e.to_string())),
        }
    }

    /// Dump all links.
    pub async fn links(&self) -> Result<Vec<LinkState>, NetlinkError> {
        let mut links = self.handle.link().get().execute();
        let mut states = Vec::new();
        while let Some(msg) = links
            .try_next()
            .await
            .map_err(|e| NetlinkError::Request(e.to_string()))?
        {
            states.push(LinkState::from_message(&msg));
        }
        Ok(states)
    }

    /// Subscribe to link changes.
    ///
    /// Uses its own connection bound to the `RTMGRP_LINK` group. The returned
    /// channel closes if that connection goes away.
    pub fn subscribe_links(&self) -> Result<mpsc::Receiver<LinkEvent>, NetlinkError> {
        let (mut connection, _handle, mut messages) =
            rtnetlink::new_connection().map_err(NetlinkError::Connection)?;

        let addr = SocketAddr::new(0, RTMGRP_LINK);
        connection
            .socket_mut()
            .socket_mut()
            .bind(&addr)
            .map_err(NetlinkError::Subscribe)?;

        tokio::spawn(connection);

        let (tx, rx) = mpsc::channel(EVENT_QUEUE);
        tokio::spawn(async move {
            while let Some((msg, _)) = messages.next().await {
                let event = match msg.payload {
                    NetlinkPayload::InnerMessage(RouteNetlinkMessage::NewLink(link)) => {
                        LinkEvent::Changed(LinkState::from_message(&link))
                    }
                    NetlinkPayload::InnerMessage(RouteNetlinkMessage::DelLink(link)) => {
                        let state = LinkState::from_message(&link);
                        LinkEvent::Removed {
                            index: state.index,
                            name: state.name,
                        }
                    }
                    _ => continue,
                };
                if tx.send(event).await.is_err() {
                    debug!("Link event receiver dropped");
                    return;
                }
            }
            warn!("Link event subscription ended");
        });

        Ok(rx)
    }
}

#[async_trait]
impl RouteTable for NetlinkHandle {
    async fn host_routes(&self, index: u32) -> Result<Vec<Ipv6Net>, NetlinkError> {
        let mut routes = self.handle.route().get(IpVersion::V6).execute();
        let mut found = Vec::new();
        while let Some(msg) = routes
            .try_next()
            .await
            .map_err(|e| NetlinkError::Request(e.to_string()))?
        {
            if let Some(net) = host_route(&msg, index) {
                found.push(net);
            }
        }
        Ok(found)
    }
}

/// The /128 destination of `msg` if it is a main-table unicast route
/// leaving through `index`.
///
/// Local-table entries for the host's own addresses are skipped.
pub fn host_route(msg: &RouteMessage, index: u32) -> Option<Ipv6Net> {
    if msg.header.destination_prefix_length != 128 || msg.header.kind != RouteType::Unicast {
        return None;
    }

    let mut table = u32::from(msg.header.table);
    let mut destination = None;
    let mut oif = None;
    for attr in &msg.attributes {
        match attr {
            RouteAttribute::Destination(RouteAddress::Inet6(addr)) => destination = Some(*addr),
            RouteAttribute::Oif(i) => oif = Some(*i),
            RouteAttribute::Table(t) => table = *t,
            _ => {}
        }
    }

    if table != u32::from(RouteHeader::RT_TABLE_MAIN) || oif != Some(index) {
        return None;
    }
    destination.and_then(|addr| Ipv6Net::new(addr, 128).ok())
}
