//! DHCPv6 message handling.
//!
//! Each datagram is answered from scratch: the handler looks up the host
//! route of the receiving interface, picks the address inside the accepted
//! prefix and builds an Advertise or Reply around it. No lease state is kept
//! between requests.

use crate::config::ListenerConfig;
use crate::dns;
use crate::link::LinkState;
use crate::netlink::RouteTable;
use crate::options::{self, ClientHints};
use crate::resolver::{self, Hostname};
use chrono::{DateTime, TimeZone, Utc};
use dhcproto::v6::{DhcpOption, DhcpOptions, IAAddr, IANA, Message, MessageType, OptionCode};
use dhcproto::{Encodable, Encoder};
use std::net::{Ipv6Addr, SocketAddrV6};
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

/// DUID-LLT type code.
const DUID_LLT: u16 = 1;

/// ARP hardware type for Ethernet.
const HW_TYPE_ETHERNET: u16 = 1;

/// Receive metadata of one datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecvMeta {
    /// Interface index reported by `IPV6_PKTINFO`.
    pub if_index: u32,
    pub peer: SocketAddrV6,
}

/// Build a DUID-LLT for a link-layer address.
///
/// The time field counts seconds since 2000-01-01 00:00 UTC, modulo 2^32.
pub fn duid_llt(mac: &[u8], now: DateTime<Utc>) -> Vec<u8> {
    let epoch = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).single();
    let secs = epoch
        .map(|epoch| now.signed_duration_since(epoch).num_seconds())
        .unwrap_or(0);

    let mut duid = Vec::with_capacity(8 + mac.len());
    duid.extend_from_slice(&DUID_LLT.to_be_bytes());
    duid.extend_from_slice(&HW_TYPE_ETHERNET.to_be_bytes());
    duid.extend_from_slice(&(secs as u32).to_be_bytes());
    duid.extend_from_slice(mac);
    duid
}

/// Reply type for an inbound message, `None` when it is not answered.
pub fn reply_type(msg_type: MessageType, rapid_commit: bool) -> Option<MessageType> {
    match msg_type {
        MessageType::Solicit if rapid_commit => Some(MessageType::Reply),
        MessageType::Solicit => Some(MessageType::Advertise),
        MessageType::Request
        | MessageType::Confirm
        | MessageType::Renew
        | MessageType::Rebind
        | MessageType::Release
        | MessageType::InformationRequest => Some(MessageType::Reply),
        _ => None,
    }
}

/// Inputs for the per-option builders.
struct ReplyContext<'a> {
    config: &'a ListenerConfig,
    interface: &'a str,
    hints: ClientHints,
    addr: Ipv6Addr,
    hostname: &'a Hostname,
}

type OptionBuilder = fn(&ReplyContext<'_>) -> Option<DhcpOption>;

/// Options the server can answer when requested through the ORO.
const OPTION_BUILDERS: &[(OptionCode, OptionBuilder)] = &[
    (OptionCode::OptBootfileUrl, boot_file_url),
    (OptionCode::VendorClass, vendor_class),
    (OptionCode::ClientFqdn, client_fqdn),
    (OptionCode::DomainNameServers, dns_servers),
    (OptionCode::DomainSearchList, domain_list),
];

fn boot_file_url(ctx: &ReplyContext<'_>) -> Option<DhcpOption> {
    let boot = &ctx.config.boot;
    let url = match (&boot.ipxe, ctx.hints) {
        (Some(ipxe), ClientHints { ipxe: true, .. }) => Some(ipxe),
        (_, ClientHints { efi: true, .. }) => boot.uefi.as_ref().or(boot.http.as_ref()),
        _ => boot.bios.as_ref().or(boot.http.as_ref()),
    };
    url.map(|u| options::boot_file_url(u))
}

fn vendor_class(_ctx: &ReplyContext<'_>) -> Option<DhcpOption> {
    Some(options::vendor_class())
}

fn client_fqdn(ctx: &ReplyContext<'_>) -> Option<DhcpOption> {
    options::client_fqdn(&ctx.hostname.host, &ctx.hostname.domain)
        .inspect_err(|e| {
            warn!(
                interface = %ctx.interface,
                hostname = %ctx.hostname,
                error = %e,
                "Omitting client FQDN"
            )
        })
        .ok()
}

fn dns_servers(ctx: &ReplyContext<'_>) -> Option<DhcpOption> {
    let servers = dns::mix(&ctx.addr, &ctx.config.dns_servers);
    Some(DhcpOption::DomainNameServers(servers))
}

fn domain_list(ctx: &ReplyContext<'_>) -> Option<DhcpOption> {
    let domain = &ctx.config.hostname.domain_name;
    options::domain_search_list(domain)
        .inspect_err(|e| {
            warn!(interface = %ctx.interface, %domain, error = %e, "Omitting domain search list")
        })
        .ok()
}

/// Protocol engine shared by all listeners.
pub struct Handler {
    config: Arc<ListenerConfig>,
    routes: Arc<dyn RouteTable>,
}

impl Handler {
    pub fn new(config: Arc<ListenerConfig>, routes: Arc<dyn RouteTable>) -> Self {
        Self { config, routes }
    }

    /// Handle one datagram received on `link`.
    ///
    /// Returns the encoded reply, or `None` when the datagram is dropped.
    pub async fn handle(
        &self,
        link: &LinkState,
        server_duid: &[u8],
        datagram: &[u8],
        meta: &RecvMeta,
    ) -> Option<Vec<u8>> {
        if meta.if_index != link.index {
            warn!(
                interface = %link.name,
                if_index = link.index,
                received_on = meta.if_index,
                "Dropping datagram received on foreign interface"
            );
            return None;
        }

        let request = match options::decode_message(datagram) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(interface = %link.name, peer = %meta.peer, error = %e, "Failed to parse DHCPv6 message");
                return None;
            }
        };

        debug!(
            interface = %link.name,
            msg_type = ?request.msg_type(),
            xid = ?request.xid(),
            peer = %meta.peer,
            "DHCPv6 message received"
        );

        let rapid_commit = options::has_rapid_commit(&request);
        let Some(reply_type) = reply_type(request.msg_type(), rapid_commit) else {
            error!(
                interface = %link.name,
                msg_type = ?request.msg_type(),
                "Message type not supported"
            );
            return None;
        };

        let routes = match self.routes.host_routes(link.index).await {
            Ok(routes) => routes,
            Err(e) => {
                error!(interface = %link.name, error = %e, "Unable to get routes");
                return None;
            }
        };
        if routes.is_empty() {
            info!(interface = %link.name, "No host routes on interface");
            return None;
        }
        let Some(addr) = resolver::pick_address(&routes, &self.config.accept_prefix) else {
            warn!(
                interface = %link.name,
                accept_prefix = %self.config.accept_prefix,
                "No routes matched in the accepted prefix range"
            );
            return None;
        };
        debug!(interface = %link.name, %addr, "Address picked");

        let hostname = resolver::resolve_hostname(&self.config.hostname, &link.name, &addr).await;

        let mut reply = self.base_reply(&request, reply_type, server_duid, addr);
        if rapid_commit && request.msg_type() == MessageType::Solicit {
            reply.opts_mut().insert(DhcpOption::RapidCommit);
        }

        let ctx = ReplyContext {
            config: &self.config,
            interface: &link.name,
            hints: ClientHints::from_message(&request),
            addr,
            hostname: &hostname,
        };
        let requested = options::requested_options(&request);
        debug!(interface = %link.name, ?requested, "Client requested options");
        for code in requested {
            match OPTION_BUILDERS.iter().find(|(c, _)| *c == code) {
                Some((_, build)) => {
                    if let Some(opt) = build(&ctx) {
                        reply.opts_mut().insert(opt);
                    }
                }
                None => debug!(interface = %link.name, ?code, "No handler for requested option"),
            }
        }

        let mut bytes = Vec::new();
        if let Err(e) = reply.encode(&mut Encoder::new(&mut bytes)) {
            error!(interface = %link.name, error = %e, "Failed to encode reply");
            return None;
        }

        info!(
            reply = ?reply_type,
            peer = %meta.peer,
            interface = %link.name,
            %addr,
            lease_minutes = f64::from(self.config.preferred_lifetime()) / 60.0,
            hostname = %hostname,
            "Sending reply"
        );
        trace!(reply = ?reply, "Reply contents");

        Some(bytes)
    }

    fn base_reply(
        &self,
        request: &Message,
        reply_type: MessageType,
        server_duid: &[u8],
        addr: Ipv6Addr,
    ) -> Message {
        let mut reply = Message::new(reply_type);
        reply.set_xid(request.xid());

        if let Some(DhcpOption::ClientId(duid)) = request.opts().get(OptionCode::ClientId) {
            reply
                .opts_mut()
                .insert(DhcpOption::ClientId(duid.clone()));
        }
        reply
            .opts_mut()
            .insert(DhcpOption::ServerId(server_duid.to_vec()));

        let iaid = match request.opts().get(OptionCode::IANA) {
            Some(DhcpOption::IANA(iana)) => iana.id,
            _ => 0,
        };
        let preferred = self.config.preferred_lifetime();
        let ia_addr = IAAddr {
            addr,
            preferred_life: preferred,
            valid_life: self.config.valid_lifetime(),
            opts: Default::default(),
        };
        let mut ia_opts = DhcpOptions::new();
        ia_opts.insert(DhcpOption::IAAddr(ia_addr));
        reply.opts_mut().insert(DhcpOption::IANA(IANA {
            id: iaid,
            t1: preferred / 2,
            t2: ((u64::from(preferred) * 4) / 5) as u32,
            opts: ia_opts,
        }));

        reply
    }
}
