//! Test helpers for mvirt-dhcp6 integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use dhcproto::v6::{
    DhcpOption, DhcpOptions, IANA, Message, MessageType, ORO, OptionCode, UnknownOption,
};
use dhcproto::{Decodable, Decoder, Encodable, Encoder};
use ipnet::Ipv6Net;
use mvirt_dhcp6::handler::RecvMeta;
use mvirt_dhcp6::link::IF_OPER_UP;
use mvirt_dhcp6::{LinkState, NetlinkError, RouteTable};
use std::net::{Ipv6Addr, SocketAddrV6};
use std::sync::atomic::{AtomicUsize, Ordering};

pub const IF_INDEX: u32 = 5;
pub const XID: [u8; 3] = [0x12, 0x34, 0x56];
pub const CLIENT_DUID: &[u8] = &[0, 3, 0, 1, 0x52, 0x54, 0, 0xaa, 0xbb, 0xcc];
pub const SERVER_DUID: &[u8] = &[0, 1, 0, 1, 0, 0, 0, 1, 2, 0, 0, 0, 0, 5];

/// Route table returning a fixed list, or failing.
pub struct StaticRoutes {
    routes: Vec<Ipv6Net>,
    fail: bool,
    calls: AtomicUsize,
}

impl StaticRoutes {
    pub fn new(routes: &[&str]) -> Self {
        Self {
            routes: routes.iter().map(|r| r.parse().unwrap()).collect(),
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            routes: Vec::new(),
            fail: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RouteTable for StaticRoutes {
    async fn host_routes(&self, index: u32) -> Result<Vec<Ipv6Net>, NetlinkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(NetlinkError::Request("dump interrupted".to_string()));
        }
        assert_eq!(index, IF_INDEX);
        Ok(self.routes.clone())
    }
}

pub fn tap_link() -> LinkState {
    LinkState {
        index: IF_INDEX,
        name: "tap5".to_string(),
        admin_up: true,
        oper_state: IF_OPER_UP,
        mac: vec![0x02, 0, 0, 0, 0, 0x05],
        tx_packets: 10,
    }
}

pub fn meta() -> RecvMeta {
    RecvMeta {
        if_index: IF_INDEX,
        peer: SocketAddrV6::new("fe80::5054:ff:feaa:bbcc".parse().unwrap(), 546, 0, IF_INDEX),
    }
}

/// Builder for client messages.
pub struct ClientMessage {
    msg_type: MessageType,
    iaid: Option<u32>,
    oro: Vec<OptionCode>,
    user_class: Option<&'static [u8]>,
    arch: Option<u16>,
    rapid_commit: bool,
}

impl ClientMessage {
    pub fn new(msg_type: MessageType) -> Self {
        Self {
            msg_type,
            iaid: None,
            oro: Vec::new(),
            user_class: None,
            arch: None,
            rapid_commit: false,
        }
    }

    pub fn with_iaid(mut self, iaid: u32) -> Self {
        self.iaid = Some(iaid);
        self
    }

    pub fn with_oro(mut self, codes: &[OptionCode]) -> Self {
        self.oro = codes.to_vec();
        self
    }

    pub fn with_user_class(mut self, class: &'static [u8]) -> Self {
        self.user_class = Some(class);
        self
    }

    pub fn with_arch(mut self, arch: u16) -> Self {
        self.arch = Some(arch);
        self
    }

    pub fn with_rapid_commit(mut self) -> Self {
        self.rapid_commit = true;
        self
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut msg = Message::new(self.msg_type);
        msg.set_xid(XID);
        let opts = msg.opts_mut();
        opts.insert(DhcpOption::ClientId(CLIENT_DUID.to_vec()));
        if let Some(id) = self.iaid {
            opts.insert(DhcpOption::IANA(IANA {
                id,
                t1: 0,
                t2: 0,
                opts: DhcpOptions::new(),
            }));
        }
        if !self.oro.is_empty() {
            opts.insert(DhcpOption::ORO(ORO {
                opts: self.oro.clone(),
            }));
        }
        if let Some(class) = self.user_class {
            // Raw, dhcproto's UserClass encoder writes the item count as length.
            let mut data = (class.len() as u16).to_be_bytes().to_vec();
            data.extend_from_slice(class);
            opts.insert(DhcpOption::Unknown(UnknownOption::new(
                OptionCode::UserClass,
                data,
            )));
        }
        if let Some(arch) = self.arch {
            opts.insert(DhcpOption::Unknown(UnknownOption::new(
                OptionCode::ClientArchType,
                arch.to_be_bytes().to_vec(),
            )));
        }
        if self.rapid_commit {
            opts.insert(DhcpOption::RapidCommit);
        }

        let mut bytes = Vec::new();
        msg.encode(&mut Encoder::new(&mut bytes)).unwrap();
        bytes
    }
}

pub fn decode(reply: &[u8]) -> Message {
    Message::decode(&mut Decoder::new(reply)).expect("reply does not decode")
}

/// IA_NA contents of a reply.
#[derive(Debug, PartialEq, Eq)]
pub struct IaNa {
    pub iaid: u32,
    pub t1: u32,
    pub t2: u32,
    pub addr: Ipv6Addr,
    pub preferred: u32,
    pub valid: u32,
}

pub fn ia_na(reply: &Message) -> IaNa {
    let Some(DhcpOption::IANA(iana)) = reply.opts().get(OptionCode::IANA) else {
        panic!("reply has no IA_NA");
    };
    let Some(DhcpOption::IAAddr(ia_addr)) = iana.opts.get(OptionCode::IAAddr) else {
        panic!("IA_NA has no IAADDR");
    };
    IaNa {
        iaid: iana.id,
        t1: iana.t1,
        t2: iana.t2,
        addr: ia_addr.addr,
        preferred: ia_addr.preferred_life,
        valid: ia_addr.valid_life,
    }
}

pub fn dns_servers(reply: &Message) -> Vec<Ipv6Addr> {
    match reply.opts().get(OptionCode::DomainNameServers) {
        Some(DhcpOption::DomainNameServers(servers)) => servers.clone(),
        other => panic!("reply has no DNS servers: {other:?}"),
    }
}

/// Payload of an option dhcproto has no typed variant for.
pub fn raw_option(reply: &Message, code: OptionCode) -> Option<Vec<u8>> {
    match reply.opts().get(code)? {
        DhcpOption::Unknown(opt) => Some(opt.data().to_vec()),
        other => panic!("{code:?} decoded as {other:?}"),
    }
}

pub fn has_option(reply: &Message, code: OptionCode) -> bool {
    reply.opts().get(code).is_some()
}
