//! Per-interface DHCPv6 listener.
//!
//! Each listener owns one UDP socket bound to `[::]:547` on its interface and
//! joined to ff02::1:2 there. The receive loop hands every datagram to its
//! own task so the socket is read again right away.

use crate::error::{ListenerError, Result};
use crate::handler::{Handler, RecvMeta, duid_llt};
use crate::link::LinkState;
use crate::netlink::NetlinkHandle;
use crate::pool::{BufferPool, PooledBuffer};
use crate::registry::{Endpoint, EndpointFactory};
use async_trait::async_trait;
use nix::sys::socket::{setsockopt, sockopt};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::net::{Ipv6Addr, SocketAddr, SocketAddrV6};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::Arc;
use tokio::io::unix::AsyncFd;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub const DHCP6_SERVER_PORT: u16 = 547;
pub const ALL_DHCP_RELAY_AGENTS_AND_SERVERS: Ipv6Addr =
    Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 1, 2);

/// Create the server socket for `link`.
fn bind(link: &LinkState) -> io::Result<Socket> {
    let socket = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP))?;

    socket.set_only_v6(true)?;
    socket.set_reuse_address(true)?;
    socket.set_reuse_port(true)?;
    socket.bind_device(Some(link.name.as_bytes()))?;

    setsockopt(&socket, sockopt::Ipv6RecvPacketInfo, &true).map_err(io::Error::from)?;

    let addr = SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, DHCP6_SERVER_PORT, 0, 0);
    socket.bind(&SocketAddr::V6(addr).into())?;
    socket.join_multicast_v6(&ALL_DHCP_RELAY_AGENTS_AND_SERVERS, link.index)?;
    socket.set_nonblocking(true)?;

    Ok(socket)
}

/// Read one datagram together with the `IPV6_PKTINFO` interface index.
fn recv_with_pktinfo(fd: RawFd, buf: &mut [u8]) -> io::Result<(usize, RecvMeta)> {
    // u64 elements keep the control buffer aligned for cmsghdr.
    let mut control = [0u64; 8];
    let mut peer: libc::sockaddr_in6 = unsafe { std::mem::zeroed() };
    let mut iov = libc::iovec {
        iov_base: buf.as_mut_ptr() as *mut libc::c_void,
        iov_len: buf.len(),
    };

    let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
    msg.msg_name = &mut peer as *mut libc::sockaddr_in6 as *mut libc::c_void;
    msg.msg_namelen = std::mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t;
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = control.as_mut_ptr() as *mut libc::c_void;
    msg.msg_controllen = std::mem::size_of_val(&control) as _;

    let n = unsafe { libc::recvmsg(fd, &mut msg, 0) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }

    let mut if_index = 0;
    // SAFETY: msg was filled by recvmsg and control outlives the iteration.
    unsafe {
        let mut cmsg = libc::CMSG_FIRSTHDR(&msg);
        while !cmsg.is_null() {
            if (*cmsg).cmsg_level == libc::IPPROTO_IPV6 && (*cmsg).cmsg_type == libc::IPV6_PKTINFO
            {
                let info =
                    std::ptr::read_unaligned(libc::CMSG_DATA(cmsg) as *const libc::in6_pktinfo);
                if_index = info.ipi6_ifindex as u32;
            }
            cmsg = libc::CMSG_NXTHDR(&msg, cmsg);
        }
    }

    let peer = SocketAddrV6::new(
        Ipv6Addr::from(peer.sin6_addr.s6_addr),
        u16::from_be(peer.sin6_port),
        peer.sin6_flowinfo,
        peer.sin6_scope_id,
    );
    Ok((n as usize, RecvMeta { if_index, peer }))
}

/// State shared between the receive loop and the datagram tasks.
struct Shared {
    link: LinkState,
    socket: AsyncFd<Socket>,
    server_duid: Vec<u8>,
    handler: Arc<Handler>,
}

impl Shared {
    async fn recv(&self, buf: &mut [u8]) -> io::Result<(usize, RecvMeta)> {
        loop {
            let mut guard = self.socket.readable().await?;
            match guard.try_io(|fd| recv_with_pktinfo(fd.get_ref().as_raw_fd(), buf)) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }

    async fn send_to(&self, data: &[u8], peer: SocketAddrV6) -> io::Result<usize> {
        let addr = SockAddr::from(peer);
        loop {
            let mut guard = self.socket.writable().await?;
            match guard.try_io(|fd| fd.get_ref().send_to(data, &addr)) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }

    /// Handle one datagram and send the reply, if any, back to its sender.
    async fn serve(&self, datagram: PooledBuffer, meta: RecvMeta) {
        let reply = self
            .handler
            .handle(&self.link, &self.server_duid, &datagram, &meta)
            .await;
        drop(datagram);

        let Some(reply) = reply else {
            return;
        };

        // Link-local peers need the scope of the receiving interface.
        let peer = SocketAddrV6::new(*meta.peer.ip(), meta.peer.port(), 0, self.link.index);
        if let Err(e) = self.send_to(&reply, peer).await {
            warn!(interface = %self.link.name, peer = %peer, error = %e, "Failed to send reply");
        }
    }
}

/// DHCPv6 listener bound to one interface.
pub struct Listener {
    shared: Arc<Shared>,
    pool: Arc<BufferPool>,
    closed: watch::Sender<bool>,
}

impl Listener {
    /// Bind and join the multicast group on `link`.
    pub fn open(link: LinkState, handler: Arc<Handler>, pool: Arc<BufferPool>) -> Result<Self> {
        let socket = bind(&link)?;
        debug!(interface = %link.name, if_index = link.index, "Listener socket bound");
        Self::with_socket(link, socket, handler, pool)
    }

    /// Wrap an already bound, nonblocking socket with `IPV6_RECVPKTINFO` set.
    fn with_socket(
        link: LinkState,
        socket: Socket,
        handler: Arc<Handler>,
        pool: Arc<BufferPool>,
    ) -> Result<Self> {
        let socket = AsyncFd::new(socket)?;
        let server_duid = duid_llt(&link.mac, chrono::Utc::now());

        Ok(Self {
            shared: Arc::new(Shared {
                link,
                socket,
                server_duid,
                handler,
            }),
            pool,
            closed: watch::Sender::new(false),
        })
    }
}

#[async_trait]
impl Endpoint for Listener {
    fn link(&self) -> &LinkState {
        &self.shared.link
    }

    async fn listen(&self) -> Result<()> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return Err(ListenerError::Closed);
        }

        info!(
            interface = %self.shared.link.name,
            if_index = self.shared.link.index,
            "Listening for DHCPv6 requests"
        );

        loop {
            let mut buf = self.pool.acquire();
            let received = tokio::select! {
                _ = closed.wait_for(|c| *c) => return Err(ListenerError::Closed),
                received = self.shared.recv(buf.as_mut_full()) => received,
            };
            let (n, meta) = received?;
            buf.set_len(n);

            let shared = Arc::clone(&self.shared);
            tokio::spawn(async move {
                shared.serve(buf, meta).await;
            });
        }
    }

    fn close(&self) {
        self.closed.send_replace(true);
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

/// Opens listeners on interfaces looked up over netlink.
pub struct ListenerFactory {
    netlink: NetlinkHandle,
    handler: Arc<Handler>,
    pool: Arc<BufferPool>,
}

impl ListenerFactory {
    pub fn new(netlink: NetlinkHandle, handler: Arc<Handler>, pool: Arc<BufferPool>) -> Self {
        Self {
            netlink,
            handler,
            pool,
        }
    }
}

#[async_trait]
impl EndpointFactory for ListenerFactory {
    type Endpoint = Listener;

    async fn open(&self, index: u32) -> Result<Arc<Listener>> {
        let link = self.netlink.link(index).await?;
        let listener = Listener::open(link, Arc::clone(&self.handler), Arc::clone(&self.pool))?;
        Ok(Arc::new(listener))
    }
}
