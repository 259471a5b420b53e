//! Registry behaviour under link events, using in-memory listeners.

use async_trait::async_trait;
use mvirt_dhcp6::error::Result;
use mvirt_dhcp6::link::IF_OPER_UP;
use mvirt_dhcp6::{
    Endpoint, EndpointFactory, LinkEvent, LinkState, ListenerConfig, ListenerError, NetlinkError,
    Registry,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

struct MemoryListener {
    link: LinkState,
    closed: watch::Sender<bool>,
}

#[async_trait]
impl Endpoint for MemoryListener {
    fn link(&self) -> &LinkState {
        &self.link
    }

    async fn listen(&self) -> Result<()> {
        let mut closed = self.closed.subscribe();
        let _ = closed.wait_for(|c| *c).await;
        Err(ListenerError::Closed)
    }

    fn close(&self) {
        self.closed.send_replace(true);
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

/// Resolves links from a fixed table, like the netlink-backed factory.
#[derive(Default)]
struct MemoryFactory {
    links: Mutex<HashMap<u32, LinkState>>,
}

impl MemoryFactory {
    fn with_links(links: &[LinkState]) -> Self {
        let factory = Self::default();
        for link in links {
            factory
                .links
                .lock()
                .unwrap()
                .insert(link.index, link.clone());
        }
        factory
    }
}

#[async_trait]
impl EndpointFactory for MemoryFactory {
    type Endpoint = MemoryListener;

    async fn open(&self, index: u32) -> Result<Arc<MemoryListener>> {
        let link = self
            .links
            .lock()
            .unwrap()
            .get(&index)
            .cloned()
            .ok_or(NetlinkError::LinkNotFound(index))?;
        Ok(Arc::new(MemoryListener {
            link,
            closed: watch::Sender::new(false),
        }))
    }
}

fn link(index: u32, name: &str, ready: bool) -> LinkState {
    LinkState {
        index,
        name: name.to_string(),
        admin_up: true,
        oper_state: IF_OPER_UP,
        mac: vec![0x02, 0, 0, 0, 0, index as u8],
        tx_packets: if ready { 1 } else { 0 },
    }
}

fn registry(links: &[LinkState]) -> Arc<Registry<MemoryFactory>> {
    let config = ListenerConfig::new(r"^tap\d+$", "2001:db8::/64").unwrap();
    Registry::new(Arc::new(config), MemoryFactory::with_links(links))
}

async fn eventually_absent(registry: &Registry<MemoryFactory>, index: u32) -> bool {
    for _ in 0..200 {
        if !registry.exists(index).await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

#[tokio::test]
async fn test_bootstrap_replay() {
    let links = [
        link(1, "lo", true),
        link(2, "eth0", true),
        link(3, "tap3", true),
        link(4, "tap4", false),
        link(5, "tap5", true),
    ];
    let registry = registry(&links);

    for link in links.iter().cloned() {
        registry.on_link_event(LinkEvent::Changed(link)).await;
    }

    assert_eq!(registry.len().await, 2);
    assert!(registry.exists(3).await);
    assert!(registry.exists(5).await);
    assert!(!registry.exists(4).await);
}

#[tokio::test]
async fn test_non_qualifying_interface_never_served() {
    let registry = registry(&[link(2, "eth0", true)]);
    registry.on_link_event(LinkEvent::Changed(link(2, "eth0", true))).await;
    registry.on_link_event(LinkEvent::Changed(link(2, "eth0", true))).await;
    assert!(!registry.exists(2).await);
}

#[tokio::test]
async fn test_interface_becomes_ready_later() {
    let registry = registry(&[link(6, "tap6", true)]);

    // Up but has not transmitted yet.
    registry.on_link_event(LinkEvent::Changed(link(6, "tap6", false))).await;
    assert!(!registry.exists(6).await);

    registry.on_link_event(LinkEvent::Changed(link(6, "tap6", true))).await;
    assert!(registry.exists(6).await);
    assert_eq!(registry.get(6).await.unwrap().link().name, "tap6");
}

#[tokio::test]
async fn test_admin_down_then_up_restarts_listener() {
    let registry = registry(&[link(7, "tap7", true)]);

    registry.on_link_event(LinkEvent::Changed(link(7, "tap7", true))).await;
    let first = registry.get(7).await.unwrap();

    let mut down = link(7, "tap7", true);
    down.admin_up = false;
    registry.on_link_event(LinkEvent::Changed(down)).await;
    assert!(first.is_closed());
    assert!(eventually_absent(&registry, 7).await);

    registry.on_link_event(LinkEvent::Changed(link(7, "tap7", true))).await;
    let second = registry.get(7).await.unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert!(!second.is_closed());
}

#[tokio::test]
async fn test_removed_link_closes_listener() {
    let registry = registry(&[link(8, "tap8", true)]);
    registry.on_link_event(LinkEvent::Changed(link(8, "tap8", true))).await;

    registry
        .on_link_event(LinkEvent::Removed {
            index: 8,
            name: "tap8".to_string(),
        })
        .await;
    assert!(eventually_absent(&registry, 8).await);

    // Removal of an unknown link is harmless.
    registry
        .on_link_event(LinkEvent::Removed {
            index: 99,
            name: "tap99".to_string(),
        })
        .await;
}

#[tokio::test]
async fn test_unresolvable_link_not_registered() {
    // The event names a qualifying interface that vanished before lookup.
    let registry = registry(&[]);
    registry.on_link_event(LinkEvent::Changed(link(9, "tap9", true))).await;
    assert!(!registry.exists(9).await);
    assert!(registry.is_empty().await);
}

#[tokio::test]
async fn test_close_all_empties_registry() {
    let links = [link(1, "tap1", true), link(2, "tap2", true), link(3, "tap3", true)];
    let registry = registry(&links);
    for link in links.iter().cloned() {
        registry.on_link_event(LinkEvent::Changed(link)).await;
    }
    assert_eq!(registry.len().await, 3);

    registry.close_all().await;
    for index in 1..=3 {
        assert!(eventually_absent(&registry, index).await);
    }
}
