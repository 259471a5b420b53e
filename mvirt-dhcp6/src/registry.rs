//! Registry of per-interface listeners.
//!
//! Holds at most one live listener per interface index and reacts to kernel
//! link events by starting and stopping listeners. Receive tasks never touch
//! the map themselves: they report their exit over a channel and the
//! registry's reaper task removes the entry.

use crate::config::ListenerConfig;
use crate::error::{ListenerError, Result};
use crate::link::{LinkEvent, LinkState};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, error, info, trace, warn};

/// A running per-interface listener.
#[async_trait]
pub trait Endpoint: Send + Sync + 'static {
    /// Link the listener was opened on.
    fn link(&self) -> &LinkState;

    /// Run the receive loop until the socket fails or `close` is called.
    async fn listen(&self) -> Result<()>;

    /// Stop the receive loop. Idempotent.
    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Opens listeners for interface indices.
#[async_trait]
pub trait EndpointFactory: Send + Sync + 'static {
    type Endpoint: Endpoint;

    async fn open(&self, index: u32) -> Result<Arc<Self::Endpoint>>;
}

struct Entry<E> {
    endpoint: Arc<E>,
    /// Distinguishes a replacement from the listener it replaced.
    generation: u64,
}

/// Exit report of a receive task.
struct Exit {
    index: u32,
    generation: u64,
    result: Result<()>,
}

pub struct Registry<F: EndpointFactory> {
    config: Arc<ListenerConfig>,
    factory: F,
    listeners: RwLock<HashMap<u32, Entry<F::Endpoint>>>,
    next_generation: AtomicU64,
    exits: mpsc::UnboundedSender<Exit>,
}

impl<F: EndpointFactory> Registry<F> {
    /// Create a registry and spawn its reaper task.
    pub fn new(config: Arc<ListenerConfig>, factory: F) -> Arc<Self> {
        let (exits, rx) = mpsc::unbounded_channel();
        let registry = Arc::new(Registry {
            config,
            factory,
            listeners: RwLock::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
            exits,
        });
        tokio::spawn(reap_exits(Arc::downgrade(&registry), rx));
        registry
    }

    /// Check whether an interface name matches the acceptance pattern.
    pub fn qualifies(&self, name: &str) -> bool {
        self.config.qualifies(name)
    }

    /// Open a listener for `index` and start its receive task.
    ///
    /// Failures are logged and leave the registry unchanged. If a listener for
    /// `index` is already running nothing is opened; a closed listener still
    /// awaiting removal is replaced.
    pub async fn add(&self, index: u32) {
        // A second SO_REUSEPORT socket on the interface would share its datagrams.
        if let Some(existing) = self.get(index).await {
            if !existing.is_closed() {
                debug!(
                    interface = %existing.link().name,
                    if_index = index,
                    "Listener already running"
                );
                return;
            }
        }

        let endpoint = match self.factory.open(index).await {
            Ok(endpoint) => endpoint,
            Err(e) => {
                error!(if_index = index, error = %e, "Unable to start listener");
                return;
            }
        };
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);

        {
            let mut listeners = self.listeners.write().await;
            if let Some(existing) = listeners.get(&index) {
                if !existing.endpoint.is_closed() {
                    debug!(
                        interface = %existing.endpoint.link().name,
                        if_index = index,
                        "Listener started concurrently, discarding"
                    );
                    endpoint.close();
                    return;
                }
            }
            listeners.insert(
                index,
                Entry {
                    endpoint: Arc::clone(&endpoint),
                    generation,
                },
            );
        }

        info!(
            interface = %endpoint.link().name,
            if_index = index,
            "Listener started"
        );

        let exits = self.exits.clone();
        tokio::spawn(async move {
            let result = endpoint.listen().await;
            let _ = exits.send(Exit {
                index,
                generation,
                result,
            });
        });
    }

    pub async fn exists(&self, index: u32) -> bool {
        self.listeners.read().await.contains_key(&index)
    }

    pub async fn get(&self, index: u32) -> Option<Arc<F::Endpoint>> {
        self.listeners
            .read()
            .await
            .get(&index)
            .map(|entry| Arc::clone(&entry.endpoint))
    }

    pub async fn len(&self) -> usize {
        self.listeners.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.listeners.read().await.is_empty()
    }

    /// Close the listener for `index`.
    ///
    /// The entry is removed once the receive task reports its exit. A missing
    /// index is a no-op.
    pub async fn close(&self, index: u32) {
        match self.get(index).await {
            Some(endpoint) => {
                debug!(interface = %endpoint.link().name, if_index = index, "Closing listener");
                endpoint.close();
            }
            None => trace!(if_index = index, "No listener to close"),
        }
    }

    /// Close every listener.
    pub async fn close_all(&self) {
        let endpoints: Vec<_> = self
            .listeners
            .read()
            .await
            .values()
            .map(|entry| Arc::clone(&entry.endpoint))
            .collect();
        for endpoint in endpoints {
            endpoint.close();
        }
    }

    /// React to a kernel link event.
    pub async fn on_link_event(&self, event: LinkEvent) {
        match event {
            LinkEvent::Changed(link) => {
                if !self.qualifies(&link.name) {
                    trace!(interface = %link.name, "Interface does not match pattern");
                    return;
                }

                let running = self
                    .get(link.index)
                    .await
                    .is_some_and(|endpoint| !endpoint.is_closed());

                match (link.is_ready(), running) {
                    (true, false) => {
                        debug!(interface = %link.name, if_index = link.index, "Interface ready");
                        self.add(link.index).await;
                    }
                    (false, true) => {
                        debug!(
                            interface = %link.name,
                            if_index = link.index,
                            admin_up = link.admin_up,
                            oper_state = link.oper_state,
                            tx_packets = link.tx_packets,
                            "Interface no longer ready"
                        );
                        self.close(link.index).await;
                    }
                    _ => {}
                }
            }
            LinkEvent::Removed { index, name } => {
                if self.exists(index).await {
                    debug!(interface = %name, if_index = index, "Interface removed");
                    self.close(index).await;
                }
            }
        }
    }

    async fn remove_exited(&self, exit: Exit) {
        let removed = {
            let mut listeners = self.listeners.write().await;
            match listeners.get(&exit.index) {
                Some(entry) if entry.generation == exit.generation => {
                    listeners.remove(&exit.index)
                }
                _ => None,
            }
        };

        let Some(entry) = removed else {
            trace!(if_index = exit.index, "Stale listener exit");
            return;
        };

        let name = &entry.endpoint.link().name;
        match exit.result {
            Ok(()) | Err(ListenerError::Closed) => {
                info!(interface = %name, if_index = exit.index, "Listener stopped")
            }
            Err(e) => {
                warn!(interface = %name, if_index = exit.index, error = %e, "Listener failed")
            }
        }
    }
}

async fn reap_exits<F: EndpointFactory>(
    registry: Weak<Registry<F>>,
    mut exits: mpsc::UnboundedReceiver<Exit>,
) {
    while let Some(exit) = exits.recv().await {
        let Some(registry) = registry.upgrade() else {
            return;
        };
        registry.remove_exited(exit).await;
    }
}
