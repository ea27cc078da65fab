//! In-Process Transport
//!
//! A broker living entirely in memory. Several nodes sharing one `LocalBus` form a
//! cluster inside a single process, which is how the membership protocol is
//! exercised in tests. A severed endpoint behaves like a killed process: nothing it
//! publishes leaves, and nothing published by others reaches it.

use super::subscribers::{Delivery, Subscribers, spawn_dispatcher};
use super::types::{MessageHandler, SubscriptionId, Transport};

use anyhow::Result;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Shared broker connecting in-process endpoints.
#[derive(Clone, Default)]
pub struct LocalBus {
    endpoints: Arc<DashMap<u64, Weak<LocalTransport>>>,
    next_id: Arc<AtomicU64>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new endpoint attached to this bus.
    ///
    /// Must be called inside a Tokio runtime: the endpoint's dispatcher is spawned here.
    pub fn connect(&self) -> Arc<LocalTransport> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let subscribers = Subscribers::new();
        let (inbox, dispatcher) = spawn_dispatcher(subscribers.clone());

        let endpoint = Arc::new(LocalTransport {
            id,
            bus: self.clone(),
            subscribers,
            inbox,
            dispatcher,
            severed: AtomicBool::new(false),
        });

        self.endpoints.insert(id, Arc::downgrade(&endpoint));
        tracing::debug!("Endpoint {} connected to local bus", id);

        endpoint
    }

    /// Number of endpoints still attached.
    pub fn endpoint_count(&self) -> usize {
        self.endpoints
            .iter()
            .filter(|entry| entry.value().strong_count() > 0)
            .count()
    }

    fn live_endpoints(&self) -> Vec<Arc<LocalTransport>> {
        self.endpoints
            .iter()
            .filter_map(|entry| entry.value().upgrade())
            .collect()
    }
}

/// One node's connection to a [`LocalBus`].
pub struct LocalTransport {
    id: u64,
    bus: LocalBus,
    subscribers: Arc<Subscribers>,
    inbox: mpsc::UnboundedSender<Delivery>,
    dispatcher: JoinHandle<()>,
    severed: AtomicBool,
}

impl LocalTransport {
    /// Cuts the endpoint off from the bus in both directions.
    pub fn sever(&self) {
        if !self.severed.swap(true, Ordering::SeqCst) {
            tracing::info!("Endpoint {} severed from local bus", self.id);
        }
    }

    /// Reattaches a severed endpoint. Messages dropped while severed are not replayed.
    pub fn restore(&self) {
        if self.severed.swap(false, Ordering::SeqCst) {
            tracing::info!("Endpoint {} restored on local bus", self.id);
        }
    }

    pub fn is_severed(&self) -> bool {
        self.severed.load(Ordering::SeqCst)
    }

    pub fn subscription_count(&self) -> usize {
        self.subscribers.subscription_count()
    }

    fn deliver(&self, channel: &str, payload: serde_json::Value) {
        if self.is_severed() {
            tracing::trace!("Endpoint {} severed, dropping inbound '{}'", self.id, channel);
            return;
        }

        let delivery = Delivery {
            channel: channel.to_string(),
            payload,
        };

        if self.inbox.send(delivery).is_err() {
            tracing::debug!("Endpoint {} dispatcher stopped, dropping '{}'", self.id, channel);
        }
    }
}

impl Transport for LocalTransport {
    fn publish(&self, channel: &str, payload: serde_json::Value) -> Result<()> {
        if self.is_severed() {
            tracing::trace!("Endpoint {} severed, dropping outbound '{}'", self.id, channel);
            return Ok(());
        }

        for endpoint in self.bus.live_endpoints() {
            endpoint.deliver(channel, payload.clone());
        }

        Ok(())
    }

    fn subscribe(&self, channel: &str, handler: MessageHandler) -> Result<SubscriptionId> {
        Ok(self.subscribers.subscribe(channel, handler))
    }

    fn unsubscribe(&self, channel: &str, id: SubscriptionId) -> Result<bool> {
        Ok(self.subscribers.unsubscribe(channel, id))
    }
}

impl Drop for LocalTransport {
    fn drop(&mut self) {
        self.dispatcher.abort();
        self.bus.endpoints.remove(&self.id);
    }
}
