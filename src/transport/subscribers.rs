//! Subscriber Table & Inbox Dispatcher
//!
//! Shared plumbing for transport implementations. Incoming messages are pushed into
//! an unbounded inbox and a single dispatcher task hands them to the handlers of the
//! matching channel, one message at a time, in arrival order.

use super::types::{MessageHandler, SubscriptionId};

use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A message waiting in an inbox.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub channel: String,
    pub payload: serde_json::Value,
}

/// Handlers installed on one transport endpoint, grouped by channel.
pub struct Subscribers {
    channels: DashMap<String, Vec<(SubscriptionId, MessageHandler)>>,
    next_id: AtomicU64,
}

impl Subscribers {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn subscribe(&self, channel: &str, handler: MessageHandler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));

        self.channels
            .entry(channel.to_string())
            .or_default()
            .push((id, handler));

        tracing::debug!("Subscribed {} to channel '{}'", id, channel);
        id
    }

    pub fn unsubscribe(&self, channel: &str, id: SubscriptionId) -> bool {
        let removed = match self.channels.get_mut(channel) {
            Some(mut handlers) => {
                let before = handlers.len();
                handlers.retain(|(existing, _)| *existing != id);
                handlers.len() != before
            }
            None => false,
        };

        // Drop empty channel entries so the table does not grow with churn.
        self.channels.remove_if(channel, |_, handlers| handlers.is_empty());

        if removed {
            tracing::debug!("Unsubscribed {} from channel '{}'", id, channel);
        }
        removed
    }

    /// Runs every handler of `channel` with `payload` and returns how many ran.
    ///
    /// Handlers are cloned out of the table first, so a handler may subscribe or
    /// unsubscribe without deadlocking on the shard lock.
    pub fn dispatch(&self, channel: &str, payload: serde_json::Value) -> usize {
        let handlers: Vec<MessageHandler> = match self.channels.get(channel) {
            Some(entry) => entry.iter().map(|(_, handler)| handler.clone()).collect(),
            None => return 0,
        };

        for handler in &handlers {
            handler(payload.clone());
        }

        handlers.len()
    }

    pub fn subscription_count(&self) -> usize {
        self.channels.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn has_subscribers(&self, channel: &str) -> bool {
        self.channels
            .get(channel)
            .is_some_and(|handlers| !handlers.is_empty())
    }
}

impl Default for Subscribers {
    fn default() -> Self {
        Self {
            channels: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }
}

/// Spawns the dispatcher task draining an inbox into `subscribers`.
///
/// The task ends once every sender of the returned inbox is dropped.
pub fn spawn_dispatcher(
    subscribers: Arc<Subscribers>,
) -> (mpsc::UnboundedSender<Delivery>, JoinHandle<()>) {
    let (inbox, mut rx) = mpsc::unbounded_channel::<Delivery>();

    let handle = tokio::spawn(async move {
        while let Some(delivery) = rx.recv().await {
            let delivered = subscribers.dispatch(&delivery.channel, delivery.payload);
            tracing::trace!(
                "Dispatched message on '{}' to {} handler(s)",
                delivery.channel,
                delivered
            );
        }
    });

    (inbox, handle)
}
