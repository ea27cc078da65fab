use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Callback invoked with the JSON payload of every message delivered on a channel.
pub type MessageHandler = Arc<dyn Fn(serde_json::Value) + Send + Sync>;

/// Identity of one installed handler.
///
/// Returned by [`Transport::subscribe`] and required by [`Transport::unsubscribe`],
/// so an owner can remove exactly the handlers it installed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// A named-channel publish/subscribe primitive.
///
/// Implementations must keep `publish` fire-and-forget: it queues the message and
/// returns, and it must never run handlers synchronously on the caller's stack.
/// Callers rely on this to publish while holding their own locks.
pub trait Transport: Send + Sync {
    /// Queues `payload` for delivery to every subscriber of `channel` in the cluster.
    fn publish(&self, channel: &str, payload: serde_json::Value) -> Result<()>;

    /// Installs `handler` for `channel` and returns its identity.
    fn subscribe(&self, channel: &str, handler: MessageHandler) -> Result<SubscriptionId>;

    /// Removes a previously installed handler.
    ///
    /// Returns `Ok(false)` if `id` is not (or no longer) registered on `channel`.
    fn unsubscribe(&self, channel: &str, id: SubscriptionId) -> Result<bool>;
}
