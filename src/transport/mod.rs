//! Pub/Sub Transport Module
//!
//! Named-channel publish/subscribe used by the membership protocol to reach every
//! other node in the cluster. Delivery is best-effort: a published message may be
//! lost, duplicated, or reordered relative to messages from other nodes.
//!
//! ## Implementations
//! - **`local`**: In-process bus. Every connected endpoint receives every publish,
//!   including its own. Endpoints can be severed to simulate a crashed process.
//! - **`udp`**: Fan-out over UDP. Each publish becomes one datagram per known peer
//!   and is looped back to local subscribers.
//!
//! Both implementations share the subscriber table and the inbox dispatcher from
//! **`subscribers`**, so handlers always run on a dispatcher task and never on the
//! publisher's stack.

pub mod local;
pub mod subscribers;
pub mod types;
pub mod udp;

pub use local::{LocalBus, LocalTransport};
pub use types::{MessageHandler, SubscriptionId, Transport};
pub use udp::UdpTransport;
