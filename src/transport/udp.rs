//! UDP Fan-Out Transport
//!
//! Gives every node the same view of the channels without a broker: a publish is
//! encoded once and sent as one datagram to each known peer, and it is also looped
//! back to the local subscribers (peers observe the same echo behavior as a broker
//! would give them).
//!
//! The peer list grows on its own: the sender of every valid datagram becomes a
//! peer, so a node started without peers still reaches the nodes that found it.
//!
//! ## Wire Format
//! Each datagram is a bincode-encoded [`Envelope`]. The payload itself stays JSON so
//! that channel payloads keep their field names on the wire.

use super::subscribers::{Delivery, Subscribers, spawn_dispatcher};
use super::types::{MessageHandler, SubscriptionId, Transport};

use anyhow::{Context, Result};
use dashmap::DashSet;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Largest datagram the receive loop accepts.
const MAX_DATAGRAM_SIZE: usize = 65_536;

/// One published message as carried in a datagram.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub channel: String,
    pub payload_json: String,
}

impl Envelope {
    pub fn encode(channel: &str, payload: &serde_json::Value) -> Result<Vec<u8>> {
        let envelope = Envelope {
            channel: channel.to_string(),
            payload_json: serde_json::to_string(payload)?,
        };

        Ok(bincode::serialize(&envelope)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Delivery> {
        let envelope: Envelope =
            bincode::deserialize(bytes).context("Invalid envelope encoding")?;
        let payload = serde_json::from_str(&envelope.payload_json)
            .with_context(|| format!("Invalid JSON payload on '{}'", envelope.channel))?;

        Ok(Delivery {
            channel: envelope.channel,
            payload,
        })
    }
}

pub struct UdpTransport {
    local_addr: SocketAddr,
    peers: Arc<DashSet<SocketAddr>>,
    subscribers: Arc<Subscribers>,
    inbox: mpsc::UnboundedSender<Delivery>,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl UdpTransport {
    /// Binds the socket and starts the receive, send and dispatch tasks.
    pub async fn bind(bind_addr: SocketAddr) -> Result<Arc<Self>> {
        let socket = UdpSocket::bind(bind_addr)
            .await
            .with_context(|| format!("Failed to bind UDP transport on {}", bind_addr))?;
        let local_addr = socket.local_addr()?;
        let socket = Arc::new(socket);

        let peers = Arc::new(DashSet::new());
        let subscribers = Subscribers::new();
        let (inbox, dispatcher) = spawn_dispatcher(subscribers.clone());
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        let receiver = tokio::spawn(receive_loop(
            socket.clone(),
            local_addr,
            peers.clone(),
            inbox.clone(),
        ));
        let sender = tokio::spawn(send_loop(
            socket,
            local_addr,
            peers.clone(),
            outbound_rx,
        ));

        tracing::info!("UDP transport listening on {}", local_addr);

        Ok(Arc::new(Self {
            local_addr,
            peers,
            subscribers,
            inbox,
            outbound,
            tasks: Mutex::new(vec![dispatcher, receiver, sender]),
            shut_down: AtomicBool::new(false),
        }))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn add_peer(&self, addr: SocketAddr) -> bool {
        let added = self.peers.insert(addr);
        if added {
            tracing::info!("Added transport peer {}", addr);
        }
        added
    }

    pub fn remove_peer(&self, addr: &SocketAddr) -> bool {
        self.peers.remove(addr).is_some()
    }

    pub fn peers(&self) -> Vec<SocketAddr> {
        self.peers.iter().map(|addr| *addr).collect()
    }

    /// Stops all background tasks. Queued datagrams that were not sent yet are lost.
    pub fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        let tasks = std::mem::take(&mut *self.tasks.lock());
        if tasks.is_empty() {
            return;
        }

        for task in tasks {
            task.abort();
        }
        tracing::info!("UDP transport on {} shut down", self.local_addr);
    }
}

impl Transport for UdpTransport {
    fn publish(&self, channel: &str, payload: serde_json::Value) -> Result<()> {
        if self.shut_down.load(Ordering::SeqCst) {
            anyhow::bail!("UDP transport on {} is shut down", self.local_addr);
        }

        let encoded = Envelope::encode(channel, &payload)?;

        self.outbound
            .send(encoded)
            .map_err(|_| anyhow::anyhow!("UDP transport on {} is shut down", self.local_addr))?;

        // Local loopback, mirrors a broker echoing to its own publisher.
        let _ = self.inbox.send(Delivery {
            channel: channel.to_string(),
            payload,
        });

        Ok(())
    }

    fn subscribe(&self, channel: &str, handler: MessageHandler) -> Result<SubscriptionId> {
        Ok(self.subscribers.subscribe(channel, handler))
    }

    fn unsubscribe(&self, channel: &str, id: SubscriptionId) -> Result<bool> {
        Ok(self.subscribers.unsubscribe(channel, id))
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}

async fn receive_loop(
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    peers: Arc<DashSet<SocketAddr>>,
    inbox: mpsc::UnboundedSender<Delivery>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, src)) => match Envelope::decode(&buf[..len]) {
                Ok(delivery) => {
                    tracing::trace!("Received '{}' from {}", delivery.channel, src);
                    if src != local_addr && peers.insert(src) {
                        tracing::info!("Learned transport peer {}", src);
                    }
                    if inbox.send(delivery).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!("Dropping datagram from {}: {:#}", src, e);
                }
            },
            Err(e) => {
                tracing::error!("Failed to receive UDP packet: {}", e);
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

async fn send_loop(
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    peers: Arc<DashSet<SocketAddr>>,
    mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
) {
    while let Some(datagram) = outbound.recv().await {
        let targets: Vec<SocketAddr> = peers
            .iter()
            .map(|addr| *addr)
            .filter(|addr| *addr != local_addr)
            .collect();

        for target in targets {
            if let Err(e) = socket.send_to(&datagram, target).await {
                tracing::warn!("Failed to send datagram to {}: {}", target, e);
            }
        }
    }
}
