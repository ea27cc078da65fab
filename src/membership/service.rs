use super::protocol::{
    self, CHANNEL_DEPARTURE_ANNOUNCE, CHANNEL_DISCOVERY_REQUEST, CHANNEL_LIVENESS_ANNOUNCE,
};
use super::registry::{Registry, Upsert};
use super::types::{ClusterSettings, DiscoveryRequest, ServerConfig};
use crate::transport::{MessageHandler, SubscriptionId, Transport};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior};

/// Everything the protocol mutates. Guarded by a single lock so that a registry
/// change and the matching timer cancel/arm happen as one step.
struct MembershipState {
    registry: Registry,
    heartbeat: Option<JoinHandle<()>>,
    subscriptions: Vec<(&'static str, SubscriptionId)>,
    closed: bool,
}

/// One node's participation in the cluster membership protocol.
///
/// Created with [`ClusterMembership::start`], which joins the cluster right away.
/// Call [`ClusterMembership::close`] before the process exits so that peers drop
/// this node immediately instead of waiting out their `heartbeat_in` timeout.
pub struct ClusterMembership {
    local: ServerConfig,
    settings: ClusterSettings,
    transport: Arc<dyn Transport>,
    state: Mutex<MembershipState>,
    this: Weak<Self>,
}

impl ClusterMembership {
    /// Joins the cluster reachable through `transport`.
    ///
    /// Inserts the local entry, asks every node to announce itself, announces this
    /// node and starts the self-heartbeat. Must be called inside a Tokio runtime.
    pub fn start(
        local: ServerConfig,
        settings: ClusterSettings,
        transport: Arc<dyn Transport>,
    ) -> Result<Arc<Self>> {
        if !settings.is_consistent() {
            tracing::warn!(
                "heartbeat_in ({:?}) should exceed heartbeat_out ({:?}); healthy peers may be evicted",
                settings.heartbeat_in,
                settings.heartbeat_out
            );
        }

        let membership = Arc::new_cyclic(|this| Self {
            state: Mutex::new(MembershipState {
                registry: Registry::new(local.clone()),
                heartbeat: None,
                subscriptions: Vec::new(),
                closed: false,
            }),
            local,
            settings,
            transport,
            this: this.clone(),
        });

        tracing::info!(
            "Starting cluster membership as '{}' (heartbeat out {:?}, in {:?})",
            membership.local.server_name,
            settings.heartbeat_out,
            settings.heartbeat_in
        );

        if let Err(e) = membership.join() {
            membership.shut_down();
            return Err(e);
        }

        Ok(membership)
    }

    fn join(&self) -> Result<()> {
        self.subscribe(CHANNEL_DISCOVERY_REQUEST, Self::on_discovery_payload)?;
        self.publish(
            CHANNEL_DISCOVERY_REQUEST,
            &DiscoveryRequest {
                server_name: self.local.server_name.clone(),
            },
        );

        self.subscribe(CHANNEL_LIVENESS_ANNOUNCE, Self::on_liveness_payload)?;
        self.subscribe(CHANNEL_DEPARTURE_ANNOUNCE, Self::on_departure_payload)?;
        self.announce();

        let heartbeat = self.spawn_heartbeat();
        let mut state = self.state.lock();
        if state.closed {
            heartbeat.abort();
        } else {
            state.heartbeat = Some(heartbeat);
        }

        Ok(())
    }

    // --- Accessors ---

    pub fn local_config(&self) -> &ServerConfig {
        &self.local
    }

    pub fn settings(&self) -> ClusterSettings {
        self.settings
    }

    /// Owned copy of the current local view, `server_name -> ServerConfig`.
    pub fn snapshot(&self) -> BTreeMap<String, ServerConfig> {
        self.state.lock().registry.snapshot()
    }

    pub fn contains(&self, server_name: &str) -> bool {
        self.state.lock().registry.contains(server_name)
    }

    pub fn member_count(&self) -> usize {
        self.state.lock().registry.len()
    }

    pub fn pending_evictions(&self) -> usize {
        self.state.lock().registry.pending_timers()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    // --- Protocol handlers ---

    /// Answers a discovery request with an immediate liveness announcement.
    ///
    /// Our own request echoed back by the transport is ignored: the initial
    /// announcement right after it already covers it.
    pub fn on_discovery_request(&self, requester: &str) {
        if requester == self.local.server_name {
            tracing::debug!("Ignoring echo of own discovery request");
            return;
        }

        tracing::debug!("Answering discovery request from '{}'", requester);
        self.announce();
    }

    /// Records a peer as alive and restarts its eviction timer.
    pub fn on_liveness_announce(&self, peer: ServerConfig) {
        if peer.server_name == self.local.server_name {
            tracing::trace!("Ignoring echo of own liveness announcement");
            return;
        }

        let mut state = self.state.lock();
        if state.closed {
            return;
        }

        let server_name = peer.server_name.clone();
        match state.registry.upsert(peer) {
            Some(Upsert::Joined) => tracing::info!(
                "Server '{}' joined the cluster ({} known)",
                server_name,
                state.registry.len()
            ),
            Some(Upsert::Replaced) => {
                tracing::info!("Server '{}' re-announced with new addresses", server_name)
            }
            Some(Upsert::Refreshed) => tracing::debug!("Server '{}' is alive", server_name),
            None => return,
        }

        let generation = state.registry.next_generation();
        let timer = self.spawn_eviction_timer(server_name.clone(), generation);
        state.registry.arm_timer(&server_name, generation, timer);
    }

    /// Removes a peer that left gracefully.
    pub fn on_departure_announce(&self, server_name: &str) {
        if server_name == self.local.server_name {
            tracing::trace!("Ignoring echo of own departure announcement");
            return;
        }

        let mut state = self.state.lock();
        if state.closed {
            return;
        }

        match state.registry.remove(server_name) {
            Some(_) => tracing::info!(
                "Server '{}' left the cluster ({} known)",
                server_name,
                state.registry.len()
            ),
            None => tracing::debug!("Departure of unknown server '{}'", server_name),
        }
    }

    /// Evicts a silent peer, unless the timer was superseded in the meantime.
    pub fn on_eviction_timeout(&self, server_name: &str, generation: u64) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }

        match state.registry.expire(server_name, generation) {
            Some(_) => tracing::warn!(
                "Evicted server '{}' after {:?} without a liveness announcement",
                server_name,
                self.settings.heartbeat_in
            ),
            None => tracing::trace!("Stale eviction timer for '{}' ignored", server_name),
        }
    }

    /// Publishes one periodic liveness announcement.
    ///
    /// Returns `false` once the membership is closed, which stops the heartbeat.
    pub(crate) fn self_heartbeat(&self) -> bool {
        tracing::trace!("Heartbeat for '{}'", self.local.server_name);
        self.announce()
    }

    // --- Lifecycle ---

    /// Leaves the cluster gracefully.
    ///
    /// Stops the heartbeat, cancels every eviction timer and removes the installed
    /// handlers before publishing the departure, so no liveness announcement can
    /// follow it. Calling it again is a no-op.
    pub fn close(&self) -> Result<()> {
        if !self.shut_down() {
            tracing::debug!("Cluster membership already closed");
            return Ok(());
        }

        protocol::encode(&self.local)
            .and_then(|payload| self.transport.publish(CHANNEL_DEPARTURE_ANNOUNCE, payload))
            .context("Failed to publish departure announcement")?;

        tracing::info!("Server '{}' left the cluster", self.local.server_name);
        Ok(())
    }

    /// Marks the membership closed and releases its timers and subscriptions.
    ///
    /// Returns `false` if it was already closed.
    fn shut_down(&self) -> bool {
        let subscriptions = {
            let mut state = self.state.lock();
            if state.closed {
                return false;
            }
            state.closed = true;

            if let Some(heartbeat) = state.heartbeat.take() {
                heartbeat.abort();
            }

            let cancelled = state.registry.cancel_all_timers();
            tracing::debug!("Cancelled {} eviction timer(s)", cancelled);

            std::mem::take(&mut state.subscriptions)
        };

        for (channel, id) in subscriptions {
            match self.transport.unsubscribe(channel, id) {
                Ok(true) => {}
                Ok(false) => tracing::debug!("Subscription {} on '{}' already gone", id, channel),
                Err(e) => tracing::warn!("Failed to unsubscribe {} from '{}': {:#}", id, channel, e),
            }
        }

        true
    }

    // --- Internals ---

    fn on_discovery_payload(&self, payload: Value) {
        match protocol::decode_discovery(payload) {
            Ok(request) => self.on_discovery_request(&request.server_name),
            Err(e) => tracing::warn!("Dropping discovery request: {:#}", e),
        }
    }

    fn on_liveness_payload(&self, payload: Value) {
        match protocol::decode_liveness(payload) {
            Ok(peer) => self.on_liveness_announce(peer),
            Err(e) => tracing::warn!("Dropping liveness announcement: {:#}", e),
        }
    }

    fn on_departure_payload(&self, payload: Value) {
        match protocol::decode_departure(payload) {
            Ok(notice) => self.on_departure_announce(&notice.server_name),
            Err(e) => tracing::warn!("Dropping departure announcement: {:#}", e),
        }
    }

    fn subscribe(&self, channel: &'static str, on_message: fn(&Self, Value)) -> Result<()> {
        let this = self.this.clone();
        let handler: MessageHandler = Arc::new(move |payload| {
            if let Some(membership) = this.upgrade() {
                on_message(&membership, payload);
            }
        });

        let id = self
            .transport
            .subscribe(channel, handler)
            .with_context(|| format!("Failed to subscribe to '{}'", channel))?;

        self.state.lock().subscriptions.push((channel, id));
        Ok(())
    }

    /// Publishes our own liveness announcement unless closed.
    ///
    /// The closed check and the publish happen under the state lock, so nothing
    /// announced here can overtake the departure published by `close`.
    fn announce(&self) -> bool {
        let state = self.state.lock();
        if state.closed {
            return false;
        }

        self.publish(CHANNEL_LIVENESS_ANNOUNCE, &self.local);
        true
    }

    fn publish<T: Serialize>(&self, channel: &str, message: &T) {
        let result =
            protocol::encode(message).and_then(|payload| self.transport.publish(channel, payload));

        // The next heartbeat resends, so failures are only logged.
        if let Err(e) = result {
            tracing::warn!("Failed to publish on '{}': {:#}", channel, e);
        }
    }

    fn spawn_heartbeat(&self) -> JoinHandle<()> {
        let this = self.this.clone();
        let period = self.settings.heartbeat_out.max(Duration::from_millis(1));

        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                interval.tick().await;

                let Some(membership) = this.upgrade() else {
                    break;
                };
                if !membership.self_heartbeat() {
                    break;
                }
            }
        })
    }

    fn spawn_eviction_timer(&self, server_name: String, generation: u64) -> AbortHandle {
        let this = self.this.clone();
        let timeout = self.settings.heartbeat_in;

        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;

            if let Some(membership) = this.upgrade() {
                membership.on_eviction_timeout(&server_name, generation);
            }
        })
        .abort_handle()
    }
}

impl Drop for ClusterMembership {
    fn drop(&mut self) {
        // Dropped without close: stop local work, peers will time us out.
        self.shut_down();
    }
}
