//! Membership Registry
//!
//! The node-local view of the cluster: every known `ServerConfig` keyed by server
//! name, plus the eviction timer of each peer.
//!
//! ## Invariants
//! - The local entry is inserted at construction and never replaced or removed.
//! - At most one eviction timer exists per peer; arming a new one aborts the old one.
//! - No timer ever exists for the local entry.
//! - Every timer carries a generation. Only the timer holding the current generation
//!   for a peer may evict it, so a timer that already woke up before being replaced
//!   cannot remove a refreshed entry.

use super::types::ServerConfig;

use std::collections::{BTreeMap, HashMap};
use tokio::task::AbortHandle;

/// What a liveness announcement did to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    /// The peer was unknown.
    Joined,
    /// The peer was known with an identical descriptor.
    Refreshed,
    /// The peer was known with different addresses; the new descriptor won.
    Replaced,
}

struct EvictionTimer {
    generation: u64,
    handle: AbortHandle,
}

pub struct Registry {
    local_name: String,
    servers: HashMap<String, ServerConfig>,
    timeouts: HashMap<String, EvictionTimer>,
    next_generation: u64,
}

impl Registry {
    pub fn new(local: ServerConfig) -> Self {
        let local_name = local.server_name.clone();
        let mut servers = HashMap::new();
        servers.insert(local_name.clone(), local);

        Self {
            local_name,
            servers,
            timeouts: HashMap::new(),
            next_generation: 1,
        }
    }

    pub fn local_name(&self) -> &str {
        &self.local_name
    }

    pub fn is_local(&self, server_name: &str) -> bool {
        self.local_name == server_name
    }

    /// Inserts or overwrites a peer (last write wins).
    ///
    /// Returns `None` and leaves the registry untouched for the local name.
    pub fn upsert(&mut self, config: ServerConfig) -> Option<Upsert> {
        if self.is_local(&config.server_name) {
            return None;
        }

        let outcome = match self.servers.get(&config.server_name) {
            None => Upsert::Joined,
            Some(existing) if *existing == config => Upsert::Refreshed,
            Some(_) => Upsert::Replaced,
        };

        self.servers.insert(config.server_name.clone(), config);
        Some(outcome)
    }

    /// Hands out the generation for the next timer to be armed.
    pub fn next_generation(&mut self) -> u64 {
        let generation = self.next_generation;
        self.next_generation += 1;
        generation
    }

    /// Installs the eviction timer of a peer, aborting the previous one first.
    ///
    /// A timer offered for the local name or for an unknown peer is aborted at once.
    pub fn arm_timer(&mut self, server_name: &str, generation: u64, handle: AbortHandle) {
        if self.is_local(server_name) || !self.servers.contains_key(server_name) {
            handle.abort();
            return;
        }

        self.cancel_timer(server_name);
        self.timeouts
            .insert(server_name.to_string(), EvictionTimer { generation, handle });
    }

    pub fn cancel_timer(&mut self, server_name: &str) -> bool {
        match self.timeouts.remove(server_name) {
            Some(timer) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Removes a peer and cancels its timer. The local entry cannot be removed.
    pub fn remove(&mut self, server_name: &str) -> Option<ServerConfig> {
        if self.is_local(server_name) {
            return None;
        }

        self.cancel_timer(server_name);
        self.servers.remove(server_name)
    }

    /// Evicts a peer on behalf of the timer with `generation`.
    ///
    /// Does nothing unless that timer is still the current one for the peer.
    pub fn expire(&mut self, server_name: &str, generation: u64) -> Option<ServerConfig> {
        match self.timeouts.get(server_name) {
            Some(timer) if timer.generation == generation => {}
            _ => return None,
        }

        self.timeouts.remove(server_name);
        self.servers.remove(server_name)
    }

    /// Aborts every pending eviction timer and returns how many there were.
    pub fn cancel_all_timers(&mut self) -> usize {
        let count = self.timeouts.len();
        for (_, timer) in self.timeouts.drain() {
            timer.handle.abort();
        }
        count
    }

    pub fn has_timer(&self, server_name: &str) -> bool {
        self.timeouts.contains_key(server_name)
    }

    pub fn pending_timers(&self) -> usize {
        self.timeouts.len()
    }

    pub fn get(&self, server_name: &str) -> Option<&ServerConfig> {
        self.servers.get(server_name)
    }

    pub fn contains(&self, server_name: &str) -> bool {
        self.servers.contains_key(server_name)
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Owned, sorted copy of every known server.
    pub fn snapshot(&self) -> BTreeMap<String, ServerConfig> {
        self.servers
            .iter()
            .map(|(name, config)| (name.clone(), config.clone()))
            .collect()
    }
}
