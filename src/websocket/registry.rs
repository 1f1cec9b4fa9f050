use std::collections::hash_map::Entry;
use std::collections::HashMap;
use bytes::Bytes;
use tracing::{debug, info};

use super::client::{ClientHandle, ClientId, EnqueueOutcome};

/// Live clients, keyed by identity.
///
/// Owned by the hub's coordination loop, which is its only mutator, so no
/// locking happens here.
#[derive(Debug, Default)]
pub struct Registry {
    clients: HashMap<ClientId, ClientHandle>,
}

/// What happened to one broadcast pass.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub full: Vec<ClientId>,
    pub closed: Vec<ClientId>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false, leaving the registry untouched, if the id is already live.
    pub fn add(&mut self, client: ClientHandle) -> bool {
        match self.clients.entry(client.id()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                info!("Added client {} ({}) to registry", client.id(), client.peer());
                slot.insert(client);
                true
            }
        }
    }

    pub fn remove(&mut self, id: &ClientId) -> Option<ClientHandle> {
        let removed = self.clients.remove(id);
        if let Some(client) = &removed {
            info!("Removed client {} ({}) from registry", id, client.peer());
        }
        removed
    }

    pub fn contains(&self, id: &ClientId) -> bool {
        self.clients.contains_key(id)
    }

    /// Enqueues `frame` on every client except `exclude_id`.
    ///
    /// Clients whose queue is full or gone are listed in the report; deciding
    /// what to do with them is up to the caller.
    pub fn broadcast(&self, frame: &Bytes, exclude_id: Option<ClientId>) -> BroadcastReport {
        let mut report = BroadcastReport::default();

        for (id, client) in self.clients.iter() {
            if Some(*id) == exclude_id {
                continue;
            }

            match client.enqueue(frame.clone()) {
                EnqueueOutcome::Queued => report.delivered += 1,
                EnqueueOutcome::Full => report.full.push(*id),
                EnqueueOutcome::Closed => report.closed.push(*id),
            }
        }

        debug!(
            "Broadcast {} bytes to {} clients ({} full, {} closed)",
            frame.len(),
            report.delivered,
            report.full.len(),
            report.closed.len()
        );
        report
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn ids(&self) -> Vec<ClientId> {
        self.clients.keys().copied().collect()
    }

    /// Drops every handle, which closes every client's queue.
    pub fn clear(&mut self) -> usize {
        let count = self.clients.len();
        self.clients.clear();
        count
    }
}
