use crate::session::{ConnHandle, ConnId};
use dashmap::DashMap;
use sigrelay_common::ClientId;

/// Concurrent client identifier → connection table.
///
/// Every operation is a single map access; no lock is held across calls.
#[derive(Debug, Default)]
pub struct Registry {
    routes: DashMap<ClientId, ConnHandle>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `client_id` to `handle`, returning any handle it replaced.
    #[must_use]
    pub fn insert(&self, client_id: ClientId, handle: ConnHandle) -> Option<ConnHandle> {
        self.routes.insert(client_id, handle)
    }

    /// Remove the entry for `client_id` only if it still belongs to `conn`.
    ///
    /// Returns `true` if an entry was removed.
    pub fn remove_if(&self, client_id: &str, conn: ConnId) -> bool {
        self.routes
            .remove_if(client_id, |_k, v| v.id() == conn)
            .is_some()
    }

    /// Look up the connection registered under `client_id`.
    #[must_use]
    pub fn get(&self, client_id: &str) -> Option<ConnHandle> {
        self.routes.get(client_id).map(|entry| entry.value().clone())
    }

    /// Snapshot of registered identifiers, in no particular order.
    #[must_use]
    pub fn client_ids(&self) -> Vec<ClientId> {
        self.routes.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Number of registered clients.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Returns `true` if nobody is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
