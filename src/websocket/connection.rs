//! Writer cache
//!
//! Maps `(role, name)` to the writer of the connection currently holding
//! that registration. Uses DashMap for concurrent access from every
//! connection task.

use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::writer::{PeerWriter, SinkError};
use crate::core_types::{ConnectionId, PeerName, Role};

/// One live writer per `(role, name)`
pub struct WriterCache {
    writers: DashMap<(Role, PeerName), Arc<PeerWriter>>,
    /// Per-name registration locks; directory write and cache write happen
    /// under the same guard
    registrations: DashMap<(Role, PeerName), Arc<Mutex<()>>>,
    /// Next connection ID
    next_conn_id: AtomicU64,
}

impl WriterCache {
    pub fn new() -> Self {
        Self {
            writers: DashMap::new(),
            registrations: DashMap::new(),
            next_conn_id: AtomicU64::new(1),
        }
    }

    /// Allocate an id for a newly accepted connection
    pub fn next_connection_id(&self) -> ConnectionId {
        self.next_conn_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Serialize registrations of `(role, name)`
    ///
    /// Held across the directory upsert and `set`, so the stored entry and
    /// the cached writer always come from the same registration.
    pub async fn lock_registration(&self, role: Role, name: &PeerName) -> OwnedMutexGuard<()> {
        let lock = self
            .registrations
            .entry((role, name.clone()))
            .or_default()
            .clone();
        lock.lock_owned().await
    }

    /// Install `writer` for `(role, name)`
    ///
    /// The new writer is in place before the previous one is closed, so the
    /// name never goes without a writer. A close error is returned but the
    /// new writer stays installed. Re-installing from the same connection
    /// never closes it.
    pub async fn set(
        &self,
        role: Role,
        name: &PeerName,
        writer: Arc<PeerWriter>,
        close_old: bool,
    ) -> Result<(), SinkError> {
        let new_conn = writer.conn_id();
        let previous = self.writers.insert((role, name.clone()), writer);

        match previous {
            Some(old) if close_old && old.conn_id() != new_conn => {
                tracing::info!(
                    %role,
                    name = %name,
                    old_conn = old.conn_id(),
                    new_conn,
                    "Replacing connection for registration"
                );
                old.close().await
            }
            _ => Ok(()),
        }
    }

    pub fn get(&self, role: Role, name: &PeerName) -> Option<Arc<PeerWriter>> {
        self.writers
            .get(&(role, name.clone()))
            .map(|entry| entry.value().clone())
    }

    pub fn remove(&self, role: Role, name: &PeerName) -> Option<Arc<PeerWriter>> {
        self.writers
            .remove(&(role, name.clone()))
            .map(|(_, writer)| writer)
    }

    /// Drop every entry still pointing at `conn_id`
    ///
    /// Entries already taken over by another connection are left alone.
    /// Returns the number of entries removed.
    pub fn remove_connection(&self, conn_id: ConnectionId) -> usize {
        let before = self.writers.len();
        self.writers
            .retain(|_, writer| writer.conn_id() != conn_id);
        let removed = before.saturating_sub(self.writers.len());
        if removed > 0 {
            tracing::info!(conn_id, removed, "Connection writers removed");
        }
        removed
    }

    /// Number of cached writers
    pub fn len(&self) -> usize {
        self.writers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writers.is_empty()
    }
}

impl Default for WriterCache {
    fn default() -> Self {
        Self::new()
    }
}
