//! Membership of the relay's single broadcast domain
//!
//! The registry is the only structure mutated by more than one task. It is
//! shared as [`SharedRegistry`]; every add, remove and snapshot takes the lock
//! for the structural change only and never across peer I/O.

use crate::connection::{Connection, ConnectionId};
use log::info;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

pub type SharedRegistry = Arc<RwLock<Registry>>;

/// Connections that completed their handshake and have not been torn down
///
/// Members are keyed by [`ConnectionId`]. Ids are handed out in accept order,
/// so iteration follows registration order and broadcasts visit peers in a
/// stable, repeatable sequence.
#[derive(Debug, Default)]
pub struct Registry {
    members: BTreeMap<ConnectionId, Arc<Connection>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedRegistry {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Registers a connection
    ///
    /// Returns false, leaving the existing entry alone, if the id is already
    /// present. Display names are labels only; duplicates are allowed.
    pub fn add(&mut self, conn: Arc<Connection>) -> bool {
        if self.members.contains_key(&conn.id()) {
            return false;
        }

        info!(
            "{} joined from {} (connection {})",
            conn.label(),
            conn.addr(),
            conn.id()
        );
        self.members.insert(conn.id(), conn);
        true
    }

    /// Removes a connection, returning it if it was still registered
    ///
    /// Removing an absent id is a no-op, so the session's own teardown and an
    /// eviction after a failed write can race without harm.
    pub fn remove(&mut self, id: ConnectionId) -> Option<Arc<Connection>> {
        let removed = self.members.remove(&id);
        if let Some(conn) = &removed {
            info!("{} removed (connection {})", conn.label(), id);
        }
        removed
    }

    /// Point-in-time copy of the membership in registration order
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.members.values().cloned().collect()
    }

    pub fn get(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.members.get(&id).cloned()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.members.contains_key(&id)
    }

    /// Display names in registration order
    pub fn names(&self) -> Vec<String> {
        self.members
            .values()
            .map(|conn| conn.label().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::test_support::pipe_connection;
    use tokio_util::sync::CancellationToken;

    #[test]
    fn test_registry_creation() {
        let registry = Registry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn test_add_connection() {
        let shutdown = CancellationToken::new();
        let (alice, _a) = pipe_connection(1, Some("Alice"), &shutdown);
        let mut registry = Registry::new();

        assert!(registry.add(alice));
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(1));
        assert_eq!(registry.get(1).unwrap().label(), "Alice");
    }

    #[test]
    fn test_add_same_id_twice() {
        let shutdown = CancellationToken::new();
        let (alice, _a) = pipe_connection(1, Some("Alice"), &shutdown);
        let mut registry = Registry::new();

        assert!(registry.add(Arc::clone(&alice)));
        assert!(!registry.add(alice));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_names_allowed() {
        let shutdown = CancellationToken::new();
        let (first, _a) = pipe_connection(1, Some("Sam"), &shutdown);
        let (second, _b) = pipe_connection(2, Some("Sam"), &shutdown);
        let mut registry = Registry::new();

        assert!(registry.add(first));
        assert!(registry.add(second));
        assert_eq!(registry.names(), vec!["Sam", "Sam"]);
    }

    #[test]
    fn test_remove_connection() {
        let shutdown = CancellationToken::new();
        let (alice, _a) = pipe_connection(1, Some("Alice"), &shutdown);
        let mut registry = Registry::new();
        registry.add(alice);

        let removed = registry.remove(1);
        assert_eq!(removed.map(|c| c.id()), Some(1));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let shutdown = CancellationToken::new();
        let (alice, _a) = pipe_connection(1, Some("Alice"), &shutdown);
        let mut registry = Registry::new();
        registry.add(alice);

        assert!(registry.remove(999).is_none());
        assert!(registry.remove(1).is_some());
        assert!(registry.remove(1).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_snapshot_follows_registration_order() {
        let shutdown = CancellationToken::new();
        let (carol, _c) = pipe_connection(3, Some("Carol"), &shutdown);
        let (alice, _a) = pipe_connection(1, Some("Alice"), &shutdown);
        let (bob, _b) = pipe_connection(2, Some("Bob"), &shutdown);
        let mut registry = Registry::new();

        registry.add(alice);
        registry.add(bob);
        registry.add(carol);

        let ids: Vec<ConnectionId> = registry.snapshot().iter().map(|c| c.id()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(registry.names(), vec!["Alice", "Bob", "Carol"]);
    }

    #[test]
    fn test_snapshot_is_detached_copy() {
        let shutdown = CancellationToken::new();
        let (alice, _a) = pipe_connection(1, Some("Alice"), &shutdown);
        let (bob, _b) = pipe_connection(2, Some("Bob"), &shutdown);
        let mut registry = Registry::new();
        registry.add(alice);
        registry.add(bob);

        let snapshot = registry.snapshot();
        registry.remove(2);

        assert_eq!(snapshot.len(), 2);
        assert_eq!(registry.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_add_remove() {
        let shutdown = CancellationToken::new();
        let registry = Registry::shared();
        let mut handles = Vec::new();
        let mut pipes = Vec::new();

        for id in 1..=50 {
            let (conn, pipe) = pipe_connection(id, Some("peer"), &shutdown);
            pipes.push(pipe);
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                registry.write().await.add(conn);
                if id % 2 == 0 {
                    registry.write().await.remove(id);
                }
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        let registry = registry.read().await;
        assert_eq!(registry.len(), 25);
        assert!(registry.snapshot().iter().all(|c| c.id() % 2 == 1));
    }
}
