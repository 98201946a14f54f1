use dashmap::{mapref::entry::Entry, DashMap};
use std::sync::Arc;
use thankswall_core::ConnId;
use tracing::{debug, info, warn};

use crate::ws::connection::{CloseReason, ConnState, Connection};

/// Authoritative set of open subscriber connections.
///
/// All mutation goes through [`register`](Self::register) and
/// [`unregister`](Self::unregister); fan-out iterates a [`snapshot`](Self::snapshot),
/// never the live map, so no shard lock is held across a socket write.
#[derive(Default)]
pub struct ConnectionRegistry {
    conns: DashMap<ConnId, Arc<Connection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an open connection. Returns false (and changes nothing) when the
    /// id is already present or the connection is not `Open`.
    pub fn register(&self, conn: Arc<Connection>) -> bool {
        if conn.state() != ConnState::Open {
            warn!(conn_id = %conn.id(), state = ?conn.state(), "refusing to register non-open connection");
            return false;
        }
        match self.conns.entry(conn.id().clone()) {
            Entry::Occupied(_) => {
                debug!(conn_id = %conn.id(), "connection already registered");
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(conn);
                true
            }
        }
    }

    /// Remove a connection if present. Absent ids are a no-op.
    pub fn unregister(&self, id: &ConnId) -> Option<Arc<Connection>> {
        self.conns.remove(id).map(|(_, conn)| conn)
    }

    /// Unregister and mark closed. Both the connection's own teardown and a
    /// failed broadcast write land here; only the first caller does any work.
    /// Returns true for that first caller.
    pub fn release(&self, conn: &Connection, reason: CloseReason) -> bool {
        self.unregister(conn.id());
        let first = conn.mark_closed();
        if first {
            info!(conn_id = %conn.id(), reason = %reason, remaining = self.len(), "subscriber released");
        }
        first
    }

    /// Point-in-time copy of the membership.
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.conns.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    /// Release every connection (server shutdown).
    pub fn release_all(&self, reason: CloseReason) -> usize {
        self.snapshot()
            .iter()
            .filter(|conn| self.release(conn, reason))
            .count()
    }

    pub fn contains(&self, id: &ConnId) -> bool {
        self.conns.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::send::testing::RecordingSink;

    fn open_conn() -> Arc<Connection> {
        let conn = Connection::new(Arc::new(RecordingSink::default()));
        assert!(conn.mark_open());
        conn
    }

    #[test]
    fn register_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let conn = open_conn();
        assert!(registry.register(Arc::clone(&conn)));
        assert!(!registry.register(Arc::clone(&conn)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn connecting_connection_is_not_registered() {
        let registry = ConnectionRegistry::new();
        let conn = Connection::new(Arc::new(RecordingSink::default()));
        assert!(!registry.register(conn));
        assert!(registry.is_empty());
    }

    #[test]
    fn unregister_twice_matches_unregister_once() {
        let registry = ConnectionRegistry::new();
        let a = open_conn();
        let b = open_conn();
        registry.register(Arc::clone(&a));
        registry.register(Arc::clone(&b));

        assert!(registry.unregister(a.id()).is_some());
        assert!(registry.unregister(a.id()).is_none());
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(b.id()));
    }

    #[test]
    fn release_closes_exactly_once() {
        let registry = ConnectionRegistry::new();
        let conn = open_conn();
        registry.register(Arc::clone(&conn));

        assert!(registry.release(&conn, CloseReason::PeerClosed));
        assert!(!registry.release(&conn, CloseReason::WriteFailed));
        assert_eq!(conn.state(), ConnState::Closed);
        assert!(registry.is_empty());
    }

    #[test]
    fn snapshot_is_detached_from_later_mutation() {
        let registry = ConnectionRegistry::new();
        let a = open_conn();
        registry.register(Arc::clone(&a));

        let snap = registry.snapshot();
        registry.unregister(a.id());
        registry.register(open_conn());

        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].id(), a.id());
        assert_eq!(registry.len(), 1);
        assert!(!registry.contains(a.id()));
    }

    #[test]
    fn release_all_empties_registry() {
        let registry = ConnectionRegistry::new();
        let conns: Vec<_> = (0..3).map(|_| open_conn()).collect();
        for c in &conns {
            registry.register(Arc::clone(c));
        }
        assert_eq!(registry.release_all(CloseReason::Shutdown), 3);
        assert!(registry.is_empty());
        assert!(conns.iter().all(|c| c.state() == ConnState::Closed));
    }
}
