//! Client-side Session Tracker (C3, §4.3): `sessionId → endpoint` for
//! routing, and `connection → sessionId` for reverse lookup during
//! invalidation (§4.8 step 2).

use dashmap::DashMap;
use uuid::Uuid;

use ojp_protocol::EndpointAddr;

/// A client-local handle for a logical connection, distinct from the
/// server-assigned session identifier so invalidation can target it even
/// before a session exists (or after one was torn down).
pub type ConnectionId = Uuid;

/// Maps sessions to their bound server and back, and tracks per-endpoint
/// session counts for load-aware XA selection (§4.8).
#[derive(Debug, Default)]
pub struct SessionTracker {
    session_to_endpoint: DashMap<Uuid, EndpointAddr>,
    connection_to_session: DashMap<ConnectionId, Uuid>,
}

impl SessionTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `session` is bound to `endpoint` and reachable via
    /// `connection`.
    pub fn bind(&self, connection: ConnectionId, session: Uuid, endpoint: EndpointAddr) {
        self.session_to_endpoint.insert(session, endpoint);
        self.connection_to_session.insert(connection, session);
    }

    /// The endpoint `session` is bound to, if tracked.
    #[must_use]
    pub fn endpoint_of(&self, session: Uuid) -> Option<EndpointAddr> {
        self.session_to_endpoint.get(&session).map(|e| e.clone())
    }

    /// The session `connection` currently maps to, if any.
    #[must_use]
    pub fn session_of(&self, connection: ConnectionId) -> Option<Uuid> {
        self.connection_to_session.get(&connection).map(|s| *s)
    }

    /// Remove all bookkeeping for `session` (on `terminateSession` or
    /// invalidation).
    pub fn remove_session(&self, session: Uuid) {
        self.session_to_endpoint.remove(&session);
        self.connection_to_session.retain(|_, s| *s != session);
    }

    /// Every `(connection, session)` pair currently bound to `endpoint`;
    /// used by §4.8 step 2 to invalidate on endpoint failure and by §4.10 to
    /// compute per-endpoint session counts.
    #[must_use]
    pub fn sessions_bound_to(&self, endpoint: &EndpointAddr) -> Vec<(ConnectionId, Uuid)> {
        let sessions: std::collections::HashSet<Uuid> = self
            .session_to_endpoint
            .iter()
            .filter(|e| e.value() == endpoint)
            .map(|e| *e.key())
            .collect();

        self.connection_to_session
            .iter()
            .filter(|e| sessions.contains(e.value()))
            .map(|e| (*e.key(), *e.value()))
            .collect()
    }

    /// Number of sessions currently bound to `endpoint` — the load-aware
    /// selection signal of §4.8.
    #[must_use]
    pub fn session_count(&self, endpoint: &EndpointAddr) -> usize {
        self.session_to_endpoint
            .iter()
            .filter(|e| e.value() == endpoint)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_and_lookup() {
        let tracker = SessionTracker::new();
        let conn = Uuid::new_v4();
        let session = Uuid::new_v4();
        let ep = EndpointAddr::new("a", 1);
        tracker.bind(conn, session, ep.clone());

        assert_eq!(tracker.endpoint_of(session), Some(ep));
        assert_eq!(tracker.session_of(conn), Some(session));
    }

    #[test]
    fn remove_clears_both_directions() {
        let tracker = SessionTracker::new();
        let conn = Uuid::new_v4();
        let session = Uuid::new_v4();
        tracker.bind(conn, session, EndpointAddr::new("a", 1));
        tracker.remove_session(session);

        assert!(tracker.endpoint_of(session).is_none());
        assert!(tracker.session_of(conn).is_none());
    }

    #[test]
    fn session_count_tracks_binding() {
        let tracker = SessionTracker::new();
        let ep = EndpointAddr::new("a", 1);
        for _ in 0..3 {
            tracker.bind(Uuid::new_v4(), Uuid::new_v4(), ep.clone());
        }
        assert_eq!(tracker.session_count(&ep), 3);
    }
}
