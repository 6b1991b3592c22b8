//! Server-side Session Tracker (C3, §4.3) and the [`Session`] object itself
//! (§3 "Session").

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

use ojp_pool::backend::{BackendConnection, XaBackendConnection};
use ojp_pool::non_xa::PooledConnection;
use ojp_pool::xa::XaPinnedSession;
use ojp_xa::resource::XaResource;

/// Opaque handle allocator shared by the statement/result-set/LOB maps —
/// each kind gets its own counter so handles never collide across kinds
/// even though they're all plain `u64`s on the wire (§6).
#[derive(Debug, Default)]
struct HandleAllocator(AtomicU64);

impl HandleAllocator {
    fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

/// The backend resource a session is bound to once `connect` has borrowed
/// one (§3 "reference to the bound backend connection (non-XA) or bound XA
/// backend session (XA)"), consumed on every subsequent request by §4.11
/// step 3.
pub enum BoundBackend<C: BackendConnection + XaBackendConnection + XaResource> {
    /// A connection borrowed from the non-XA pool (C5).
    NonXa(PooledConnection<C>),
    /// A session borrowed from the XA backend session pool (C6), pinned
    /// until the dual condition of §4.6 releases it.
    Xa(Arc<XaPinnedSession<C>>),
}

/// A session as tracked by the server (§3): owns the opaque-id maps for
/// prepared statements, open result sets, and LOBs, the bound backend
/// resource `connect` borrowed, and forbids further use once terminated.
pub struct Session<C: BackendConnection + XaBackendConnection + XaResource> {
    /// Process-unique session identifier, assigned on `connect`.
    pub session_id: Uuid,
    /// Identifier of the client process that owns this session.
    pub client_id: Uuid,
    /// Stable hash of `{url, user}`, used to key this server's pools.
    pub connection_hash: u64,
    /// Whether this session is bound to an XA backend session rather than
    /// a plain non-XA connection.
    pub is_xa: bool,
    terminated: AtomicBool,
    statement_handles: HandleAllocator,
    result_set_handles: HandleAllocator,
    lob_handles: HandleAllocator,
    /// Opaque server-side statement identifier → prepared SQL text (or
    /// whatever a concrete backend stores per prepared statement).
    pub statements: DashMap<u64, String>,
    /// Opaque result-set identifier → whether it has been exhausted.
    pub result_sets: DashMap<u64, bool>,
    /// Opaque LOB identifier → byte length written so far.
    pub lobs: DashMap<u64, u64>,
    /// Locked across `.await` rather than `parking_lot`, since dispatch
    /// borrows the bound connection/session for the duration of an async
    /// backend call (mirrors [`XaPinnedSession`]'s own locking).
    backend: tokio::sync::Mutex<Option<BoundBackend<C>>>,
}

impl<C: BackendConnection + XaBackendConnection + XaResource> Session<C> {
    /// Create a new, non-terminated, unbound session. `connect` must call
    /// [`Self::bind`] before any other request reaches this session.
    #[must_use]
    pub fn new(session_id: Uuid, client_id: Uuid, connection_hash: u64, is_xa: bool) -> Self {
        Self {
            session_id,
            client_id,
            connection_hash,
            is_xa,
            terminated: AtomicBool::new(false),
            statement_handles: HandleAllocator::default(),
            result_set_handles: HandleAllocator::default(),
            lob_handles: HandleAllocator::default(),
            statements: DashMap::new(),
            result_sets: DashMap::new(),
            lobs: DashMap::new(),
            backend: tokio::sync::Mutex::new(None),
        }
    }

    /// Whether `terminateSession` (or an invalidating failure) has already
    /// run against this session. Every entry point must check this first
    /// (§5 "the session itself forbids further use after terminate").
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// Mark the session terminated; idempotent.
    pub fn terminate(&self) {
        self.terminated.store(true, Ordering::Release);
    }

    /// Bind the backend resource `connect` borrowed for this session (§3).
    pub async fn bind(&self, backend: BoundBackend<C>) {
        *self.backend.lock().await = Some(backend);
    }

    /// Run `f` against the bound non-XA connection, if this session is
    /// bound to one. `None` if unbound or XA-bound — the caller (§4.11 step
    /// 3) treats that as the connect/dispatch race of
    /// [`ojp_protocol::error::OjpError::SessionInvalidatedDuringConnect`].
    pub async fn with_non_xa<R>(&self, f: impl FnOnce(&mut PooledConnection<C>) -> R) -> Option<R> {
        match self.backend.lock().await.as_mut() {
            Some(BoundBackend::NonXa(conn)) => Some(f(conn)),
            _ => None,
        }
    }

    /// The pinned XA backend session this session is bound to, if any —
    /// §4.11 step 3 hands this to the XA registry, which dispatches `xaXxx`
    /// verbs to it using the stored `Arc<Xid>` instance rather than a fresh
    /// one (§9 Xid-identity note).
    pub async fn xa_session(&self) -> Option<Arc<XaPinnedSession<C>>> {
        match self.backend.lock().await.as_ref() {
            Some(BoundBackend::Xa(session)) => Some(Arc::clone(session)),
            _ => None,
        }
    }

    /// Allocate a new opaque statement handle and register `sql` under it.
    pub fn register_statement(&self, sql: String) -> u64 {
        let handle = self.statement_handles.next();
        self.statements.insert(handle, sql);
        handle
    }

    /// Allocate a new opaque result-set handle, initially not exhausted.
    pub fn register_result_set(&self) -> u64 {
        let handle = self.result_set_handles.next();
        self.result_sets.insert(handle, false);
        handle
    }

    /// Allocate a new opaque LOB handle, initially empty.
    pub fn register_lob(&self) -> u64 {
        let handle = self.lob_handles.next();
        self.lobs.insert(handle, 0);
        handle
    }
}

/// C3 (server side): `sessionId → Session`, used for RPC routing (§4.11).
pub struct SessionTracker<C: BackendConnection + XaBackendConnection + XaResource> {
    sessions: DashMap<Uuid, Arc<Session<C>>>,
}

impl<C: BackendConnection + XaBackendConnection + XaResource> Default for SessionTracker<C> {
    fn default() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }
}

impl<C: BackendConnection + XaBackendConnection + XaResource> SessionTracker<C> {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly created session.
    pub fn insert(&self, session: Arc<Session<C>>) {
        self.sessions.insert(session.session_id, session);
    }

    /// Look up a session by id.
    #[must_use]
    pub fn get(&self, session_id: Uuid) -> Option<Arc<Session<C>>> {
        self.sessions.get(&session_id).map(|s| Arc::clone(&s))
    }

    /// Remove and terminate a session (on `terminateSession` or invalidation).
    pub fn remove(&self, session_id: Uuid) {
        if let Some((_, session)) = self.sessions.remove(&session_id) {
            session.terminate();
        }
    }

    /// Number of sessions currently tracked for `connection_hash` — feeds
    /// the per-connection-hash pool's load picture.
    #[must_use]
    pub fn count_for_hash(&self, connection_hash: u64) -> usize {
        self.sessions
            .iter()
            .filter(|e| e.value().connection_hash == connection_hash)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ojp_testing::FakeConnection;

    type TestSession = Session<FakeConnection>;
    type TestTracker = SessionTracker<FakeConnection>;

    #[test]
    fn register_and_terminate() {
        let tracker = TestTracker::new();
        let id = Uuid::new_v4();
        let session = Arc::new(TestSession::new(id, Uuid::new_v4(), 42, false));
        tracker.insert(Arc::clone(&session));

        assert!(tracker.get(id).is_some());
        assert!(!session.is_terminated());

        tracker.remove(id);
        assert!(tracker.get(id).is_none());
        assert!(session.is_terminated());
    }

    #[test]
    fn statement_handles_are_distinct_and_reusable_map() {
        let session = TestSession::new(Uuid::new_v4(), Uuid::new_v4(), 1, false);
        let a = session.register_statement("select 1".into());
        let b = session.register_statement("select 2".into());
        assert_ne!(a, b);
        assert_eq!(session.statements.get(&a).unwrap().as_str(), "select 1");
    }

    #[test]
    fn count_for_hash_filters_by_hash() {
        let tracker = TestTracker::new();
        tracker.insert(Arc::new(TestSession::new(Uuid::new_v4(), Uuid::new_v4(), 1, false)));
        tracker.insert(Arc::new(TestSession::new(Uuid::new_v4(), Uuid::new_v4(), 1, false)));
        tracker.insert(Arc::new(TestSession::new(Uuid::new_v4(), Uuid::new_v4(), 2, false)));

        assert_eq!(tracker.count_for_hash(1), 2);
        assert_eq!(tracker.count_for_hash(2), 1);
    }

    #[tokio::test]
    async fn bind_non_xa_then_dispatch_reaches_connection() {
        let session = TestSession::new(Uuid::new_v4(), Uuid::new_v4(), 1, false);
        assert!(session.with_non_xa(|_| ()).await.is_none());

        let pool = ojp_pool::Pool::new(
            ojp_testing::FakeConnectionFactory::new(),
            ojp_pool::PoolConfig::default(),
        )
        .unwrap();
        let pooled = pool.borrow().await.unwrap();
        session.bind(BoundBackend::NonXa(pooled)).await;

        let reached = session.with_non_xa(|_| true).await;
        assert_eq!(reached, Some(true));
        assert!(session.xa_session().await.is_none());
    }
}
