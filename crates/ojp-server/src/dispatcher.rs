//! Request Dispatcher (C11, §4.11): server-side session routing, the
//! reconcile-before-substantive-work ordering, and dispatch to the bound
//! backend connection or XA backend session.

use std::sync::Arc;

use uuid::Uuid;

use ojp_pool::backend::{BackendConnection, XaBackendConnection};
use ojp_pool::non_xa::PooledConnection;
use ojp_protocol::endpoint::EndpointAddr;
use ojp_protocol::error::OjpError;
use ojp_protocol::rpc::{SessionInfo, XaFlags};
use ojp_protocol::xid::Xid;
use ojp_xa::registry::XaRegistry;
use ojp_xa::resource::XaResource;

use crate::cluster_health::ClusterHealthTracker;
use crate::session::{BoundBackend, Session, SessionTracker};

/// C11 on the server side: resolves which [`Session`] a request targets,
/// reports whether a pool reconciliation must run before the request's
/// substantive work, and dispatches that work to the session's bound
/// backend connection (non-XA) or bound XA backend session, ties C5/C6
/// (borrowed connections) to C7 (the XA registry).
pub struct RequestDispatcher<C: BackendConnection + XaBackendConnection + XaResource> {
    sessions: Arc<SessionTracker<C>>,
    cluster_health: Arc<ClusterHealthTracker>,
    xa_registry: Arc<XaRegistry<C>>,
    /// This server's own address, used to detect a misrouted session
    /// (§4.11 step 1) — only reachable under a routing misconfiguration,
    /// since this process's tracker only ever holds sessions it created.
    self_addr: EndpointAddr,
}

impl<C: BackendConnection + XaBackendConnection + XaResource> RequestDispatcher<C> {
    /// Build a dispatcher bound to this server's own address.
    #[must_use]
    pub fn new(
        sessions: Arc<SessionTracker<C>>,
        cluster_health: Arc<ClusterHealthTracker>,
        xa_registry: Arc<XaRegistry<C>>,
        self_addr: EndpointAddr,
    ) -> Self {
        Self {
            sessions,
            cluster_health,
            xa_registry,
            self_addr,
        }
    }

    /// Resolve `session_info` to the live [`Session`] it names (§4.11 step 1).
    ///
    /// Fails with [`OjpError::SessionNotFound`] if the session isn't tracked
    /// here, or [`OjpError::SessionMisrouted`] if the caller's own belief
    /// about the target server disagrees with this one (a routing bug, not
    /// a failure condition this server can recover from on its own), or
    /// [`OjpError::SessionTerminated`] if the session was already torn down.
    pub fn resolve_session(&self, session_info: &SessionInfo) -> Result<Arc<Session<C>>, OjpError> {
        if let Some(target) = &session_info.target_server {
            if *target != self.self_addr {
                return Err(OjpError::SessionMisrouted {
                    session_id: session_info.session_id,
                });
            }
        }

        let session = self
            .sessions
            .get(session_info.session_id)
            .ok_or(OjpError::SessionNotFound {
                session_id: session_info.session_id,
            })?;

        if session.is_terminated() {
            return Err(OjpError::SessionTerminated {
                session_id: session_info.session_id,
            });
        }

        Ok(session)
    }

    /// Whether a pool reconciliation must run before this request's
    /// substantive work (§4.2, §4.11 step 2): always consult C2, since
    /// first-report and changed-report both require it.
    #[must_use]
    pub fn needs_reconciliation(&self, connection_hash: u64, cluster_health: &str) -> bool {
        self.cluster_health.observe(connection_hash, cluster_health)
    }

    /// Register a session just created by `connect` and bind the backend
    /// resource borrowed for it (§3, §4.11 step 3 setup) — a non-XA
    /// connection borrowed from C5, or an XA backend session pinned from
    /// C6.
    pub async fn register_connected_session(
        &self,
        session_id: Uuid,
        client_id: Uuid,
        connection_hash: u64,
        backend: BoundBackend<C>,
    ) -> Arc<Session<C>> {
        let is_xa = matches!(backend, BoundBackend::Xa(_));
        let session = Arc::new(Session::new(session_id, client_id, connection_hash, is_xa));
        session.bind(backend).await;
        self.sessions.insert(Arc::clone(&session));
        session
    }

    /// Dispatch a non-XA request (`executeUpdate`, `executeQuery`, ...) to
    /// the session's bound connection (§4.11 step 3). `None` from the
    /// session means it resolved but was never bound, or was bound XA —
    /// both cases this process cannot recover from on its own, so they
    /// surface the same way a dropped connect-time bind would.
    pub async fn dispatch_non_xa<R>(
        &self,
        session_info: &SessionInfo,
        f: impl FnOnce(&mut PooledConnection<C>) -> R,
    ) -> Result<R, OjpError> {
        let session = self.resolve_session(session_info)?;
        session
            .with_non_xa(f)
            .await
            .ok_or(OjpError::SessionInvalidatedDuringConnect)
    }

    /// Dispatch `xaStart` to the session's bound XA backend session (§4.11
    /// step 3), handing the returned `Arc<Xid>` back to the caller so later
    /// `xaEnd`/`xaPrepare`/`xaCommit`/`xaRollback` calls replay the same
    /// instance rather than a freshly deserialized one (§9).
    pub async fn dispatch_xa_start(
        &self,
        session_info: &SessionInfo,
        xid: Xid,
        flags: XaFlags,
    ) -> Result<Arc<Xid>, OjpError> {
        let session = self.resolve_session(session_info)?;
        let xa_session = session
            .xa_session()
            .await
            .ok_or(OjpError::SessionInvalidatedDuringConnect)?;
        self.xa_registry.start(xid, flags, xa_session).await
    }

    /// Dispatch `xaEnd` to the branch named by the stored `Xid` (§4.11 step 3).
    pub async fn dispatch_xa_end(
        &self,
        session_info: &SessionInfo,
        xid: &Xid,
        flags: XaFlags,
    ) -> Result<(), OjpError> {
        self.resolve_session(session_info)?;
        self.xa_registry.end(xid, flags).await
    }

    /// Dispatch `xaCommit` to the branch named by the stored `Xid` (§4.11
    /// step 3); idempotent per P3 (§8).
    pub async fn dispatch_xa_commit(
        &self,
        session_info: &SessionInfo,
        xid: &Xid,
        one_phase: bool,
    ) -> Result<(), OjpError> {
        self.resolve_session(session_info)?;
        self.xa_registry.commit(xid, one_phase).await
    }

    /// Dispatch `xaRollback` to the branch named by the stored `Xid` (§4.11
    /// step 3); idempotent per P3 (§8).
    pub async fn dispatch_xa_rollback(&self, session_info: &SessionInfo, xid: &Xid) -> Result<(), OjpError> {
        self.resolve_session(session_info)?;
        self.xa_registry.rollback(xid).await
    }
}
