//! Multinode Connection Manager (C8, §4.8): server selection, failure
//! handling, and the `xaStart`-only retry loop.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use ojp_protocol::{EndpointAddr, OjpError};

use crate::endpoint_registry::EndpointRegistry;
use crate::session_tracker::{ConnectionId, SessionTracker};

/// A client-side connection's force-invalid flag (§4.8 step 2, §4.1
/// glossary "Force-invalid"). Once set, the connection's validity check
/// must return false and any further use must report a connection-lost
/// error (SQL state `08006`, via [`ojp_protocol::sqlstate::CONNECTION_LOST`]).
#[derive(Debug, Default)]
pub struct ForceInvalidFlag(AtomicBool);

impl ForceInvalidFlag {
    /// Whether the connection has been marked force-invalid.
    #[must_use]
    pub fn is_invalid(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Mark the connection force-invalid (§4.8 step 2, §4.10).
    pub fn set_invalid(&self) {
        self.0.store(true, Ordering::Release);
    }
}

/// C8: routes work to healthy endpoints, reacts to connection-level
/// failures, and retries `xaStart` across endpoints.
pub struct MultinodeConnectionManager {
    endpoints: Arc<EndpointRegistry>,
    sessions: Arc<SessionTracker>,
    force_invalid: DashMap<ConnectionId, Arc<ForceInvalidFlag>>,
    max_xa_start_retries: u32,
}

impl MultinodeConnectionManager {
    /// Build a manager over a shared endpoint registry and session tracker.
    /// `max_xa_start_retries` is the `multinode.retryAttempts` bound (§6);
    /// the effective retry count is still capped by the healthy endpoint
    /// count at the moment of the call (§4.8).
    #[must_use]
    pub fn new(
        endpoints: Arc<EndpointRegistry>,
        sessions: Arc<SessionTracker>,
        max_xa_start_retries: u32,
    ) -> Self {
        Self {
            endpoints,
            sessions,
            force_invalid: DashMap::new(),
            max_xa_start_retries,
        }
    }

    /// Non-XA server selection: round-robin over healthy endpoints (§4.8).
    pub fn select_non_xa(&self) -> Result<EndpointAddr, OjpError> {
        let healthy = self.endpoints.healthy_endpoints();
        self.endpoints
            .next_round_robin(&healthy)
            .cloned()
            .ok_or(OjpError::NoHealthyServer)
    }

    /// XA server selection: the healthy endpoint with the fewest bound
    /// sessions, ties broken by round-robin position (§4.8). Used only when
    /// binding a *new* logical XA connection — XA sessions are sticky once
    /// bound.
    pub fn select_xa(&self) -> Result<EndpointAddr, OjpError> {
        let healthy = self.endpoints.healthy_endpoints();
        if healthy.is_empty() {
            return Err(OjpError::NoHealthyServer);
        }

        let min_count = healthy
            .iter()
            .map(|ep| self.sessions.session_count(ep))
            .min()
            .unwrap_or(0);
        let least_loaded: Vec<EndpointAddr> = healthy
            .into_iter()
            .filter(|ep| self.sessions.session_count(ep) == min_count)
            .collect();

        self.endpoints
            .next_round_robin(&least_loaded)
            .cloned()
            .ok_or(OjpError::NoHealthyServer)
    }

    /// Register a client-side connection so it can later be force-invalidated.
    pub fn register_connection(&self, connection: ConnectionId) -> Arc<ForceInvalidFlag> {
        let flag = Arc::new(ForceInvalidFlag::default());
        self.force_invalid.insert(connection, Arc::clone(&flag));
        flag
    }

    /// Whether `connection` has been marked force-invalid.
    #[must_use]
    pub fn is_force_invalid(&self, connection: ConnectionId) -> bool {
        self.force_invalid
            .get(&connection)
            .is_some_and(|f| f.is_invalid())
    }

    /// The force-invalid flag registered for `connection`, if any. Used by
    /// C10 ([`crate::redistributor::ConnectionRedistributor`]) to mark
    /// connections invalid directly without going through the failure path.
    #[must_use]
    pub fn force_invalid_flag(&self, connection: ConnectionId) -> Option<Arc<ForceInvalidFlag>> {
        self.force_invalid.get(&connection).map(|f| Arc::clone(&f))
    }

    /// Server failure handling (§4.8 "immediate invalidation"): mark `ep`
    /// unhealthy, force-invalidate every connection whose session is bound
    /// to it, and drop the tracker's bindings. No attempt is made to reach
    /// `ep` (it is unreachable by assumption) — there is deliberately no
    /// `terminateSession` call here.
    pub fn handle_connection_failure(&self, ep: &EndpointAddr, cause: &str) {
        self.endpoints.mark_unhealthy(ep, cause);

        let bound = self.sessions.sessions_bound_to(ep);
        for (connection, session) in bound {
            if let Some(flag) = self.force_invalid.get(&connection) {
                flag.set_invalid();
            }
            self.sessions.remove_session(session);
            tracing::info!(%session, endpoint = %ep, "session invalidated on endpoint failure");
        }
    }

    /// Classify `err` and, if connection-level, run the endpoint-failure
    /// path against `ep` (§4.8). Returns whether failure handling fired.
    pub fn observe_rpc_result(&self, ep: &EndpointAddr, err: &OjpError) -> bool {
        if err.is_connection_level() {
            self.handle_connection_failure(ep, &err.to_string());
            true
        } else {
            false
        }
    }

    /// The `xaStart`-only retry loop (§4.8): on a connection-level error,
    /// select a fresh endpoint and retry, up to the lesser of
    /// `max_xa_start_retries` and the healthy-endpoint count (minimum 1,
    /// capped at 3 when the count can't be determined — here it always can,
    /// so the cap is simply `max_xa_start_retries`). Returns the number of
    /// retries actually performed alongside the result, for the
    /// `xaStartRetries` counter of §8 scenario 4.
    pub async fn xa_start_with_retry<T, F, Fut>(&self, mut attempt: F) -> (Result<T, OjpError>, u32)
    where
        F: FnMut(EndpointAddr) -> Fut,
        Fut: Future<Output = Result<T, OjpError>>,
    {
        let budget = self
            .endpoints
            .healthy_count()
            .max(1)
            .min(self.max_xa_start_retries.max(1) as usize) as u32;

        let mut retries = 0;
        loop {
            let ep = match self.select_xa() {
                Ok(ep) => ep,
                Err(err) => return (Err(err), retries),
            };

            match attempt(ep.clone()).await {
                Ok(value) => return (Ok(value), retries),
                Err(err) if err.is_connection_level() && retries < budget => {
                    self.handle_connection_failure(&ep, &err.to_string());
                    retries += 1;
                    tracing::debug!(retries, "retrying xaStart on a different endpoint");
                }
                Err(err) => return (Err(err), retries),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn manager() -> MultinodeConnectionManager {
        let endpoints = Arc::new(EndpointRegistry::new(vec![
            EndpointAddr::new("a", 1),
            EndpointAddr::new("b", 2),
        ]));
        let sessions = Arc::new(SessionTracker::new());
        MultinodeConnectionManager::new(endpoints, sessions, 3)
    }

    #[test]
    fn non_xa_round_robins() {
        let mgr = manager();
        let first = mgr.select_non_xa().unwrap();
        let second = mgr.select_non_xa().unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn xa_selects_least_loaded() {
        let mgr = manager();
        let a = EndpointAddr::new("a", 1);
        let b = EndpointAddr::new("b", 2);
        mgr.sessions.bind(uuid::Uuid::new_v4(), uuid::Uuid::new_v4(), a.clone());
        mgr.sessions.bind(uuid::Uuid::new_v4(), uuid::Uuid::new_v4(), a.clone());

        let selected = mgr.select_xa().unwrap();
        assert_eq!(selected, b);
    }

    #[test]
    fn failure_invalidates_bound_connections() {
        let mgr = manager();
        let a = EndpointAddr::new("a", 1);
        let conn = uuid::Uuid::new_v4();
        let session = uuid::Uuid::new_v4();
        mgr.sessions.bind(conn, session, a.clone());
        let flag = mgr.register_connection(conn);

        mgr.handle_connection_failure(&a, "connection reset");

        assert!(flag.is_invalid());
        assert!(mgr.sessions.endpoint_of(session).is_none());
        assert_eq!(mgr.endpoints.healthy_count(), 1);
    }

    #[tokio::test]
    async fn xa_start_retries_on_connection_level_error_only() {
        let mgr = manager();
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts2 = Arc::clone(&attempts);

        let (result, retries) = mgr
            .xa_start_with_retry(move |_ep| {
                let attempts = Arc::clone(&attempts2);
                async move {
                    let n = attempts.fetch_add(1, Ordering::SeqCst);
                    if n == 0 {
                        Err(OjpError::ConnectionLost {
                            message: "connection reset".into(),
                        })
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(retries, 1);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn xa_start_does_not_retry_database_level_error() {
        let mgr = manager();
        let (result, retries) = mgr
            .xa_start_with_retry(|_ep| async {
                Err::<(), _>(OjpError::Database {
                    sql_state: "42000".into(),
                    message: "syntax error".into(),
                })
            })
            .await;

        assert!(result.is_err());
        assert_eq!(retries, 0);
    }
}
