//! Request Dispatcher (C11, §4.11): the client-side half of every RPC round
//! trip — attach the current cluster-health view, send through the
//! transport, and feed the result back to C8 for connection-level
//! classification.

use std::sync::Arc;

use ojp_protocol::cluster_health::cluster_health_string;
use ojp_protocol::rpc::{Request, Response, SessionInfo};
use ojp_protocol::{EndpointAddr, OjpError, RpcTransport};

use crate::endpoint_registry::EndpointRegistry;
use crate::manager::MultinodeConnectionManager;

/// C11 on the client side: routes a request to the right endpoint, stamps
/// it with the current cluster-health string, and reports the outcome back
/// to the connection manager.
pub struct RequestDispatcher {
    endpoints: Arc<EndpointRegistry>,
    manager: Arc<MultinodeConnectionManager>,
    transport: Arc<dyn RpcTransport>,
}

impl RequestDispatcher {
    /// Build a dispatcher over the shared registry, manager, and transport.
    #[must_use]
    pub fn new(
        endpoints: Arc<EndpointRegistry>,
        manager: Arc<MultinodeConnectionManager>,
        transport: Arc<dyn RpcTransport>,
    ) -> Self {
        Self {
            endpoints,
            manager,
            transport,
        }
    }

    /// The cluster-health string as observed right now (§4.2): every
    /// endpoint this client knows about, healthy or not.
    #[must_use]
    pub fn current_cluster_health(&self) -> String {
        let pairs: Vec<(EndpointAddr, bool)> = self
            .endpoints
            .all_endpoints()
            .into_iter()
            .map(|ep| {
                let healthy = self.endpoints.is_healthy(&ep);
                (ep, healthy)
            })
            .collect();
        cluster_health_string(&pairs)
    }

    /// Send `request` to `target`, classifying the result through C8 before
    /// returning it. Callers that need a fresh server selection (`connect`)
    /// pick `target` themselves via [`MultinodeConnectionManager::select_non_xa`]
    /// or [`MultinodeConnectionManager::select_xa`]; callers with an existing
    /// session route by [`Self::target_for_session`].
    pub async fn dispatch(
        &self,
        target: &EndpointAddr,
        request: Request,
    ) -> Result<Response, OjpError> {
        let result = self.transport.call(target, request).await;
        if let Err(err) = &result {
            self.manager.observe_rpc_result(target, err);
        }
        result
    }

    /// The server endpoint an existing session is bound to (§4.11): a
    /// session-bearing RPC must route to this endpoint, never round-robin.
    #[must_use]
    pub fn target_for_session(&self, session: &SessionInfo) -> Option<EndpointAddr> {
        session.target_server.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ojp_protocol::rpc::{Ack, TerminateSessionRequest};
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::session_tracker::SessionTracker;

    struct FailingTransport;
    #[async_trait]
    impl RpcTransport for FailingTransport {
        async fn call(&self, _target: &EndpointAddr, _request: Request) -> Result<Response, OjpError> {
            Err(OjpError::TransportUnavailable {
                message: "unreachable".into(),
            })
        }
    }

    struct CountingTransport(AtomicUsize);
    #[async_trait]
    impl RpcTransport for CountingTransport {
        async fn call(&self, _target: &EndpointAddr, _request: Request) -> Result<Response, OjpError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(Response::Ack(Ack))
        }
    }

    fn dispatcher(transport: Arc<dyn RpcTransport>) -> (RequestDispatcher, Arc<EndpointRegistry>) {
        let endpoints = Arc::new(EndpointRegistry::new(vec![
            EndpointAddr::new("a", 1),
            EndpointAddr::new("b", 2),
        ]));
        let sessions = Arc::new(SessionTracker::new());
        let manager = Arc::new(MultinodeConnectionManager::new(
            Arc::clone(&endpoints),
            sessions,
            3,
        ));
        (
            RequestDispatcher::new(Arc::clone(&endpoints), manager, transport),
            endpoints,
        )
    }

    fn terminate_request() -> Request {
        Request::TerminateSession(TerminateSessionRequest {
            session: SessionInfo {
                session_id: uuid::Uuid::nil(),
                client_id: uuid::Uuid::nil(),
                connection_hash: 0,
                is_xa: false,
                target_server: None,
            },
        })
    }

    #[test]
    fn cluster_health_reflects_registry_state() {
        let (dispatcher, endpoints) = dispatcher(Arc::new(CountingTransport(AtomicUsize::new(0))));
        endpoints.mark_unhealthy(&EndpointAddr::new("a", 1), "boom");
        let health = dispatcher.current_cluster_health();
        assert_eq!(health, "a:1(DOWN);b:2(UP)");
    }

    #[tokio::test]
    async fn transport_failure_marks_endpoint_unhealthy() {
        let (dispatcher, endpoints) = dispatcher(Arc::new(FailingTransport));
        let target = EndpointAddr::new("a", 1);

        let result = dispatcher.dispatch(&target, terminate_request()).await;

        assert!(result.is_err());
        assert!(!endpoints.is_healthy(&target));
    }

    #[tokio::test]
    async fn successful_call_leaves_health_untouched() {
        let (dispatcher, endpoints) = dispatcher(Arc::new(CountingTransport(AtomicUsize::new(0))));
        let target = EndpointAddr::new("a", 1);

        let result = dispatcher.dispatch(&target, terminate_request()).await;

        assert!(result.is_ok());
        assert!(endpoints.is_healthy(&target));
    }
}
