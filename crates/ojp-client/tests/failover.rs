//! Client-side failover: a dead endpoint must be marked unhealthy and
//! excluded from subsequent server selection (§4.8), and the `xaStart`-only
//! retry loop must recover by trying the next healthy endpoint (§8 scenario
//! covering retry-on-`xaStart`-only).

use std::sync::Arc;

use ojp_protocol::rpc::{Ack, Request, Response, SessionInfo, TerminateSessionRequest};
use ojp_protocol::EndpointAddr;

use ojp_client::{EndpointRegistry, MultinodeConnectionManager, RequestDispatcher, SessionTracker};
use ojp_testing::InMemoryTransport;

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

#[tokio::test]
async fn dead_endpoint_is_excluded_after_failed_dispatch() {
    let a = EndpointAddr::new("a", 1);
    let b = EndpointAddr::new("b", 2);

    let transport = Arc::new(InMemoryTransport::new());
    // `a` is never registered, so any call to it reports TransportUnavailable,
    // the same as a real unreachable server.
    transport.register(b.clone(), Arc::new(|_req| Ok(Response::Ack(Ack))));

    let endpoints = Arc::new(EndpointRegistry::new(vec![a.clone(), b.clone()]));
    let sessions = Arc::new(SessionTracker::new());
    let manager = Arc::new(MultinodeConnectionManager::new(
        Arc::clone(&endpoints),
        sessions,
        3,
    ));
    let dispatcher = RequestDispatcher::new(Arc::clone(&endpoints), Arc::clone(&manager), transport);

    let result = dispatcher.dispatch(&a, terminate_request()).await;
    assert!(result.is_err());
    assert!(!endpoints.is_healthy(&a));

    // Selection now only ever lands on the surviving endpoint.
    for _ in 0..4 {
        assert_eq!(manager.select_non_xa().unwrap(), b);
    }
}

#[tokio::test]
async fn xa_start_retries_past_a_dead_endpoint() {
    let a = EndpointAddr::new("a", 1);
    let b = EndpointAddr::new("b", 2);

    let transport = Arc::new(InMemoryTransport::new());
    transport.register(b.clone(), Arc::new(|_req| Ok(Response::Ack(Ack))));

    let endpoints = Arc::new(EndpointRegistry::new(vec![a.clone(), b.clone()]));
    let sessions = Arc::new(SessionTracker::new());
    let manager = MultinodeConnectionManager::new(Arc::clone(&endpoints), sessions, 3);

    let (result, retries) = manager
        .xa_start_with_retry(|ep| {
            let transport = Arc::clone(&transport);
            async move { transport.call(&ep, terminate_request()).await }
        })
        .await;

    assert!(result.is_ok());
    assert_eq!(retries, 1);
    assert!(!endpoints.is_healthy(&a));
    assert!(endpoints.is_healthy(&b));
}
