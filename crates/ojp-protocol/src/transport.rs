//! RPC transport boundary (§1, §4.11).
//!
//! The wire codec that turns a [`Request`](crate::rpc::Request) into bytes on
//! a socket is explicitly out of scope (§1). This trait is the seam a
//! concrete transport plugs into; the core dispatch logic in `ojp-client`
//! and `ojp-server` only ever talks to an `Arc<dyn RpcTransport>`.

use async_trait::async_trait;

use crate::endpoint::EndpointAddr;
use crate::error::Result;
use crate::rpc::{Request, Response};

/// A transport capable of delivering one [`Request`] to a server endpoint
/// and returning its [`Response`].
///
/// Implementations own connection establishment, framing, and timeouts;
/// they report failures through [`crate::error::OjpError`] so the caller can
/// apply the connection-level classification in §4.8 uniformly regardless of
/// what the transport is actually made of (in-process channel, TCP socket,
/// anything else).
#[async_trait]
pub trait RpcTransport: Send + Sync + 'static {
    /// Send `request` to `target` and await its response.
    ///
    /// A transport that cannot reach `target` at all must return
    /// [`crate::error::OjpError::TransportUnavailable`] rather than blocking
    /// indefinitely; callers apply their own deadline on top via
    /// [`crate::error::OjpError::DeadlineExceeded`].
    async fn call(&self, target: &EndpointAddr, request: Request) -> Result<Response>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::error::OjpError;
    use crate::rpc::Ack;

    struct CountingTransport {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RpcTransport for CountingTransport {
        async fn call(&self, target: &EndpointAddr, _request: Request) -> Result<Response> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if target.port == 0 {
                return Err(OjpError::TransportUnavailable {
                    message: "no such endpoint".into(),
                });
            }
            Ok(Response::Ack(Ack))
        }
    }

    #[tokio::test]
    async fn dyn_dispatch_through_arc() {
        let transport: Arc<dyn RpcTransport> = Arc::new(CountingTransport {
            calls: AtomicUsize::new(0),
        });
        let ok = transport
            .call(
                &EndpointAddr::new("localhost", 10591),
                Request::TerminateSession(crate::rpc::TerminateSessionRequest {
                    session: crate::rpc::SessionInfo {
                        session_id: uuid::Uuid::nil(),
                        client_id: uuid::Uuid::nil(),
                        connection_hash: 0,
                        is_xa: false,
                        target_server: None,
                    },
                }),
            )
            .await;
        assert!(matches!(ok, Ok(Response::Ack(_))));

        let err = transport
            .call(
                &EndpointAddr::new("localhost", 0),
                Request::TerminateSession(crate::rpc::TerminateSessionRequest {
                    session: crate::rpc::SessionInfo {
                        session_id: uuid::Uuid::nil(),
                        client_id: uuid::Uuid::nil(),
                        connection_hash: 0,
                        is_xa: false,
                        target_server: None,
                    },
                }),
            )
            .await;
        assert!(matches!(err, Err(OjpError::TransportUnavailable { .. })));
    }
}
