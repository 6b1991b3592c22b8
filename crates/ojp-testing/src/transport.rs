//! An in-process [`RpcTransport`] that dispatches straight to a registered
//! handler closure instead of a socket, so client/server integration tests
//! can drive both halves in one process without a real wire codec (§1).

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use ojp_protocol::endpoint::EndpointAddr;
use ojp_protocol::error::{OjpError, Result};
use ojp_protocol::rpc::{Request, Response};
use ojp_protocol::transport::RpcTransport;

/// A server-side handler a test registers under one [`EndpointAddr`].
pub type Handler = Arc<dyn Fn(Request) -> Result<Response> + Send + Sync + 'static>;

/// A transport backed by an in-memory routing table rather than a socket.
///
/// Endpoints not present in the table, or explicitly cut via
/// [`InMemoryTransport::cut`], report [`OjpError::TransportUnavailable`] —
/// the same signal a real transport gives for an unreachable server, so
/// C8's failure-handling path (§4.8) exercises identically in tests.
#[derive(Default)]
pub struct InMemoryTransport {
    handlers: DashMap<EndpointAddr, Handler>,
    cut: DashMap<EndpointAddr, ()>,
}

impl InMemoryTransport {
    /// Build an empty transport with no registered endpoints.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` to serve every request sent to `endpoint`.
    pub fn register(&self, endpoint: EndpointAddr, handler: Handler) {
        self.handlers.insert(endpoint, handler);
    }

    /// Simulate `endpoint` becoming unreachable: every call to it fails with
    /// [`OjpError::TransportUnavailable`] until [`Self::restore`] is called.
    pub fn cut(&self, endpoint: EndpointAddr) {
        self.cut.insert(endpoint, ());
    }

    /// Undo a prior [`Self::cut`].
    pub fn restore(&self, endpoint: &EndpointAddr) {
        self.cut.remove(endpoint);
    }
}

#[async_trait]
impl RpcTransport for InMemoryTransport {
    async fn call(&self, target: &EndpointAddr, request: Request) -> Result<Response> {
        if self.cut.contains_key(target) {
            return Err(OjpError::TransportUnavailable {
                message: format!("{target} is unreachable"),
            });
        }

        let handler = self
            .handlers
            .get(target)
            .ok_or_else(|| OjpError::TransportUnavailable {
                message: format!("no handler registered for {target}"),
            })?
            .clone();

        handler(request)
    }
}
