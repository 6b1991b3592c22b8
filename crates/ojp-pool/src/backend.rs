//! SPI traits a pool is generic over.
//!
//! The underlying database driver and its XA implementation are out of
//! scope (§1 Non-goals); these traits are the seam the pools in this crate
//! dispatch through, implemented by whatever concrete backend a deployment
//! wires in (a real JDBC-equivalent driver in production, an in-memory fake
//! in `ojp-testing`).

use async_trait::async_trait;

use crate::error::Result;

/// A single regular (non-XA) backend connection (§4.5).
#[async_trait]
pub trait BackendConnection: Send + 'static {
    /// Cheap liveness check, run on borrow when `validate_on_borrow` is set.
    async fn is_valid(&mut self) -> bool;

    /// Sanitize state before returning to the pool: rollback any
    /// uncommitted work, reset isolation and auto-commit to the configured
    /// defaults, and clear any session-local temp state the backend
    /// supports (§4.5). Failure here means the connection is destroyed,
    /// not returned.
    async fn reset(&mut self) -> Result<()>;

    /// Release any backend resources; called on eviction or pool close.
    async fn close(&mut self);
}

/// A factory that creates new [`BackendConnection`]s on demand.
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    /// The connection type this factory produces.
    type Connection: BackendConnection;

    /// Create a new connection, failing with a descriptive message if the
    /// backend rejects it.
    async fn create(&self) -> Result<Self::Connection>;
}

/// A long-lived backend XA connection hosting a sequence of transactions
/// without being recycled between them (§4.6).
#[async_trait]
pub trait XaBackendConnection: Send + 'static {
    /// Cheap liveness check, run on borrow when `validate_on_borrow` is set.
    async fn is_valid(&mut self) -> bool;

    /// Reset auto-commit, isolation, and the logical JDBC-equivalent
    /// connection derived from this XAConnection, in preparation for
    /// hosting the next transaction branch. Per §4.6, failure here is
    /// logged but non-fatal — the commit/rollback that preceded it already
    /// succeeded.
    async fn sanitize(&mut self) -> Result<()>;

    /// Release the XAConnection; called on eviction or pool close.
    async fn close(&mut self);
}

/// Factory for [`XaBackendConnection`]s.
#[async_trait]
pub trait XaConnectionFactory: Send + Sync + 'static {
    /// The XA connection type this factory produces.
    type Connection: XaBackendConnection;

    /// Create a new XA backend connection.
    async fn create(&self) -> Result<Self::Connection>;
}
