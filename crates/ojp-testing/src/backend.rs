//! In-memory stand-ins for a real backend driver (§1 "the underlying
//! database drivers ... are out of scope"), implementing the SPI traits
//! [`ojp_pool::backend`] and [`ojp_xa::resource::XaResource`] dispatch
//! through.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use ojp_protocol::error::{OjpError, Result as OjpResult, XaPrepareOutcome};
use ojp_protocol::rpc::XaFlags;
use ojp_protocol::xid::Xid;
use ojp_pool::backend::{BackendConnection, ConnectionFactory, XaBackendConnection, XaConnectionFactory};
use ojp_xa::resource::XaResource;
use ojp_pool::error::{PoolError, Result as PoolResult};

/// A backend connection that never fails, for the common case of exercising
/// pooling/routing logic without caring about SQL semantics.
#[derive(Debug, Default)]
pub struct FakeConnection {
    /// Number of times `reset` (non-XA) or `sanitize` (XA) ran.
    pub resets: AtomicU32,
    valid: AtomicBool,
}

impl FakeConnection {
    /// Build a connection that reports valid and resets cleanly.
    #[must_use]
    pub fn new() -> Self {
        Self {
            resets: AtomicU32::new(0),
            valid: AtomicBool::new(true),
        }
    }

    /// Force subsequent `is_valid` checks to fail, simulating a connection
    /// that died underneath the pool.
    pub fn poison(&self) {
        self.valid.store(false, Ordering::Release);
    }
}

#[async_trait]
impl BackendConnection for FakeConnection {
    async fn is_valid(&mut self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    async fn reset(&mut self) -> PoolResult<()> {
        self.resets.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn close(&mut self) {}
}

#[async_trait]
impl XaBackendConnection for FakeConnection {
    async fn is_valid(&mut self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    async fn sanitize(&mut self) -> PoolResult<()> {
        self.resets.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn close(&mut self) {}
}

/// A resource-manager id shared by every [`FakeConnection`] a given
/// [`FakeConnectionFactory`] produces, so `xaIsSameRm` tests have something
/// meaningful to compare.
#[async_trait]
impl XaResource for FakeConnection {
    fn resource_manager_id(&self) -> &str {
        "fake-rm"
    }

    async fn start(&mut self, _xid: Arc<Xid>, _flags: XaFlags) -> OjpResult<()> {
        Ok(())
    }

    async fn end(&mut self, _xid: &Arc<Xid>, _flags: XaFlags) -> OjpResult<()> {
        Ok(())
    }

    async fn prepare(&mut self, _xid: &Arc<Xid>) -> OjpResult<XaPrepareOutcome> {
        Ok(XaPrepareOutcome::Ok)
    }

    async fn commit(&mut self, _xid: &Arc<Xid>, _one_phase: bool) -> OjpResult<()> {
        Ok(())
    }

    async fn rollback(&mut self, _xid: &Arc<Xid>) -> OjpResult<()> {
        Ok(())
    }

    async fn recover(&mut self, _flag: XaFlags) -> OjpResult<Vec<Xid>> {
        Ok(Vec::new())
    }

    async fn forget(&mut self, _xid: &Arc<Xid>) -> OjpResult<()> {
        Ok(())
    }

    async fn set_transaction_timeout(&mut self, _seconds: u32) -> OjpResult<()> {
        Ok(())
    }

    async fn get_transaction_timeout(&mut self) -> OjpResult<u32> {
        Ok(0)
    }
}

/// Factory for [`FakeConnection`]s, optionally failing every `create` call
/// to simulate a backend that has gone entirely unreachable.
#[derive(Debug, Default)]
pub struct FakeConnectionFactory {
    fail_create: AtomicBool,
}

impl FakeConnectionFactory {
    /// Build a factory that creates healthy connections.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Force every subsequent `create` call to fail.
    pub fn fail_creation(&self) {
        self.fail_create.store(true, Ordering::Release);
    }
}

#[async_trait]
impl ConnectionFactory for FakeConnectionFactory {
    type Connection = FakeConnection;

    async fn create(&self) -> PoolResult<FakeConnection> {
        if self.fail_create.load(Ordering::Acquire) {
            return Err(PoolError::CreateFailed("backend unreachable".into()));
        }
        Ok(FakeConnection::new())
    }
}

#[async_trait]
impl XaConnectionFactory for FakeConnectionFactory {
    type Connection = FakeConnection;

    async fn create(&self) -> PoolResult<FakeConnection> {
        if self.fail_create.load(Ordering::Acquire) {
            return Err(PoolError::CreateFailed("backend unreachable".into()));
        }
        Ok(FakeConnection::new())
    }
}

/// Build an [`OjpError::ConnectionLost`], the shape C8's retry loop and
/// failure handling key off of (§4.8).
#[must_use]
pub fn connection_lost(message: impl Into<String>) -> OjpError {
    OjpError::ConnectionLost {
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn poisoned_connection_fails_validation() {
        let mut conn = FakeConnection::new();
        assert!(BackendConnection::is_valid(&mut conn).await);
        conn.poison();
        assert!(!BackendConnection::is_valid(&mut conn).await);
    }

    #[tokio::test]
    async fn factory_can_be_forced_to_fail() {
        let factory = FakeConnectionFactory::new();
        assert!(ConnectionFactory::create(&factory).await.is_ok());
        factory.fail_creation();
        assert!(ConnectionFactory::create(&factory).await.is_err());
    }
}
