//! The backend's XA resource manager delegate (§4.7).
//!
//! Grounded in the `begin`/`end`/`prepare`/`commit`/`rollback`/`recover`
//! shape of a classic XA two-phase-commit participant; generalized here to
//! an SPI trait the registry dispatches through instead of a concrete
//! driver, since the underlying database's XA implementation is out of
//! scope (§1).

use std::sync::Arc;

use async_trait::async_trait;
use ojp_protocol::error::{Result, XaPrepareOutcome};
use ojp_protocol::rpc::XaFlags;
use ojp_protocol::xid::Xid;
use ojp_protocol::XaErrorCode;

/// A handle to the backend's XA resource manager for one pinned session.
///
/// Every method that operates on an established branch receives the
/// `Arc<Xid>` the registry stored at `start` rather than a freshly equal
/// value, so an implementation that needs driver-identity semantics
/// (§9 "Xid identity") can assert on it with [`Arc::ptr_eq`].
#[async_trait]
pub trait XaResource: Send + 'static {
    /// Stable identifier for the resource manager behind this session,
    /// used to answer `xaIsSameRm` without comparing opaque driver handles.
    fn resource_manager_id(&self) -> &str;

    /// `XA START`.
    async fn start(&mut self, xid: Arc<Xid>, flags: XaFlags) -> Result<()>;
    /// `XA END`.
    async fn end(&mut self, xid: &Arc<Xid>, flags: XaFlags) -> Result<()>;
    /// `XA PREPARE`.
    async fn prepare(&mut self, xid: &Arc<Xid>) -> Result<XaPrepareOutcome>;
    /// `XA COMMIT`.
    async fn commit(&mut self, xid: &Arc<Xid>, one_phase: bool) -> Result<()>;
    /// `XA ROLLBACK`.
    async fn rollback(&mut self, xid: &Arc<Xid>) -> Result<()>;
    /// `XA RECOVER`.
    async fn recover(&mut self, flag: XaFlags) -> Result<Vec<Xid>>;
    /// `XA FORGET` (heuristically-completed transactions; not modeled as a
    /// registry state, just forwarded).
    async fn forget(&mut self, xid: &Arc<Xid>) -> Result<()>;
    /// Set the backend-side transaction timeout for subsequent branches
    /// started on this resource.
    async fn set_transaction_timeout(&mut self, seconds: u32) -> Result<()>;
    /// Current backend-side transaction timeout, in seconds.
    async fn get_transaction_timeout(&mut self) -> Result<u32>;
}

/// Answer `xaIsSameRm` by comparing resource manager identifiers (§6).
#[must_use]
pub fn is_same_resource_manager(a: &str, b: &str) -> bool {
    a == b
}

/// Translate a caught backend error into the appropriate XA error code,
/// preserving the original as the cause (§4.7, §7).
#[must_use]
pub fn translate_backend_error(cause: ojp_protocol::OjpError) -> ojp_protocol::OjpError {
    use ojp_protocol::OjpError;
    match &cause {
        OjpError::Xa { .. } => cause,
        _ => OjpError::Xa {
            code: XaErrorCode::RmErr,
            cause: Some(Box::new(cause)),
        },
    }
}
