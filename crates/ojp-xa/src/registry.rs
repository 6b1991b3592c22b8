//! Xid → transaction-context registry and state machine (§4.7).

use std::sync::Arc;

use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use ojp_pool::{XaBackendConnection, XaPinnedSession};
use ojp_protocol::error::{OjpError, Result, XaPrepareOutcome};
use ojp_protocol::rpc::XaFlags;
use ojp_protocol::xid::Xid;
use ojp_protocol::XaErrorCode;

use crate::resource::{translate_backend_error, XaResource};

/// Where a transaction branch is within the XA state machine (§4.7). Only
/// non-terminal states are tracked here; terminal outcomes move the entry
/// to [`Outcome`] so a late, idempotent `commit`/`rollback` retry still
/// finds a record without the branch counting as active (P3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxState {
    Active,
    Ended,
    Suspended,
    Prepared,
}

/// Terminal outcome retained for idempotent replay (P3) and excluded from
/// `recover()` results (P4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Committed,
    RolledBack,
}

struct TxContext<C: XaResource + XaBackendConnection> {
    xid: Arc<Xid>,
    state: TxState,
    session: Arc<XaPinnedSession<C>>,
}

enum Entry<C: XaResource + XaBackendConnection> {
    Active(TxContext<C>),
    Completed(Outcome),
}

/// The XA transaction registry (C7): a concurrent map from `Xid` to its
/// branch context, delegating the actual 2PC verbs to each branch's bound
/// [`XaResource`].
pub struct XaRegistry<C: XaResource + XaBackendConnection> {
    entries: DashMap<Xid, Entry<C>>,
}

impl<C: XaResource + XaBackendConnection> Default for XaRegistry<C> {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl<C: XaResource + XaBackendConnection> XaRegistry<C> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `xaStart`. Returns the `Arc<Xid>` instance the registry will hand
    /// back on every subsequent call for this branch (§9).
    pub async fn start(
        &self,
        xid: Xid,
        flags: XaFlags,
        session: Arc<XaPinnedSession<C>>,
    ) -> Result<Arc<Xid>> {
        if flags.intersects(XaFlags::TMJOIN | XaFlags::TMRESUME) {
            return self.join_or_resume(xid, flags).await;
        }

        match self.entries.entry(xid.clone()) {
            MapEntry::Occupied(_) => Err(dup_id()),
            MapEntry::Vacant(vacant) => {
                let xid = Arc::new(xid);
                let result = session
                    .with_connection(|conn| {
                        let xid = Arc::clone(&xid);
                        async move { conn.start(xid, flags).await }
                    })
                    .await
                    .unwrap_or(Err(OjpError::SessionTerminated {
                        session_id: uuid::Uuid::nil(),
                    }));
                result?;
                vacant.insert(Entry::Active(TxContext {
                    xid: Arc::clone(&xid),
                    state: TxState::Active,
                    session,
                }));
                Ok(xid)
            }
        }
    }

    async fn join_or_resume(&self, xid: Xid, flags: XaFlags) -> Result<Arc<Xid>> {
        let (xid_arc, session) = {
            let entry = self.entries.get(&xid).ok_or_else(not_a)?;
            let Entry::Active(ctx) = &*entry else {
                return Err(not_a());
            };

            let required = if flags.contains(XaFlags::TMJOIN) {
                TxState::Ended
            } else {
                TxState::Suspended
            };
            if ctx.state != required {
                return Err(proto());
            }
            (Arc::clone(&ctx.xid), Arc::clone(&ctx.session))
        };

        session
            .with_connection(|conn| {
                let xid_arc = Arc::clone(&xid_arc);
                async move { conn.start(xid_arc, flags).await }
            })
            .await
            .expect("session pinned while context active")?;

        if let Some(mut entry) = self.entries.get_mut(&xid) {
            if let Entry::Active(ctx) = &mut *entry {
                ctx.state = TxState::Active;
            }
        }
        Ok(xid_arc)
    }

    /// `xaEnd`.
    pub async fn end(&self, xid: &Xid, flags: XaFlags) -> Result<()> {
        let (xid_arc, session) = {
            let entry = self.entries.get(xid).ok_or_else(not_a)?;
            let Entry::Active(ctx) = &*entry else {
                return Err(not_a());
            };
            if ctx.state != TxState::Active {
                return Err(proto());
            }
            (Arc::clone(&ctx.xid), Arc::clone(&ctx.session))
        };

        session
            .with_connection(|conn| {
                let xid_arc = Arc::clone(&xid_arc);
                async move { conn.end(&xid_arc, flags).await }
            })
            .await
            .expect("session pinned while context active")?;

        let next = if flags.contains(XaFlags::TMSUSPEND) {
            TxState::Suspended
        } else {
            TxState::Ended
        };
        if let Some(mut entry) = self.entries.get_mut(xid) {
            if let Entry::Active(ctx) = &mut *entry {
                ctx.state = next;
            }
        }
        Ok(())
    }

    /// `xaPrepare`.
    pub async fn prepare(&self, xid: &Xid) -> Result<XaPrepareOutcome> {
        let (xid_arc, session) = {
            let entry = self.entries.get(xid).ok_or_else(not_a)?;
            let Entry::Active(ctx) = &*entry else {
                return Err(not_a());
            };
            if ctx.state != TxState::Ended {
                return Err(proto());
            }
            (Arc::clone(&ctx.xid), Arc::clone(&ctx.session))
        };

        let outcome = session
            .with_connection(|conn| {
                let xid_arc = Arc::clone(&xid_arc);
                async move { conn.prepare(&xid_arc).await }
            })
            .await
            .expect("session pinned while context active")
            .map_err(translate_backend_error)?;

        match outcome {
            XaPrepareOutcome::Ok => {
                if let Some(mut entry) = self.entries.get_mut(xid) {
                    if let Entry::Active(ctx) = &mut *entry {
                        ctx.state = TxState::Prepared;
                    }
                }
            }
            XaPrepareOutcome::ReadOnly => {
                self.retire(xid, Outcome::Committed, &session).await;
            }
        }
        Ok(outcome)
    }

    /// `xaCommit`. Idempotent once the branch has reached any terminal
    /// outcome: a `commit` after a prior `commit` *or* `rollback` both
    /// succeed without touching the backend again (P3, §8).
    pub async fn commit(&self, xid: &Xid, one_phase: bool) -> Result<()> {
        if let Some(entry) = self.entries.get(xid) {
            if let Entry::Completed(_) = &*entry {
                return Ok(());
            }
        }

        let (xid_arc, session) = {
            let entry = self.entries.get(xid).ok_or_else(not_a)?;
            let Entry::Active(ctx) = &*entry else {
                return Err(not_a());
            };
            let valid_from = if one_phase {
                matches!(ctx.state, TxState::Ended)
            } else {
                matches!(ctx.state, TxState::Prepared)
            };
            if !valid_from {
                return Err(proto());
            }
            (Arc::clone(&ctx.xid), Arc::clone(&ctx.session))
        };

        let outcome = session
            .with_connection(|conn| {
                let xid_arc = Arc::clone(&xid_arc);
                async move { conn.commit(&xid_arc, one_phase).await }
            })
            .await
            .expect("session pinned while context active");

        match outcome {
            Ok(()) => {
                self.retire(xid, Outcome::Committed, &session).await;
                Ok(())
            }
            Err(err) => {
                // Remove the context but leave the backend session pinned;
                // the owning logical connection will close it normally (§4.7).
                self.entries.remove(xid);
                Err(translate_backend_error(err))
            }
        }
    }

    /// `xaRollback`. Idempotent once the branch has reached any terminal
    /// outcome, symmetrically with [`Self::commit`] (P3, §8).
    pub async fn rollback(&self, xid: &Xid) -> Result<()> {
        if let Some(entry) = self.entries.get(xid) {
            if let Entry::Completed(_) = &*entry {
                return Ok(());
            }
        }

        let (xid_arc, session) = {
            let entry = self.entries.get(xid).ok_or_else(not_a)?;
            let Entry::Active(ctx) = &*entry else {
                return Err(not_a());
            };
            if !matches!(ctx.state, TxState::Active | TxState::Ended | TxState::Prepared) {
                return Err(proto());
            }
            (Arc::clone(&ctx.xid), Arc::clone(&ctx.session))
        };

        let outcome = session
            .with_connection(|conn| {
                let xid_arc = Arc::clone(&xid_arc);
                async move { conn.rollback(&xid_arc).await }
            })
            .await
            .expect("session pinned while context active");

        match outcome {
            Ok(()) => {
                self.retire(xid, Outcome::RolledBack, &session).await;
                Ok(())
            }
            Err(err) => {
                self.entries.remove(xid);
                Err(translate_backend_error(err))
            }
        }
    }

    /// `xaRecover`. Borrows a throw-away backend session, delegates to the
    /// backend, and releases the session immediately — no branch binding
    /// occurs (§4.7).
    pub async fn recover(
        &self,
        throwaway_session: Arc<XaPinnedSession<C>>,
        flag: XaFlags,
    ) -> Result<Vec<Xid>> {
        let result = throwaway_session
            .with_connection(|conn| async move { conn.recover(flag).await })
            .await
            .expect("freshly borrowed session is present");

        throwaway_session.mark_transaction_terminal().await;
        throwaway_session.mark_connection_closed().await;

        result
    }

    /// `xaForget`.
    pub async fn forget(&self, xid: &Xid) -> Result<()> {
        let (xid_arc, session) = {
            let entry = self.entries.get(xid);
            match entry.as_deref() {
                Some(Entry::Active(ctx)) => (Arc::clone(&ctx.xid), Arc::clone(&ctx.session)),
                _ => return Ok(()),
            }
        };
        session
            .with_connection(|conn| {
                let xid_arc = Arc::clone(&xid_arc);
                async move { conn.forget(&xid_arc).await }
            })
            .await
            .expect("session pinned while context active")?;
        self.entries.remove(xid);
        Ok(())
    }

    /// Number of branches currently tracked as non-terminal (for tests and
    /// diagnostics; production code should prefer `recover` for durability
    /// guarantees rather than polling this).
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(*e.value(), Entry::Active(_)))
            .count()
    }

    async fn retire(&self, xid: &Xid, outcome: Outcome, session: &Arc<XaPinnedSession<C>>) {
        self.entries.insert(xid.clone(), Entry::Completed(outcome));
        session.mark_transaction_terminal().await;
    }
}

fn dup_id() -> OjpError {
    OjpError::Xa {
        code: XaErrorCode::DupId,
        cause: None,
    }
}

fn not_a() -> OjpError {
    OjpError::Xa {
        code: XaErrorCode::NotA,
        cause: None,
    }
}

fn proto() -> OjpError {
    OjpError::Xa {
        code: XaErrorCode::Proto,
        cause: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ojp_pool::{PoolConfig, XaConnectionFactory, XaSessionPool};
    use std::sync::atomic::AtomicBool as StdAtomicBool;

    struct FakeConn {
        rm_id: &'static str,
        prepare_read_only: bool,
        fail_commit: StdAtomicBool,
    }

    #[async_trait]
    impl XaBackendConnection for FakeConn {
        async fn is_valid(&mut self) -> bool {
            true
        }
        async fn sanitize(&mut self) -> ojp_pool::Result<()> {
            Ok(())
        }
        async fn close(&mut self) {}
    }

    #[async_trait]
    impl XaResource for FakeConn {
        fn resource_manager_id(&self) -> &str {
            self.rm_id
        }
        async fn start(&mut self, _xid: Arc<Xid>, _flags: XaFlags) -> Result<()> {
            Ok(())
        }
        async fn end(&mut self, _xid: &Arc<Xid>, _flags: XaFlags) -> Result<()> {
            Ok(())
        }
        async fn prepare(&mut self, _xid: &Arc<Xid>) -> Result<XaPrepareOutcome> {
            Ok(if self.prepare_read_only {
                XaPrepareOutcome::ReadOnly
            } else {
                XaPrepareOutcome::Ok
            })
        }
        async fn commit(&mut self, _xid: &Arc<Xid>, _one_phase: bool) -> Result<()> {
            if self.fail_commit.load(std::sync::atomic::Ordering::Acquire) {
                Err(OjpError::Configuration("backend commit failed".into()))
            } else {
                Ok(())
            }
        }
        async fn rollback(&mut self, _xid: &Arc<Xid>) -> Result<()> {
            Ok(())
        }
        async fn recover(&mut self, _flag: XaFlags) -> Result<Vec<Xid>> {
            Ok(Vec::new())
        }
        async fn forget(&mut self, _xid: &Arc<Xid>) -> Result<()> {
            Ok(())
        }
        async fn set_transaction_timeout(&mut self, _seconds: u32) -> Result<()> {
            Ok(())
        }
        async fn get_transaction_timeout(&mut self) -> Result<u32> {
            Ok(60)
        }
    }

    struct FakeFactory {
        prepare_read_only: bool,
    }

    #[async_trait]
    impl XaConnectionFactory for FakeFactory {
        type Connection = FakeConn;
        async fn create(&self) -> ojp_pool::Result<FakeConn> {
            Ok(FakeConn {
                rm_id: "fake-rm",
                prepare_read_only: self.prepare_read_only,
                fail_commit: StdAtomicBool::new(false),
            })
        }
    }

    fn test_xid(n: u8) -> Xid {
        Xid::new(1, vec![n], vec![1])
    }

    async fn new_pool(prepare_read_only: bool) -> XaSessionPool<FakeFactory> {
        XaSessionPool::new(
            FakeFactory { prepare_read_only },
            PoolConfig {
                max_total: 4,
                min_idle: 0,
                ..PoolConfig::default()
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn concurrent_start_exactly_one_succeeds() {
        let pool = new_pool(false).await;
        let registry: Arc<XaRegistry<FakeConn>> = Arc::new(XaRegistry::new());
        let xid = test_xid(1);

        let session_a = pool.borrow().await.unwrap();
        let session_b = pool.borrow().await.unwrap();

        let a = registry.start(xid.clone(), XaFlags::TMNOFLAGS, session_a).await;
        let b = registry.start(xid, XaFlags::TMNOFLAGS, session_b).await;

        assert!(a.is_ok());
        match b {
            Err(OjpError::Xa {
                code: XaErrorCode::DupId,
                ..
            }) => {}
            other => panic!("expected XAER_DUPID, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn commit_is_idempotent_after_terminal() {
        let pool = new_pool(false).await;
        let registry: XaRegistry<FakeConn> = XaRegistry::new();
        let xid = test_xid(2);
        let session = pool.borrow().await.unwrap();

        registry.start(xid.clone(), XaFlags::TMNOFLAGS, session).await.unwrap();
        registry.end(&xid, XaFlags::TMSUCCESS).await.unwrap();
        registry.commit(&xid, true).await.unwrap();

        // A retried commit for the same (now-terminal) branch must succeed
        // without touching the backend again (P3).
        registry.commit(&xid, true).await.unwrap();
        assert_eq!(registry.active_count(), 0);
    }

    #[tokio::test]
    async fn rollback_after_commit_succeeds_without_touching_backend() {
        let pool = new_pool(false).await;
        let registry: XaRegistry<FakeConn> = XaRegistry::new();
        let xid = test_xid(10);
        let session = pool.borrow().await.unwrap();

        registry.start(xid.clone(), XaFlags::TMNOFLAGS, session).await.unwrap();
        registry.end(&xid, XaFlags::TMSUCCESS).await.unwrap();
        registry.commit(&xid, true).await.unwrap();

        // P3: a subsequent rollback of an already-committed branch also
        // succeeds, not just a repeated commit.
        registry.rollback(&xid).await.unwrap();
    }

    #[tokio::test]
    async fn commit_after_rollback_succeeds_without_touching_backend() {
        let pool = new_pool(false).await;
        let registry: XaRegistry<FakeConn> = XaRegistry::new();
        let xid = test_xid(11);
        let session = pool.borrow().await.unwrap();

        registry.start(xid.clone(), XaFlags::TMNOFLAGS, session).await.unwrap();
        registry.end(&xid, XaFlags::TMSUCCESS).await.unwrap();
        registry.rollback(&xid).await.unwrap();

        registry.commit(&xid, true).await.unwrap();
    }

    #[tokio::test]
    async fn rollback_is_idempotent_after_terminal() {
        let pool = new_pool(false).await;
        let registry: XaRegistry<FakeConn> = XaRegistry::new();
        let xid = test_xid(3);
        let session = pool.borrow().await.unwrap();

        registry.start(xid.clone(), XaFlags::TMNOFLAGS, session).await.unwrap();
        registry.end(&xid, XaFlags::TMSUCCESS).await.unwrap();
        registry.rollback(&xid).await.unwrap();
        registry.rollback(&xid).await.unwrap();
        assert_eq!(registry.active_count(), 0);
    }

    #[tokio::test]
    async fn prepare_read_only_retires_immediately() {
        let pool = new_pool(true).await;
        let registry: XaRegistry<FakeConn> = XaRegistry::new();
        let xid = test_xid(4);
        let session = pool.borrow().await.unwrap();

        registry.start(xid.clone(), XaFlags::TMNOFLAGS, session).await.unwrap();
        registry.end(&xid, XaFlags::TMSUCCESS).await.unwrap();
        let outcome = registry.prepare(&xid).await.unwrap();
        assert_eq!(outcome, XaPrepareOutcome::ReadOnly);
        assert_eq!(registry.active_count(), 0);

        // A second prepare-less commit for the already-retired (committed)
        // branch is still idempotent.
        registry.commit(&xid, false).await.unwrap();
    }

    #[tokio::test]
    async fn start_returns_the_same_xid_instance_passed_to_backend() {
        let pool = new_pool(false).await;
        let registry: XaRegistry<FakeConn> = XaRegistry::new();
        let xid = test_xid(5);

        let session = pool.borrow().await.unwrap();
        let started = registry.start(xid, XaFlags::TMNOFLAGS, session).await.unwrap();
        let again = registry.start(
            test_xid(5),
            XaFlags::TMNOFLAGS,
            pool.borrow().await.unwrap(),
        );
        // A structurally-equal Xid is rejected as a duplicate, not treated
        // as a fresh branch — proving the registry is keying by value while
        // still handing back the one `Arc<Xid>` it minted at `start` (§9).
        assert!(matches!(
            again.await,
            Err(OjpError::Xa {
                code: XaErrorCode::DupId,
                ..
            })
        ));
        assert_eq!(started.format_id, 1);
    }

    #[tokio::test]
    async fn unknown_xid_operations_report_not_a() {
        let registry: XaRegistry<FakeConn> = XaRegistry::new();
        let xid = test_xid(9);
        assert!(matches!(
            registry.end(&xid, XaFlags::TMSUCCESS).await,
            Err(OjpError::Xa {
                code: XaErrorCode::NotA,
                ..
            })
        ));
    }
}
