//! XA backend session pool and dual-condition release (§4.6).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::backend::{XaBackendConnection, XaConnectionFactory};
use crate::config::PoolConfig;
use crate::coordinator::{self, ResizeOrder};
use crate::error::{PoolError, Result};

struct XaIdleEntry<C> {
    conn: C,
    created_at: Instant,
    idle_since: Instant,
}

#[derive(Debug, Default)]
struct XaPoolMetricsInner {
    connections_created: u64,
    connections_closed: u64,
    checkouts_successful: u64,
    checkouts_failed: u64,
    sanitizations_performed: u64,
    sanitizations_failed: u64,
}

struct XaPoolInner<C> {
    config: RwLock<PoolConfig>,
    semaphore: Arc<Semaphore>,
    idle: Mutex<VecDeque<XaIdleEntry<C>>>,
    in_use: AtomicU32,
    closed: AtomicBool,
    created_at: Instant,
    metrics: Mutex<XaPoolMetricsInner>,
}

/// A pool of long-lived backend XA connections, released only under the
/// dual condition described in §4.6.
pub struct XaSessionPool<F: XaConnectionFactory> {
    factory: Arc<F>,
    inner: Arc<XaPoolInner<F::Connection>>,
}

impl<F: XaConnectionFactory> Clone for XaSessionPool<F> {
    fn clone(&self) -> Self {
        Self {
            factory: Arc::clone(&self.factory),
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: XaConnectionFactory> XaSessionPool<F> {
    /// Create a new XA backend session pool.
    pub fn new(factory: F, config: PoolConfig) -> Result<Self> {
        config.validate()?;

        let inner = Arc::new(XaPoolInner {
            semaphore: Arc::new(Semaphore::new(config.max_total as usize)),
            idle: Mutex::new(VecDeque::new()),
            in_use: AtomicU32::new(0),
            closed: AtomicBool::new(false),
            created_at: Instant::now(),
            metrics: Mutex::new(XaPoolMetricsInner::default()),
            config: RwLock::new(config.clone()),
        });

        tracing::info!(
            max_total = config.max_total,
            min_idle = config.min_idle,
            "XA backend session pool created"
        );

        Ok(Self {
            factory: Arc::new(factory),
            inner,
        })
    }

    /// Borrow a backend session. The caller (the transaction registry, C7)
    /// is responsible for calling [`XaPinnedSession::mark_transaction_terminal`]
    /// and [`XaPinnedSession::mark_connection_closed`] as each condition is
    /// reached; the session returns to the pool exactly when both have been
    /// called, never earlier (§4.6).
    ///
    /// For a throw-away session (e.g. `recover`, §4.7), call both marks
    /// immediately after use to release it right away — no special-casing
    /// is needed in the pool itself.
    pub async fn borrow(&self) -> Result<Arc<XaPinnedSession<F::Connection>>> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(PoolError::Closed);
        }

        let timeout = self.inner.config.read().connection_timeout;
        let started = Instant::now();

        let permit = match tokio::time::timeout(
            timeout,
            Arc::clone(&self.inner.semaphore).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            _ => {
                self.inner.metrics.lock().checkouts_failed += 1;
                let config = self.inner.config.read();
                return Err(PoolError::Exhausted {
                    waited_ms: started.elapsed().as_millis() as u64,
                    in_use: self.inner.in_use.load(Ordering::Acquire),
                    max: config.max_total,
                });
            }
        };

        let validate_on_borrow = self.inner.config.read().validate_on_borrow;
        let max_lifetime = self.inner.config.read().max_lifetime;
        let idle_timeout = self.inner.config.read().idle_timeout;

        loop {
            let candidate = self.inner.idle.lock().pop_front();
            let Some(mut entry) = candidate else {
                let conn = match self.factory.create().await {
                    Ok(conn) => conn,
                    Err(err) => {
                        self.inner.metrics.lock().checkouts_failed += 1;
                        return Err(err);
                    }
                };
                self.inner.metrics.lock().connections_created += 1;
                self.inner.in_use.fetch_add(1, Ordering::AcqRel);
                self.inner.metrics.lock().checkouts_successful += 1;
                return Ok(XaPinnedSession::new(conn, started, Arc::clone(&self.inner), permit));
            };

            if entry.created_at.elapsed() > max_lifetime || entry.idle_since.elapsed() > idle_timeout {
                tracing::debug!("evicting XA backend session past lifetime/idle bound on borrow");
                entry.conn.close().await;
                self.inner.metrics.lock().connections_closed += 1;
                continue;
            }

            if validate_on_borrow && !entry.conn.is_valid().await {
                tracing::debug!("evicting invalid idle XA backend session on borrow");
                entry.conn.close().await;
                self.inner.metrics.lock().connections_closed += 1;
                continue;
            }

            self.inner.in_use.fetch_add(1, Ordering::AcqRel);
            self.inner.metrics.lock().checkouts_successful += 1;
            return Ok(XaPinnedSession::new(
                entry.conn,
                entry.created_at,
                Arc::clone(&self.inner),
                permit,
            ));
        }
    }

    /// Resize per §4.4. Borrowed (pinned) sessions are never force-evicted;
    /// shrinkage happens naturally as they satisfy the dual condition and
    /// return (§4.6).
    pub async fn resize(&self, applied_max: u32, applied_min: u32) -> Result<()> {
        let old_max = self.inner.config.read().max_total;
        let old_min = self.inner.config.read().min_idle;

        match coordinator::resize_order(old_max, applied_max) {
            ResizeOrder::MinThenMax => {
                self.inner.config.write().min_idle = applied_min;
                self.apply_max(old_max, applied_max);
            }
            ResizeOrder::MaxThenMin => {
                self.apply_max(old_max, applied_max);
                self.inner.config.write().min_idle = applied_min;
            }
        }

        tracing::info!(applied_max, applied_min, old_max, old_min, "XA pool resized");

        if applied_max < old_max {
            self.evict_surplus_idle(applied_max).await;
        }
        Ok(())
    }

    fn apply_max(&self, old_max: u32, new_max: u32) {
        self.inner.config.write().max_total = new_max;
        match new_max.cmp(&old_max) {
            std::cmp::Ordering::Greater => {
                self.inner.semaphore.add_permits((new_max - old_max) as usize);
            }
            std::cmp::Ordering::Less => {
                self.inner
                    .semaphore
                    .forget_permits((old_max - new_max) as usize);
            }
            std::cmp::Ordering::Equal => {}
        }
    }

    /// Evict idle sessions beyond the new max, per §4.6 ("surplus idle
    /// sessions may be evicted; evicted sessions close their XAConnection").
    async fn evict_surplus_idle(&self, applied_max: u32) {
        let mut to_close = Vec::new();
        {
            let mut idle = self.inner.idle.lock();
            while idle.len() as u32 + self.inner.in_use.load(Ordering::Acquire) > applied_max {
                let Some(entry) = idle.pop_back() else {
                    break;
                };
                to_close.push(entry);
            }
        }
        for mut entry in to_close {
            entry.conn.close().await;
            self.inner.metrics.lock().connections_closed += 1;
        }
    }

    /// Drain and destroy every idle session; pinned sessions close as they
    /// satisfy the dual condition after this call.
    pub async fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        let mut idle = std::mem::take(&mut *self.inner.idle.lock());
        for entry in idle.drain(..) {
            let mut entry = entry;
            entry.conn.close().await;
            self.inner.metrics.lock().connections_closed += 1;
        }
        tracing::info!("XA backend session pool closed");
    }

    /// Current pool status snapshot.
    #[must_use]
    pub fn status(&self) -> crate::non_xa::PoolStatus {
        let config = self.inner.config.read();
        let in_use = self.inner.in_use.load(Ordering::Acquire);
        let available = self.inner.idle.lock().len() as u32;
        crate::non_xa::PoolStatus {
            available,
            in_use,
            total: available + in_use,
            max: config.max_total,
        }
    }
}

/// A backend XA session pinned to one logical XA connection until the
/// dual condition in §4.6 is satisfied.
pub struct XaPinnedSession<C: XaBackendConnection> {
    conn: tokio::sync::Mutex<Option<C>>,
    created_at: Instant,
    txn_terminal: AtomicBool,
    connection_closed: AtomicBool,
    released: AtomicBool,
    pool: Arc<XaPoolInner<C>>,
    permit: Mutex<Option<OwnedSemaphorePermit>>,
}

impl<C: XaBackendConnection> XaPinnedSession<C> {
    fn new(
        conn: C,
        created_at: Instant,
        pool: Arc<XaPoolInner<C>>,
        permit: OwnedSemaphorePermit,
    ) -> Arc<Self> {
        Arc::new(Self {
            conn: tokio::sync::Mutex::new(Some(conn)),
            created_at,
            txn_terminal: AtomicBool::new(false),
            connection_closed: AtomicBool::new(false),
            released: AtomicBool::new(false),
            pool,
            permit: Mutex::new(Some(permit)),
        })
    }

    /// Run `f` against the pinned backend connection, awaiting the future
    /// it returns while holding the session's (async-aware) lock. Used by
    /// the transaction registry to delegate XA verbs to the backend
    /// without ever holding a synchronous lock across an `.await` (§5).
    pub async fn with_connection<R, Fut>(&self, f: impl FnOnce(&mut C) -> Fut) -> Option<R>
    where
        Fut: std::future::Future<Output = R>,
    {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut()?;
        Some(f(conn).await)
    }

    /// Mark the Xid bound to this session as having reached a terminal
    /// state (committed, rolled back, or prepared read-only). Triggers
    /// release if the logical connection is already closed.
    pub async fn mark_transaction_terminal(self: &Arc<Self>) {
        self.txn_terminal.store(true, Ordering::Release);
        self.maybe_release().await;
    }

    /// Mark the logical XA connection on the client side as closed.
    /// Triggers release if the transaction is already terminal.
    pub async fn mark_connection_closed(self: &Arc<Self>) {
        self.connection_closed.store(true, Ordering::Release);
        self.maybe_release().await;
    }

    /// Whether both release conditions currently hold.
    #[must_use]
    pub fn is_releasable(&self) -> bool {
        self.txn_terminal.load(Ordering::Acquire) && self.connection_closed.load(Ordering::Acquire)
    }

    async fn maybe_release(self: &Arc<Self>) {
        if !self.is_releasable() {
            return;
        }
        if self
            .released
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let Some(mut conn) = self.conn.lock().await.take() else {
            return;
        };
        self.pool.in_use.fetch_sub(1, Ordering::AcqRel);

        // §4.6: sanitization failure is logged but non-fatal.
        match conn.sanitize().await {
            Ok(()) => {
                self.pool.metrics.lock().sanitizations_performed += 1;
            }
            Err(err) => {
                tracing::warn!(error = %err, "XA session sanitization failed, returning anyway");
                self.pool.metrics.lock().sanitizations_failed += 1;
            }
        }

        if self.pool.closed.load(Ordering::Acquire) {
            conn.close().await;
            self.pool.metrics.lock().connections_closed += 1;
        } else {
            self.pool.idle.lock().push_back(XaIdleEntry {
                conn,
                created_at: self.created_at,
                idle_since: Instant::now(),
            });
        }
        drop(self.permit.lock().take());
    }
}
