//! Non-XA connection pool (§4.5).

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::backend::{BackendConnection, ConnectionFactory};
use crate::config::PoolConfig;
use crate::coordinator::{self, ResizeOrder};
use crate::error::{PoolError, Result};

struct IdleEntry<C> {
    conn: C,
    created_at: Instant,
    idle_since: Instant,
}

#[derive(Debug, Default)]
struct PoolMetricsInner {
    connections_created: u64,
    connections_closed: u64,
    checkouts_successful: u64,
    checkouts_failed: u64,
    resets_performed: u64,
    resets_failed: u64,
}

struct PoolInner<C> {
    config: RwLock<PoolConfig>,
    semaphore: Arc<Semaphore>,
    idle: Mutex<VecDeque<IdleEntry<C>>>,
    in_use: AtomicU32,
    closed: AtomicBool,
    created_at: Instant,
    metrics: Mutex<PoolMetricsInner>,
}

/// A pool of regular (non-XA) backend connections (§4.5).
///
/// `borrow`/`return` are serialized only at the per-connection level via
/// [`PooledConnection`]'s `Drop`; concurrent borrows and returns on
/// different connections proceed in parallel, as required by §5.
pub struct Pool<F: ConnectionFactory> {
    factory: Arc<F>,
    inner: Arc<PoolInner<F::Connection>>,
}

impl<F: ConnectionFactory> Clone for Pool<F> {
    fn clone(&self) -> Self {
        Self {
            factory: Arc::clone(&self.factory),
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: ConnectionFactory> Pool<F> {
    /// Create a new pool. Does not pre-warm; call [`Pool::resize`] with the
    /// desired `min_idle` afterward if eager warm-up is wanted.
    pub fn new(factory: F, config: PoolConfig) -> Result<Self> {
        config.validate()?;

        let inner = Arc::new(PoolInner {
            semaphore: Arc::new(Semaphore::new(config.max_total as usize)),
            idle: Mutex::new(VecDeque::new()),
            in_use: AtomicU32::new(0),
            closed: AtomicBool::new(false),
            created_at: Instant::now(),
            metrics: Mutex::new(PoolMetricsInner::default()),
            config: RwLock::new(config.clone()),
        });

        tracing::info!(
            max_total = config.max_total,
            min_idle = config.min_idle,
            "non-XA connection pool created"
        );

        let pool = Self {
            factory: Arc::new(factory),
            inner,
        };
        pool.spawn_reaper();
        Ok(pool)
    }

    /// Periodically evict idle connections past `idle_timeout`. A no-op if
    /// created outside a tokio runtime (e.g. directly in a test harness that
    /// only exercises `borrow`/`resize` synchronously).
    fn spawn_reaper(&self) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let inner = Arc::clone(&self.inner);
        handle.spawn(async move {
            loop {
                let idle_timeout = inner.config.read().idle_timeout;
                tokio::time::sleep(idle_timeout / 2).await;
                if inner.closed.load(Ordering::Acquire) {
                    return;
                }
                let mut expired = Vec::new();
                {
                    let mut idle = inner.idle.lock();
                    let kept: VecDeque<_> = idle
                        .drain(..)
                        .filter_map(|entry| {
                            if entry.idle_since.elapsed() > idle_timeout {
                                expired.push(entry);
                                None
                            } else {
                                Some(entry)
                            }
                        })
                        .collect();
                    *idle = kept;
                }
                if !expired.is_empty() {
                    tracing::debug!(count = expired.len(), "reaping idle connections");
                    for mut entry in expired {
                        entry.conn.close().await;
                        inner.metrics.lock().connections_closed += 1;
                    }
                }
            }
        });
    }

    /// Borrow a connection, blocking up to `connectionTimeout` (§4.5).
    pub async fn borrow(&self) -> Result<PooledConnection<F::Connection>> {
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
                // No idle connection: create one directly.
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
                return Ok(PooledConnection::new(conn, started, Arc::clone(&self.inner), permit));
            };

            if entry.created_at.elapsed() > max_lifetime {
                tracing::debug!("evicting connection past max_lifetime on borrow");
                entry.conn.close().await;
                self.inner.metrics.lock().connections_closed += 1;
                continue;
            }

            if entry.idle_since.elapsed() > idle_timeout {
                tracing::debug!("evicting connection past idle_timeout on borrow");
                entry.conn.close().await;
                self.inner.metrics.lock().connections_closed += 1;
                continue;
            }

            if validate_on_borrow && !entry.conn.is_valid().await {
                tracing::debug!("evicting invalid idle connection on borrow");
                entry.conn.close().await;
                self.inner.metrics.lock().connections_closed += 1;
                continue;
            }

            self.inner.in_use.fetch_add(1, Ordering::AcqRel);
            self.inner.metrics.lock().checkouts_successful += 1;
            return Ok(PooledConnection::new(
                entry.conn,
                entry.created_at,
                Arc::clone(&self.inner),
                permit,
            ));
        }
    }

    /// Resize the pool per §4.4: apply `max`/`min` in the order that avoids
    /// a transient `min > max` violation, then pre-warm up to the new
    /// `min_idle` if it increased.
    pub async fn resize(&self, applied_max: u32, applied_min: u32) -> Result<()> {
        let (old_max, old_min) = {
            let config = self.inner.config.read();
            (config.max_total, config.min_idle)
        };

        let order = coordinator::resize_order(old_max, applied_max);
        match order {
            ResizeOrder::MinThenMax => {
                self.apply_min(applied_min);
                self.apply_max(old_max, applied_max);
            }
            ResizeOrder::MaxThenMin => {
                self.apply_max(old_max, applied_max);
                self.apply_min(applied_min);
            }
        }

        tracing::info!(
            applied_max,
            applied_min,
            old_max,
            old_min,
            "non-XA pool resized"
        );

        if applied_min > old_min {
            self.pre_warm(applied_min).await;
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
                // Permits currently on loan are not revoked; capacity
                // shrinks naturally as they are returned (§4.6 applies the
                // same principle to the XA pool).
                self.inner
                    .semaphore
                    .forget_permits((old_max - new_max) as usize);
            }
            std::cmp::Ordering::Equal => {}
        }
    }

    fn apply_min(&self, new_min: u32) {
        self.inner.config.write().min_idle = new_min;
    }

    /// Eagerly create idle connections up to `target_min`. Under contention
    /// (a permit is not immediately available), the pool gives up rather
    /// than block — the fallback is that a subsequent `borrow` creates a
    /// connection directly when it finds the idle queue empty (§4.4).
    async fn pre_warm(&self, target_min: u32) {
        loop {
            let idle_len = self.inner.idle.lock().len() as u32;
            if idle_len >= target_min {
                return;
            }
            let Ok(permit) = Arc::clone(&self.inner.semaphore).try_acquire_owned() else {
                tracing::debug!("pre-warm contested, leaving direct-create fallback to borrowers");
                return;
            };
            match self.factory.create().await {
                Ok(conn) => {
                    self.inner.metrics.lock().connections_created += 1;
                    self.inner.idle.lock().push_back(IdleEntry {
                        conn,
                        created_at: Instant::now(),
                        idle_since: Instant::now(),
                    });
                    drop(permit);
                }
                Err(err) => {
                    tracing::warn!(error = %err, "pre-warm connection creation failed");
                    drop(permit);
                    return;
                }
            }
        }
    }

    /// Drain and destroy every idle connection; in-use connections are
    /// closed as they are returned.
    pub async fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        let mut idle = std::mem::take(&mut *self.inner.idle.lock());
        for entry in idle.drain(..) {
            let mut entry = entry;
            entry.conn.close().await;
            self.inner.metrics.lock().connections_closed += 1;
        }
        tracing::info!("non-XA connection pool closed");
    }

    /// Current pool status snapshot.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let config = self.inner.config.read();
        let in_use = self.inner.in_use.load(Ordering::Acquire);
        let available = self.inner.idle.lock().len() as u32;
        PoolStatus {
            available,
            in_use,
            total: available + in_use,
            max: config.max_total,
        }
    }

    /// Current pool metrics snapshot.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        let inner = self.inner.metrics.lock();
        PoolMetrics {
            connections_created: inner.connections_created,
            connections_closed: inner.connections_closed,
            checkouts_successful: inner.checkouts_successful,
            checkouts_failed: inner.checkouts_failed,
            resets_performed: inner.resets_performed,
            resets_failed: inner.resets_failed,
            uptime: self.inner.created_at.elapsed(),
        }
    }
}

/// Status information about a pool, mirroring the shape `ojp-server`
/// surfaces through `statsSnapshot` (SPEC_FULL §2).
#[derive(Debug, Clone, Copy)]
pub struct PoolStatus {
    /// Idle connections immediately available.
    pub available: u32,
    /// Connections currently borrowed.
    pub in_use: u32,
    /// Total connections (idle + in use).
    pub total: u32,
    /// Currently applied maximum.
    pub max: u32,
}

impl PoolStatus {
    /// Utilization percentage, `0.0` when `max` is `0`.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.max == 0 {
            return 0.0;
        }
        f64::from(self.in_use) / f64::from(self.max) * 100.0
    }
}

/// Metrics collected from a pool over its lifetime.
#[derive(Debug, Clone)]
pub struct PoolMetrics {
    /// Total connections created.
    pub connections_created: u64,
    /// Total connections closed (evicted or drained).
    pub connections_closed: u64,
    /// Successful borrow calls.
    pub checkouts_successful: u64,
    /// Failed borrow calls (timeout or creation failure).
    pub checkouts_failed: u64,
    /// Successful sanitizations on return.
    pub resets_performed: u64,
    /// Failed sanitizations on return (connection was destroyed).
    pub resets_failed: u64,
    /// Time since pool creation.
    pub uptime: Duration,
}

/// A connection borrowed from the pool. Returned to the pool (after
/// sanitization) when dropped.
pub struct PooledConnection<C: BackendConnection> {
    conn: Option<C>,
    created_at: Instant,
    borrowed_at: Instant,
    inner: Arc<PoolInner<C>>,
    permit: Option<OwnedSemaphorePermit>,
}

impl<C: BackendConnection> PooledConnection<C> {
    fn new(
        conn: C,
        created_at: Instant,
        inner: Arc<PoolInner<C>>,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        Self {
            conn: Some(conn),
            created_at,
            borrowed_at: Instant::now(),
            inner,
            permit: Some(permit),
        }
    }

    /// How long this connection has existed since creation.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Sanitize and return this connection to the pool explicitly. Prefer
    /// this over relying on `Drop` when the caller is already in an async
    /// context, since `Drop` can only spawn a best-effort background task.
    pub async fn release(mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };
        let permit = self.permit.take();
        self.inner.in_use.fetch_sub(1, Ordering::AcqRel);

        match conn.reset().await {
            Ok(()) => {
                self.inner.metrics.lock().resets_performed += 1;
                self.inner.idle.lock().push_back(IdleEntry {
                    conn,
                    created_at: self.created_at,
                    idle_since: Instant::now(),
                });
            }
            Err(err) => {
                tracing::warn!(error = %err, "connection sanitization failed, destroying");
                self.inner.metrics.lock().resets_failed += 1;
                conn.close().await;
                self.inner.metrics.lock().connections_closed += 1;
            }
        }
        drop(permit);
    }
}

impl<C: BackendConnection> Deref for PooledConnection<C> {
    type Target = C;

    fn deref(&self) -> &C {
        self.conn.as_ref().expect("connection taken before drop")
    }
}

impl<C: BackendConnection> DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut C {
        self.conn.as_mut().expect("connection taken before drop")
    }
}

impl<C: BackendConnection> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        let permit = self.permit.take();
        let inner = Arc::clone(&self.inner);
        let created_at = self.created_at;
        tracing::trace!(age_ms = self.borrowed_at.elapsed().as_millis(), "returning connection to pool");

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("dropping pooled connection outside a tokio runtime, connection leaked");
            return;
        };
        handle.spawn(async move {
            let mut conn = conn;
            inner.in_use.fetch_sub(1, Ordering::AcqRel);
            match conn.reset().await {
                Ok(()) => {
                    inner.metrics.lock().resets_performed += 1;
                    inner.idle.lock().push_back(IdleEntry {
                        conn,
                        created_at,
                        idle_since: Instant::now(),
                    });
                }
                Err(err) => {
                    tracing::warn!(error = %err, "connection sanitization failed, destroying");
                    inner.metrics.lock().resets_failed += 1;
                    conn.close().await;
                    inner.metrics.lock().connections_closed += 1;
                }
            }
            drop(permit);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU64;

    struct FakeConn {
        valid: bool,
        reset_ok: bool,
    }

    #[async_trait]
    impl BackendConnection for FakeConn {
        async fn is_valid(&mut self) -> bool {
            self.valid
        }
        async fn reset(&mut self) -> Result<()> {
            if self.reset_ok {
                Ok(())
            } else {
                Err(PoolError::SanitizeFailed("boom".into()))
            }
        }
        async fn close(&mut self) {}
    }

    struct FakeFactory {
        created: AtomicU64,
    }

    #[async_trait]
    impl ConnectionFactory for FakeFactory {
        type Connection = FakeConn;
        async fn create(&self) -> Result<FakeConn> {
            self.created.fetch_add(1, Ordering::Relaxed);
            Ok(FakeConn {
                valid: true,
                reset_ok: true,
            })
        }
    }

    #[tokio::test]
    async fn borrow_creates_when_idle_empty() {
        let pool = Pool::new(
            FakeFactory {
                created: AtomicU64::new(0),
            },
            PoolConfig {
                max_total: 2,
                min_idle: 0,
                ..PoolConfig::default()
            },
        )
        .unwrap();

        let conn = pool.borrow().await.unwrap();
        assert_eq!(pool.status().in_use, 1);
        conn.release().await;
        assert_eq!(pool.status().in_use, 0);
        assert_eq!(pool.status().available, 1);
    }

    #[tokio::test]
    async fn exhausted_when_no_permit_in_time() {
        let pool = Pool::new(
            FakeFactory {
                created: AtomicU64::new(0),
            },
            PoolConfig {
                max_total: 1,
                min_idle: 0,
                connection_timeout: Duration::from_millis(20),
                ..PoolConfig::default()
            },
        )
        .unwrap();

        let _held = pool.borrow().await.unwrap();
        let err = pool.borrow().await.unwrap_err();
        assert!(matches!(err, PoolError::Exhausted { .. }));
    }

    #[tokio::test]
    async fn resize_applies_order_without_error() {
        let pool = Pool::new(
            FakeFactory {
                created: AtomicU64::new(0),
            },
            PoolConfig {
                max_total: 10,
                min_idle: 2,
                ..PoolConfig::default()
            },
        )
        .unwrap();

        pool.resize(4, 1).await.unwrap();
        assert_eq!(pool.status().max, 4);
        pool.resize(8, 3).await.unwrap();
        assert_eq!(pool.status().max, 8);
    }
}
