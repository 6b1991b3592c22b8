//! Pool Coordinator (C4, §4.4): applies [`ojp_pool::coordinator`]'s resize
//! arithmetic to the actual non-XA and XA pools backing one connection-hash.

use std::sync::Arc;

use async_trait::async_trait;

use ojp_pool::backend::{ConnectionFactory, XaConnectionFactory};
use ojp_pool::coordinator::applied_limits;
use ojp_pool::non_xa::Pool;
use ojp_pool::xa::XaSessionPool;
use ojp_pool::Result;

/// A pool that can be resized by the coordinator, independent of which
/// concrete backend type it's parameterized over (§4.4 "the coordinator
/// instructs the pool to set max and min").
#[async_trait]
pub trait Resizable: Send + Sync {
    /// Apply the freshly computed `{appliedMax, appliedMin}`.
    async fn resize(&self, applied_max: u32, applied_min: u32) -> Result<()>;
}

#[async_trait]
impl<F: ConnectionFactory> Resizable for Pool<F> {
    async fn resize(&self, applied_max: u32, applied_min: u32) -> Result<()> {
        Pool::resize(self, applied_max, applied_min).await
    }
}

#[async_trait]
impl<F: XaConnectionFactory> Resizable for XaSessionPool<F> {
    async fn resize(&self, applied_max: u32, applied_min: u32) -> Result<()> {
        XaSessionPool::resize(self, applied_max, applied_min).await
    }
}

/// The globally-configured sizing for one connection-hash, before division
/// across healthy servers (§3 "pool coordinator view").
#[derive(Debug, Clone, Copy)]
pub struct ConfiguredSizing {
    /// `pool.maxTotal` (or `xa.pool.maxTotal`).
    pub max_total: u32,
    /// `pool.minIdle` (or `xa.pool.minIdle`).
    pub min_idle: u32,
}

/// C4: reconciles one or more [`Resizable`] pools against a healthy-server
/// count, applying the §4.4 ceil-division arithmetic. The actual resize
/// order (min-first on shrink, max-first on grow) is the pool's own
/// responsibility — see each `resize` impl in `ojp-pool`.
pub struct PoolCoordinator {
    sizing: ConfiguredSizing,
}

impl PoolCoordinator {
    /// Build a coordinator over one connection-hash's configured sizing.
    #[must_use]
    pub fn new(sizing: ConfiguredSizing) -> Self {
        Self { sizing }
    }

    /// Resize every pool in `pools` to this connection-hash's applied
    /// limits for `healthy_count`. Continues past an individual pool's
    /// resize failure so one misbehaving pool can't block the others;
    /// failures are logged and the first one is returned.
    pub async fn reconcile(
        &self,
        healthy_count: u32,
        pools: &[Arc<dyn Resizable>],
    ) -> Result<()> {
        let (applied_max, applied_min) =
            applied_limits(self.sizing.max_total, self.sizing.min_idle, healthy_count);

        tracing::info!(
            healthy_count,
            applied_max,
            applied_min,
            "reconciling pool sizes against cluster health"
        );

        let mut first_err = None;
        for pool in pools {
            if let Err(err) = pool.resize(applied_max, applied_min).await {
                tracing::warn!(error = %err, "pool resize failed during reconciliation");
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait as at;
    use ojp_pool::backend::{BackendConnection, ConnectionFactory as CF};
    use ojp_pool::config::PoolConfig;

    struct FakeConn;
    #[at]
    impl BackendConnection for FakeConn {
        async fn is_valid(&mut self) -> bool {
            true
        }
        async fn reset(&mut self) -> ojp_pool::Result<()> {
            Ok(())
        }
        async fn close(&mut self) {}
    }

    struct FakeFactory;
    #[at]
    impl CF for FakeFactory {
        type Connection = FakeConn;
        async fn create(&self) -> ojp_pool::Result<FakeConn> {
            Ok(FakeConn)
        }
    }

    #[tokio::test]
    async fn reconcile_divides_across_healthy_count() {
        let pool = Pool::new(
            FakeFactory,
            PoolConfig {
                max_total: 10,
                min_idle: 4,
                ..PoolConfig::default()
            },
        )
        .unwrap();

        let coordinator = PoolCoordinator::new(ConfiguredSizing {
            max_total: 10,
            min_idle: 4,
        });
        let pools: Vec<Arc<dyn Resizable>> = vec![Arc::new(pool.clone())];
        coordinator.reconcile(3, &pools).await.unwrap();

        let status = pool.status();
        assert_eq!(status.max, 4); // ceil(10/3)
    }
}
