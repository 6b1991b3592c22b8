//! Pool sizing and timeout configuration (§6 "Configuration").

use std::time::Duration;

use crate::error::{PoolError, Result};

/// Configuration for a [`crate::non_xa::Pool`] or [`crate::xa::XaSessionPool`].
///
/// Mirrors the `pool.*` / `xa.pool.*` configuration keys from §6: the two
/// pool kinds share this shape, with the XA pool's keys falling back to the
/// non-XA ones when unset (resolved one level up, in `ojp-client`/`ojp-server`
/// config loading — this type only holds the resolved values).
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    /// Globally-configured maximum pool size, before per-endpoint division
    /// by the pool coordinator (§4.4). Also used directly as `appliedMax`
    /// when the pool is not under coordinator control.
    pub max_total: u32,
    /// Globally-configured minimum idle size, before coordinator division.
    pub min_idle: u32,
    /// Maximum time `borrow` blocks before failing with `POOL_EXHAUSTED`.
    pub connection_timeout: Duration,
    /// Maximum time an idle connection may sit before being reaped.
    pub idle_timeout: Duration,
    /// Maximum total lifetime of a connection before it is retired on next
    /// return, regardless of idle time.
    pub max_lifetime: Duration,
    /// Whether `isValid` (or the configured validation query) runs on borrow.
    pub validate_on_borrow: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_total: 10,
            min_idle: 1,
            connection_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
            validate_on_borrow: true,
        }
    }
}

impl PoolConfig {
    /// Validate internal consistency: `min_idle <= max_total`, and
    /// `max_total >= 1` so the pool coordinator's `ceil(.., 1)` floor (§4.4)
    /// is never violated by a zero-sized pool.
    pub fn validate(&self) -> Result<()> {
        if self.max_total == 0 {
            return Err(PoolError::InvalidConfig(
                "max_total must be at least 1".into(),
            ));
        }
        if self.min_idle > self.max_total {
            return Err(PoolError::InvalidConfig(format!(
                "min_idle ({}) must not exceed max_total ({})",
                self.min_idle, self.max_total
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_min_above_max() {
        let config = PoolConfig {
            max_total: 5,
            min_idle: 10,
            ..PoolConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_max() {
        let config = PoolConfig {
            max_total: 0,
            ..PoolConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
