//! Connection Redistributor (C10, §4.10): rebalances connections onto a
//! recovered endpoint by force-invalidating the overloaded survivors' excess.

use std::sync::Arc;

use ojp_protocol::EndpointAddr;

use crate::manager::MultinodeConnectionManager;
use crate::session_tracker::SessionTracker;

/// Configuration for C10 (§6 `redistribution.*`).
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct RedistributionConfig {
    /// Whether redistribution runs at all.
    pub enabled: bool,
    /// Upper bound on connections force-invalidated in one recovery event.
    pub max_close_per_recovery: u32,
}

impl Default for RedistributionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_close_per_recovery: 100,
        }
    }
}

/// C10: triggered by C9 on endpoint recovery.
pub struct ConnectionRedistributor {
    sessions: Arc<SessionTracker>,
    manager: Arc<MultinodeConnectionManager>,
    config: RedistributionConfig,
}

impl ConnectionRedistributor {
    /// Build a redistributor over the shared session tracker and manager.
    #[must_use]
    pub fn new(
        sessions: Arc<SessionTracker>,
        manager: Arc<MultinodeConnectionManager>,
        config: RedistributionConfig,
    ) -> Self {
        Self {
            sessions,
            manager,
            config,
        }
    }

    /// Run one redistribution pass across `healthy` endpoints (§4.10).
    /// `is_pinned` reports whether a connection is currently engaged in an
    /// active transaction on a pinned XA backend session and must be
    /// skipped (§4.10 "skipped and retried on the next recovery event").
    ///
    /// Returns the number of connections force-invalidated.
    pub fn redistribute(
        &self,
        healthy: &[EndpointAddr],
        is_pinned: impl Fn(uuid::Uuid) -> bool,
    ) -> usize {
        if !self.config.enabled || healthy.is_empty() {
            return 0;
        }

        let counts: Vec<(EndpointAddr, usize)> = healthy
            .iter()
            .map(|ep| (ep.clone(), self.sessions.session_count(ep)))
            .collect();
        let total: usize = counts.iter().map(|(_, n)| n).sum();
        let target = total / healthy.len();

        let mut invalidated = 0usize;
        'endpoints: for (ep, count) in &counts {
            if *count <= target {
                continue;
            }
            let excess = count - target;
            let bound = self.sessions.sessions_bound_to(ep);
            let mut closed_here = 0usize;
            for (connection, session) in bound {
                if closed_here >= excess {
                    break;
                }
                if invalidated >= self.config.max_close_per_recovery as usize {
                    break 'endpoints;
                }
                if is_pinned(session) {
                    continue;
                }
                if let Some(flag) = self.manager.force_invalid_flag(connection) {
                    flag.set_invalid();
                    closed_here += 1;
                    invalidated += 1;
                    tracing::debug!(%session, endpoint = %ep, "connection force-invalidated for redistribution");
                }
            }
        }
        invalidated
    }
}
