//! Cluster-Health Tracker (C2, §4.2): the server-side half of the
//! cluster-health propagation protocol.
//!
//! Every outbound RPC carries the client's current view of endpoint health
//! as a normalized string (§3). This tracker remembers the last string
//! observed per connection-hash and decides whether that view changed
//! enough to require a pool resize before the RPC's substantive work runs.

use dashmap::DashMap;

/// C2: one entry per connection-hash, holding the last cluster-health
/// string this server observed for it.
#[derive(Debug, Default)]
pub struct ClusterHealthTracker {
    last_known: DashMap<u64, String>,
}

impl ClusterHealthTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `health` as observed for `connection_hash` and report whether
    /// C4 must reconcile pool sizes before the RPC proceeds.
    ///
    /// Reconciliation fires whenever the string differs from the last one
    /// seen for this hash, *and* on first observation (§4.2 "first-report
    /// policy") — a restarted server has no prior string to compare against,
    /// but must still act on what it's told rather than silently adopt it.
    pub fn observe(&self, connection_hash: u64, health: &str) -> bool {
        match self.last_known.entry(connection_hash) {
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(health.to_string());
                tracing::info!(
                    connection_hash,
                    health,
                    "first cluster-health report for this connection-hash"
                );
                true
            }
            dashmap::mapref::entry::Entry::Occupied(mut slot) => {
                if slot.get() == health {
                    false
                } else {
                    tracing::info!(
                        connection_hash,
                        previous = slot.get().as_str(),
                        current = health,
                        "cluster-health changed, reconciliation required"
                    );
                    slot.insert(health.to_string());
                    true
                }
            }
        }
    }

    /// The last cluster-health string recorded for `connection_hash`, if any.
    #[must_use]
    pub fn last_known(&self, connection_hash: u64) -> Option<String> {
        self.last_known.get(&connection_hash).map(|v| v.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_report_always_triggers() {
        let tracker = ClusterHealthTracker::new();
        assert!(tracker.observe(1, "a:1(UP)"));
    }

    #[test]
    fn unchanged_report_does_not_trigger() {
        let tracker = ClusterHealthTracker::new();
        tracker.observe(1, "a:1(UP)");
        assert!(!tracker.observe(1, "a:1(UP)"));
    }

    #[test]
    fn changed_report_triggers_and_updates() {
        let tracker = ClusterHealthTracker::new();
        tracker.observe(1, "a:1(UP)");
        assert!(tracker.observe(1, "a:1(DOWN)"));
        assert_eq!(tracker.last_known(1), Some("a:1(DOWN)".to_string()));
    }

    #[test]
    fn distinct_hashes_are_independent() {
        let tracker = ClusterHealthTracker::new();
        tracker.observe(1, "a:1(UP)");
        assert!(tracker.observe(2, "a:1(UP)"));
    }
}
