//! Endpoint Registry (C1, §4.1): the ordered list of server endpoints a
//! client process knows about, with per-endpoint health state.
//!
//! One registry is meant to live for the lifetime of the driver, built once
//! from the bracketed endpoint list in the connection URL (§6) and shared by
//! C8/C9/C10 (§9: "one process-wide endpoint registry per URL").

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use ojp_protocol::EndpointAddr;

/// Health state for one endpoint, with the last-failure/last-success
/// timestamps the invariant in §3 is defined over: healthy unless
/// explicitly marked unhealthy, and either never failed or last success
/// postdates last failure.
struct EndpointState {
    addr: EndpointAddr,
    healthy: RwLock<bool>,
    last_failure: RwLock<Option<Instant>>,
    last_success: RwLock<Option<Instant>>,
}

/// A health-state transition a registered listener is notified of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthEvent {
    /// An endpoint went from healthy to unhealthy.
    MarkedUnhealthy,
    /// An endpoint went from unhealthy to healthy.
    MarkedHealthy,
}

/// Callback invoked on every health transition. Kept as a plain boxed
/// closure rather than a trait object hierarchy, matching the "listeners
/// may subscribe to health transitions" requirement of §4.1 without
/// inventing an observer framework the spec doesn't ask for.
type Listener = Box<dyn Fn(&EndpointAddr, HealthEvent) + Send + Sync + 'static>;

/// C1: the process-wide registry of server endpoints and their health.
pub struct EndpointRegistry {
    endpoints: Vec<EndpointState>,
    round_robin: AtomicUsize,
    listeners: RwLock<Vec<Listener>>,
    failure_epoch: AtomicU64,
}

impl std::fmt::Debug for EndpointRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointRegistry")
            .field("endpoints", &self.all_endpoints())
            .finish()
    }
}

impl EndpointRegistry {
    /// Build a registry from the parsed endpoint list (§6), all endpoints
    /// starting healthy.
    #[must_use]
    pub fn new(endpoints: Vec<EndpointAddr>) -> Self {
        Self {
            endpoints: endpoints
                .into_iter()
                .map(|addr| EndpointState {
                    addr,
                    healthy: RwLock::new(true),
                    last_failure: RwLock::new(None),
                    last_success: RwLock::new(None),
                })
                .collect(),
            round_robin: AtomicUsize::new(0),
            listeners: RwLock::new(Vec::new()),
            failure_epoch: AtomicU64::new(0),
        }
    }

    /// All endpoints this registry was built with, regardless of health.
    #[must_use]
    pub fn all_endpoints(&self) -> Vec<EndpointAddr> {
        self.endpoints.iter().map(|e| e.addr.clone()).collect()
    }

    /// Endpoints currently considered healthy, in registration order.
    #[must_use]
    pub fn healthy_endpoints(&self) -> Vec<EndpointAddr> {
        self.endpoints
            .iter()
            .filter(|e| *e.healthy.read())
            .map(|e| e.addr.clone())
            .collect()
    }

    /// Number of currently-healthy endpoints.
    #[must_use]
    pub fn healthy_count(&self) -> usize {
        self.endpoints.iter().filter(|e| *e.healthy.read()).count()
    }

    /// Mark `ep` unhealthy with the current timestamp as `lastFailure` and
    /// notify listeners (§4.8 step 1). No-op (other than the timestamp
    /// update) if `ep` is not part of this registry.
    pub fn mark_unhealthy(&self, ep: &EndpointAddr, cause: &str) {
        let Some(state) = self.find(ep) else {
            return;
        };
        let was_healthy = {
            let mut healthy = state.healthy.write();
            let was = *healthy;
            *healthy = false;
            was
        };
        *state.last_failure.write() = Some(Instant::now());
        self.failure_epoch.fetch_add(1, Ordering::AcqRel);

        if was_healthy {
            tracing::info!(endpoint = %ep, cause, "endpoint marked unhealthy");
            self.notify(ep, HealthEvent::MarkedUnhealthy);
        }
    }

    /// Mark `ep` healthy with the current timestamp as `lastSuccess`,
    /// satisfying the §3 invariant (`lastSuccess > lastFailure`), and notify
    /// listeners if this is a genuine recovery.
    pub fn mark_healthy(&self, ep: &EndpointAddr) {
        let Some(state) = self.find(ep) else {
            return;
        };
        let was_unhealthy = {
            let mut healthy = state.healthy.write();
            let was = !*healthy;
            *healthy = true;
            was
        };
        *state.last_success.write() = Some(Instant::now());

        if was_unhealthy {
            tracing::info!(endpoint = %ep, "endpoint marked healthy");
            self.notify(ep, HealthEvent::MarkedHealthy);
        }
    }

    /// Timestamp of `ep`'s last recorded failure, if any.
    #[must_use]
    pub fn last_failure(&self, ep: &EndpointAddr) -> Option<Instant> {
        self.find(ep).and_then(|s| *s.last_failure.read())
    }

    /// How long ago `ep` was last marked a failure, if ever.
    #[must_use]
    pub fn time_since_last_failure(&self, ep: &EndpointAddr) -> Option<Duration> {
        self.last_failure(ep).map(|t| t.elapsed())
    }

    /// Whether `ep` is currently healthy.
    #[must_use]
    pub fn is_healthy(&self, ep: &EndpointAddr) -> bool {
        self.find(ep).is_some_and(|s| *s.healthy.read())
    }

    /// Register a health-transition listener (§4.1, §9 cyclic-reference
    /// note: callers own deregistration by simply dropping every `Arc`
    /// that could invoke this registry again — there is no handle to
    /// explicitly remove a listener once added, matching the "weak /
    /// deregister-on-close" pattern being the caller's responsibility).
    pub fn add_listener(&self, listener: impl Fn(&EndpointAddr, HealthEvent) + Send + Sync + 'static) {
        self.listeners.write().push(Box::new(listener));
    }

    /// Next endpoint in round-robin order among `candidates` (§4.1 "round
    /// robin index is kept here"). Returns `None` if `candidates` is empty.
    #[must_use]
    pub fn next_round_robin<'a>(&self, candidates: &'a [EndpointAddr]) -> Option<&'a EndpointAddr> {
        if candidates.is_empty() {
            return None;
        }
        let idx = self.round_robin.fetch_add(1, Ordering::Relaxed) % candidates.len();
        candidates.get(idx)
    }

    fn find(&self, ep: &EndpointAddr) -> Option<&EndpointState> {
        self.endpoints.iter().find(|e| &e.addr == ep)
    }

    fn notify(&self, ep: &EndpointAddr, event: HealthEvent) {
        for listener in self.listeners.read().iter() {
            listener(ep, event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> EndpointRegistry {
        EndpointRegistry::new(vec![
            EndpointAddr::new("a", 1),
            EndpointAddr::new("b", 2),
            EndpointAddr::new("c", 3),
        ])
    }

    #[test]
    fn starts_fully_healthy() {
        let reg = registry();
        assert_eq!(reg.healthy_count(), 3);
    }

    #[test]
    fn mark_unhealthy_removes_from_healthy_set() {
        let reg = registry();
        reg.mark_unhealthy(&EndpointAddr::new("a", 1), "boom");
        assert_eq!(reg.healthy_count(), 2);
        assert!(!reg.is_healthy(&EndpointAddr::new("a", 1)));
    }

    #[test]
    fn mark_healthy_restores() {
        let reg = registry();
        let a = EndpointAddr::new("a", 1);
        reg.mark_unhealthy(&a, "boom");
        reg.mark_healthy(&a);
        assert_eq!(reg.healthy_count(), 3);
    }

    #[test]
    fn round_robin_cycles() {
        let reg = registry();
        let candidates = reg.healthy_endpoints();
        let first = reg.next_round_robin(&candidates).cloned();
        let second = reg.next_round_robin(&candidates).cloned();
        let third = reg.next_round_robin(&candidates).cloned();
        let fourth = reg.next_round_robin(&candidates).cloned();
        assert_eq!(first, fourth);
        assert_ne!(first, second);
        assert_ne!(second, third);
    }

    #[test]
    fn listener_fires_only_on_transition() {
        let reg = registry();
        let count = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let count2 = count.clone();
        reg.add_listener(move |_ep, _event| {
            count2.fetch_add(1, Ordering::SeqCst);
        });
        let a = EndpointAddr::new("a", 1);
        reg.mark_unhealthy(&a, "boom");
        reg.mark_unhealthy(&a, "boom again"); // no transition, no second fire
        assert_eq!(count.load(Ordering::SeqCst), 1);
        reg.mark_healthy(&a);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
