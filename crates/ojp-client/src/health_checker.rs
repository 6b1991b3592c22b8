//! Health Checker (C9, §4.9): periodic probing of unhealthy endpoints.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;

use ojp_protocol::EndpointAddr;

use crate::endpoint_registry::EndpointRegistry;

/// Timing configuration for C9 (§4.9, §6 `health.check.*`).
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct HealthCheckConfig {
    /// How often the scheduler wakes to scan for endpoints due a probe.
    pub check_interval: Duration,
    /// How long an endpoint must have been failed before it's re-probed.
    pub threshold: Duration,
    /// Per-probe transport timeout.
    pub probe_timeout: Duration,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_millis(5000),
            threshold: Duration::from_millis(5000),
            probe_timeout: Duration::from_millis(5000),
        }
    }
}

/// A minimal `connect` + `terminateSession` round trip against one
/// endpoint (§4.9), abstracted so the scheduler doesn't depend on the
/// concrete RPC dispatch path.
#[async_trait]
pub trait EndpointProber: Send + Sync + 'static {
    /// Attempt the probe; `true` on success.
    async fn probe(&self, endpoint: &EndpointAddr) -> bool;
}

type RecoveryListener = dyn Fn(EndpointAddr) + Send + Sync + 'static;

/// C9: a single background scheduler that periodically re-probes every
/// currently-unhealthy endpoint whose failure is older than the threshold.
pub struct HealthChecker<P: EndpointProber> {
    endpoints: Arc<EndpointRegistry>,
    prober: Arc<P>,
    config: HealthCheckConfig,
    in_flight: DashMap<EndpointAddr, ()>,
    stopped: Arc<AtomicBool>,
    on_recovered: RwLock<Option<Arc<RecoveryListener>>>,
}

impl<P: EndpointProber> HealthChecker<P> {
    /// Build a checker over the shared registry.
    #[must_use]
    pub fn new(endpoints: Arc<EndpointRegistry>, prober: Arc<P>, config: HealthCheckConfig) -> Self {
        Self {
            endpoints,
            prober,
            config,
            in_flight: DashMap::new(),
            stopped: Arc::new(AtomicBool::new(false)),
            on_recovered: RwLock::new(None),
        }
    }

    /// Start the scheduler as a background task, running until [`Self::stop`]
    /// is called (§4.9 "must stop on driver close"). `on_recovered` is
    /// invoked with each endpoint that transitions back to healthy, to
    /// trigger C10's redistribution.
    pub fn spawn(
        self: &Arc<Self>,
        on_recovered: impl Fn(EndpointAddr) + Send + Sync + 'static,
    ) -> tokio::task::JoinHandle<()> {
        *self.on_recovered.write() = Some(Arc::new(on_recovered));
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.config.check_interval);
            loop {
                ticker.tick().await;
                if this.stopped.load(Ordering::Acquire) {
                    break;
                }
                this.scan().await;
            }
        })
    }

    /// Stop the scheduler; the next tick after this call observes the flag
    /// and exits instead of scanning.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    async fn scan(self: &Arc<Self>) {
        let due: Vec<EndpointAddr> = self
            .endpoints
            .all_endpoints()
            .into_iter()
            .filter(|ep| !self.endpoints.is_healthy(ep))
            .filter(|ep| {
                self.endpoints
                    .time_since_last_failure(ep)
                    .is_none_or(|d| d >= self.config.threshold)
            })
            .filter(|ep| self.in_flight.insert(ep.clone(), ()).is_none())
            .collect();

        for ep in due {
            let this = Arc::clone(self);
            tokio::spawn(async move {
                this.probe_one(ep).await;
            });
        }
    }

    async fn probe_one(self: Arc<Self>, ep: EndpointAddr) {
        let ok = tokio::time::timeout(self.config.probe_timeout, self.prober.probe(&ep))
            .await
            .unwrap_or(false);

        if ok {
            tracing::info!(endpoint = %ep, "health probe succeeded, endpoint recovered");
            self.endpoints.mark_healthy(&ep);
            if let Some(listener) = self.on_recovered.read().clone() {
                listener(ep.clone());
            }
        } else {
            tracing::debug!(endpoint = %ep, "health probe failed, endpoint remains unhealthy");
            self.endpoints.mark_unhealthy(&ep, "probe failed");
        }
        self.in_flight.remove(&ep);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct AlwaysUp;
    #[async_trait]
    impl EndpointProber for AlwaysUp {
        async fn probe(&self, _endpoint: &EndpointAddr) -> bool {
            true
        }
    }

    struct AlwaysDown;
    #[async_trait]
    impl EndpointProber for AlwaysDown {
        async fn probe(&self, _endpoint: &EndpointAddr) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn probe_success_marks_healthy_and_triggers_recovery_listener() {
        let endpoints = Arc::new(EndpointRegistry::new(vec![EndpointAddr::new("a", 1)]));
        let ep = EndpointAddr::new("a", 1);
        endpoints.mark_unhealthy(&ep, "initial failure");

        let checker = Arc::new(HealthChecker::new(
            Arc::clone(&endpoints),
            Arc::new(AlwaysUp),
            HealthCheckConfig {
                check_interval: Duration::from_millis(5),
                threshold: Duration::from_millis(0),
                probe_timeout: Duration::from_millis(50),
            },
        ));

        let recovered = Arc::new(AtomicUsize::new(0));
        let recovered2 = Arc::clone(&recovered);
        *checker.on_recovered.write() = Some(Arc::new(move |_ep| {
            recovered2.fetch_add(1, Ordering::SeqCst);
        }));

        checker.scan().await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(endpoints.is_healthy(&ep));
        assert_eq!(recovered.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn probe_failure_stays_unhealthy_and_updates_timestamp() {
        let endpoints = Arc::new(EndpointRegistry::new(vec![EndpointAddr::new("a", 1)]));
        let ep = EndpointAddr::new("a", 1);
        endpoints.mark_unhealthy(&ep, "initial failure");
        let first_failure = endpoints.last_failure(&ep).unwrap();

        let checker = Arc::new(HealthChecker::new(
            Arc::clone(&endpoints),
            Arc::new(AlwaysDown),
            HealthCheckConfig {
                check_interval: Duration::from_millis(5),
                threshold: Duration::from_millis(0),
                probe_timeout: Duration::from_millis(50),
            },
        ));

        tokio::time::sleep(Duration::from_millis(5)).await;
        checker.scan().await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(!endpoints.is_healthy(&ep));
        assert!(endpoints.last_failure(&ep).unwrap() >= first_failure);
    }

    #[tokio::test]
    async fn stop_halts_the_scheduler() {
        let endpoints = Arc::new(EndpointRegistry::new(vec![EndpointAddr::new("a", 1)]));
        let checker = Arc::new(HealthChecker::new(
            endpoints,
            Arc::new(AlwaysUp),
            HealthCheckConfig {
                check_interval: Duration::from_millis(5),
                ..HealthCheckConfig::default()
            },
        ));
        let handle = checker.spawn(|_ep| {});
        checker.stop();
        let _ = tokio::time::timeout(Duration::from_millis(200), handle).await;
    }
}
