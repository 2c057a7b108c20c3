//! Periodic health checking of every registered backend.
//!
//! A cycle takes one registry snapshot, probes each backend in its own task
//! with a bounded timeout, and writes each result back by `(domain, address)`.
//! Backends are never removed: a failing backend is only flagged and is probed
//! again on the next cycle.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::domain::registry::Registry;
use crate::domain::routing::SharedRoutingTable;
use crate::error::ProbeFailure;

/// A liveness check against one backend address.
#[async_trait]
pub trait Prober: Send + Sync + 'static {
    /// Probe `address`, returning `Ok(())` when the backend is alive.
    async fn probe(&self, address: &str) -> Result<(), ProbeFailure>;
}

/// Counts from one health cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    /// Backends probed.
    pub probed: usize,
    /// Backends found healthy.
    pub healthy: usize,
    /// Backends whose flag flipped.
    pub changed: usize,
}

/// Probe every backend of `registry` once and apply the results.
///
/// Probes run concurrently; each is cut off after `timeout`, so one hanging
/// backend delays neither the others nor request handling.
pub async fn check_registry(
    registry: &Registry,
    prober: Arc<dyn Prober>,
    timeout: Duration,
) -> CycleSummary {
    let mut probes = JoinSet::new();

    for pool in registry.pools() {
        for backend in pool.backends() {
            let prober = Arc::clone(&prober);
            let domain = backend.domain().to_string();
            let address = backend.address().to_string();

            probes.spawn(async move {
                let result = match time::timeout(timeout, prober.probe(&address)).await {
                    Ok(result) => result,
                    Err(_) => Err(ProbeFailure::Timeout(timeout)),
                };
                (domain, address, result)
            });
        }
    }

    let mut summary = CycleSummary::default();
    while let Some(joined) = probes.join_next().await {
        let (domain, address, result) = match joined {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "health probe task failed");
                continue;
            }
        };

        let healthy = result.is_ok();
        summary.probed += 1;
        if healthy {
            summary.healthy += 1;
        }

        match registry.update_health(&domain, &address, healthy) {
            Some(was_healthy) if was_healthy != healthy => {
                summary.changed += 1;
                match result {
                    Ok(()) => info!(%domain, backend = %address, "backend recovered"),
                    Err(e) => warn!(%domain, backend = %address, error = %e, "backend marked unhealthy"),
                }
            }
            Some(_) => {
                if let Err(e) = result {
                    debug!(%domain, backend = %address, error = %e, "backend still unhealthy");
                }
            }
            None => debug!(%domain, backend = %address, "probed backend no longer registered"),
        }
    }

    summary
}

/// Runs health cycles against the live routing table.
pub struct HealthMonitor {
    routing: SharedRoutingTable,
    prober: Arc<dyn Prober>,
    interval: Duration,
    probe_timeout: Duration,
}

impl HealthMonitor {
    /// Create a monitor that probes every `interval`, each probe bounded by
    /// `probe_timeout`.
    pub fn new(
        routing: SharedRoutingTable,
        prober: Arc<dyn Prober>,
        interval: Duration,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            routing,
            prober,
            interval,
            probe_timeout,
        }
    }

    /// Probe the currently installed registry once.
    pub async fn run_cycle(&self) -> CycleSummary {
        let snapshot = self.routing.snapshot();
        check_registry(&snapshot, Arc::clone(&self.prober), self.probe_timeout).await
    }

    /// Spawn the periodic loop on the current Tokio runtime.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = time::interval(self.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            // Prevent immediately ticking when spawned
            interval.tick().await;

            loop {
                interval.tick().await;

                let summary = self.run_cycle().await;
                debug!(
                    probed = summary.probed,
                    healthy = summary.healthy,
                    changed = summary.changed,
                    "health cycle complete"
                );
            }
        })
    }
}
