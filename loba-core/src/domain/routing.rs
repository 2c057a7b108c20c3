//! Routing module holding the live registry.

use arc_swap::ArcSwap;
use std::sync::Arc;
use tracing::info;

use crate::domain::backend::SharedBackend;
use crate::domain::registry::Registry;
use crate::error::RouteError;
use crate::load_balancer::selector;

/// A lock-free handle on the live [`Registry`].
///
/// Uses `ArcSwap` so a reload installs a whole new registry in one store while
/// request handlers keep reading without a lock. A reader that loaded the old
/// registry finishes against it; it never sees pools from one registry mixed
/// with another.
#[derive(Debug)]
pub struct RoutingTable {
    registry: ArcSwap<Registry>,
}

impl RoutingTable {
    /// Create a routing table serving `initial`.
    pub fn new(initial: Registry) -> Self {
        Self {
            registry: ArcSwap::from_pointee(initial),
        }
    }

    /// Atomically replace the entire registry (config reload).
    ///
    /// Rotation and health state are not carried over from the old registry.
    pub fn replace(&self, registry: Registry) {
        let domains = registry.len();
        let backends = registry.backend_count();
        self.registry.store(Arc::new(registry));
        info!(domains, backends, "registry replaced");
    }

    /// Select the next healthy backend for `domain`.
    pub fn select(&self, domain: &str) -> Result<SharedBackend, RouteError> {
        let guard = self.registry.load();
        selector::select_for_domain(&guard, domain)
    }

    /// Set a backend's health flag in the live registry by stable key.
    pub fn update_health(&self, domain: &str, address: &str, healthy: bool) -> Option<bool> {
        self.registry.load().update_health(domain, address, healthy)
    }

    /// Retrieve a snapshot of the current registry (e.g., for the health checker).
    pub fn snapshot(&self) -> Arc<Registry> {
        self.registry.load_full()
    }
}

/// A shared reference to the lock-free routing table.
pub type SharedRoutingTable = Arc<RoutingTable>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::pool::Pool;
    use std::thread;

    fn table(prefix: &str, n: usize) -> Registry {
        Registry::from_pools([Pool::new(
            "a.test",
            (0..n).map(|i| format!("{}{}", prefix, i)),
        )])
    }

    #[test]
    fn select_and_update_go_through_live_registry() {
        let routing = RoutingTable::new(table("h", 2));
        assert_eq!(routing.select("a.test").unwrap().address(), "h0");
        assert_eq!(routing.update_health("a.test", "h1", false), Some(true));
        assert_eq!(routing.select("a.test").unwrap().address(), "h0");
        assert_eq!(
            routing.select("b.test").unwrap_err(),
            RouteError::UnknownDomain("b.test".into())
        );
    }

    #[test]
    fn replace_resets_rotation_and_health() {
        let routing = RoutingTable::new(table("h", 3));
        routing.select("a.test").unwrap();
        routing.update_health("a.test", "h1", false);

        routing.replace(table("h", 3));
        let snapshot = routing.snapshot();
        let pool = snapshot.get("a.test").unwrap();
        assert_eq!(pool.cursor(), 0);
        assert_eq!(pool.healthy_count(), 3);
    }

    #[test]
    fn old_snapshot_stays_consistent_after_replace() {
        let routing = RoutingTable::new(table("old", 3));
        let old = routing.snapshot();
        routing.select("a.test").unwrap();

        routing.replace(table("new", 2));

        let old_pool = old.get("a.test").unwrap();
        assert_eq!(old_pool.len(), 3);
        assert_eq!(old_pool.cursor(), 1);
        assert_eq!(selector::select(old_pool).unwrap().address(), "old1");
        assert_eq!(routing.select("a.test").unwrap().address(), "new0");
        // Writes keyed on the old registry miss the new one.
        assert_eq!(routing.update_health("a.test", "old0", false), None);
    }

    #[test]
    fn concurrent_reload_never_mixes_registries() {
        let routing = Arc::new(RoutingTable::new(table("old", 4)));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let routing = Arc::clone(&routing);
                thread::spawn(move || {
                    for _ in 0..2_000 {
                        let snapshot = routing.snapshot();
                        let pool = snapshot.get("a.test").unwrap();
                        let prefix = if pool.len() == 4 { "old" } else { "new" };
                        let backend = selector::select(pool).unwrap();
                        assert!(backend.address().starts_with(prefix));
                        assert!(pool.cursor() < pool.len());
                    }
                })
            })
            .collect();

        for i in 0..200 {
            if i % 2 == 0 {
                routing.replace(table("new", 3));
            } else {
                routing.replace(table("old", 4));
            }
        }

        for reader in readers {
            reader.join().unwrap();
        }
    }
}
