//! The domain to pool mapping at one point in time.

use std::collections::HashMap;

use crate::domain::pool::{Pool, PoolStatus};

/// All pools known at one point in time, keyed by domain.
///
/// A registry is never edited structurally once built. Reload builds a new one
/// and swaps it in through [`crate::domain::routing::RoutingTable`].
#[derive(Debug, Default)]
pub struct Registry {
    pools: HashMap<String, Pool>,
}

impl Registry {
    /// A registry with no domains.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a registry from fully constructed pools.
    pub fn from_pools(pools: impl IntoIterator<Item = Pool>) -> Self {
        Self {
            pools: pools
                .into_iter()
                .map(|pool| (pool.domain().to_string(), pool))
                .collect(),
        }
    }

    /// The pool for `domain`, if configured.
    pub fn get(&self, domain: &str) -> Option<&Pool> {
        self.pools.get(domain)
    }

    /// Iterate over every pool, in no particular order.
    pub fn pools(&self) -> impl Iterator<Item = &Pool> {
        self.pools.values()
    }

    /// Number of configured domains.
    pub fn len(&self) -> usize {
        self.pools.len()
    }

    /// Whether no domain is configured.
    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    /// Total number of backends across all pools.
    pub fn backend_count(&self) -> usize {
        self.pools.values().map(Pool::len).sum()
    }

    /// Set the health flag of the backend identified by `(domain, address)`.
    ///
    /// Returns the previous flag, or `None` when no such backend exists in
    /// this registry (for example after a reload replaced it).
    pub fn update_health(&self, domain: &str, address: &str, healthy: bool) -> Option<bool> {
        self.get(domain)?
            .find(address)
            .map(|backend| backend.set_healthy(healthy))
    }

    /// Status of every pool, sorted by domain.
    pub fn status(&self) -> Vec<PoolStatus> {
        let mut status: Vec<_> = self.pools.values().map(Pool::status).collect();
        status.sort_by(|a, b| a.domain.cmp(&b.domain));
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Registry {
        Registry::from_pools([
            Pool::new("b.test", ["h3"]),
            Pool::new("a.test", ["h1", "h2"]),
        ])
    }

    #[test]
    fn lookup_by_domain() {
        let registry = registry();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.backend_count(), 3);
        assert_eq!(registry.get("a.test").unwrap().len(), 2);
        assert!(registry.get("c.test").is_none());
    }

    #[test]
    fn update_health_by_key_touches_only_that_backend() {
        let registry = registry();
        assert_eq!(registry.update_health("a.test", "h2", false), Some(true));

        let pool = registry.get("a.test").unwrap();
        assert!(pool.backends()[0].is_healthy());
        assert!(!pool.backends()[1].is_healthy());
        assert!(registry.get("b.test").unwrap().backends()[0].is_healthy());
    }

    #[test]
    fn update_health_unknown_key() {
        let registry = registry();
        assert_eq!(registry.update_health("a.test", "h9", false), None);
        assert_eq!(registry.update_health("z.test", "h1", false), None);
    }

    #[test]
    fn status_is_sorted() {
        let domains: Vec<_> = registry().status().into_iter().map(|p| p.domain).collect();
        assert_eq!(domains, ["a.test", "b.test"]);
    }
}
