//! Per-domain backend pools.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::domain::backend::{Backend, BackendStatus, SharedBackend};

/// The ordered backends of one domain plus its rotation cursor.
///
/// The backend list is fixed at construction: health changes flip flags on
/// existing entries and never insert or remove. The cursor always satisfies
/// `cursor < backends.len()` when the pool is non-empty and is only moved by
/// the selector.
#[derive(Debug)]
pub struct Pool {
    domain: String,
    backends: Vec<SharedBackend>,
    cursor: Mutex<usize>,
}

impl Pool {
    /// Create a pool whose rotation order is the order of `addresses`.
    pub fn new<I, S>(domain: impl Into<String>, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let domain = domain.into();
        let backends = addresses
            .into_iter()
            .map(|addr| Arc::new(Backend::new(addr, domain.clone())))
            .collect();

        Self {
            domain,
            backends,
            cursor: Mutex::new(0),
        }
    }

    /// The domain served by this pool.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Backends in rotation order.
    pub fn backends(&self) -> &[SharedBackend] {
        &self.backends
    }

    /// Number of configured backends, healthy or not.
    pub fn len(&self) -> usize {
        self.backends.len()
    }

    /// Whether the pool has no backends at all.
    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Number of backends currently flagged healthy.
    pub fn healthy_count(&self) -> usize {
        self.backends.iter().filter(|b| b.is_healthy()).count()
    }

    /// Current rotation position.
    pub fn cursor(&self) -> usize {
        *self.lock_cursor()
    }

    /// Look a backend up by its address.
    pub fn find(&self, address: &str) -> Option<&SharedBackend> {
        self.backends.iter().find(|b| b.address() == address)
    }

    /// A point-in-time view of the pool.
    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            domain: self.domain.clone(),
            cursor: self.cursor(),
            backends: self.backends.iter().map(|b| b.status()).collect(),
        }
    }

    /// Hold the rotation cursor. The selector keeps it for one bounded scan.
    pub(crate) fn lock_cursor(&self) -> MutexGuard<'_, usize> {
        // The guarded value is a plain index that is always written whole.
        self.cursor.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Serialisable view of a pool used by the admin surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    /// Domain served by the pool.
    pub domain: String,
    /// Rotation cursor.
    pub cursor: usize,
    /// Backends in rotation order.
    pub backends: Vec<BackendStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_configured_order() {
        let pool = Pool::new("a.test", ["h1", "h2", "h3"]);
        let order: Vec<_> = pool.backends().iter().map(|b| b.address()).collect();
        assert_eq!(order, ["h1", "h2", "h3"]);
        assert!(pool.backends().iter().all(|b| b.domain() == "a.test"));
        assert_eq!(pool.cursor(), 0);
    }

    #[test]
    fn find_and_healthy_count() {
        let pool = Pool::new("a.test", ["h1", "h2"]);
        pool.find("h2").unwrap().set_healthy(false);
        assert_eq!(pool.healthy_count(), 1);
        assert!(pool.find("h3").is_none());

        let status = pool.status();
        assert_eq!(status.backends.len(), 2);
        assert!(!status.backends[1].healthy);
    }

    #[test]
    fn empty_pool() {
        let pool = Pool::new("a.test", Vec::<String>::new());
        assert!(pool.is_empty());
        assert_eq!(pool.healthy_count(), 0);
    }
}
