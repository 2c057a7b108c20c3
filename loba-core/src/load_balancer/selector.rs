//! Round-robin backend selection.

use std::sync::Arc;

use tracing::trace;

use crate::domain::backend::SharedBackend;
use crate::domain::pool::Pool;
use crate::domain::registry::Registry;
use crate::error::RouteError;

/// Pick the next healthy backend of `pool` in rotation order.
///
/// Starting at the cursor, each step reads one backend and advances the cursor
/// by one (modulo the pool length); the first healthy backend read is returned.
/// After `pool.len()` steps without a healthy backend the scan gives up with
/// [`RouteError::NoBackendAvailable`], leaving the cursor where the scan left
/// it, which is back at its starting position.
///
/// The cursor is held for the whole scan, so concurrent selections on the same
/// pool never interleave their steps.
pub fn select(pool: &Pool) -> Result<SharedBackend, RouteError> {
    let backends = pool.backends();
    let len = backends.len();
    if len == 0 {
        return Err(RouteError::NoBackendAvailable(pool.domain().to_string()));
    }

    let mut cursor = pool.lock_cursor();
    for _ in 0..len {
        let backend = &backends[*cursor];
        *cursor = (*cursor + 1) % len;

        if backend.is_healthy() {
            trace!(domain = pool.domain(), backend = backend.address(), "selected backend");
            return Ok(Arc::clone(backend));
        }
    }

    Err(RouteError::NoBackendAvailable(pool.domain().to_string()))
}

/// Resolve `domain` in `registry` and select from its pool.
pub fn select_for_domain(registry: &Registry, domain: &str) -> Result<SharedBackend, RouteError> {
    let pool = registry
        .get(domain)
        .ok_or_else(|| RouteError::UnknownDomain(domain.to_string()))?;
    select(pool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn addresses(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("h{}", i)).collect()
    }

    fn picked(pool: &Pool) -> String {
        select(pool).unwrap().address().to_string()
    }

    #[test]
    fn end_to_end_rotation_scenario() {
        let pool = Pool::new("a.test", ["h1", "h2", "h3"]);

        assert_eq!(picked(&pool), "h1");
        assert_eq!(picked(&pool), "h2");
        assert_eq!(picked(&pool), "h3");

        pool.find("h2").unwrap().set_healthy(false);
        assert_eq!(picked(&pool), "h1");
        assert_eq!(picked(&pool), "h3");

        for backend in pool.backends() {
            backend.set_healthy(false);
        }
        assert_eq!(
            select(&pool).unwrap_err(),
            RouteError::NoBackendAvailable("a.test".into())
        );
    }

    #[test]
    fn wraps_past_unhealthy_backend() {
        let pool = Pool::new("a.test", ["h1", "h2", "h3"]);
        assert_eq!(picked(&pool), "h1");
        pool.find("h2").unwrap().set_healthy(false);
        assert_eq!(picked(&pool), "h3");
        assert_eq!(picked(&pool), "h1");
    }

    #[test]
    fn empty_pool_has_no_backend() {
        let pool = Pool::new("a.test", Vec::<String>::new());
        assert_eq!(
            select(&pool).unwrap_err(),
            RouteError::NoBackendAvailable("a.test".into())
        );
    }

    #[test]
    fn unknown_domain_is_distinct() {
        let registry = Registry::from_pools([Pool::new("a.test", ["h1"])]);
        assert_eq!(
            select_for_domain(&registry, "b.test").unwrap_err(),
            RouteError::UnknownDomain("b.test".into())
        );
        assert_eq!(select_for_domain(&registry, "a.test").unwrap().address(), "h1");
    }

    #[test]
    fn recovered_backend_rejoins_rotation() {
        let pool = Pool::new("a.test", ["h1", "h2"]);
        pool.find("h1").unwrap().set_healthy(false);
        assert_eq!(picked(&pool), "h2");
        assert_eq!(picked(&pool), "h2");

        pool.find("h1").unwrap().set_healthy(true);
        assert_eq!(picked(&pool), "h1");
    }

    proptest! {
        #[test]
        fn only_healthy_backends_are_returned(
            health in proptest::collection::vec(any::<bool>(), 1..16),
            warmup in 0usize..32,
        ) {
            let pool = Pool::new("a.test", addresses(health.len()));
            for _ in 0..warmup {
                select(&pool).unwrap();
            }
            for (backend, healthy) in pool.backends().iter().zip(&health) {
                backend.set_healthy(*healthy);
            }

            let start = pool.cursor();
            match select(&pool) {
                Ok(backend) => prop_assert!(backend.is_healthy()),
                Err(err) => {
                    prop_assert!(health.iter().all(|h| !h));
                    prop_assert_eq!(err, RouteError::NoBackendAvailable("a.test".into()));
                    // A full cycle of len steps lands back on the start.
                    prop_assert_eq!(pool.cursor(), start);
                }
            }
            prop_assert!(pool.cursor() < pool.len());
        }

        #[test]
        fn all_healthy_rotation_is_fair(n in 1usize..16, warmup in 0usize..32) {
            let pool = Pool::new("a.test", addresses(n));
            for _ in 0..warmup {
                select(&pool).unwrap();
            }

            let start = pool.cursor();
            let seen: Vec<_> = (0..n).map(|_| picked(&pool)).collect();
            let expected: Vec<_> = (0..n).map(|i| format!("h{}", (start + i) % n)).collect();
            prop_assert_eq!(seen, expected);
        }

        #[test]
        fn skips_exactly_the_unhealthy_run(n in 2usize..16, down in 1usize..15) {
            prop_assume!(down < n);
            let pool = Pool::new("a.test", addresses(n));
            for backend in &pool.backends()[..down] {
                backend.set_healthy(false);
            }
            prop_assert_eq!(picked(&pool), format!("h{}", down));
            prop_assert_eq!(pool.cursor(), (down + 1) % n);
        }
    }
}
