//! Backend server models.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;

/// Represents a single upstream server for one domain.
///
/// The address is opaque to the core (`scheme://host[:port]`). Only the health
/// flag is mutable, and only through [`Backend::set_healthy`].
#[derive(Debug)]
pub struct Backend {
    address: String,
    domain: String,
    healthy: AtomicBool,
}

impl Backend {
    /// Create a backend, initially healthy.
    pub fn new(address: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            domain: domain.into(),
            healthy: AtomicBool::new(true),
        }
    }

    /// The upstream address as written in the configuration.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// The domain this backend serves.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Check if the backend is marked healthy
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    /// Update the health flag, returning the previous value.
    pub fn set_healthy(&self, is_healthy: bool) -> bool {
        self.healthy.swap(is_healthy, Ordering::AcqRel)
    }

    /// A point-in-time view of this backend.
    pub fn status(&self) -> BackendStatus {
        BackendStatus {
            address: self.address.clone(),
            healthy: self.is_healthy(),
        }
    }
}

/// A thread-safe reference to a Backend.
pub type SharedBackend = Arc<Backend>;

/// Serialisable view of a backend used by the admin surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendStatus {
    /// Upstream address.
    pub address: String,
    /// Health flag at the time the view was taken.
    pub healthy: bool,
}
