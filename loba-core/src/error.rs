//! Error taxonomy shared by every loba crate.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// The configuration could not be turned into a registry.
///
/// Recovered locally: only the triggering build is aborted and the previously
/// installed registry keeps serving.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration source could not be read.
    #[error("cannot read configuration {path}: {source}")]
    Read {
        /// Path that was read.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The configuration is not valid JSON of the expected shape.
    #[error("malformed configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// An entry has an empty domain name.
    #[error("configuration entry has an empty domain")]
    EmptyDomain,

    /// A domain lists an empty address.
    #[error("domain {domain} lists an empty address")]
    EmptyAddress {
        /// Domain whose address list is invalid.
        domain: String,
    },
}

/// A request could not be routed to any backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    /// No pool is configured for the requested host.
    #[error("unknown domain {0}")]
    UnknownDomain(String),

    /// The pool exists but has no healthy backend.
    #[error("no backend available for {0}")]
    NoBackendAvailable(String),
}

/// A single health probe failed. Only ever turned into a health flag.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeFailure {
    /// The probe did not finish in time.
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),

    /// The backend could not be reached.
    #[error("connect failed: {0}")]
    Connect(String),

    /// The backend answered with a non-success status.
    #[error("unhealthy status {0}")]
    Status(u16),

    /// The backend address cannot be probed.
    #[error("invalid backend address {0}")]
    InvalidAddress(String),
}

/// The request log collaborator failed.
#[derive(Debug, Error)]
#[error("log store error: {0}")]
pub struct StoreError(#[source] Box<dyn std::error::Error + Send + Sync>);

impl StoreError {
    /// Wrap a storage backend error.
    pub fn new<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self(Box::new(err))
    }
}
