//! Rebuilding and installing the registry from the configuration file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use loba_core::config::{build, load_configuration};
use loba_core::health::{check_registry, Prober};
use loba_core::{ConfigError, Registry, SharedRoutingTable};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Probe settings used to seed health flags before a registry is installed.
#[derive(Clone)]
pub struct HealthSeed {
    /// Prober used for the seeding cycle.
    pub prober: Arc<dyn Prober>,
    /// Per-probe timeout.
    pub timeout: Duration,
}

/// Read `path` and build a registry from it, seeding health when asked.
pub async fn load_registry(path: &Path, seed: Option<&HealthSeed>) -> Result<Registry, ConfigError> {
    let config = load_configuration(path).await?;
    let registry = build(&config)?;

    if let Some(seed) = seed {
        let summary = check_registry(&registry, Arc::clone(&seed.prober), seed.timeout).await;
        info!(
            probed = summary.probed,
            healthy = summary.healthy,
            "seeded backend health before install"
        );
    }

    Ok(registry)
}

/// Counts describing an installed registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReloadSummary {
    /// Configured domains.
    pub domains: usize,
    /// Configured backends across all domains.
    pub backends: usize,
}

/// Rebuilds the registry from its configuration file and swaps it in.
///
/// Clones share one reload lock, so at most one reload runs at a time and
/// the last one to start is the last one installed.
#[derive(Clone)]
pub struct Reloader {
    config_path: PathBuf,
    routing: SharedRoutingTable,
    seed: Option<HealthSeed>,
    reload_lock: Arc<Mutex<()>>,
}

impl Reloader {
    /// Create a reloader for `routing` reading `config_path`.
    pub fn new(config_path: impl Into<PathBuf>, routing: SharedRoutingTable) -> Self {
        Self {
            config_path: config_path.into(),
            routing,
            seed: None,
            reload_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Seed health flags of every rebuilt registry before installing it.
    pub fn with_seed(mut self, seed: HealthSeed) -> Self {
        self.seed = Some(seed);
        self
    }

    /// The configuration file this reloader reads.
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Rebuild and install the registry.
    ///
    /// On error the installed registry is left untouched.
    pub async fn reload(&self) -> Result<ReloadSummary, ConfigError> {
        // Held across read, build, seeding and swap.
        let _guard = self.reload_lock.lock().await;

        let registry = match load_registry(&self.config_path, self.seed.as_ref()).await {
            Ok(registry) => registry,
            Err(e) => {
                warn!(path = %self.config_path.display(), error = %e, "reload rejected, keeping current registry");
                return Err(e);
            }
        };

        let summary = ReloadSummary {
            domains: registry.len(),
            backends: registry.backend_count(),
        };
        self.routing.replace(registry);
        Ok(summary)
    }
}
