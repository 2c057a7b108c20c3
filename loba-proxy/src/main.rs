//! loba load balancer
//!
//! The main Tokio async engine: parses settings, opens the request log, builds
//! the initial registry, then runs the proxy listener, the admin listener and
//! the background health checker until shutdown.

#![deny(missing_docs)]

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use loba_admin::{load_registry, AdminService, HealthSeed, Reloader};
use loba_core::completion::CompletionHook;
use loba_core::RoutingTable;

mod forwarder;
mod request_log;
mod server;
mod settings;

mod health_check {
    //! Active backend health checks.

    pub mod prober;
}

use forwarder::Forwarder;
use health_check::prober::spawn_health_checker;
use request_log::SqliteLogStore;
use server::ProxyState;
use settings::Settings;

/// The primary entrypoint for the loba load balancer.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::parse();
    init_tracing(settings.verbose);

    info!("Starting loba");

    let store = Arc::new(
        SqliteLogStore::open(&settings.database)
            .await
            .with_context(|| format!("cannot open request log {}", settings.database))?,
    );

    let prober = settings.prober()?;
    let seed = settings.probe_on_build.then(|| HealthSeed {
        prober: Arc::clone(&prober),
        timeout: settings.probe_timeout(),
    });

    let registry = load_registry(&settings.config, seed.as_ref())
        .await
        .with_context(|| format!("cannot load configuration {}", settings.config.display()))?;
    info!(
        domains = registry.len(),
        backends = registry.backend_count(),
        "initial registry built"
    );
    let routing = Arc::new(RoutingTable::new(registry));

    let mut reloader = Reloader::new(&settings.config, Arc::clone(&routing));
    if let Some(seed) = seed {
        reloader = reloader.with_seed(seed);
    }

    let admin_listener = TcpListener::bind(settings.admin_listen)
        .await
        .with_context(|| format!("cannot bind admin listener {}", settings.admin_listen))?;
    let proxy_listener = TcpListener::bind(settings.listen)
        .await
        .with_context(|| format!("cannot bind proxy listener {}", settings.listen))?;

    let _health = spawn_health_checker(
        Arc::clone(&routing),
        prober,
        settings.health_interval(),
        settings.probe_timeout(),
    );
    spawn_reload_on_hangup(reloader.clone());

    let admin = Arc::new(AdminService::new(reloader, Arc::clone(&routing), store.clone()));
    let state = Arc::new(ProxyState::new(
        routing,
        Forwarder::new(),
        CompletionHook::new(store),
    ));

    tokio::select! {
        res = loba_admin::serve(admin_listener, admin) => res.context("admin server failed")?,
        res = server::serve(proxy_listener, state) => res.context("proxy server failed")?,
        _ = tokio::signal::ctrl_c() => info!("shutdown signal received"),
    }

    info!("Shutting down gracefully.");
    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();
}

/// Rebuild the registry whenever the process receives SIGHUP.
#[cfg(unix)]
fn spawn_reload_on_hangup(reloader: Reloader) {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(hangup) => hangup,
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGHUP, reload only via admin endpoint");
                return;
            }
        };

        while hangup.recv().await.is_some() {
            if let Ok(summary) = reloader.reload().await {
                info!(
                    path = %reloader.config_path().display(),
                    domains = summary.domains,
                    backends = summary.backends,
                    "configuration reloaded on SIGHUP"
                );
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_reload_on_hangup(_reloader: Reloader) {}
