//! Command-line settings.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use loba_core::health::Prober;
use loba_core::ProbeFailure;

use crate::health_check::prober::{HttpProber, TcpProber, DEFAULT_PROBE_PATH};

/// How backends are probed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProbeKind {
    /// Open a TCP connection to the backend.
    Tcp,
    /// `GET` the probe path and require a 2xx status.
    Http,
}

/// Process settings.
#[derive(Debug, Parser)]
#[command(name = "loba", version, about = "Domain-routed HTTP load balancer")]
pub struct Settings {
    /// Address the proxy listens on.
    #[arg(short, long, default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Address of the admin endpoints (/health, /reload, /report, /pools).
    #[arg(long, default_value = "127.0.0.1:8081")]
    pub admin_listen: SocketAddr,

    /// Routing configuration file.
    #[arg(short, long, default_value = "config/domains.json")]
    pub config: PathBuf,

    /// SQLite database holding the request log.
    #[arg(long, default_value = "loadbalancer.db")]
    pub database: String,

    /// Seconds between health cycles.
    #[arg(long, default_value_t = 60, value_parser = clap::value_parser!(u64).range(1..))]
    pub health_interval_secs: u64,

    /// Per-probe timeout in milliseconds.
    #[arg(long, default_value_t = 2000, value_parser = clap::value_parser!(u64).range(1..))]
    pub probe_timeout_ms: u64,

    /// Probe protocol.
    #[arg(long, value_enum, default_value_t = ProbeKind::Tcp)]
    pub probe: ProbeKind,

    /// Path requested by the HTTP probe.
    #[arg(long, default_value = DEFAULT_PROBE_PATH)]
    pub probe_path: String,

    /// Probe every backend before installing a freshly built registry.
    #[arg(long)]
    pub probe_on_build: bool,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long)]
    pub verbose: bool,
}

impl Settings {
    /// Time between health cycles.
    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }

    /// Upper bound on a single probe.
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// The configured prober.
    pub fn prober(&self) -> Result<Arc<dyn Prober>, ProbeFailure> {
        Ok(match self.probe {
            ProbeKind::Tcp => Arc::new(TcpProber),
            ProbeKind::Http => Arc::new(HttpProber::new(&self.probe_path)?),
        })
    }
}
