//! Probers for active backend health checks.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use http_body_util::Empty;
use hyper::body::Bytes;
use hyper::{Request, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

use loba_core::health::{HealthMonitor, Prober};
use loba_core::{ProbeFailure, SharedRoutingTable};

use crate::forwarder::upstream_uri;

/// Default path probed by [`HttpProber`].
pub const DEFAULT_PROBE_PATH: &str = "/v0/health";

/// Healthy when a TCP connection to the backend can be opened.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpProber;

#[async_trait]
impl Prober for TcpProber {
    async fn probe(&self, address: &str) -> Result<(), ProbeFailure> {
        let (host, port) = host_and_port(address)?;
        TcpStream::connect((host.as_str(), port))
            .await
            .map(drop)
            .map_err(|e| ProbeFailure::Connect(e.to_string()))
    }
}

/// Healthy when `GET {address}{path}` answers with a 2xx status.
#[derive(Clone)]
pub struct HttpProber {
    client: Client<HttpConnector, Empty<Bytes>>,
    path: Uri,
}

impl HttpProber {
    /// Create a prober requesting `path` on each backend.
    pub fn new(path: &str) -> Result<Self, ProbeFailure> {
        let path = path
            .parse()
            .map_err(|_| ProbeFailure::InvalidAddress(path.to_string()))?;

        Ok(Self {
            client: Client::builder(TokioExecutor::new()).build_http(),
            path,
        })
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, address: &str) -> Result<(), ProbeFailure> {
        let uri = upstream_uri(address, &self.path)
            .map_err(|_| ProbeFailure::InvalidAddress(address.to_string()))?;
        let request = Request::get(uri)
            .body(Empty::new())
            .map_err(|_| ProbeFailure::InvalidAddress(address.to_string()))?;

        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| ProbeFailure::Connect(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(ProbeFailure::Status(response.status().as_u16()))
        }
    }
}

/// Split a backend address into host and port, defaulting the port by scheme.
fn host_and_port(address: &str) -> Result<(String, u16), ProbeFailure> {
    let invalid = || ProbeFailure::InvalidAddress(address.to_string());

    let with_scheme = if address.contains("://") {
        address.to_string()
    } else {
        format!("http://{}", address)
    };
    let uri: Uri = with_scheme.parse().map_err(|_| invalid())?;
    let host = uri.host().ok_or_else(invalid)?;
    let host = host.trim_start_matches('[').trim_end_matches(']').to_string();
    let port = match (uri.port_u16(), uri.scheme_str()) {
        (Some(port), _) => port,
        (None, Some("https")) => 443,
        (None, _) => 80,
    };

    Ok((host, port))
}

/// Spawns a background Tokio task that periodically probes every backend of
/// the live registry and updates their health flags.
pub fn spawn_health_checker(
    routing_table: SharedRoutingTable,
    prober: Arc<dyn Prober>,
    interval: Duration,
    probe_timeout: Duration,
) -> JoinHandle<()> {
    HealthMonitor::new(routing_table, prober, interval, probe_timeout).spawn()
}
