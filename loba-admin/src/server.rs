//! HTTP server for the administrative endpoints.
//!
//! | path      | method      | response                                  |
//! |-----------|-------------|-------------------------------------------|
//! | `/health` | GET         | `ok` while the process is up              |
//! | `/reload` | GET, POST   | rebuilds the registry from configuration  |
//! | `/report` | GET         | per-domain request totals as JSON         |
//! | `/pools`  | GET         | live pools, cursors and health as JSON    |

use std::convert::Infallible;
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use loba_core::completion::RequestLogStore;
use loba_core::SharedRoutingTable;
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::reload::Reloader;

/// Handles administrative requests against the shared routing state.
pub struct AdminService {
    reloader: Reloader,
    routing: SharedRoutingTable,
    store: Arc<dyn RequestLogStore>,
}

impl AdminService {
    /// Create the admin service.
    pub fn new(reloader: Reloader, routing: SharedRoutingTable, store: Arc<dyn RequestLogStore>) -> Self {
        Self {
            reloader,
            routing,
            store,
        }
    }

    /// Route one admin request. The request body is never read.
    pub async fn handle<B>(&self, req: Request<B>) -> Response<Full<Bytes>> {
        let (parts, _) = req.into_parts();

        match (&parts.method, parts.uri.path()) {
            (&Method::GET, "/health") => text(StatusCode::OK, "ok"),
            (&Method::GET | &Method::POST, "/reload") => self.reload().await,
            (&Method::GET, "/report") => self.report().await,
            (&Method::GET, "/pools") => json(&self.routing.snapshot().status()),
            (_, "/health" | "/reload" | "/report" | "/pools") => {
                text(StatusCode::METHOD_NOT_ALLOWED, "method not allowed")
            }
            _ => text(StatusCode::NOT_FOUND, "not found"),
        }
    }

    async fn reload(&self) -> Response<Full<Bytes>> {
        match self.reloader.reload().await {
            Ok(summary) => {
                info!(
                    path = %self.reloader.config_path().display(),
                    domains = summary.domains,
                    backends = summary.backends,
                    "configuration reloaded via admin endpoint"
                );
                text(StatusCode::OK, "Configuration reloaded")
            }
            Err(e) => text(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Invalid configuration: {}", e),
            ),
        }
    }

    async fn report(&self) -> Response<Full<Bytes>> {
        match self.store.domain_report().await {
            Ok(report) => json(&report),
            Err(e) => {
                error!(error = %e, "report query failed");
                text(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        }
    }
}

fn respond(status: StatusCode, content_type: &'static str, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

fn text(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    respond(status, "text/plain; charset=utf-8", body)
}

fn json<T: Serialize + ?Sized>(value: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(value) {
        Ok(body) => respond(StatusCode::OK, "application/json", body),
        Err(e) => text(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// Serve admin connections accepted on `listener`.
pub async fn serve(listener: TcpListener, service: Arc<AdminService>) -> std::io::Result<()> {
    info!(addr = %listener.local_addr()?, "admin server listening");

    loop {
        let stream = match listener.accept().await {
            Ok((stream, _)) => stream,
            Err(e) => {
                warn!(error = %e, "failed to accept admin connection");
                continue;
            }
        };
        let io = TokioIo::new(stream);
        let service = Arc::clone(&service);

        tokio::spawn(async move {
            let handler = service_fn(move |req: Request<Incoming>| {
                let service = Arc::clone(&service);
                async move { Ok::<_, Infallible>(service.handle(req).await) }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, handler).await {
                debug!(error = %e, "admin connection error");
            }
        });
    }
}
