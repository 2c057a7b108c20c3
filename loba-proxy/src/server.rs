//! Proxy server: accepts client connections and routes each request by host.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::{self, HeaderValue};
use hyper::http::uri::Authority;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use loba_core::completion::{CompletionHook, ExchangeRecord, REQUEST_ID_HEADER};
use loba_core::config::normalize_domain;
use loba_core::{RouteError, SharedRoutingTable};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::forwarder::{Forwarder, ProxyBody};

/// Everything a request handler needs.
pub struct ProxyState {
    routing: SharedRoutingTable,
    forwarder: Forwarder,
    completion: CompletionHook,
}

impl ProxyState {
    /// Bundle the routing table, forwarder and completion hook.
    pub fn new(routing: SharedRoutingTable, forwarder: Forwarder, completion: CompletionHook) -> Self {
        Self {
            routing,
            forwarder,
            completion,
        }
    }
}

/// Serve proxy connections accepted on `listener`.
pub async fn serve(listener: TcpListener, state: Arc<ProxyState>) -> std::io::Result<()> {
    info!(addr = %listener.local_addr()?, "proxy listening");

    loop {
        let (stream, client_addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "failed to accept connection");
                continue;
            }
        };

        let io = TokioIo::new(stream);
        let state = Arc::clone(&state);

        tokio::task::spawn(async move {
            let service = service_fn(move |req| handle_request(Arc::clone(&state), client_addr, req));

            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                debug!(error = %err, %client_addr, "error serving connection");
            }
        });
    }
}

/// Route one request to a backend of its domain and stream the response back.
async fn handle_request(
    state: Arc<ProxyState>,
    client_addr: SocketAddr,
    req: Request<Incoming>,
) -> Result<Response<ProxyBody>, Infallible> {
    let domain = request_domain(&req).unwrap_or_default();

    let backend = match state.routing.select(&domain) {
        Ok(backend) => backend,
        Err(e) => {
            warn!(domain = %domain, error = %e, "request not routed");
            let message = match e {
                RouteError::UnknownDomain(_) => "No servers available for domain",
                RouteError::NoBackendAvailable(_) => "No active servers available for domain",
            };
            return Ok(error_response(StatusCode::INTERNAL_SERVER_ERROR, message));
        }
    };

    let user_agent = req
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    debug!(domain = %domain, backend = backend.address(), method = %req.method(), uri = %req.uri(), "forwarding request");

    let mut response = match state.forwarder.forward(backend.address(), client_addr, req).await {
        Ok(response) => response,
        Err(e) => {
            warn!(domain = %domain, backend = backend.address(), error = %e, "forwarding failed");
            return Ok(error_response(StatusCode::BAD_GATEWAY, "Bad gateway"));
        }
    };

    let record = ExchangeRecord {
        status_code: response.status().as_u16(),
        upstream_address: backend.address().to_string(),
        client_address: client_addr.to_string(),
        user_agent,
        domain,
    };
    let request_id = state.completion.complete(record).await;

    if let Ok(value) = HeaderValue::from_str(request_id.as_str()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    Ok(response)
}

/// The normalised host a request is addressed to, without port.
fn request_domain<B>(req: &Request<B>) -> Option<String> {
    let host = req
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| req.uri().authority().map(Authority::as_str))?;

    let authority: Authority = host.parse().ok()?;
    Some(normalize_domain(authority.host()))
}

fn error_response(status: StatusCode, message: &'static str) -> Response<ProxyBody> {
    let body = Full::new(Bytes::from_static(message.as_bytes()))
        .map_err(|never| match never {})
        .boxed();
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    response
}
