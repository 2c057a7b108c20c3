//! Forwarding of proxied requests to a chosen backend.

use std::net::SocketAddr;

use http_body_util::combinators::BoxBody;
use http_body_util::BodyExt;
use hyper::body::{Bytes, Incoming};
use hyper::header::{self, HeaderMap, HeaderName, HeaderValue};
use hyper::{Request, Response, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use thiserror::Error;

/// Response body handed back to the client.
pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

/// Headers meaningful only for a single transport hop.
const HOP_BY_HOP: [HeaderName; 7] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// The exchange with the chosen backend failed.
///
/// Surfaced to the client as a bad gateway; it never changes the backend's
/// health flag.
#[derive(Debug, Error)]
pub enum ForwardError {
    /// The backend address and request path do not form a valid URI.
    #[error("invalid upstream uri {uri}: {source}")]
    InvalidUri {
        /// The URI that failed to parse.
        uri: String,
        /// Parse failure.
        #[source]
        source: hyper::http::uri::InvalidUri,
    },

    /// The backend could not be reached or broke the exchange.
    #[error("upstream request failed: {0}")]
    Upstream(#[from] hyper_util::client::legacy::Error),
}

/// Streams requests to backends over a shared HTTP/1.1 client.
#[derive(Clone)]
pub struct Forwarder {
    client: Client<HttpConnector, Incoming>,
}

impl Forwarder {
    /// Create a forwarder with its own HTTP client.
    pub fn new() -> Self {
        Self {
            client: Client::builder(TokioExecutor::new()).build_http(),
        }
    }

    /// Send `req` to `backend_address` and stream the response back.
    ///
    /// The client's `Host` header is kept, hop-by-hop headers are dropped in
    /// both directions and the client IP is appended to `X-Forwarded-For`.
    pub async fn forward(
        &self,
        backend_address: &str,
        client_addr: SocketAddr,
        req: Request<Incoming>,
    ) -> Result<Response<ProxyBody>, ForwardError> {
        let (mut parts, body) = req.into_parts();

        parts.uri = upstream_uri(backend_address, &parts.uri)?;
        strip_hop_by_hop(&mut parts.headers);
        append_forwarded_for(&mut parts.headers, client_addr);

        let response = self.client.request(Request::from_parts(parts, body)).await?;

        let (mut parts, body) = response.into_parts();
        strip_hop_by_hop(&mut parts.headers);
        Ok(Response::from_parts(parts, body.boxed()))
    }
}

impl Default for Forwarder {
    fn default() -> Self {
        Self::new()
    }
}

/// Join a backend base address with the path and query of `original`.
///
/// Addresses without a scheme are treated as `http`.
pub fn upstream_uri(backend_address: &str, original: &Uri) -> Result<Uri, ForwardError> {
    let base = if backend_address.contains("://") {
        backend_address.trim_end_matches('/').to_string()
    } else {
        format!("http://{}", backend_address.trim_end_matches('/'))
    };
    let path_and_query = original.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");

    let uri = format!("{}{}", base, path_and_query);
    uri.parse().map_err(|source| ForwardError::InvalidUri { uri, source })
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    // Connection may name further per-hop headers.
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in named.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
    headers.remove("keep-alive");
}

fn append_forwarded_for(headers: &mut HeaderMap, client_addr: SocketAddr) {
    let mut hops: Vec<String> = headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(str::to_owned)
        .collect();
    hops.push(client_addr.ip().to_string());
    let value = hops.join(", ");
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert("x-forwarded-for", value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_base_and_path() {
        let original: Uri = "/search?q=rust".parse().unwrap();
        assert_eq!(
            upstream_uri("http://10.0.0.1:8080", &original).unwrap(),
            "http://10.0.0.1:8080/search?q=rust"
        );
        assert_eq!(
            upstream_uri("http://10.0.0.1:8080/api/", &original).unwrap(),
            "http://10.0.0.1:8080/api/search?q=rust"
        );
        assert_eq!(
            upstream_uri("10.0.0.1:9000", &"/".parse().unwrap()).unwrap(),
            "http://10.0.0.1:9000/"
        );
    }

    #[test]
    fn rejects_unparseable_backend() {
        let err = upstream_uri("http://bad host", &"/".parse().unwrap()).unwrap_err();
        assert!(matches!(err, ForwardError::InvalidUri { .. }));
    }

    #[test]
    fn hop_by_hop_headers_are_removed() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, x-secret"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("x-secret", HeaderValue::from_static("1"));
        headers.insert(header::USER_AGENT, HeaderValue::from_static("curl/8.0"));

        strip_hop_by_hop(&mut headers);

        assert_eq!(headers.len(), 1);
        assert_eq!(headers[header::USER_AGENT], "curl/8.0");
    }

    #[test]
    fn forwarded_for_is_appended() {
        let client: SocketAddr = "192.0.2.7:51000".parse().unwrap();
        let mut headers = HeaderMap::new();
        append_forwarded_for(&mut headers, client);
        assert_eq!(headers["x-forwarded-for"], "192.0.2.7");

        append_forwarded_for(&mut headers, "198.51.100.1:1".parse().unwrap());
        assert_eq!(headers["x-forwarded-for"], "192.0.2.7, 198.51.100.1");
    }

    #[test]
    fn forwarded_for_keeps_every_prior_line() {
        let mut headers = HeaderMap::new();
        headers.append("x-forwarded-for", HeaderValue::from_static("10.0.0.1"));
        headers.append("x-forwarded-for", HeaderValue::from_static("10.0.0.2"));

        append_forwarded_for(&mut headers, "192.0.2.7:51000".parse().unwrap());

        let values: Vec<_> = headers.get_all("x-forwarded-for").iter().collect();
        assert_eq!(values, ["10.0.0.1, 10.0.0.2, 192.0.2.7"]);
    }
}
