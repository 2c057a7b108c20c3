//! Completion hook run after a proxied exchange.
//!
//! The forwarder reports each completed exchange as an [`ExchangeRecord`]; the
//! hook assigns it a [`RequestId`], writes a [`LogEntry`] to the request log
//! store and hands the id back for the `X-Request-ID` response header.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::error::StoreError;

/// Response header carrying the request id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Opaque identifier correlating a response with its log entry.
///
/// 32 lowercase hex characters from a random v4 UUID: unique enough for log
/// correlation, not meant as a secret.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(String);

impl RequestId {
    /// Generate a fresh id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// The id as text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the forwarder reports once an exchange has completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeRecord {
    /// Status returned by the backend.
    pub status_code: u16,
    /// Address of the backend that served the request.
    pub upstream_address: String,
    /// Peer address of the client, with or without port.
    pub client_address: String,
    /// Client `User-Agent`, empty when absent.
    pub user_agent: String,
    /// Domain the request was routed by.
    pub domain: String,
}

/// One row of the request log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Id also sent back as `X-Request-ID`.
    pub request_id: String,
    /// Client IP without port.
    pub request_ip: String,
    /// Client `User-Agent`.
    pub user_agent: String,
    /// Backend that served the request.
    pub backend_address: String,
    /// Domain the request was routed by.
    pub domain: String,
    /// Status returned by the backend.
    pub status_code: u16,
    /// When the exchange completed.
    pub timestamp: DateTime<Utc>,
}

/// Per-domain aggregate returned by the report query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainReport {
    /// Domain.
    pub domain: String,
    /// Logged requests for the domain.
    pub total_requests: i64,
    /// Timestamp of the latest logged request.
    pub most_recent_time: DateTime<Utc>,
}

/// Persistent storage for request log entries.
#[async_trait]
pub trait RequestLogStore: Send + Sync {
    /// Store one entry.
    async fn record(&self, entry: &LogEntry) -> Result<(), StoreError>;

    /// Per domain, the total request count and most recent timestamp.
    async fn domain_report(&self) -> Result<Vec<DomainReport>, StoreError>;
}

/// Strip the port from a peer address, keeping bare hosts as they are.
pub fn client_ip(client_address: &str) -> String {
    match client_address.parse::<SocketAddr>() {
        Ok(addr) => addr.ip().to_string(),
        Err(_) => client_address.to_string(),
    }
}

/// Turns completed exchanges into log entries.
#[derive(Clone)]
pub struct CompletionHook {
    store: Arc<dyn RequestLogStore>,
}

impl CompletionHook {
    /// Create a hook writing to `store`.
    pub fn new(store: Arc<dyn RequestLogStore>) -> Self {
        Self { store }
    }

    /// Log `record` and return the id to send back to the client.
    ///
    /// A failed write is logged and otherwise ignored; the client response is
    /// not affected by the log store.
    pub async fn complete(&self, record: ExchangeRecord) -> RequestId {
        let request_id = RequestId::generate();
        let entry = LogEntry {
            request_id: request_id.to_string(),
            request_ip: client_ip(&record.client_address),
            user_agent: record.user_agent,
            backend_address: record.upstream_address,
            domain: record.domain,
            status_code: record.status_code,
            timestamp: Utc::now(),
        };

        if let Err(e) = self.store.record(&entry).await {
            warn!(request_id = %request_id, error = %e, "failed to write request log entry");
        }

        request_id
    }
}
