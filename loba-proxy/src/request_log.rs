//! SQLite-backed request log.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use loba_core::completion::{DomainReport, LogEntry, RequestLogStore};
use loba_core::StoreError;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

const CREATE_LOGS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS logs (
        request_id TEXT,
        request_ip TEXT,
        user_agent TEXT,
        server_addr TEXT,
        domain TEXT,
        timestamp DATETIME DEFAULT CURRENT_TIMESTAMP,
        http_response INTEGER
    )
"#;

const INSERT_LOG_ENTRY: &str = r#"
    INSERT INTO logs (request_id, request_ip, user_agent, server_addr, domain, timestamp, http_response)
    VALUES (?, ?, ?, ?, ?, ?, ?)
"#;

const DOMAIN_STATS: &str = r#"
    SELECT domain, COUNT(*) AS total_requests, MAX(timestamp) AS most_recent_time
    FROM logs
    GROUP BY domain
    ORDER BY domain
"#;

/// Request log stored in a SQLite database.
pub struct SqliteLogStore {
    pool: SqlitePool,
}

impl SqliteLogStore {
    /// Open (creating if missing) the database at `url` and ensure the schema.
    ///
    /// `url` is either a file path or a `sqlite:` URL.
    pub async fn open(url: &str) -> Result<Self, sqlx::Error> {
        let options = if url.starts_with("sqlite:") {
            SqliteConnectOptions::from_str(url)?
        } else {
            SqliteConnectOptions::new().filename(url)
        };
        let options = options.create_if_missing(true);

        // An in-memory database lives only as long as its single connection.
        let max_connections = if url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        sqlx::query(CREATE_LOGS_TABLE).execute(&pool).await?;

        info!(database = url, "request log opened");
        Ok(Self { pool })
    }
}

#[async_trait]
impl RequestLogStore for SqliteLogStore {
    async fn record(&self, entry: &LogEntry) -> Result<(), StoreError> {
        sqlx::query(INSERT_LOG_ENTRY)
            .bind(&entry.request_id)
            .bind(&entry.request_ip)
            .bind(&entry.user_agent)
            .bind(&entry.backend_address)
            .bind(&entry.domain)
            // Fixed-width UTC text keeps MAX(timestamp) chronological.
            .bind(entry.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true))
            .bind(i64::from(entry.status_code))
            .execute(&self.pool)
            .await
            .map_err(StoreError::new)?;

        debug!(request_id = %entry.request_id, "request logged");
        Ok(())
    }

    async fn domain_report(&self) -> Result<Vec<DomainReport>, StoreError> {
        let rows = sqlx::query(DOMAIN_STATS)
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::new)?;

        rows.iter()
            .map(|row| -> Result<DomainReport, StoreError> {
                let most_recent: String = row.try_get("most_recent_time").map_err(StoreError::new)?;
                let most_recent_time = parse_timestamp(&most_recent)?;

                Ok(DomainReport {
                    domain: row.try_get("domain").map_err(StoreError::new)?,
                    total_requests: row.try_get("total_requests").map_err(StoreError::new)?,
                    most_recent_time,
                })
            })
            .collect()
    }
}

/// Parses a stored timestamp. Rows written by [`SqliteLogStore::record`] hold
/// RFC 3339; rows that fell back to the column default hold SQLite's
/// `CURRENT_TIMESTAMP` format, which is UTC.
fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .map_err(StoreError::new)
}
