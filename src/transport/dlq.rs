//! Dead-letter stream for forwarded payloads.
//!
//! When the receiving side fails to handle a payload read from a Redis
//! stream, the raw payload is copied here before the original entry is
//! acknowledged, so it can be inspected and replayed by hand.
//!
//! # Example
//!
//! ```rust,ignore
//! use gateway_relay::transport::dlq::DeadLetterStream;
//!
//! let dlq = DeadLetterStream::new(redis_pool);
//! dlq.add(&payload_json, Some("GUILD_CREATE"), "handler failed", Some("1718000000000-0")).await?;
//!
//! // Later, list failed payloads
//! let failed = dlq.list(10, 0).await?;
//! ```

use deadpool_redis::redis::cmd;
use deadpool_redis::Pool;
use serde_json::Value;
use tracing::{debug, error, info};

use crate::DLQ_STREAM_NAME;

/// Maximum entries to keep (older entries are trimmed)
const DLQ_MAX_LEN: usize = 10000;

/// Capped Redis stream of payloads whose handling failed.
#[derive(Clone)]
pub struct DeadLetterStream {
    pool: Pool,
    stream: String,
}

impl DeadLetterStream {
    pub fn new(pool: Pool) -> Self {
        Self::with_stream(pool, DLQ_STREAM_NAME)
    }

    pub fn with_stream(pool: Pool, stream: impl Into<String>) -> Self {
        Self {
            pool,
            stream: stream.into(),
        }
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Record a failed payload. Returns the dead-letter entry id.
    pub async fn add(
        &self,
        payload_json: &str,
        kind: Option<&str>,
        error: &str,
        original_id: Option<&str>,
    ) -> Result<String, DlqError> {
        let mut conn = self.pool.get().await.map_err(|e| {
            error!(error = %e, "Failed to get Redis connection for DLQ");
            DlqError::ConnectionError(e.to_string())
        })?;

        let failed_at = chrono::Utc::now().to_rfc3339();

        let id: String = cmd("XADD")
            .arg(&self.stream)
            .arg("MAXLEN")
            .arg("~")
            .arg(DLQ_MAX_LEN)
            .arg("*")
            .arg("payload")
            .arg(payload_json)
            .arg("t")
            .arg(kind.unwrap_or(""))
            .arg("error")
            .arg(error)
            .arg("failedAt")
            .arg(&failed_at)
            .arg("originalId")
            .arg(original_id.unwrap_or(""))
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to add payload to DLQ");
                DlqError::RedisError(e.to_string())
            })?;

        info!(
            dlq_id = %id,
            original_id = ?original_id,
            kind = ?kind,
            "Payload moved to dead-letter stream"
        );

        Ok(id)
    }

    /// Number of entries in the stream.
    pub async fn count(&self) -> Result<u64, DlqError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| DlqError::ConnectionError(e.to_string()))?;

        let count: u64 = cmd("XLEN")
            .arg(&self.stream)
            .query_async(&mut conn)
            .await
            .map_err(|e| DlqError::RedisError(e.to_string()))?;

        Ok(count)
    }

    /// List entries, oldest first.
    ///
    /// Returns `(stream_id, entry)` pairs; the `payload` field is decoded as
    /// JSON when possible.
    pub async fn list(&self, count: usize, offset: usize) -> Result<Vec<(String, Value)>, DlqError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| DlqError::ConnectionError(e.to_string()))?;

        let entries: Vec<(String, Vec<(String, String)>)> = cmd("XRANGE")
            .arg(&self.stream)
            .arg("-")
            .arg("+")
            .arg("COUNT")
            .arg(count + offset)
            .query_async(&mut conn)
            .await
            .map_err(|e| DlqError::RedisError(e.to_string()))?;

        let result: Vec<(String, Value)> = entries
            .into_iter()
            .skip(offset)
            .take(count)
            .map(|(id, fields)| (id, entry_to_json(fields)))
            .collect();

        debug!(count = result.len(), "Retrieved DLQ entries");
        Ok(result)
    }
}

fn entry_to_json(fields: Vec<(String, String)>) -> Value {
    let mut obj = serde_json::Map::new();
    for (key, value) in fields {
        let decoded = if key == "payload" {
            serde_json::from_str::<Value>(&value).unwrap_or(Value::String(value))
        } else {
            Value::String(value)
        };
        obj.insert(key, decoded);
    }
    Value::Object(obj)
}

/// Errors that can occur when working with the dead-letter stream.
#[derive(Debug, thiserror::Error)]
pub enum DlqError {
    #[error("Redis connection error: {0}")]
    ConnectionError(String),

    #[error("Redis command error: {0}")]
    RedisError(String),
}
