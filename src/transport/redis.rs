//! Redis stream adapters.
//!
//! [`RedisStreamSink`] appends one entry per payload; [`RedisStreamSource`]
//! reads them back through a consumer group.
//!
//! Consumers in one group split the entries between them, so a group must
//! have a single live consumer: translation needs every dispatch of a
//! session, in order. Several receiving processes each use their own group
//! and each read the whole stream. The group exists to track acks and to
//! recover pending entries when a worker restarts.
//!
//! # Entry Layout
//!
//! ```text
//! XADD gateway:payloads MAXLEN ~ 100000 * op 0 t GUILD_CREATE payload {"op":0,"s":42,...}
//! ```
//!
//! Only `payload` is read back; `op` and `t` are there for humans using
//! `XRANGE`.
//!
//! # Delivery
//!
//! - Entries are acknowledged after the handler returns, whatever the outcome.
//! - Unparseable entries are acknowledged and skipped.
//! - Entries whose handler failed are copied to the dead-letter stream first.
//! - Entries left pending by a crashed consumer are claimed (`XAUTOCLAIM`)
//!   and handled before new entries are read.

use async_trait::async_trait;
use deadpool_redis::redis::streams::{StreamId, StreamRangeReply, StreamReadOptions, StreamReadReply};
use deadpool_redis::redis::{cmd, from_redis_value, AsyncCommands, RedisError, Value as RedisValue};
use deadpool_redis::{Connection, Pool};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::dlq::DeadLetterStream;
use super::{PayloadHandler, PayloadSink, PayloadSource, TransportError};
use crate::payload::RawPayload;
use crate::PAYLOAD_STREAM_NAME;

/// Approximate cap on the payload stream length
pub const DEFAULT_STREAM_MAX_LEN: usize = 100_000;

/// How long one XREADGROUP call blocks waiting for entries
const DEFAULT_BLOCK: Duration = Duration::from_millis(2000);

/// Entries requested per read
const DEFAULT_BATCH_SIZE: usize = 10;

/// Idle time after which another consumer's pending entry may be claimed
const DEFAULT_CLAIM_IDLE: Duration = Duration::from_millis(30000);

/// Consumer name from the host, or a random one.
pub fn default_consumer_name() -> String {
    if let Ok(hostname) = hostname::get() {
        if let Some(name) = hostname.to_str() {
            return format!("worker-{}", name);
        }
    }

    format!("worker-{}", uuid::Uuid::new_v4())
}

/// Extract a string field from Redis stream data.
fn field_str(map: &HashMap<String, RedisValue>, key: &str) -> Option<String> {
    match map.get(key)? {
        RedisValue::BulkString(bytes) => Some(String::from_utf8_lossy(bytes).to_string()),
        RedisValue::SimpleString(s) => Some(s.clone()),
        _ => None,
    }
}

/// Parse the payload carried by a stream entry.
fn parse_entry(map: &HashMap<String, RedisValue>) -> Result<RawPayload, String> {
    let raw = field_str(map, "payload").ok_or_else(|| "missing payload field".to_string())?;
    serde_json::from_str(&raw).map_err(|e| e.to_string())
}

/// Blocking reads report an empty stream as an error.
fn is_idle_read(e: &RedisError) -> bool {
    let message = e.to_string();
    message.contains("timed out") || message.contains("response was nil")
}

async fn connection(pool: &Pool) -> Result<Connection, TransportError> {
    pool.get().await.map_err(|e| {
        error!(error = %e, "Failed to get Redis connection");
        TransportError::Connection(e.to_string())
    })
}

/// Writes payloads to a Redis stream.
#[derive(Clone)]
pub struct RedisStreamSink {
    pool: Pool,
    stream: String,
    max_len: usize,
}

impl RedisStreamSink {
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            stream: PAYLOAD_STREAM_NAME.to_string(),
            max_len: DEFAULT_STREAM_MAX_LEN,
        }
    }

    /// Set the stream name
    pub fn with_stream(mut self, stream: impl Into<String>) -> Self {
        self.stream = stream.into();
        self
    }

    /// Set the approximate length cap
    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len.max(1);
        self
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }
}

#[async_trait]
impl PayloadSink for RedisStreamSink {
    fn name(&self) -> &str {
        "redis"
    }

    async fn publish(&self, payload: &RawPayload) -> Result<(), TransportError> {
        let payload_str = serde_json::to_string(payload)?;
        let mut conn = connection(&self.pool).await?;

        let id: String = cmd("XADD")
            .arg(&self.stream)
            .arg("MAXLEN")
            .arg("~")
            .arg(self.max_len)
            .arg("*")
            .arg("op")
            .arg(payload.op.code())
            .arg("t")
            .arg(payload.t.as_deref().unwrap_or(""))
            .arg("payload")
            .arg(payload_str)
            .query_async(&mut conn)
            .await
            .map_err(|e| TransportError::Command(e.to_string()))?;

        debug!(
            id = %id,
            stream = %self.stream,
            op = ?payload.op,
            kind = ?payload.t,
            "Payload appended to stream"
        );
        Ok(())
    }
}

/// Reads payloads from a Redis stream as the only consumer of its group.
#[derive(Clone)]
pub struct RedisStreamSource {
    pool: Pool,
    stream: String,
    group: String,
    consumer: String,
    block: Duration,
    batch_size: usize,
    claim_idle: Duration,
    dead_letters: Option<DeadLetterStream>,
}

impl RedisStreamSource {
    pub fn new(pool: Pool, group: impl Into<String>, consumer: impl Into<String>) -> Self {
        Self {
            pool,
            stream: PAYLOAD_STREAM_NAME.to_string(),
            group: group.into(),
            consumer: consumer.into(),
            block: DEFAULT_BLOCK,
            batch_size: DEFAULT_BATCH_SIZE,
            claim_idle: DEFAULT_CLAIM_IDLE,
            dead_letters: None,
        }
    }

    /// Set the stream name
    pub fn with_stream(mut self, stream: impl Into<String>) -> Self {
        self.stream = stream.into();
        self
    }

    /// Set how long each read blocks
    pub fn with_block(mut self, block: Duration) -> Self {
        self.block = block;
        self
    }

    /// Set entries requested per read
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Set the idle threshold for claiming abandoned entries
    pub fn with_claim_idle(mut self, claim_idle: Duration) -> Self {
        self.claim_idle = claim_idle;
        self
    }

    /// Copy entries whose handler failed to `dead_letters`
    pub fn with_dead_letters(mut self, dead_letters: DeadLetterStream) -> Self {
        self.dead_letters = Some(dead_letters);
        self
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn consumer(&self) -> &str {
        &self.consumer
    }

    /// Create the consumer group (and the stream) if missing.
    async fn ensure_group(&self, conn: &mut Connection) -> Result<(), TransportError> {
        let result: Result<(), _> = cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.stream)
            .arg(&self.group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(conn)
            .await;

        match result {
            Ok(()) => {
                info!(stream = %self.stream, consumer_group = %self.group, "Created consumer group");
                Ok(())
            }
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!(consumer_group = %self.group, "Consumer group already exists");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Failed to create consumer group");
                Err(TransportError::Command(e.to_string()))
            }
        }
    }

    /// Claim entries other consumers left pending for too long.
    async fn claim_pending(&self, conn: &mut Connection) -> Vec<StreamId> {
        let result: Result<RedisValue, _> = cmd("XAUTOCLAIM")
            .arg(&self.stream)
            .arg(&self.group)
            .arg(&self.consumer)
            .arg(self.claim_idle.as_millis() as u64)
            .arg("0-0")
            .arg("COUNT")
            .arg(self.batch_size)
            .query_async(conn)
            .await;

        let reply = match result {
            Ok(reply) => reply,
            Err(e) => {
                // Redis before 6.2 has no XAUTOCLAIM
                debug!(error = %e, "XAUTOCLAIM failed, skipping pending recovery");
                return Vec::new();
            }
        };

        let entries = match &reply {
            RedisValue::Array(items) => items.get(1),
            _ => None,
        };
        let claimed = entries
            .and_then(|entries| from_redis_value::<StreamRangeReply>(entries).ok())
            .map(|range| range.ids)
            .unwrap_or_default();

        if !claimed.is_empty() {
            info!(count = claimed.len(), "Claimed pending entries from previous consumers");
        }
        claimed
    }

    async fn ack(&self, conn: &mut Connection, id: &str) {
        let result: Result<(), _> = conn.xack(&self.stream, &self.group, &[id]).await;
        if let Err(e) = result {
            error!(id = %id, error = %e, "Failed to ACK entry");
        }
    }

    async fn process(&self, conn: &mut Connection, entry: &StreamId, handler: &dyn PayloadHandler) {
        let id = entry.id.as_str();

        let payload = match parse_entry(&entry.map) {
            Ok(payload) => payload,
            Err(reason) => {
                warn!(id = %id, reason = %reason, "Skipping unparseable entry");
                self.ack(conn, id).await;
                return;
            }
        };

        debug!(id = %id, op = ?payload.op, kind = ?payload.t, sequence = ?payload.s, "Processing payload");

        let kind = payload.t.clone();
        let payload_json = field_str(&entry.map, "payload").unwrap_or_default();

        if let Err(e) = handler.handle(payload).await {
            warn!(id = %id, kind = ?kind, error = %e, "Payload handler failed");

            if let Some(dead_letters) = &self.dead_letters {
                if let Err(dlq_err) = dead_letters
                    .add(&payload_json, kind.as_deref(), &e.to_string(), Some(id))
                    .await
                {
                    error!(id = %id, error = %dlq_err, "Failed to add payload to DLQ");
                }
            }
        }

        self.ack(conn, id).await;
    }
}

#[async_trait]
impl PayloadSource for RedisStreamSource {
    fn name(&self) -> &str {
        "redis"
    }

    async fn receive(&self, handler: &dyn PayloadHandler) -> Result<(), TransportError> {
        let mut conn = connection(&self.pool).await?;
        self.ensure_group(&mut conn).await?;

        for entry in self.claim_pending(&mut conn).await {
            self.process(&mut conn, &entry, handler).await;
        }

        info!(
            stream = %self.stream,
            consumer_group = %self.group,
            consumer = %self.consumer,
            "Listening for payloads"
        );

        let opts = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .block(self.block.as_millis() as usize)
            .count(self.batch_size);

        loop {
            let result: Result<StreamReadReply, _> =
                conn.xread_options(&[&self.stream], &[">"], &opts).await;

            match result {
                Ok(reply) => {
                    for stream_key in reply.keys {
                        for entry in stream_key.ids {
                            self.process(&mut conn, &entry, handler).await;
                        }
                    }
                }
                Err(e) if is_idle_read(&e) => {}
                Err(e) => {
                    error!(error = %e, stream = %self.stream, "Stream read error");
                    return Err(TransportError::Command(e.to_string()));
                }
            }
        }
    }
}
