//! Cross-process payload forwarding.
//!
//! The process that owns the gateway socket writes raw payloads to a
//! [`PayloadSink`]; a second process reads them back from the matching
//! [`PayloadSource`] and translates them. Payloads cross the boundary
//! unmodified and in receipt order.
//!
//! ```text
//! socket -> Forwarding strategy -> PayloadSink ==(Redis stream)==> PayloadSource -> Receiving strategy -> bus
//! ```
//!
//! ## Adapters
//!
//! - [`memory`]: bounded in-process channel (tests, single-host setups)
//! - [`redis`]: Redis stream with consumer groups
//! - [`dlq`]: dead-letter stream for payloads whose handler failed

pub mod dlq;
pub mod memory;
pub mod redis;

use async_trait::async_trait;
use futures::StreamExt;
use thiserror::Error;
use tracing::{debug, warn};

use crate::connection::PayloadStream;
use crate::payload::RawPayload;

/// Errors raised by sinks, sources and payload handlers.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("command error: {0}")]
    Command(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("channel full, payload dropped")]
    Full,

    #[error("channel closed")]
    Closed,

    #[error("handler failed: {0}")]
    Handler(String),
}

/// Totals reported by [`PayloadSink::forward`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForwardStats {
    pub forwarded: u64,
    pub dropped: u64,
}

/// Outbound side of the forwarding channel.
#[async_trait]
pub trait PayloadSink: Send + Sync {
    /// Sink name for logging
    fn name(&self) -> &str;

    /// Write one payload.
    async fn publish(&self, payload: &RawPayload) -> Result<(), TransportError>;

    /// Write every payload of `payloads` in order until the stream ends.
    ///
    /// A payload the sink rejects is logged and dropped; forwarding carries
    /// on with the next one.
    async fn forward(&self, mut payloads: PayloadStream) -> ForwardStats {
        let mut stats = ForwardStats::default();

        while let Some(payload) = payloads.next().await {
            match self.publish(&payload).await {
                Ok(()) => {
                    stats.forwarded += 1;
                    debug!(sink = %self.name(), op = ?payload.op, kind = ?payload.t, "Payload forwarded");
                }
                Err(e) => {
                    stats.dropped += 1;
                    warn!(
                        sink = %self.name(),
                        op = ?payload.op,
                        kind = ?payload.t,
                        sequence = ?payload.s,
                        error = %e,
                        "Failed to forward payload, dropping"
                    );
                }
            }
        }

        stats
    }
}

/// Called by a [`PayloadSource`] for every payload it reads.
#[async_trait]
pub trait PayloadHandler: Send + Sync {
    async fn handle(&self, payload: RawPayload) -> Result<(), TransportError>;
}

/// Inbound side of the forwarding channel.
#[async_trait]
pub trait PayloadSource: Send + Sync {
    /// Source name for logging
    fn name(&self) -> &str;

    /// Feed payloads to `handler` one at a time, in order.
    ///
    /// The next payload is requested only after the handler returns. Handler
    /// errors are logged and the payload skipped. Returns `Ok(())` when the
    /// channel ends, or the channel's error.
    async fn receive(&self, handler: &dyn PayloadHandler) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::Opcode;
    use futures::stream;
    use std::sync::Mutex;

    struct FlakySink {
        seen: Mutex<Vec<Option<u64>>>,
    }

    #[async_trait]
    impl PayloadSink for FlakySink {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn publish(&self, payload: &RawPayload) -> Result<(), TransportError> {
            if payload.s == Some(2) {
                return Err(TransportError::Command("rejected".to_string()));
            }
            self.seen.lock().unwrap().push(payload.s);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_forward_drops_failures_and_continues() {
        let sink = FlakySink {
            seen: Mutex::new(Vec::new()),
        };
        let payloads: Vec<RawPayload> = (1..=3)
            .map(|seq| {
                let mut payload = RawPayload::new(Opcode::Dispatch);
                payload.s = Some(seq);
                payload
            })
            .collect();

        let stats = sink.forward(stream::iter(payloads).boxed()).await;

        assert_eq!(
            stats,
            ForwardStats {
                forwarded: 2,
                dropped: 1
            }
        );
        assert_eq!(*sink.seen.lock().unwrap(), vec![Some(1), Some(3)]);
    }
}
