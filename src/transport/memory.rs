//! In-process forwarding channel.
//!
//! ```rust,ignore
//! use gateway_relay::transport::memory;
//!
//! let (sink, source) = memory::channel(1024);
//! ```

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use super::{PayloadHandler, PayloadSink, PayloadSource, TransportError};
use crate::payload::RawPayload;

/// Create a connected sink/source pair holding at most `capacity` payloads.
pub fn channel(capacity: usize) -> (MemorySink, MemorySource) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (
        MemorySink { sender },
        MemorySource {
            receiver: Mutex::new(receiver),
        },
    )
}

/// Never waits: a full channel rejects the payload.
#[derive(Clone)]
pub struct MemorySink {
    sender: mpsc::Sender<RawPayload>,
}

#[async_trait]
impl PayloadSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn publish(&self, payload: &RawPayload) -> Result<(), TransportError> {
        self.sender.try_send(payload.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::Full,
            mpsc::error::TrySendError::Closed(_) => TransportError::Closed,
        })
    }
}

pub struct MemorySource {
    receiver: Mutex<mpsc::Receiver<RawPayload>>,
}

#[async_trait]
impl PayloadSource for MemorySource {
    fn name(&self) -> &str {
        "memory"
    }

    async fn receive(&self, handler: &dyn PayloadHandler) -> Result<(), TransportError> {
        let mut receiver = self.receiver.lock().await;

        while let Some(payload) = receiver.recv().await {
            let op = payload.op;
            let sequence = payload.s;
            if let Err(e) = handler.handle(payload).await {
                warn!(op = ?op, sequence = ?sequence, error = %e, "Payload handler failed, skipping");
            }
        }

        debug!("Memory channel closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::Opcode;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct Recorder {
        seen: StdMutex<Vec<RawPayload>>,
    }

    #[async_trait]
    impl PayloadHandler for Recorder {
        async fn handle(&self, payload: RawPayload) -> Result<(), TransportError> {
            if payload.op == Opcode::InvalidSession {
                return Err(TransportError::Handler("refused".to_string()));
            }
            self.seen.lock().unwrap().push(payload);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_round_trip_in_order() {
        let (sink, source) = channel(8);
        let first = RawPayload::dispatch("GUILD_CREATE", 1, json!({"id": "1"}));
        let second = RawPayload::new(Opcode::HeartbeatAck);

        sink.publish(&first).await.unwrap();
        sink.publish(&second).await.unwrap();
        drop(sink);

        let recorder = Recorder::default();
        source.receive(&recorder).await.unwrap();
        assert_eq!(*recorder.seen.lock().unwrap(), vec![first, second]);
    }

    #[tokio::test]
    async fn test_full_channel_rejects() {
        let (sink, _source) = channel(1);
        sink.publish(&RawPayload::new(Opcode::Heartbeat)).await.unwrap();

        let result = sink.publish(&RawPayload::new(Opcode::Heartbeat)).await;
        assert!(matches!(result, Err(TransportError::Full)));
    }

    #[tokio::test]
    async fn test_closed_channel_rejects() {
        let (sink, source) = channel(1);
        drop(source);

        let result = sink.publish(&RawPayload::new(Opcode::Heartbeat)).await;
        assert!(matches!(result, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn test_handler_failure_skips_payload() {
        let (sink, source) = channel(8);
        sink.publish(&RawPayload::new(Opcode::InvalidSession)).await.unwrap();
        sink.publish(&RawPayload::new(Opcode::Hello)).await.unwrap();
        drop(sink);

        let recorder = Recorder::default();
        source.receive(&recorder).await.unwrap();

        let seen = recorder.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].op, Opcode::Hello);
    }
}
