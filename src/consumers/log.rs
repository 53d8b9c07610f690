//! Log Consumer - Structured logging of domain events.
//!
//! # Example
//!
//! ```rust,ignore
//! use gateway_relay::consumers::LogConsumer;
//! use std::sync::Arc;
//!
//! bus.on(Arc::new(LogConsumer::with_prefix("audit")));
//! ```

use async_trait::async_trait;
use tracing::info;

use super::{ConsumerError, ConsumerResult, EventConsumer};
use crate::event::DomainEvent;

/// Logs every event it receives, with the event as JSON.
#[derive(Debug, Clone)]
pub struct LogConsumer {
    /// Prefix for log messages
    prefix: String,
}

impl LogConsumer {
    pub fn new() -> Self {
        Self {
            prefix: "event".to_string(),
        }
    }

    /// The prefix distinguishes several log consumers on one bus.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Default for LogConsumer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventConsumer for LogConsumer {
    fn name(&self) -> &str {
        "log"
    }

    async fn consume(&self, event: &DomainEvent) -> Result<ConsumerResult, ConsumerError> {
        let kind = event.kind();
        let payload = serde_json::to_string(event)?;
        let guild_id = event.guild_id().map(|id| id.to_string());

        info!(
            prefix = %self.prefix,
            kind = ?kind,
            guild_id = ?guild_id,
            payload = %payload,
            "[{}] Event: {:?}",
            self.prefix,
            kind
        );

        Ok(ConsumerResult::success(
            self.name(),
            format!("Logged {:?} with prefix '{}'", kind, self.prefix),
        ))
    }
}
