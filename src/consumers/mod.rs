//! Event consumers.
//!
//! An [`EventConsumer`] reacts to domain events delivered by the
//! [`EventBus`](crate::EventBus). Attach one with
//! [`EventBus::on`](crate::EventBus::on); the bus runs it on its own task,
//! so a slow, failing or panicking consumer never affects the others.
//!
//! ## Built-in Consumers
//!
//! - [`LogConsumer`]: Structured logging of events
//!
//! ## Creating Custom Consumers
//!
//! ```rust,ignore
//! use gateway_relay::consumers::{ConsumerError, ConsumerResult, EventConsumer};
//! use gateway_relay::DomainEvent;
//! use async_trait::async_trait;
//!
//! struct Greeter;
//!
//! #[async_trait]
//! impl EventConsumer for Greeter {
//!     fn name(&self) -> &str {
//!         "greeter"
//!     }
//!
//!     async fn consume(&self, event: &DomainEvent) -> Result<ConsumerResult, ConsumerError> {
//!         Ok(ConsumerResult::success(self.name(), "Said hello"))
//!     }
//! }
//! ```

pub mod log;

use async_trait::async_trait;
use thiserror::Error;

use crate::event::DomainEvent;

pub use log::LogConsumer;

/// Errors that can occur while consuming an event.
#[derive(Error, Debug)]
pub enum ConsumerError {
    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic consumer failure
    #[error("consumer failed: {0}")]
    Failed(String),
}

/// Result of a successful consumption.
#[derive(Debug, Clone)]
pub struct ConsumerResult {
    /// Name of the consumer that produced this result
    pub consumer_name: String,

    /// Human-readable message describing what happened
    pub message: String,
}

impl ConsumerResult {
    pub fn success(consumer_name: &str, message: impl Into<String>) -> Self {
        Self {
            consumer_name: consumer_name.to_string(),
            message: message.into(),
        }
    }
}

/// Receives every event published on the bus after it was attached.
#[async_trait]
pub trait EventConsumer: Send + Sync {
    /// Consumer name for logging
    fn name(&self) -> &str;

    /// Handle one event.
    async fn consume(&self, event: &DomainEvent) -> Result<ConsumerResult, ConsumerError>;
}
