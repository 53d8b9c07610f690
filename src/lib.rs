//! # Gateway Relay
//!
//! Dispatch routing for a Discord-style real-time gateway: turns raw
//! `DISPATCH` payloads into typed domain events, keeps an entity cache
//! current, and can split the socket-owning process from the processes that
//! compute events.
//!
//! ## Architecture
//!
//! ```text
//!                       Standalone
//! Connection ──────────────────────────────> Translator -> EventBus -> Consumers
//!     │                                          ^
//!     │ Forwarding                               │ Receiving
//!     └──> PayloadSink ──(Redis Stream)──> PayloadSource
//! ```
//!
//! ## Modules
//!
//! - [`payload`]: Wire payloads, opcodes and snowflake ids
//! - [`connection`]: The live connection seam and an in-memory connection
//! - [`session`]: Shard, identify options and the session lifecycle
//! - [`cache`]: Concurrent entity cache
//! - [`handlers`] and [`translator`]: Dispatch to domain event translation
//! - [`bus`]: Multi-subscriber event bus with per-subscriber buffering
//! - [`strategy`] and [`client`]: Strategy selection and client assembly
//! - [`transport`]: Payload forwarding over memory or Redis Streams

pub mod buffer;
pub mod bus;
pub mod cache;
pub mod client;
pub mod config;
pub mod connection;
pub mod consumers;
pub mod event;
pub mod handlers;
pub mod mediator;
pub mod payload;
pub mod resolver;
pub mod session;
pub mod shutdown;
pub mod strategy;
pub mod translator;
pub mod transport;

// Re-export commonly used types at crate root
pub use buffer::{BufferPolicy, Overflow};
pub use bus::{EventBus, EventSubscription};
pub use cache::EntityCache;
pub use client::{ClientBuilder, ClientError, GatewayClient, PipelineStats};
pub use connection::{ChannelConnection, ConnectionHandle, GatewayConnection};
pub use consumers::{EventConsumer, LogConsumer};
pub use event::{DomainEvent, EventKind};
pub use handlers::{DispatchHandler, HandlerError};
pub use mediator::{DispatchContext, Mediator, TranslationScope};
pub use payload::{Dispatch, Opcode, RawPayload, Snowflake};
pub use resolver::{EntityResolver, NoopResolver, RestResolver};
pub use session::{IdentifyOptions, SessionUpdate, ShardInfo};
pub use strategy::GatewayStrategy;
pub use translator::DispatchTranslator;

/// Redis stream carrying forwarded gateway payloads
pub const PAYLOAD_STREAM_NAME: &str = "gateway:payloads";

/// Redis stream holding payloads whose handling failed
pub const DLQ_STREAM_NAME: &str = "gateway:payloads:dlq";
