//! Dispatch handlers.
//!
//! A handler turns one named dispatch into at most one [`DomainEvent`],
//! updating the entity cache first so that a consumer reacting to the event
//! sees a cache that already agrees with it.
//!
//! Handlers parse the dispatch body completely before touching the cache. A
//! body that fails to parse yields [`HandlerError::Malformed`] and leaves the
//! cache exactly as it was.
//!
//! ## Built-in Handlers
//!
//! - [`lifecycle`]: `READY`, `RESUMED`
//! - [`guild`]: `GUILD_CREATE`, `GUILD_UPDATE`, `GUILD_DELETE`
//! - [`member`]: `GUILD_MEMBER_ADD`, `GUILD_MEMBER_UPDATE`, `GUILD_MEMBER_REMOVE`
//! - [`channel`]: `CHANNEL_CREATE`, `CHANNEL_UPDATE`, `CHANNEL_DELETE`
//! - [`presence`]: `PRESENCE_UPDATE`
//! - [`message`]: `MESSAGE_CREATE`
//!
//! ## Writing a Handler
//!
//! ```rust,ignore
//! use gateway_relay::handlers::{DispatchHandler, HandlerError};
//! use gateway_relay::{DispatchContext, DomainEvent};
//! use async_trait::async_trait;
//!
//! struct TypingStart;
//!
//! #[async_trait]
//! impl DispatchHandler for TypingStart {
//!     fn name(&self) -> &str {
//!         "typing-start"
//!     }
//!
//!     async fn handle(&self, _ctx: DispatchContext<'_>) -> Result<Option<DomainEvent>, HandlerError> {
//!         Ok(None)
//!     }
//! }
//! ```

pub mod channel;
pub mod guild;
pub mod lifecycle;
pub mod member;
pub mod message;
pub mod presence;
pub mod wire;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::event::DomainEvent;
use crate::mediator::DispatchContext;
use crate::payload::Dispatch;

/// Dispatch names understood by the built-in handlers.
pub mod kinds {
    pub const READY: &str = "READY";
    pub const RESUMED: &str = "RESUMED";
    pub const GUILD_CREATE: &str = "GUILD_CREATE";
    pub const GUILD_UPDATE: &str = "GUILD_UPDATE";
    pub const GUILD_DELETE: &str = "GUILD_DELETE";
    pub const GUILD_MEMBER_ADD: &str = "GUILD_MEMBER_ADD";
    pub const GUILD_MEMBER_UPDATE: &str = "GUILD_MEMBER_UPDATE";
    pub const GUILD_MEMBER_REMOVE: &str = "GUILD_MEMBER_REMOVE";
    pub const CHANNEL_CREATE: &str = "CHANNEL_CREATE";
    pub const CHANNEL_UPDATE: &str = "CHANNEL_UPDATE";
    pub const CHANNEL_DELETE: &str = "CHANNEL_DELETE";
    pub const PRESENCE_UPDATE: &str = "PRESENCE_UPDATE";
    pub const MESSAGE_CREATE: &str = "MESSAGE_CREATE";
}

/// Errors that can occur while handling a dispatch.
#[derive(Error, Debug)]
pub enum HandlerError {
    /// The dispatch body does not have the expected shape
    #[error("malformed {kind} dispatch: {source}")]
    Malformed {
        kind: String,
        #[source]
        source: serde_json::Error,
    },

    /// Generic handler failure
    #[error("handler failed: {0}")]
    Failed(String),
}

/// Translates one kind of dispatch.
///
/// Handlers must not keep the context (or anything borrowed from it) past
/// the call; the borrow checker enforces this.
#[async_trait]
pub trait DispatchHandler: Send + Sync {
    /// Handler name for logging
    fn name(&self) -> &str;

    /// Produce the event for this dispatch, or `None` if it has no
    /// externally meaningful projection.
    async fn handle(&self, ctx: DispatchContext<'_>) -> Result<Option<DomainEvent>, HandlerError>;
}

/// Deserialize a dispatch body into its wire type.
pub(crate) fn parse<T: DeserializeOwned>(dispatch: &Dispatch) -> Result<T, HandlerError> {
    T::deserialize(&dispatch.data).map_err(|source| HandlerError::Malformed {
        kind: dispatch.kind.clone(),
        source,
    })
}
