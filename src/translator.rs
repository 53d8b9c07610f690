//! Dispatch Translator - turns dispatches into domain events.
//!
//! The [`DispatchTranslator`] looks up the handler registered for a
//! dispatch's name and runs it. Each dispatch produces zero or one
//! [`DomainEvent`].
//!
//! # Outcomes
//!
//! ```text
//! Dispatch           | Result
//! -------------------|------------------------------------------
//! registered kind    | handler's event (or None)
//! unknown kind       | default handler if set, else None (debug log)
//! malformed body     | None (warn log), cache untouched
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use gateway_relay::DispatchTranslator;
//! use std::sync::Arc;
//!
//! let mut translator = DispatchTranslator::with_defaults();
//!
//! // Replace a built-in handler
//! translator.on("MESSAGE_CREATE", Arc::new(MyMessageHandler));
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::event::DomainEvent;
use crate::handlers::channel::{ChannelCreateHandler, ChannelDeleteHandler, ChannelUpdateHandler};
use crate::handlers::guild::{GuildCreateHandler, GuildDeleteHandler, GuildUpdateHandler};
use crate::handlers::lifecycle::{ReadyHandler, ResumedHandler};
use crate::handlers::member::{MemberAddHandler, MemberRemoveHandler, MemberUpdateHandler};
use crate::handlers::message::MessageCreateHandler;
use crate::handlers::presence::PresenceUpdateHandler;
use crate::handlers::{kinds, DispatchHandler, HandlerError};
use crate::mediator::DispatchContext;

/// Table from dispatch name to handler.
///
/// Wrap in `Arc` to share between the pipeline and other tasks. Handlers
/// must be `Send + Sync`.
pub struct DispatchTranslator {
    /// Handlers by exact dispatch name
    handlers: HashMap<String, Arc<dyn DispatchHandler>>,

    /// Handler for dispatches with no registered handler
    default_handler: Option<Arc<dyn DispatchHandler>>,
}

impl DispatchTranslator {
    /// Create a translator with no handlers.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            default_handler: None,
        }
    }

    /// Create a translator with every built-in handler registered.
    pub fn with_defaults() -> Self {
        let mut translator = Self::new();
        translator.on(kinds::READY, Arc::new(ReadyHandler));
        translator.on(kinds::RESUMED, Arc::new(ResumedHandler));
        translator.on(kinds::GUILD_CREATE, Arc::new(GuildCreateHandler));
        translator.on(kinds::GUILD_UPDATE, Arc::new(GuildUpdateHandler));
        translator.on(kinds::GUILD_DELETE, Arc::new(GuildDeleteHandler));
        translator.on(kinds::GUILD_MEMBER_ADD, Arc::new(MemberAddHandler));
        translator.on(kinds::GUILD_MEMBER_UPDATE, Arc::new(MemberUpdateHandler));
        translator.on(kinds::GUILD_MEMBER_REMOVE, Arc::new(MemberRemoveHandler));
        translator.on(kinds::CHANNEL_CREATE, Arc::new(ChannelCreateHandler));
        translator.on(kinds::CHANNEL_UPDATE, Arc::new(ChannelUpdateHandler));
        translator.on(kinds::CHANNEL_DELETE, Arc::new(ChannelDeleteHandler));
        translator.on(kinds::PRESENCE_UPDATE, Arc::new(PresenceUpdateHandler));
        translator.on(kinds::MESSAGE_CREATE, Arc::new(MessageCreateHandler));
        translator
    }

    /// Register the handler for a dispatch name, replacing any previous one.
    pub fn on(&mut self, kind: &str, handler: Arc<dyn DispatchHandler>) {
        debug!(
            kind = %kind,
            handler_name = %handler.name(),
            "Registering dispatch handler"
        );

        if let Some(previous) = self.handlers.insert(kind.to_string(), handler) {
            debug!(kind = %kind, replaced = %previous.name(), "Replaced dispatch handler");
        }
    }

    /// Set the handler for dispatches nothing else claims.
    pub fn set_default(&mut self, handler: Arc<dyn DispatchHandler>) {
        debug!(handler_name = %handler.name(), "Setting default handler");
        self.default_handler = Some(handler);
    }

    pub fn has_handler(&self, kind: &str) -> bool {
        self.handlers.contains_key(kind)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// List all registered dispatch names.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.handlers.keys().map(|s| s.as_str()).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Translate one dispatch.
    ///
    /// Never fails: unknown and malformed dispatches are logged and produce
    /// `None`.
    pub async fn translate(&self, ctx: DispatchContext<'_>) -> Option<DomainEvent> {
        let kind = ctx.dispatch().kind.clone();
        let sequence = ctx.dispatch().sequence;

        let handler = match self.handlers.get(&kind).or(self.default_handler.as_ref()) {
            Some(handler) => handler,
            None => {
                debug!(kind = %kind, sequence = ?sequence, "No handler for dispatch");
                return None;
            }
        };

        match handler.handle(ctx).await {
            Ok(Some(event)) => {
                debug!(
                    kind = %kind,
                    sequence = ?sequence,
                    handler_name = %handler.name(),
                    event = ?event.kind(),
                    "Dispatch translated"
                );
                Some(event)
            }
            Ok(None) => {
                debug!(kind = %kind, sequence = ?sequence, "Dispatch produced no event");
                None
            }
            Err(e @ HandlerError::Malformed { .. }) => {
                warn!(
                    kind = %kind,
                    sequence = ?sequence,
                    handler_name = %handler.name(),
                    error = %e,
                    "Dropping malformed dispatch"
                );
                None
            }
            Err(e) => {
                warn!(
                    kind = %kind,
                    sequence = ?sequence,
                    handler_name = %handler.name(),
                    error = %e,
                    "Dispatch handler failed"
                );
                None
            }
        }
    }
}

impl Default for DispatchTranslator {
    fn default() -> Self {
        Self::new()
    }
}
