//! `MESSAGE_CREATE`.
//!
//! Message bodies name their channel but, depending on the sender, may omit
//! the guild. The guild is taken from the body, then from the cached
//! channel, then from the resolver. When none of those answer the event is
//! still emitted with `guild_id: None`.

use async_trait::async_trait;
use tracing::{debug, warn};

use super::wire::MessageData;
use super::{parse, DispatchHandler, HandlerError};
use crate::event::DomainEvent;
use crate::mediator::{DispatchContext, TranslationScope};
use crate::payload::Snowflake;

pub struct MessageCreateHandler;

impl MessageCreateHandler {
    async fn guild_of(scope: TranslationScope<'_>, channel_id: Snowflake) -> Option<Snowflake> {
        if let Some(channel) = scope.cache.channel(channel_id) {
            return channel.guild_id;
        }

        match scope.resolver.channel(channel_id).await {
            Ok(Some(channel)) => {
                let guild_id = channel.guild_id;
                scope.cache.put_channel(channel);
                guild_id
            }
            Ok(None) => {
                debug!(
                    channel_id = %channel_id,
                    resolver = scope.resolver.name(),
                    "Channel unknown to resolver"
                );
                None
            }
            Err(e) => {
                warn!(
                    channel_id = %channel_id,
                    resolver = scope.resolver.name(),
                    error = %e,
                    "Channel lookup failed, emitting without guild"
                );
                None
            }
        }
    }
}

#[async_trait]
impl DispatchHandler for MessageCreateHandler {
    fn name(&self) -> &str {
        "message-create"
    }

    async fn handle(&self, ctx: DispatchContext<'_>) -> Result<Option<DomainEvent>, HandlerError> {
        let data: MessageData = parse(ctx.dispatch())?;

        let guild_id = match data.guild_id {
            Some(id) => Some(id),
            None => Self::guild_of(ctx.scope(), data.channel_id).await,
        };

        Ok(Some(DomainEvent::MessageCreate {
            message_id: data.id,
            channel_id: data.channel_id,
            guild_id,
            author_id: data.author.id,
            content: data.content,
        }))
    }
}
