//! Channel dispatches.

use async_trait::async_trait;

use super::wire::{ChannelData, ChannelDeleteData};
use super::{parse, DispatchHandler, HandlerError};
use crate::event::DomainEvent;
use crate::mediator::DispatchContext;

pub struct ChannelCreateHandler;

#[async_trait]
impl DispatchHandler for ChannelCreateHandler {
    fn name(&self) -> &str {
        "channel-create"
    }

    async fn handle(&self, ctx: DispatchContext<'_>) -> Result<Option<DomainEvent>, HandlerError> {
        let data: ChannelData = parse(ctx.dispatch())?;
        let channel = data.into_snapshot(None);
        ctx.scope().cache.put_channel(channel.clone());
        Ok(Some(DomainEvent::ChannelCreate { channel }))
    }
}

pub struct ChannelUpdateHandler;

#[async_trait]
impl DispatchHandler for ChannelUpdateHandler {
    fn name(&self) -> &str {
        "channel-update"
    }

    async fn handle(&self, ctx: DispatchContext<'_>) -> Result<Option<DomainEvent>, HandlerError> {
        let data: ChannelData = parse(ctx.dispatch())?;
        let current = data.into_snapshot(None);
        let old = ctx.scope().cache.put_channel(current.clone());
        Ok(Some(DomainEvent::ChannelUpdate { current, old }))
    }
}

pub struct ChannelDeleteHandler;

#[async_trait]
impl DispatchHandler for ChannelDeleteHandler {
    fn name(&self) -> &str {
        "channel-delete"
    }

    async fn handle(&self, ctx: DispatchContext<'_>) -> Result<Option<DomainEvent>, HandlerError> {
        let data: ChannelDeleteData = parse(ctx.dispatch())?;
        let old = ctx.scope().cache.remove_channel(data.id);
        let guild_id = data
            .guild_id
            .or_else(|| old.as_ref().and_then(|c| c.guild_id));

        Ok(Some(DomainEvent::ChannelDelete {
            channel_id: data.id,
            guild_id,
            old,
        }))
    }
}
