//! Guild lifecycle dispatches.

use async_trait::async_trait;
use tracing::debug;

use super::wire::{GuildData, GuildDeleteData};
use super::{parse, DispatchHandler, HandlerError};
use crate::event::DomainEvent;
use crate::mediator::DispatchContext;

/// Caches a streamed guild together with its channels, members and
/// presences. A list carried by the dispatch replaces the guild's cached
/// list, so entries missing from a re-sent guild do not linger.
pub struct GuildCreateHandler;

#[async_trait]
impl DispatchHandler for GuildCreateHandler {
    fn name(&self) -> &str {
        "guild-create"
    }

    async fn handle(&self, ctx: DispatchContext<'_>) -> Result<Option<DomainEvent>, HandlerError> {
        let data: GuildData = parse(ctx.dispatch())?;
        let cache = ctx.scope().cache;

        let member_count = data
            .member_count
            .or(data.members.as_ref().map(|m| m.len() as u64))
            .unwrap_or(0);
        let guild = data.snapshot(member_count);
        let guild_id = guild.id;

        if let Some(channels) = data.channels {
            cache.clear_guild_channels(guild_id);
            for channel in channels {
                cache.put_channel(channel.into_snapshot(Some(guild_id)));
            }
        }
        if let Some(members) = data.members {
            cache.clear_guild_members(guild_id);
            for member in members {
                cache.put_member(member.into_snapshot(guild_id));
            }
        }
        if let Some(presences) = data.presences {
            cache.clear_guild_presences(guild_id);
            for presence in presences {
                cache.put_presence(presence.into_snapshot(guild_id));
            }
        }
        cache.put_guild(guild.clone());

        debug!(guild_id = %guild_id, member_count, "Guild cached");
        Ok(Some(DomainEvent::GuildCreate { guild }))
    }
}

/// Replaces guild fields. The member count is tracked locally and survives.
pub struct GuildUpdateHandler;

#[async_trait]
impl DispatchHandler for GuildUpdateHandler {
    fn name(&self) -> &str {
        "guild-update"
    }

    async fn handle(&self, ctx: DispatchContext<'_>) -> Result<Option<DomainEvent>, HandlerError> {
        let data: GuildData = parse(ctx.dispatch())?;
        let cache = ctx.scope().cache;

        let old = cache.guild(data.id);
        let member_count = old
            .as_ref()
            .map(|g| g.member_count)
            .or(data.member_count)
            .unwrap_or(0);
        let current = data.snapshot(member_count);
        cache.put_guild(current.clone());

        Ok(Some(DomainEvent::GuildUpdate { current, old }))
    }
}

/// Removes a guild, or flags it unavailable during an outage.
pub struct GuildDeleteHandler;

#[async_trait]
impl DispatchHandler for GuildDeleteHandler {
    fn name(&self) -> &str {
        "guild-delete"
    }

    async fn handle(&self, ctx: DispatchContext<'_>) -> Result<Option<DomainEvent>, HandlerError> {
        let data: GuildDeleteData = parse(ctx.dispatch())?;
        let cache = ctx.scope().cache;

        let old = if data.unavailable {
            cache.mark_guild_unavailable(data.id)
        } else {
            cache.remove_guild(data.id)
        };

        Ok(Some(DomainEvent::GuildDelete {
            guild_id: data.id,
            unavailable: data.unavailable,
            old,
        }))
    }
}
