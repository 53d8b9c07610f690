//! Guild member dispatches.

use async_trait::async_trait;
use tracing::debug;

use super::wire::{GuildMemberData, MemberRemoveData};
use super::{parse, DispatchHandler, HandlerError};
use crate::cache::MemberKey;
use crate::event::DomainEvent;
use crate::mediator::DispatchContext;

/// `GUILD_MEMBER_ADD`. Replaying the same dispatch leaves the member count
/// where the first one put it.
pub struct MemberAddHandler;

#[async_trait]
impl DispatchHandler for MemberAddHandler {
    fn name(&self) -> &str {
        "member-add"
    }

    async fn handle(&self, ctx: DispatchContext<'_>) -> Result<Option<DomainEvent>, HandlerError> {
        let data: GuildMemberData = parse(ctx.dispatch())?;
        let cache = ctx.scope().cache;

        let guild_id = data.guild_id;
        let member = data.member.into_snapshot(guild_id);

        if cache.put_member(member.clone()).is_none() {
            cache.adjust_member_count(guild_id, 1);
        } else {
            debug!(guild_id = %guild_id, user_id = %member.user.id, "Member already cached");
        }

        Ok(Some(DomainEvent::MemberJoin { guild_id, member }))
    }
}

pub struct MemberUpdateHandler;

#[async_trait]
impl DispatchHandler for MemberUpdateHandler {
    fn name(&self) -> &str {
        "member-update"
    }

    async fn handle(&self, ctx: DispatchContext<'_>) -> Result<Option<DomainEvent>, HandlerError> {
        let data: GuildMemberData = parse(ctx.dispatch())?;
        let cache = ctx.scope().cache;

        let guild_id = data.guild_id;
        let current = data.member.into_snapshot(guild_id);
        let old = cache.put_member(current.clone());

        Ok(Some(DomainEvent::MemberUpdate {
            guild_id,
            current,
            old,
        }))
    }
}

pub struct MemberRemoveHandler;

#[async_trait]
impl DispatchHandler for MemberRemoveHandler {
    fn name(&self) -> &str {
        "member-remove"
    }

    async fn handle(&self, ctx: DispatchContext<'_>) -> Result<Option<DomainEvent>, HandlerError> {
        let data: MemberRemoveData = parse(ctx.dispatch())?;
        let cache = ctx.scope().cache;

        let old = cache.remove_member(MemberKey::new(data.guild_id, data.user.id));
        if old.is_some() {
            cache.adjust_member_count(data.guild_id, -1);
        }

        Ok(Some(DomainEvent::MemberLeave {
            guild_id: data.guild_id,
            user_id: data.user.id,
            old,
        }))
    }
}
