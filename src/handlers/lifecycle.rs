//! `READY` and `RESUMED`.

use async_trait::async_trait;
use tracing::{debug, warn};

use super::wire::ReadyData;
use super::{parse, DispatchHandler, HandlerError};
use crate::cache::GuildSnapshot;
use crate::event::DomainEvent;
use crate::mediator::DispatchContext;
use crate::session::ShardInfo;

/// Stores the self user and placeholders for every announced guild.
pub struct ReadyHandler;

#[async_trait]
impl DispatchHandler for ReadyHandler {
    fn name(&self) -> &str {
        "ready"
    }

    async fn handle(&self, ctx: DispatchContext<'_>) -> Result<Option<DomainEvent>, HandlerError> {
        let data: ReadyData = parse(ctx.dispatch())?;
        let scope = ctx.scope();

        // The shard echoed by the gateway wins over the configured one.
        let shard = match data.shard {
            Some([index, count]) => match ShardInfo::new(index, count) {
                Ok(shard) => Some(shard),
                Err(e) => {
                    warn!(error = %e, "Ignoring invalid shard in READY");
                    scope.shard
                }
            },
            None => scope.shard,
        };

        let user = data.user.into_snapshot();
        let user_id = user.id;
        scope.cache.set_self_user(user);

        let guild_ids: Vec<_> = data.guilds.iter().map(|g| g.id).collect();
        for id in &guild_ids {
            scope.cache.put_guild_if_absent(GuildSnapshot::unavailable(*id));
        }

        debug!(
            session_id = %data.session_id,
            guilds = guild_ids.len(),
            "Ready"
        );

        Ok(Some(DomainEvent::Ready {
            session_id: data.session_id,
            user_id,
            guild_ids,
            shard,
        }))
    }
}

/// Emits [`DomainEvent::Resumed`]. The body is not read.
///
/// Only dispatches with non-null data reach the translator, so a `RESUMED`
/// frame sent with `"d": null` is dropped before this handler and produces
/// no event.
pub struct ResumedHandler;

#[async_trait]
impl DispatchHandler for ResumedHandler {
    fn name(&self) -> &str {
        "resumed"
    }

    async fn handle(&self, _ctx: DispatchContext<'_>) -> Result<Option<DomainEvent>, HandlerError> {
        Ok(Some(DomainEvent::Resumed))
    }
}
