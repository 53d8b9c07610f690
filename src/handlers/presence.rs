//! `PRESENCE_UPDATE`.

use async_trait::async_trait;
use tracing::debug;

use super::wire::PresenceData;
use super::{parse, DispatchHandler, HandlerError};
use crate::event::DomainEvent;
use crate::mediator::DispatchContext;

pub struct PresenceUpdateHandler;

#[async_trait]
impl DispatchHandler for PresenceUpdateHandler {
    fn name(&self) -> &str {
        "presence-update"
    }

    async fn handle(&self, ctx: DispatchContext<'_>) -> Result<Option<DomainEvent>, HandlerError> {
        let data: PresenceData = parse(ctx.dispatch())?;

        // Presences outside a guild are not tracked.
        let Some(guild_id) = data.guild_id else {
            debug!(user_id = %data.user.id, "Presence without guild ignored");
            return Ok(None);
        };

        let presence = data.into_snapshot(guild_id);
        let user_id = presence.user_id;
        let status = presence.status;
        let old_status = ctx
            .scope()
            .cache
            .put_presence(presence)
            .map(|old| old.status);

        Ok(Some(DomainEvent::PresenceUpdate {
            guild_id,
            user_id,
            status,
            old_status,
        }))
    }
}
