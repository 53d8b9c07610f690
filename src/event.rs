//! Domain events delivered to consumers.
//!
//! A [`DomainEvent`] is the externally visible result of translating one
//! dispatch. Events carry snapshots rather than references into the cache,
//! so a consumer can hold on to them after the cache has moved on.
//!
//! # Example
//!
//! ```json
//! {
//!   "type": "member_join",
//!   "guild_id": "123456789012345678",
//!   "member": {
//!     "guild_id": "123456789012345678",
//!     "user": { "id": "80351110224678912", "username": "nelly", "bot": false },
//!     "nick": null,
//!     "roles": []
//!   }
//! }
//! ```

use serde::Serialize;

use crate::cache::{ChannelSnapshot, GuildSnapshot, MemberSnapshot};
use crate::payload::Snowflake;
use crate::session::{PresenceStatus, ShardInfo};

/// Tag identifying the variant of a [`DomainEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Ready,
    Resumed,
    GuildCreate,
    GuildUpdate,
    GuildDelete,
    MemberJoin,
    MemberUpdate,
    MemberLeave,
    ChannelCreate,
    ChannelUpdate,
    ChannelDelete,
    PresenceUpdate,
    MessageCreate,
}

/// An event produced from exactly one dispatch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    Ready {
        session_id: String,
        user_id: Snowflake,
        guild_ids: Vec<Snowflake>,
        shard: Option<ShardInfo>,
    },
    Resumed,
    GuildCreate {
        guild: GuildSnapshot,
    },
    GuildUpdate {
        current: GuildSnapshot,
        old: Option<GuildSnapshot>,
    },
    GuildDelete {
        guild_id: Snowflake,
        unavailable: bool,
        old: Option<GuildSnapshot>,
    },
    MemberJoin {
        guild_id: Snowflake,
        member: MemberSnapshot,
    },
    MemberUpdate {
        guild_id: Snowflake,
        current: MemberSnapshot,
        old: Option<MemberSnapshot>,
    },
    MemberLeave {
        guild_id: Snowflake,
        user_id: Snowflake,
        old: Option<MemberSnapshot>,
    },
    ChannelCreate {
        channel: ChannelSnapshot,
    },
    ChannelUpdate {
        current: ChannelSnapshot,
        old: Option<ChannelSnapshot>,
    },
    ChannelDelete {
        channel_id: Snowflake,
        guild_id: Option<Snowflake>,
        old: Option<ChannelSnapshot>,
    },
    PresenceUpdate {
        guild_id: Snowflake,
        user_id: Snowflake,
        status: PresenceStatus,
        old_status: Option<PresenceStatus>,
    },
    MessageCreate {
        message_id: Snowflake,
        channel_id: Snowflake,
        /// `None` for direct messages and when the channel could not be resolved
        guild_id: Option<Snowflake>,
        author_id: Snowflake,
        content: String,
    },
}

impl DomainEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Ready { .. } => EventKind::Ready,
            Self::Resumed => EventKind::Resumed,
            Self::GuildCreate { .. } => EventKind::GuildCreate,
            Self::GuildUpdate { .. } => EventKind::GuildUpdate,
            Self::GuildDelete { .. } => EventKind::GuildDelete,
            Self::MemberJoin { .. } => EventKind::MemberJoin,
            Self::MemberUpdate { .. } => EventKind::MemberUpdate,
            Self::MemberLeave { .. } => EventKind::MemberLeave,
            Self::ChannelCreate { .. } => EventKind::ChannelCreate,
            Self::ChannelUpdate { .. } => EventKind::ChannelUpdate,
            Self::ChannelDelete { .. } => EventKind::ChannelDelete,
            Self::PresenceUpdate { .. } => EventKind::PresenceUpdate,
            Self::MessageCreate { .. } => EventKind::MessageCreate,
        }
    }

    /// Guild the event belongs to, if any.
    pub fn guild_id(&self) -> Option<Snowflake> {
        match self {
            Self::GuildCreate { guild } => Some(guild.id),
            Self::GuildUpdate { current, .. } => Some(current.id),
            Self::GuildDelete { guild_id, .. }
            | Self::MemberJoin { guild_id, .. }
            | Self::MemberUpdate { guild_id, .. }
            | Self::MemberLeave { guild_id, .. }
            | Self::PresenceUpdate { guild_id, .. } => Some(*guild_id),
            Self::ChannelCreate { channel } => channel.guild_id,
            Self::ChannelUpdate { current, .. } => current.guild_id,
            Self::ChannelDelete { guild_id, .. } | Self::MessageCreate { guild_id, .. } => {
                *guild_id
            }
            Self::Ready { .. } | Self::Resumed => None,
        }
    }
}
