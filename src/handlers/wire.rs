//! Wire shapes of dispatch bodies.
//!
//! Only the fields the handlers project into snapshots are declared; serde
//! ignores the rest.

use serde::Deserialize;

use crate::cache::{
    ChannelSnapshot, GuildSnapshot, MemberSnapshot, PresenceSnapshot, UserSnapshot,
};
use crate::payload::Snowflake;
use crate::session::PresenceStatus;

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct UserData {
    pub id: Snowflake,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub bot: bool,
}

impl UserData {
    pub fn into_snapshot(self) -> UserSnapshot {
        UserSnapshot {
            id: self.id,
            username: self.username,
            bot: self.bot,
        }
    }
}

/// Only the id is guaranteed on partial user objects (presences, removals).
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct PartialUser {
    pub id: Snowflake,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct MemberData {
    pub user: UserData,
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
    #[serde(default)]
    pub nick: Option<String>,
    #[serde(default)]
    pub roles: Vec<Snowflake>,
}

impl MemberData {
    pub fn into_snapshot(self, guild_id: Snowflake) -> MemberSnapshot {
        MemberSnapshot {
            guild_id,
            user: self.user.into_snapshot(),
            nick: self.nick,
            roles: self.roles,
        }
    }
}

/// `GUILD_MEMBER_ADD` and `GUILD_MEMBER_UPDATE` carry the guild id inline.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GuildMemberData {
    pub guild_id: Snowflake,
    #[serde(flatten)]
    pub member: MemberData,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct MemberRemoveData {
    pub guild_id: Snowflake,
    pub user: PartialUser,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ChannelData {
    pub id: Snowflake,
    #[serde(rename = "type", default)]
    pub kind: u8,
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
    #[serde(default)]
    pub name: Option<String>,
}

impl ChannelData {
    /// Channels nested in `GUILD_CREATE` omit their guild id.
    pub fn into_snapshot(self, guild_fallback: Option<Snowflake>) -> ChannelSnapshot {
        ChannelSnapshot {
            id: self.id,
            guild_id: self.guild_id.or(guild_fallback),
            kind: self.kind,
            name: self.name,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct PresenceData {
    pub user: PartialUser,
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
    pub status: PresenceStatus,
}

impl PresenceData {
    pub fn into_snapshot(self, guild_fallback: Snowflake) -> PresenceSnapshot {
        PresenceSnapshot {
            guild_id: self.guild_id.unwrap_or(guild_fallback),
            user_id: self.user.id,
            status: self.status,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GuildData {
    pub id: Snowflake,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub owner_id: Option<Snowflake>,
    #[serde(default)]
    pub member_count: Option<u64>,
    #[serde(default)]
    pub unavailable: bool,
    /// Absent lists leave the cached ones alone; present lists replace them.
    #[serde(default)]
    pub channels: Option<Vec<ChannelData>>,
    #[serde(default)]
    pub members: Option<Vec<MemberData>>,
    #[serde(default)]
    pub presences: Option<Vec<PresenceData>>,
}

impl GuildData {
    /// Guild snapshot with the given member count.
    pub fn snapshot(&self, member_count: u64) -> GuildSnapshot {
        GuildSnapshot {
            id: self.id,
            name: self.name.clone(),
            owner_id: self.owner_id,
            member_count,
            unavailable: self.unavailable,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GuildDeleteData {
    pub id: Snowflake,
    #[serde(default)]
    pub unavailable: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ChannelDeleteData {
    pub id: Snowflake,
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct UnavailableGuild {
    pub id: Snowflake,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ReadyData {
    pub session_id: String,
    pub user: UserData,
    #[serde(default)]
    pub guilds: Vec<UnavailableGuild>,
    #[serde(default)]
    pub shard: Option<[u32; 2]>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct MessageData {
    pub id: Snowflake,
    pub channel_id: Snowflake,
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
    pub author: PartialUser,
    #[serde(default)]
    pub content: String,
}
