//! Entity cache shared by dispatch handlers.
//!
//! Holds the last-known state of guilds, channels, members and presences as
//! immutable snapshots. Each map is a [`DashMap`], so handlers running on
//! different tasks can read and write concurrently; writes to one key are
//! serialized by the map's shard lock.
//!
//! The cache has no eviction policy of its own. Entries leave only when a
//! dispatch removes them (e.g. `GUILD_DELETE`).

use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use crate::payload::Snowflake;
use crate::session::PresenceStatus;

/// Composite key for per-guild user state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct MemberKey {
    pub guild_id: Snowflake,
    pub user_id: Snowflake,
}

impl MemberKey {
    pub fn new(guild_id: Snowflake, user_id: Snowflake) -> Self {
        Self { guild_id, user_id }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserSnapshot {
    pub id: Snowflake,
    pub username: String,
    pub bot: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GuildSnapshot {
    pub id: Snowflake,
    pub name: Option<String>,
    pub owner_id: Option<Snowflake>,
    pub member_count: u64,
    pub unavailable: bool,
}

impl GuildSnapshot {
    /// Placeholder for a guild announced by `READY` but not yet streamed.
    pub fn unavailable(id: Snowflake) -> Self {
        Self {
            id,
            name: None,
            owner_id: None,
            member_count: 0,
            unavailable: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelSnapshot {
    pub id: Snowflake,
    pub guild_id: Option<Snowflake>,
    pub kind: u8,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberSnapshot {
    pub guild_id: Snowflake,
    pub user: UserSnapshot,
    pub nick: Option<String>,
    pub roles: Vec<Snowflake>,
}

impl MemberSnapshot {
    pub fn key(&self) -> MemberKey {
        MemberKey::new(self.guild_id, self.user.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PresenceSnapshot {
    pub guild_id: Snowflake,
    pub user_id: Snowflake,
    pub status: PresenceStatus,
}

/// Ordered copy of the whole cache, for comparisons and diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheSnapshot {
    pub self_user: Option<UserSnapshot>,
    pub guilds: BTreeMap<Snowflake, GuildSnapshot>,
    pub channels: BTreeMap<Snowflake, ChannelSnapshot>,
    pub members: BTreeMap<MemberKey, MemberSnapshot>,
    pub presences: BTreeMap<MemberKey, PresenceSnapshot>,
}

/// Concurrent store of entity snapshots.
#[derive(Default)]
pub struct EntityCache {
    self_user: RwLock<Option<UserSnapshot>>,
    guilds: DashMap<Snowflake, GuildSnapshot>,
    channels: DashMap<Snowflake, ChannelSnapshot>,
    members: DashMap<MemberKey, MemberSnapshot>,
    presences: DashMap<MemberKey, PresenceSnapshot>,
}

impl EntityCache {
    pub fn new() -> Self {
        Self::default()
    }

    // === Self user ===

    pub fn set_self_user(&self, user: UserSnapshot) {
        *self.self_user.write().unwrap_or_else(PoisonError::into_inner) = Some(user);
    }

    pub fn self_user(&self) -> Option<UserSnapshot> {
        self.self_user
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    // === Guilds ===

    pub fn guild(&self, id: Snowflake) -> Option<GuildSnapshot> {
        self.guilds.get(&id).map(|g| g.value().clone())
    }

    /// Insert or replace a guild, returning the previous snapshot.
    pub fn put_guild(&self, guild: GuildSnapshot) -> Option<GuildSnapshot> {
        self.guilds.insert(guild.id, guild)
    }

    /// Insert a guild only if it is not cached yet.
    pub fn put_guild_if_absent(&self, guild: GuildSnapshot) {
        self.guilds.entry(guild.id).or_insert(guild);
    }

    /// Remove a guild together with everything scoped to it.
    pub fn remove_guild(&self, id: Snowflake) -> Option<GuildSnapshot> {
        let removed = self.guilds.remove(&id).map(|(_, g)| g);
        self.clear_guild_channels(id);
        self.clear_guild_members(id);
        self.clear_guild_presences(id);
        removed
    }

    pub fn clear_guild_channels(&self, guild_id: Snowflake) {
        self.channels.retain(|_, c| c.guild_id != Some(guild_id));
    }

    pub fn clear_guild_members(&self, guild_id: Snowflake) {
        self.members.retain(|k, _| k.guild_id != guild_id);
    }

    pub fn clear_guild_presences(&self, guild_id: Snowflake) {
        self.presences.retain(|k, _| k.guild_id != guild_id);
    }

    /// Flag a guild as unavailable (outage), keeping its scoped entities.
    pub fn mark_guild_unavailable(&self, id: Snowflake) -> Option<GuildSnapshot> {
        let mut entry = self.guilds.get_mut(&id)?;
        let old = entry.value().clone();
        entry.unavailable = true;
        Some(old)
    }

    pub fn guild_count(&self) -> usize {
        self.guilds.len()
    }

    // === Channels ===

    pub fn channel(&self, id: Snowflake) -> Option<ChannelSnapshot> {
        self.channels.get(&id).map(|c| c.value().clone())
    }

    pub fn put_channel(&self, channel: ChannelSnapshot) -> Option<ChannelSnapshot> {
        self.channels.insert(channel.id, channel)
    }

    pub fn remove_channel(&self, id: Snowflake) -> Option<ChannelSnapshot> {
        self.channels.remove(&id).map(|(_, c)| c)
    }

    // === Members ===

    pub fn member(&self, key: MemberKey) -> Option<MemberSnapshot> {
        self.members.get(&key).map(|m| m.value().clone())
    }

    /// Insert or replace a member, returning the previous snapshot.
    pub fn put_member(&self, member: MemberSnapshot) -> Option<MemberSnapshot> {
        self.members.insert(member.key(), member)
    }

    pub fn remove_member(&self, key: MemberKey) -> Option<MemberSnapshot> {
        self.members.remove(&key).map(|(_, m)| m)
    }

    /// Cached members of one guild.
    pub fn guild_members(&self, guild_id: Snowflake) -> Vec<MemberSnapshot> {
        let mut members: Vec<MemberSnapshot> = self
            .members
            .iter()
            .filter(|entry| entry.key().guild_id == guild_id)
            .map(|entry| entry.value().clone())
            .collect();
        members.sort_by_key(|m| m.user.id);
        members
    }

    /// Apply a signed change to a guild's member count, saturating at zero.
    pub fn adjust_member_count(&self, guild_id: Snowflake, delta: i64) {
        if let Some(mut guild) = self.guilds.get_mut(&guild_id) {
            guild.member_count = guild.member_count.saturating_add_signed(delta);
        }
    }

    // === Presences ===

    pub fn presence(&self, key: MemberKey) -> Option<PresenceSnapshot> {
        self.presences.get(&key).map(|p| p.value().clone())
    }

    pub fn put_presence(&self, presence: PresenceSnapshot) -> Option<PresenceSnapshot> {
        let key = MemberKey::new(presence.guild_id, presence.user_id);
        self.presences.insert(key, presence)
    }

    /// Copy every map into ordered form.
    pub fn snapshot(&self) -> CacheSnapshot {
        CacheSnapshot {
            self_user: self.self_user(),
            guilds: self
                .guilds
                .iter()
                .map(|e| (*e.key(), e.value().clone()))
                .collect(),
            channels: self
                .channels
                .iter()
                .map(|e| (*e.key(), e.value().clone()))
                .collect(),
            members: self
                .members
                .iter()
                .map(|e| (*e.key(), e.value().clone()))
                .collect(),
            presences: self
                .presences
                .iter()
                .map(|e| (*e.key(), e.value().clone()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guild(id: u64) -> GuildSnapshot {
        GuildSnapshot {
            id: Snowflake(id),
            name: Some("test".to_string()),
            owner_id: None,
            member_count: 1,
            unavailable: false,
        }
    }

    fn member(guild_id: u64, user_id: u64) -> MemberSnapshot {
        MemberSnapshot {
            guild_id: Snowflake(guild_id),
            user: UserSnapshot {
                id: Snowflake(user_id),
                username: format!("user{}", user_id),
                bot: false,
            },
            nick: None,
            roles: Vec::new(),
        }
    }

    #[test]
    fn test_put_and_get_guild() {
        let cache = EntityCache::new();
        assert!(cache.put_guild(guild(1)).is_none());
        assert_eq!(cache.guild(Snowflake(1)).unwrap().name.as_deref(), Some("test"));
        assert!(cache.put_guild(guild(1)).is_some());
        assert_eq!(cache.guild_count(), 1);
    }

    #[test]
    fn test_remove_guild_cascades() {
        let cache = EntityCache::new();
        cache.put_guild(guild(1));
        cache.put_guild(guild(2));
        cache.put_member(member(1, 10));
        cache.put_member(member(2, 10));
        cache.put_channel(ChannelSnapshot {
            id: Snowflake(100),
            guild_id: Some(Snowflake(1)),
            kind: 0,
            name: None,
        });

        let removed = cache.remove_guild(Snowflake(1));
        assert!(removed.is_some());
        assert!(cache.member(MemberKey::new(Snowflake(1), Snowflake(10))).is_none());
        assert!(cache.member(MemberKey::new(Snowflake(2), Snowflake(10))).is_some());
        assert!(cache.channel(Snowflake(100)).is_none());
    }

    #[test]
    fn test_mark_unavailable_keeps_members() {
        let cache = EntityCache::new();
        cache.put_guild(guild(1));
        cache.put_member(member(1, 10));

        let old = cache.mark_guild_unavailable(Snowflake(1)).unwrap();
        assert!(!old.unavailable);
        assert!(cache.guild(Snowflake(1)).unwrap().unavailable);
        assert_eq!(cache.guild_members(Snowflake(1)).len(), 1);
    }

    #[test]
    fn test_member_count_saturates() {
        let cache = EntityCache::new();
        cache.put_guild(guild(1));
        cache.adjust_member_count(Snowflake(1), -5);
        assert_eq!(cache.guild(Snowflake(1)).unwrap().member_count, 0);
        cache.adjust_member_count(Snowflake(1), 2);
        assert_eq!(cache.guild(Snowflake(1)).unwrap().member_count, 2);
    }

    #[test]
    fn test_snapshot_equality() {
        let a = EntityCache::new();
        let b = EntityCache::new();
        a.put_member(member(1, 10));
        a.put_member(member(1, 11));
        b.put_member(member(1, 11));
        b.put_member(member(1, 10));
        assert_eq!(a.snapshot(), b.snapshot());
    }
}
