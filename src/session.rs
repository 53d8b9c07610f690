//! Session-scoped gateway configuration and lifecycle.
//!
//! [`IdentifyOptions`] holds what the connection layer needs on every
//! (re)connect: the shard, the initial presence and, once a session exists,
//! the resume state. It is owned by a single [`SessionState`] and changed
//! only by applying [`SessionUpdate`] messages; everybody else reads
//! snapshots through a `watch` channel.
//!
//! # Lifecycle
//!
//! ```text
//! DISCONNECTED -> IDENTIFYING -> READY -> (RESUMING -> READY)* -> DISCONNECTED
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Errors from session configuration and lifecycle updates.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("shard count must be at least 1")]
    EmptyShardCount,

    #[error("shard index {index} out of range for {count} shards")]
    ShardOutOfRange { index: u32, count: u32 },

    #[error("invalid transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: ConnectionState,
        to: ConnectionState,
    },
}

/// One of `count` partitions of the gateway's guilds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ShardInfo {
    index: u32,
    count: u32,
}

impl ShardInfo {
    pub fn new(index: u32, count: u32) -> Result<Self, SessionError> {
        if count == 0 {
            return Err(SessionError::EmptyShardCount);
        }
        if index >= count {
            return Err(SessionError::ShardOutOfRange { index, count });
        }
        Ok(Self { index, count })
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// Wire form used in identify and ready payloads.
    pub fn as_pair(&self) -> [u32; 2] {
        [self.index, self.count]
    }
}

/// Presence status announced at identify time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Idle,
    Dnd,
    Invisible,
    Offline,
}

impl PresenceStatus {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "online" => Some(Self::Online),
            "idle" => Some(Self::Idle),
            "dnd" => Some(Self::Dnd),
            "invisible" => Some(Self::Invisible),
            "offline" => Some(Self::Offline),
            _ => None,
        }
    }
}

/// Identifiers needed to resume a session instead of starting a new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeState {
    pub session_id: String,
    pub sequence: u64,
}

/// Configuration read by the handshake on each (re)connect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentifyOptions {
    pub shard: Option<ShardInfo>,
    pub initial_presence: Option<PresenceStatus>,
    pub resume: Option<ResumeState>,
}

/// What the connection layer should send after `HELLO`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handshake {
    Identify {
        shard: Option<ShardInfo>,
        presence: Option<PresenceStatus>,
    },
    Resume {
        session_id: String,
        sequence: u64,
    },
}

impl IdentifyOptions {
    /// Options for a single unsharded connection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the shard
    pub fn with_shard(mut self, shard: ShardInfo) -> Self {
        self.shard = Some(shard);
        self
    }

    /// Set the initial presence
    pub fn with_presence(mut self, status: PresenceStatus) -> Self {
        self.initial_presence = Some(status);
        self
    }

    /// Resume when resume state is known, identify otherwise.
    pub fn handshake(&self) -> Handshake {
        match &self.resume {
            Some(resume) => Handshake::Resume {
                session_id: resume.session_id.clone(),
                sequence: resume.sequence,
            },
            None => Handshake::Identify {
                shard: self.shard,
                presence: self.initial_presence,
            },
        }
    }
}

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Identifying,
    Ready,
    Resuming,
}

impl ConnectionState {
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Disconnected, Identifying)
                | (Disconnected, Resuming)
                | (Identifying, Ready)
                | (Ready, Resuming)
                | (Resuming, Ready)
                | (_, Disconnected)
        )
    }
}

/// Lifecycle messages sent by the connection layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    /// Identify sent for a fresh session.
    Identifying,
    /// `READY` received.
    Ready { session_id: String },
    /// A dispatch with this sequence number was received.
    Sequence(u64),
    /// Resume sent for the current session.
    Resuming,
    /// `RESUMED` received.
    Resumed,
    /// Socket closed. A non-resumable close discards the resume state.
    Disconnected { resumable: bool },
}

/// Sole owner of the session's [`IdentifyOptions`].
pub struct SessionState {
    state: ConnectionState,
    options: watch::Sender<IdentifyOptions>,
}

impl SessionState {
    pub fn new(options: IdentifyOptions) -> Self {
        let (options, _) = watch::channel(options);
        Self {
            state: ConnectionState::Disconnected,
            options,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Current options.
    pub fn options(&self) -> IdentifyOptions {
        self.options.borrow().clone()
    }

    /// Receive a fresh snapshot whenever the options change.
    pub fn watch(&self) -> watch::Receiver<IdentifyOptions> {
        self.options.subscribe()
    }

    fn transition(&mut self, next: ConnectionState) -> Result<(), SessionError> {
        if !self.state.can_transition_to(next) {
            return Err(SessionError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        debug!(from = ?self.state, to = ?next, "Session transition");
        self.state = next;
        Ok(())
    }

    /// Apply one lifecycle message.
    pub fn apply(&mut self, update: SessionUpdate) -> Result<(), SessionError> {
        match update {
            SessionUpdate::Identifying => {
                self.transition(ConnectionState::Identifying)?;
                self.options.send_modify(|options| options.resume = None);
            }
            SessionUpdate::Ready { session_id } => {
                self.transition(ConnectionState::Ready)?;
                info!(session_id = %session_id, "Session ready");
                self.options.send_modify(|options| {
                    options.resume = Some(ResumeState {
                        session_id,
                        sequence: 0,
                    });
                });
            }
            SessionUpdate::Sequence(sequence) => {
                self.options.send_if_modified(|options| match options.resume.as_mut() {
                    Some(resume) if sequence > resume.sequence => {
                        resume.sequence = sequence;
                        true
                    }
                    _ => false,
                });
            }
            SessionUpdate::Resuming => {
                if self.options.borrow().resume.is_none() {
                    warn!("Resume requested without resume state");
                }
                self.transition(ConnectionState::Resuming)?;
            }
            SessionUpdate::Resumed => {
                self.transition(ConnectionState::Ready)?;
                info!("Session resumed");
            }
            SessionUpdate::Disconnected { resumable } => {
                self.transition(ConnectionState::Disconnected)?;
                if !resumable {
                    self.options.send_modify(|options| options.resume = None);
                }
            }
        }
        Ok(())
    }
}
