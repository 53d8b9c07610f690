//! Gateway payload types.
//!
//! A [`RawPayload`] is one frame read off the gateway connection. Frames with
//! the [`Opcode::Dispatch`] opcode carry a [`Dispatch`]: a named event such as
//! `GUILD_CREATE` together with its JSON body.
//!
//! # Example
//!
//! ```json
//! {
//!   "op": 0,
//!   "s": 42,
//!   "t": "GUILD_MEMBER_ADD",
//!   "d": {
//!     "guild_id": "123456789012345678",
//!     "user": { "id": "80351110224678912", "username": "nelly" }
//!   }
//! }
//! ```

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Gateway opcodes, serialized as their integer code.
///
/// Codes without a named variant are kept as [`Opcode::Unknown`], so frames
/// from newer gateway versions pass through relays unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Dispatch,
    Heartbeat,
    Identify,
    PresenceUpdate,
    VoiceStateUpdate,
    Resume,
    Reconnect,
    RequestGuildMembers,
    InvalidSession,
    Hello,
    HeartbeatAck,
    Unknown(u8),
}

impl Opcode {
    pub fn code(self) -> u8 {
        match self {
            Self::Dispatch => 0,
            Self::Heartbeat => 1,
            Self::Identify => 2,
            Self::PresenceUpdate => 3,
            Self::VoiceStateUpdate => 4,
            Self::Resume => 6,
            Self::Reconnect => 7,
            Self::RequestGuildMembers => 8,
            Self::InvalidSession => 9,
            Self::Hello => 10,
            Self::HeartbeatAck => 11,
            Self::Unknown(code) => code,
        }
    }
}

impl From<u8> for Opcode {
    fn from(code: u8) -> Self {
        match code {
            0 => Self::Dispatch,
            1 => Self::Heartbeat,
            2 => Self::Identify,
            3 => Self::PresenceUpdate,
            4 => Self::VoiceStateUpdate,
            6 => Self::Resume,
            7 => Self::Reconnect,
            8 => Self::RequestGuildMembers,
            9 => Self::InvalidSession,
            10 => Self::Hello,
            11 => Self::HeartbeatAck,
            other => Self::Unknown(other),
        }
    }
}

impl Serialize for Opcode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for Opcode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        u8::deserialize(deserializer).map(Self::from)
    }
}

/// A 64-bit entity id.
///
/// The gateway sends ids as JSON strings; numbers are accepted too.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Snowflake(pub u64);

impl Snowflake {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Snowflake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Snowflake {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl FromStr for Snowflake {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

impl Serialize for Snowflake {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Snowflake {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Number(u64),
            Text(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Number(n) => Ok(Self(n)),
            Repr::Text(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// One frame received from (or sent to) the gateway.
///
/// # Fields
///
/// - `op`: opcode deciding how `d` is interpreted
/// - `d`: opaque payload data
/// - `s`: sequence number, present on dispatches
/// - `t`: dispatch name, present on dispatches
/// - `session_id`: session the frame was received on, stamped by relays
/// - `extra`: any other top-level fields, carried through untouched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPayload {
    pub op: Opcode,

    #[serde(default)]
    pub d: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RawPayload {
    /// Create a payload with no data.
    pub fn new(op: Opcode) -> Self {
        Self {
            op,
            d: None,
            s: None,
            t: None,
            session_id: None,
            extra: Map::new(),
        }
    }

    /// Create a dispatch frame.
    pub fn dispatch(kind: impl Into<String>, sequence: u64, data: Value) -> Self {
        Self {
            op: Opcode::Dispatch,
            d: Some(data),
            s: Some(sequence),
            t: Some(kind.into()),
            session_id: None,
            extra: Map::new(),
        }
    }

    /// Set the data field
    pub fn with_data(mut self, data: Value) -> Self {
        self.d = Some(data);
        self
    }

    /// Set the session id
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Whether this frame carries a dispatch with non-null data.
    pub fn is_dispatch(&self) -> bool {
        self.op == Opcode::Dispatch && matches!(&self.d, Some(d) if !d.is_null())
    }

    /// Extract the dispatch carried by this frame.
    ///
    /// Returns `None` for any other opcode, for null or missing data, and for
    /// dispatch frames without a name.
    pub fn into_dispatch(self) -> Option<Dispatch> {
        if !self.is_dispatch() {
            return None;
        }
        let kind = self.t?;
        let data = self.d?;
        Some(Dispatch {
            kind,
            sequence: self.s,
            data,
        })
    }
}

/// A named gateway event with its body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dispatch {
    /// Dispatch name, e.g. `GUILD_CREATE`
    pub kind: String,

    /// Sequence number within the session the dispatch arrived on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,

    /// Dispatch body
    pub data: Value,
}

impl Dispatch {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            sequence: None,
            data,
        }
    }

    /// Set the sequence number
    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = Some(sequence);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_deserialize_dispatch() {
        let json_str = r#"{
            "op": 0,
            "s": 7,
            "t": "GUILD_CREATE",
            "d": {"id": "123456789012345678"}
        }"#;

        let payload: RawPayload = serde_json::from_str(json_str).unwrap();
        assert_eq!(payload.op, Opcode::Dispatch);
        assert_eq!(payload.s, Some(7));
        assert!(payload.is_dispatch());

        let dispatch = payload.into_dispatch().unwrap();
        assert_eq!(dispatch.kind, "GUILD_CREATE");
        assert_eq!(dispatch.sequence, Some(7));
        assert_eq!(dispatch.data["id"], "123456789012345678");
    }

    #[test]
    fn test_payload_deserialize_heartbeat_ack() {
        let payload: RawPayload = serde_json::from_str(r#"{"op": 11, "d": null}"#).unwrap();
        assert_eq!(payload.op, Opcode::HeartbeatAck);
        assert!(!payload.is_dispatch());
        assert!(payload.into_dispatch().is_none());
    }

    #[test]
    fn test_non_dispatch_opcode_never_yields_dispatch() {
        let mut payload = RawPayload::dispatch("GUILD_CREATE", 1, json!({"id": "1"}));
        payload.op = Opcode::Hello;
        assert!(payload.into_dispatch().is_none());
    }

    #[test]
    fn test_null_data_is_not_a_dispatch() {
        let payload = RawPayload::dispatch("RESUMED", 3, Value::Null);
        assert!(!payload.is_dispatch());
        assert!(payload.into_dispatch().is_none());
    }

    #[test]
    fn test_payload_serialize_omits_empty_fields() {
        let json_str = serde_json::to_string(&RawPayload::new(Opcode::Heartbeat)).unwrap();
        assert!(json_str.contains("\"op\":1"));
        assert!(!json_str.contains("session_id"));
        assert!(!json_str.contains("\"t\""));
    }

    #[test]
    fn test_unknown_opcode_and_fields_survive_reserialization() {
        let line = r#"{"op":42,"d":{"x":1},"s":9,"shard_hint":[0,2]}"#;
        let payload: RawPayload = serde_json::from_str(line).unwrap();
        assert_eq!(payload.op, Opcode::Unknown(42));
        assert!(payload.into_dispatch().is_none());

        let payload: RawPayload = serde_json::from_str(line).unwrap();
        let reencoded: Value = serde_json::to_value(&payload).unwrap();
        let original: Value = serde_json::from_str(line).unwrap();
        assert_eq!(reencoded, original);
    }

    #[test]
    fn test_opcode_codes() {
        for code in 0..=u8::MAX {
            assert_eq!(Opcode::from(code).code(), code);
        }
        assert_eq!(Opcode::from(5), Opcode::Unknown(5));
        assert_eq!(Opcode::from(10), Opcode::Hello);
        assert!(serde_json::from_str::<Opcode>("256").is_err());
    }

    #[test]
    fn test_snowflake_from_string_and_number() {
        let a: Snowflake = serde_json::from_str("\"123456789012345678\"").unwrap();
        let b: Snowflake = serde_json::from_str("123456789012345678").unwrap();
        assert_eq!(a, b);
        assert_eq!(serde_json::to_string(&a).unwrap(), "\"123456789012345678\"");
        assert!(serde_json::from_str::<Snowflake>("\"abc\"").is_err());
    }
}
