//! Opcodes, event-type tags, and the [`Event`] sum type delivered to
//! consumers of a [`Shard`](crate::shard::Shard)'s event stream.

use crate::payload::{Hello, InvalidSession, Ready};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;

/// Fixed integer opcode values used on the wire.
///
/// See §6 of the protocol spec for the authoritative table.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[repr(u8)]
pub enum OpCode {
    /// An event was dispatched.
    Dispatch = 0,
    /// Used for ping-checking the connection.
    Heartbeat = 1,
    /// Start a new session.
    Identify = 2,
    /// Update the client's presence.
    PresenceUpdate = 3,
    /// Join, move, or leave a voice channel.
    VoiceStateUpdate = 4,
    /// Resume a previously disconnected session.
    Resume = 6,
    /// The server is asking the client to reconnect.
    Reconnect = 7,
    /// Request information about offline guild members.
    RequestGuildMembers = 8,
    /// The session has been invalidated.
    InvalidSession = 9,
    /// Sent immediately after connecting; contains the heartbeat interval.
    Hello = 10,
    /// A heartbeat was acknowledged.
    HeartbeatAck = 11,
}

impl OpCode {
    /// Convert from a raw integer, if it maps to a known opcode.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
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
            _ => return None,
        })
    }
}

/// Dispatch event-type tag, as carried in the `t` field of a dispatch
/// frame.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum EventType {
    ChannelCreate,
    ChannelDelete,
    ChannelUpdate,
    GuildCreate,
    GuildDelete,
    GuildMemberAdd,
    GuildMemberRemove,
    GuildMemberUpdate,
    GuildUpdate,
    InteractionCreate,
    MessageCreate,
    MessageDelete,
    MessageUpdate,
    PresenceUpdate,
    Ready,
    RoleCreate,
    RoleDelete,
    RoleUpdate,
    Resumed,
    /// A dispatch whose `t` wasn't recognized by this crate.
    ///
    /// This crate only models the protocol-level payloads it needs;
    /// everything else rides along as an [`Event::Unknown`] carrying raw
    /// JSON for the caller's own domain types to deserialize.
    Unknown,
}

impl EventType {
    /// Map Discord's wire event-type string to a known variant, falling
    /// back to [`EventType::Unknown`].
    #[must_use]
    pub fn from_str(name: &str) -> Self {
        match name {
            "CHANNEL_CREATE" => Self::ChannelCreate,
            "CHANNEL_DELETE" => Self::ChannelDelete,
            "CHANNEL_UPDATE" => Self::ChannelUpdate,
            "GUILD_CREATE" => Self::GuildCreate,
            "GUILD_DELETE" => Self::GuildDelete,
            "GUILD_MEMBER_ADD" => Self::GuildMemberAdd,
            "GUILD_MEMBER_REMOVE" => Self::GuildMemberRemove,
            "GUILD_MEMBER_UPDATE" => Self::GuildMemberUpdate,
            "GUILD_UPDATE" => Self::GuildUpdate,
            "INTERACTION_CREATE" => Self::InteractionCreate,
            "MESSAGE_CREATE" => Self::MessageCreate,
            "MESSAGE_DELETE" => Self::MessageDelete,
            "MESSAGE_UPDATE" => Self::MessageUpdate,
            "PRESENCE_UPDATE" => Self::PresenceUpdate,
            "READY" => Self::Ready,
            "RESUMED" => Self::Resumed,
            "ROLE_CREATE" => Self::RoleCreate,
            "ROLE_DELETE" => Self::RoleDelete,
            "ROLE_UPDATE" => Self::RoleUpdate,
            _ => Self::Unknown,
        }
    }
}

bitflags! {
    /// Bitflags mirroring [`EventType`], used to let a consumer filter an
    /// event stream without allocating a `HashSet`.
    pub struct EventTypeFlags: u64 {
        const CHANNEL_CREATE = 1 << 0;
        const CHANNEL_DELETE = 1 << 1;
        const CHANNEL_UPDATE = 1 << 2;
        const GUILD_CREATE = 1 << 3;
        const GUILD_DELETE = 1 << 4;
        const GUILD_MEMBER_ADD = 1 << 5;
        const GUILD_MEMBER_REMOVE = 1 << 6;
        const GUILD_MEMBER_UPDATE = 1 << 7;
        const GUILD_UPDATE = 1 << 8;
        const INTERACTION_CREATE = 1 << 9;
        const MESSAGE_CREATE = 1 << 10;
        const MESSAGE_DELETE = 1 << 11;
        const MESSAGE_UPDATE = 1 << 12;
        const PRESENCE_UPDATE = 1 << 13;
        const READY = 1 << 14;
        const RESUMED = 1 << 15;
        const ROLE_CREATE = 1 << 16;
        const ROLE_DELETE = 1 << 17;
        const ROLE_UPDATE = 1 << 18;
        const UNKNOWN = 1 << 19;
        /// Meta events synthesized by the shard itself (connecting,
        /// disconnected, reconnecting, ...).
        const SHARD_PAYLOAD = 1 << 20;
    }
}

impl Default for EventTypeFlags {
    /// Every known event type; the safe default for a consumer that
    /// hasn't opted into filtering.
    fn default() -> Self {
        Self::all() - Self::SHARD_PAYLOAD
    }
}

impl From<EventType> for EventTypeFlags {
    fn from(kind: EventType) -> Self {
        match kind {
            EventType::ChannelCreate => Self::CHANNEL_CREATE,
            EventType::ChannelDelete => Self::CHANNEL_DELETE,
            EventType::ChannelUpdate => Self::CHANNEL_UPDATE,
            EventType::GuildCreate => Self::GUILD_CREATE,
            EventType::GuildDelete => Self::GUILD_DELETE,
            EventType::GuildMemberAdd => Self::GUILD_MEMBER_ADD,
            EventType::GuildMemberRemove => Self::GUILD_MEMBER_REMOVE,
            EventType::GuildMemberUpdate => Self::GUILD_MEMBER_UPDATE,
            EventType::GuildUpdate => Self::GUILD_UPDATE,
            EventType::InteractionCreate => Self::INTERACTION_CREATE,
            EventType::MessageCreate => Self::MESSAGE_CREATE,
            EventType::MessageDelete => Self::MESSAGE_DELETE,
            EventType::MessageUpdate => Self::MESSAGE_UPDATE,
            EventType::PresenceUpdate => Self::PRESENCE_UPDATE,
            EventType::Ready => Self::READY,
            EventType::Resumed => Self::RESUMED,
            EventType::RoleCreate => Self::ROLE_CREATE,
            EventType::RoleDelete => Self::ROLE_DELETE,
            EventType::RoleUpdate => Self::ROLE_UPDATE,
            EventType::Unknown => Self::UNKNOWN,
        }
    }
}

/// A gateway-protocol-level event, used internally by the shard loop to
/// decide what to do before an [`Event`] is ever constructed for the
/// consumer.
#[derive(Clone, Debug)]
pub(crate) enum GatewayEvent {
    Dispatch(u64, Box<DispatchEvent>),
    Heartbeat(u64),
    HeartbeatAck,
    Hello(Hello),
    InvalidateSession(bool),
    Reconnect,
}

/// The payload half of a dispatch, ahead of being wrapped in an
/// application-facing [`Event`].
#[derive(Clone, Debug)]
pub(crate) enum DispatchEvent {
    Ready(Box<Ready>),
    Resumed,
    Other {
        event_type: EventType,
        raw_type: String,
        value: serde_json::Value,
    },
}

/// Meta information about a shard connecting.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Connecting {
    pub gateway: String,
    pub shard_id: u64,
}

/// Meta information about a shard disconnecting.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Disconnected {
    pub code: Option<u16>,
    pub reason: Option<String>,
    pub shard_id: u64,
}

/// Meta information about a shard reconnecting.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Reconnecting {
    pub shard_id: u64,
}

/// An error that happened in the background of the event loop and was
/// not locally recoverable enough to retry silently.
#[derive(Clone, Debug)]
pub struct BackgroundError {
    pub shard_id: u64,
    pub message: String,
}

/// A typed event delivered from a shard's event stream.
///
/// `Close` and `BackgroundError` are synthetic: they are never decoded
/// from a dispatch frame, only constructed by the engine itself (see
/// P3 of the protocol spec).
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum Event {
    /// The shard is attempting to establish a connection.
    ShardConnecting(Connecting),
    /// The shard fully identified or resumed.
    ShardConnected { shard_id: u64, heartbeat_interval: u64 },
    /// The shard's connection was lost.
    ShardDisconnected(Disconnected),
    /// The shard is waiting to reconnect.
    ShardReconnecting(Reconnecting),
    /// Gateway told the client to reconnect.
    GatewayReconnect,
    /// A heartbeat acknowledgement was received.
    GatewayHeartbeatAck,
    /// The gateway connection closed with a fatal, non-retriable code.
    ///
    /// See `Close::fatal` for the policy; this variant is only ever
    /// constructed for fatal closes, per §7.
    Close { shard_id: u64, code: u16, reason: Option<String> },
    /// Something went wrong decoding or processing a frame that wasn't
    /// fatal to the session.
    BackgroundError(BackgroundError),
    /// Fresh or resumed session is ready.
    Ready(Box<Ready>),
    /// A session resume completed successfully.
    Resumed,
    /// A dispatch whose event type this crate doesn't model in depth.
    ///
    /// Carries the raw JSON payload for the caller's own domain crate.
    Unknown { event_type: String, value: serde_json::Value },
}

impl Event {
    /// The [`EventType`] this event corresponds to, for intent/flag
    /// filtering purposes.
    #[must_use]
    pub fn kind(&self) -> EventType {
        match self {
            Self::Ready(_) => EventType::Ready,
            Self::Resumed => EventType::Resumed,
            Self::Unknown { .. } => EventType::Unknown,
            Self::ShardConnecting(_)
            | Self::ShardConnected { .. }
            | Self::ShardDisconnected(_)
            | Self::ShardReconnecting(_)
            | Self::GatewayReconnect
            | Self::GatewayHeartbeatAck
            | Self::Close { .. }
            | Self::BackgroundError(_) => EventType::Unknown,
        }
    }
}

/// Close codes the gateway may send that must never be retried (§6).
const FATAL_CLOSE_CODES: [u16; 6] = [4004, 4010, 4011, 4012, 4013, 4014];

/// Whether a gateway close code is fatal (non-retriable) per the fixed
/// table in §6 of the protocol spec.
#[must_use]
pub fn is_fatal_close_code(code: u16) -> bool {
    FATAL_CLOSE_CODES.contains(&code)
}

/// Human-readable reason a fatal close code is fatal, used for the
/// `Close` event's `reason` field when the server didn't provide one.
#[must_use]
pub fn fatal_close_reason(code: u16) -> Option<&'static str> {
    Some(match code {
        4004 => "authentication failed",
        4010 => "invalid shard",
        4011 => "sharding required",
        4012 => "invalid API version",
        4013 => "invalid intents",
        4014 => "disallowed intents",
        _ => return None,
    })
}

impl TryFrom<u8> for OpCode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::from_u8(value).ok_or(value)
    }
}

#[cfg(test)]
mod tests {
    use super::{is_fatal_close_code, EventType, OpCode};

    #[test]
    fn opcode_values_match_wire_table() {
        assert_eq!(Some(OpCode::Dispatch), OpCode::from_u8(0));
        assert_eq!(Some(OpCode::Heartbeat), OpCode::from_u8(1));
        assert_eq!(Some(OpCode::Hello), OpCode::from_u8(10));
        assert_eq!(Some(OpCode::HeartbeatAck), OpCode::from_u8(11));
        assert_eq!(None, OpCode::from_u8(5));
    }

    #[test]
    fn fatal_codes_are_exactly_the_documented_set() {
        for code in [4004, 4010, 4011, 4012, 4013, 4014] {
            assert!(is_fatal_close_code(code));
        }
        for code in [1000, 1001, 4000, 4009] {
            assert!(!is_fatal_close_code(code));
        }
    }

    #[test]
    fn unknown_event_type_falls_back() {
        assert_eq!(EventType::Unknown, EventType::from_str("SOMETHING_NEW"));
        assert_eq!(EventType::Ready, EventType::from_str("READY"));
    }
}
