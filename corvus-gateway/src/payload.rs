//! Wire payload shapes for the opcodes the engine itself speaks.
//!
//! This is deliberately not a full domain model: channel, guild, user,
//! and message schemas are the out-of-scope "domain type catalog"
//! external collaborator. Anything this crate doesn't need to drive the
//! protocol is left as [`serde_json::Value`] on [`crate::event::Event::Unknown`].

use crate::intents::Intents;
use serde::{Deserialize, Serialize};

/// `Hello` (opcode 10): tells the client how often to heartbeat.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct Hello {
    pub heartbeat_interval: u64,
}

/// `Ready` dispatch payload: the fields the engine needs to track
/// session state. Anything else Discord sends alongside `READY` (guild
/// stubs, application flags, ...) is the domain catalog's problem, not
/// ours.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Ready {
    pub session_id: String,
    #[serde(default)]
    pub resume_gateway_url: Option<String>,
    #[serde(default)]
    pub application_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// `os`/`browser`/`device` tuple sent in `Identify`.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct IdentifyProperties {
    pub os: String,
    pub browser: String,
    pub device: String,
}

impl IdentifyProperties {
    #[must_use]
    pub fn new(browser: impl Into<String>, device: impl Into<String>, os: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            browser: browser.into(),
            device: device.into(),
        }
    }
}

/// Fields needed to construct an [`Identify`] payload.
pub struct IdentifyInfo {
    pub token: String,
    pub properties: IdentifyProperties,
    pub compress: bool,
    pub large_threshold: u64,
    pub shard: Option<[u64; 2]>,
    pub presence: Option<UpdatePresence>,
    pub intents: Intents,
}

/// `Identify` (opcode 2): start a new session.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Identify {
    pub token: String,
    pub properties: IdentifyProperties,
    pub compress: bool,
    pub large_threshold: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shard: Option<[u64; 2]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence: Option<UpdatePresence>,
    pub intents: Intents,
}

impl Identify {
    #[must_use]
    pub fn new(info: IdentifyInfo) -> Self {
        Self {
            token: info.token,
            properties: info.properties,
            compress: info.compress,
            large_threshold: info.large_threshold,
            shard: info.shard,
            presence: info.presence,
            intents: info.intents,
        }
    }
}

/// `Resume` (opcode 6): continue a previous session after reconnecting.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Resume {
    pub token: String,
    pub session_id: String,
    pub seq: u64,
}

impl Resume {
    #[must_use]
    pub fn new(seq: u64, session_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            session_id: session_id.into(),
            seq,
        }
    }
}

/// `Heartbeat` (opcode 1): liveness ping, carrying the last observed
/// sequence (or `null` before the first dispatch).
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
#[serde(transparent)]
pub struct Heartbeat(pub Option<u64>);

impl Heartbeat {
    #[must_use]
    pub const fn new(seq: u64) -> Self {
        if seq == 0 {
            Self(None)
        } else {
            Self(Some(seq))
        }
    }
}

/// `InvalidSession` (opcode 9) payload: whether the session is
/// resumable.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
#[serde(transparent)]
pub struct InvalidSession(pub bool);

/// Selector used by [`RequestGuildMembers`]: exactly one of the two
/// variants may be populated (§6, programmer-misuse validation).
#[derive(Clone, Debug)]
pub enum MemberSelector {
    Ids(Vec<String>),
    Query { query: String, limit: u64 },
}

/// `RequestGuildMembers` (opcode 8).
#[derive(Clone, Debug, Serialize)]
pub struct RequestGuildMembers {
    pub guild_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    pub presences: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

impl RequestGuildMembers {
    /// Build a request, failing synchronously (§7, programmer misuse) if
    /// the caller didn't set exactly one selector.
    pub fn new(
        guild_id: impl Into<String>,
        selector: MemberSelector,
        presences: bool,
        nonce: Option<String>,
    ) -> Self {
        let (user_ids, query, limit) = match selector {
            MemberSelector::Ids(ids) => (Some(ids), None, None),
            MemberSelector::Query { query, limit } => (None, Some(query), Some(limit)),
        };

        Self {
            guild_id: guild_id.into(),
            user_ids,
            query,
            limit,
            presences,
            nonce,
        }
    }
}

/// `PresenceUpdate` (opcode 3) outgoing payload.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct UpdatePresence {
    pub since: Option<u64>,
    pub activities: Vec<serde_json::Value>,
    pub status: String,
    pub afk: bool,
}

/// `VoiceStateUpdate` (opcode 4) outgoing payload.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct UpdateVoiceState {
    pub guild_id: String,
    pub channel_id: Option<String>,
    pub self_mute: bool,
    pub self_deaf: bool,
}

#[cfg(test)]
mod tests {
    use super::{Heartbeat, MemberSelector, RequestGuildMembers};

    #[test]
    fn heartbeat_encodes_zero_as_null() {
        assert_eq!(None, Heartbeat::new(0).0);
        assert_eq!(Some(5), Heartbeat::new(5).0);
    }

    #[test]
    fn request_guild_members_selector_is_exclusive_by_construction() {
        let by_ids = RequestGuildMembers::new(
            "1",
            MemberSelector::Ids(vec!["2".into()]),
            false,
            None,
        );
        assert!(by_ids.user_ids.is_some());
        assert!(by_ids.query.is_none());

        let by_query = RequestGuildMembers::new(
            "1",
            MemberSelector::Query {
                query: String::new(),
                limit: 10,
            },
            false,
            None,
        );
        assert!(by_query.user_ids.is_none());
        assert!(by_query.query.is_some());
    }
}
