//! Intent bitflags and the static event → intent requirement table.

use crate::event::EventType;
use bitflags::bitflags;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

bitflags! {
    /// Bitflags declaring which categories of events a session wants to
    /// receive.
    ///
    /// Two bits are privileged (must be enabled for the application in
    /// Discord's developer portal before the gateway will honor them):
    /// [`Intents::GUILD_PRESENCES`] and [`Intents::GUILD_MEMBERS`].
    /// Requesting a privileged intent without having it enabled results in
    /// a disallowed-intents close during the handshake.
    pub struct Intents: u64 {
        const GUILDS = 1 << 0;
        const GUILD_MEMBERS = 1 << 1;
        const GUILD_BANS = 1 << 2;
        const GUILD_EMOJIS_AND_STICKERS = 1 << 3;
        const GUILD_INTEGRATIONS = 1 << 4;
        const GUILD_WEBHOOKS = 1 << 5;
        const GUILD_INVITES = 1 << 6;
        const GUILD_VOICE_STATES = 1 << 7;
        const GUILD_PRESENCES = 1 << 8;
        const GUILD_MESSAGES = 1 << 9;
        const GUILD_MESSAGE_REACTIONS = 1 << 10;
        const GUILD_MESSAGE_TYPING = 1 << 11;
        const DIRECT_MESSAGES = 1 << 12;
        const DIRECT_MESSAGE_REACTIONS = 1 << 13;
        const DIRECT_MESSAGE_TYPING = 1 << 14;
        const MESSAGE_CONTENT = 1 << 15;
        const GUILD_SCHEDULED_EVENTS = 1 << 16;
    }
}

impl Intents {
    /// Intents that Discord requires to be explicitly enabled for the
    /// application before the gateway will grant them.
    pub const PRIVILEGED: Self =
        Self::from_bits_truncate(Self::GUILD_PRESENCES.bits() | Self::GUILD_MEMBERS.bits());

    /// Whether any privileged intent is set.
    #[must_use]
    pub const fn has_privileged(self) -> bool {
        self.intersects(Self::PRIVILEGED)
    }
}

impl Serialize for Intents {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.bits())
    }
}

impl<'de> Deserialize<'de> for Intents {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bits = u64::deserialize(deserializer)?;
        Ok(Self::from_bits_truncate(bits))
    }
}

/// Returns the intents required to receive a given event type, or `None`
/// if the event type is never gated behind intents (for example `READY`
/// or `RESUMED`, which are always delivered).
#[must_use]
pub fn required_for(event_type: EventType) -> Option<Intents> {
    Some(match event_type {
        EventType::GuildCreate
        | EventType::GuildDelete
        | EventType::GuildUpdate
        | EventType::ChannelCreate
        | EventType::ChannelDelete
        | EventType::ChannelUpdate
        | EventType::RoleCreate
        | EventType::RoleDelete
        | EventType::RoleUpdate => Intents::GUILDS,
        EventType::GuildMemberAdd
        | EventType::GuildMemberRemove
        | EventType::GuildMemberUpdate => Intents::GUILD_MEMBERS,
        EventType::PresenceUpdate => Intents::GUILD_PRESENCES,
        EventType::MessageCreate | EventType::MessageDelete | EventType::MessageUpdate => {
            Intents::GUILD_MESSAGES | Intents::DIRECT_MESSAGES
        }
        EventType::InteractionCreate
        | EventType::Ready
        | EventType::Resumed
        | EventType::Unknown => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::{required_for, Intents};
    use crate::event::EventType;

    #[test]
    fn privileged_detection() {
        assert!(Intents::GUILD_MEMBERS.has_privileged());
        assert!(Intents::GUILD_PRESENCES.has_privileged());
        assert!(!Intents::GUILDS.has_privileged());
    }

    #[test]
    fn unconditional_events_need_no_intents() {
        assert_eq!(None, required_for(EventType::Ready));
        assert_eq!(None, required_for(EventType::InteractionCreate));
    }

    #[test]
    fn member_events_require_privileged_intent() {
        assert_eq!(
            Some(Intents::GUILD_MEMBERS),
            required_for(EventType::GuildMemberAdd)
        );
    }
}
