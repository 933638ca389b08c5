//! Interaction payload shapes (§3.1, §4.6): just enough of the wire format
//! to route a command/autocomplete/component interaction to a handler and
//! build the response frame it returns.
//!
//! As with [`crate::payload`], this is not a full domain model — option
//! values the router doesn't need to inspect to route ride along as
//! [`serde_json::Value`].

use serde::{Deserialize, Serialize};

/// Kind of interaction Discord sent (a narrow subset of the real
/// `InteractionType` enum; anything else falls back to `Unknown`).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum InteractionKind {
    ApplicationCommand,
    MessageComponent,
    ApplicationCommandAutocomplete,
    Unknown,
}

impl InteractionKind {
    #[must_use]
    pub fn from_u8(value: u8) -> Self {
        match value {
            2 => Self::ApplicationCommand,
            3 => Self::MessageComponent,
            4 => Self::ApplicationCommandAutocomplete,
            _ => Self::Unknown,
        }
    }
}

/// One option in a command invocation: either a leaf value, or a
/// subcommand/subcommand-group carrying further nested options.
///
/// Whether an option is a subcommand, a subcommand-group, or a plain value
/// is carried by Discord as an integer `type`; the router only needs to
/// distinguish "this descends further" from "this is a value", so `kind`
/// is kept as the raw integer rather than re-modeled in full.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CommandOption {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: u8,
    #[serde(default)]
    pub value: Option<serde_json::Value>,
    #[serde(default)]
    pub options: Vec<CommandOption>,
    #[serde(default)]
    pub focused: bool,
}

/// Option type values the router distinguishes; the rest (string,
/// integer, boolean, user, channel, role, ...) are all "a plain value" to
/// the routing logic and aren't enumerated here.
pub const OPTION_KIND_SUBCOMMAND: u8 = 1;
pub const OPTION_KIND_SUBCOMMAND_GROUP: u8 = 2;

/// `ApplicationCommandData`: the `data` field of a command or autocomplete
/// interaction.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ApplicationCommandData {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub options: Vec<CommandOption>,
}

/// The `data` field of a message-component interaction.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct MessageComponentData {
    pub custom_id: String,
    #[serde(default)]
    pub values: Vec<String>,
}

/// An `INTERACTION_CREATE` dispatch payload, trimmed to what the router
/// needs to resolve a node and build a response.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Interaction {
    pub id: String,
    pub application_id: String,
    pub token: String,
    #[serde(rename = "type")]
    pub kind_raw: u8,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl Interaction {
    #[must_use]
    pub fn kind(&self) -> InteractionKind {
        InteractionKind::from_u8(self.kind_raw)
    }

    /// Parse `data` as command data, for application-command and
    /// autocomplete interactions.
    pub fn command_data(&self) -> Option<ApplicationCommandData> {
        serde_json::from_value(self.data.clone()?).ok()
    }

    /// Parse `data` as component data, for message-component interactions.
    pub fn component_data(&self) -> Option<MessageComponentData> {
        serde_json::from_value(self.data.clone()?).ok()
    }
}

/// Response-frame type values a handler's result is wrapped into (§4.6):
/// `message-with-source` for an immediate reply, `deferred-message` for
/// the deferrable-middleware's placeholder ack.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InteractionResponseKind {
    ChannelMessageWithSource,
    DeferredChannelMessageWithSource,
}

impl InteractionResponseKind {
    const fn wire_value(self) -> u8 {
        match self {
            Self::ChannelMessageWithSource => 4,
            Self::DeferredChannelMessageWithSource => 5,
        }
    }
}

/// Flags settable on an interaction response, namely the ephemeral bit the
/// deferrable middleware exposes as a configuration knob.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct InteractionResponseFlags {
    pub ephemeral: bool,
}

impl InteractionResponseFlags {
    const EPHEMERAL_BIT: u64 = 1 << 6;

    fn bits(self) -> u64 {
        if self.ephemeral {
            Self::EPHEMERAL_BIT
        } else {
            0
        }
    }
}

/// Message body of an interaction response.
#[derive(Clone, Debug, Default, Serialize)]
pub struct InteractionMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flags: Option<u64>,
}

/// A fully built `InteractionResponse` frame, ready to be posted back to
/// Discord (immediately by the gateway-adjacent REST call for the initial
/// response, or as a follow-up via [`crate::rest::RestClient`]).
#[derive(Clone, Debug, Serialize)]
pub struct InteractionResponse {
    #[serde(rename = "type")]
    kind: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<InteractionMessage>,
}

impl InteractionResponse {
    /// Build an immediate `message-with-source` response from a handler's
    /// returned content, honoring the response flags.
    #[must_use]
    pub fn message(content: impl Into<String>, flags: InteractionResponseFlags) -> Self {
        Self {
            kind: InteractionResponseKind::ChannelMessageWithSource.wire_value(),
            data: Some(InteractionMessage {
                content: Some(content.into()),
                flags: non_zero_bits(flags),
            }),
        }
    }

    /// Build the placeholder `deferred-message` response the deferrable
    /// middleware sends when the handler hasn't finished within its
    /// window.
    #[must_use]
    pub fn deferred(flags: InteractionResponseFlags) -> Self {
        Self {
            kind: InteractionResponseKind::DeferredChannelMessageWithSource.wire_value(),
            data: (flags.bits() != 0).then(|| InteractionMessage {
                content: None,
                flags: non_zero_bits(flags),
            }),
        }
    }
}

fn non_zero_bits(flags: InteractionResponseFlags) -> Option<u64> {
    (flags.bits() != 0).then(|| flags.bits())
}

#[cfg(test)]
mod tests {
    use super::{CommandOption, Interaction, InteractionKind, OPTION_KIND_SUBCOMMAND};

    #[test]
    fn classifies_interaction_kind() {
        let interaction = Interaction {
            id: "1".into(),
            application_id: "2".into(),
            token: "tok".into(),
            kind_raw: 2,
            data: None,
        };
        assert_eq!(InteractionKind::ApplicationCommand, interaction.kind());
    }

    #[test]
    fn parses_command_data_with_nested_options() {
        let interaction = Interaction {
            id: "1".into(),
            application_id: "2".into(),
            token: "tok".into(),
            kind_raw: 2,
            data: Some(serde_json::json!({
                "id": "3",
                "name": "profile",
                "options": [
                    {"name": "get", "type": OPTION_KIND_SUBCOMMAND, "options": []}
                ]
            })),
        };

        let data = interaction.command_data().unwrap();
        assert_eq!("profile", data.name);
        assert_eq!(1, data.options.len());
        let sub: &CommandOption = &data.options[0];
        assert_eq!("get", sub.name);
    }
}
