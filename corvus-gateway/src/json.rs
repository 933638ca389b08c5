//! The operation codec: encode outbound frames, decode inbound ones.
//!
//! Decoding peeks `op`/`t`/`s` and only pays to parse the `d` payload
//! once, by holding it as a [`RawValue`] until the opcode is known. This
//! gets the same "don't double-parse the body" property the teacher
//! crate achieves with a hand-rolled [`serde::de::DeserializeSeed`], with
//! far less code, at the cost of one extra small struct per frame.

use crate::{
    event::{DispatchEvent, EventType, GatewayEvent},
    payload::{Hello, Ready},
};
use serde::Deserialize;
use serde_json::value::RawValue;
use std::{
    error::Error,
    fmt::{Display, Formatter, Result as FmtResult},
};

/// Envelope shape shared by every inbound frame (§6).
#[derive(Deserialize)]
struct Envelope<'a> {
    op: u8,
    #[serde(default, borrow)]
    d: Option<&'a RawValue>,
    #[serde(default)]
    s: Option<u64>,
    #[serde(default)]
    t: Option<String>,
}

/// Decoding an inbound frame failed.
#[derive(Debug)]
pub struct GatewayEventParsingError {
    kind: GatewayEventParsingErrorType,
    source: Option<Box<dyn Error + Send + Sync>>,
}

impl GatewayEventParsingError {
    #[must_use]
    pub fn kind(&self) -> &GatewayEventParsingErrorType {
        &self.kind
    }
}

/// Type of [`GatewayEventParsingError`] that occurred.
#[derive(Debug)]
#[non_exhaustive]
pub enum GatewayEventParsingErrorType {
    /// The payload wasn't a JSON object with a valid `op` field.
    PayloadInvalid,
    /// The `op` was recognized but the `d` payload didn't deserialize
    /// into the shape that opcode requires.
    Deserializing,
    /// A dispatch frame (`op == 0`) was missing `t` or `s`.
    DispatchMissingTag,
    /// The `op` isn't one this codec understands.
    UnknownOpCode { op: u8 },
}

impl Display for GatewayEventParsingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match &self.kind {
            GatewayEventParsingErrorType::PayloadInvalid => {
                f.write_str("payload is not a valid gateway frame")
            }
            GatewayEventParsingErrorType::Deserializing => {
                f.write_str("payload `d` did not match the shape its opcode requires")
            }
            GatewayEventParsingErrorType::DispatchMissingTag => {
                f.write_str("dispatch frame missing `t` or `s`")
            }
            GatewayEventParsingErrorType::UnknownOpCode { op } => {
                write!(f, "opcode {op} isn't a recognized protocol opcode")
            }
        }
    }
}

impl Error for GatewayEventParsingError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source.as_deref().map(|e| e as &(dyn Error + 'static))
    }
}

fn wrap(
    kind: GatewayEventParsingErrorType,
    source: impl Into<Box<dyn Error + Send + Sync>>,
) -> GatewayEventParsingError {
    GatewayEventParsingError {
        kind,
        source: Some(source.into()),
    }
}

fn bare(kind: GatewayEventParsingErrorType) -> GatewayEventParsingError {
    GatewayEventParsingError { kind, source: None }
}

/// Decode a single inbound frame into the internal [`GatewayEvent`]
/// representation.
///
/// Per §4.1, unknown `(op, t)` pairs never fail the codec outright: only
/// an unrecognized *opcode* is an error here. An unrecognized dispatch
/// `t` decodes fine, landing in [`DispatchEvent::Other`] so the caller
/// can surface it as [`crate::event::Event::Unknown`].
pub(crate) fn decode(bytes: &[u8]) -> Result<GatewayEvent, GatewayEventParsingError> {
    let envelope: Envelope<'_> = serde_json::from_slice(bytes)
        .map_err(|source| wrap(GatewayEventParsingErrorType::PayloadInvalid, source))?;

    match envelope.op {
        1 => Ok(GatewayEvent::Heartbeat(envelope.s.unwrap_or_default())),
        7 => Ok(GatewayEvent::Reconnect),
        9 => {
            let resumable = envelope
                .d
                .map(|raw| serde_json::from_str::<bool>(raw.get()))
                .transpose()
                .map_err(|source| wrap(GatewayEventParsingErrorType::Deserializing, source))?
                .unwrap_or(false);

            Ok(GatewayEvent::InvalidateSession(resumable))
        }
        10 => {
            let raw = envelope
                .d
                .ok_or_else(|| bare(GatewayEventParsingErrorType::PayloadInvalid))?;
            let hello: Hello = serde_json::from_str(raw.get())
                .map_err(|source| wrap(GatewayEventParsingErrorType::Deserializing, source))?;

            Ok(GatewayEvent::Hello(hello))
        }
        11 => Ok(GatewayEvent::HeartbeatAck),
        0 => decode_dispatch(envelope),
        op => Err(bare(GatewayEventParsingErrorType::UnknownOpCode { op })),
    }
}

fn decode_dispatch(envelope: Envelope<'_>) -> Result<GatewayEvent, GatewayEventParsingError> {
    let seq = envelope
        .s
        .ok_or_else(|| bare(GatewayEventParsingErrorType::DispatchMissingTag))?;
    let raw_type = envelope
        .t
        .ok_or_else(|| bare(GatewayEventParsingErrorType::DispatchMissingTag))?;
    let raw_d = envelope
        .d
        .ok_or_else(|| bare(GatewayEventParsingErrorType::PayloadInvalid))?;

    let dispatch = match raw_type.as_str() {
        "READY" => {
            let ready: Ready = serde_json::from_str(raw_d.get())
                .map_err(|source| wrap(GatewayEventParsingErrorType::Deserializing, source))?;

            DispatchEvent::Ready(Box::new(ready))
        }
        "RESUMED" => DispatchEvent::Resumed,
        _ => {
            let value: serde_json::Value = serde_json::from_str(raw_d.get())
                .map_err(|source| wrap(GatewayEventParsingErrorType::Deserializing, source))?;

            DispatchEvent::Other {
                event_type: EventType::from_str(&raw_type),
                raw_type,
                value,
            }
        }
    };

    Ok(GatewayEvent::Dispatch(seq, Box::new(dispatch)))
}

/// Serialize an outbound frame `{op, d}` for a given opcode.
pub(crate) fn encode(
    op: crate::event::OpCode,
    payload: &impl serde::Serialize,
) -> serde_json::Result<Vec<u8>> {
    #[derive(serde::Serialize)]
    struct Frame<'a, T> {
        op: u8,
        d: &'a T,
    }

    serde_json::to_vec(&Frame {
        op: op as u8,
        d: payload,
    })
}

#[cfg(test)]
mod tests {
    use super::decode;
    use crate::event::GatewayEvent;

    #[test]
    fn decodes_hello() {
        let event = decode(br#"{"op":10,"d":{"heartbeat_interval":45000}}"#).unwrap();
        assert!(matches!(event, GatewayEvent::Hello(hello) if hello.heartbeat_interval == 45000));
    }

    #[test]
    fn decodes_ready_dispatch() {
        let event = decode(
            br#"{"op":0,"s":1,"t":"READY","d":{"session_id":"ABC","resume_gateway_url":"wss://example"}}"#,
        )
        .unwrap();

        match event {
            GatewayEvent::Dispatch(seq, boxed) => {
                assert_eq!(1, seq);
                match *boxed {
                    crate::event::DispatchEvent::Ready(ready) => {
                        assert_eq!("ABC", ready.session_id);
                    }
                    other => panic!("expected Ready, got {other:?}"),
                }
            }
            other => panic!("expected Dispatch, got {other:?}"),
        }
    }

    #[test]
    fn unknown_dispatch_type_does_not_error() {
        let event = decode(br#"{"op":0,"s":2,"t":"SOMETHING_NEW","d":{"foo":true}}"#).unwrap();
        match event {
            GatewayEvent::Dispatch(_, boxed) => {
                assert!(matches!(*boxed, crate::event::DispatchEvent::Other { .. }));
            }
            other => panic!("expected Dispatch, got {other:?}"),
        }
    }

    #[test]
    fn unknown_opcode_is_an_error() {
        assert!(decode(br#"{"op":99,"d":null}"#).is_err());
    }

    #[test]
    fn heartbeat_ack_has_no_payload() {
        assert!(matches!(
            decode(br#"{"op":11,"d":null}"#).unwrap(),
            GatewayEvent::HeartbeatAck
        ));
    }
}
