//! The connection stage of a [`Shard`](crate::shard::Shard).

use std::{
    convert::TryFrom,
    error::Error,
    fmt::{Display, Formatter, Result as FmtResult},
};

/// A raw integer didn't map to a known [`Stage`].
#[derive(Clone, Debug)]
pub struct StageConversionError {
    value: u8,
}

impl Display for StageConversionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{} isn't a recognized connection stage", self.value)
    }
}

impl Error for StageConversionError {}

/// Current connection stage of a shard.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[repr(u8)]
pub enum Stage {
    /// Fully connected and identified (or resumed) with the gateway.
    Connected,
    /// Not connected, and not attempting to reconnect.
    Disconnected,
    /// Performing the initial websocket handshake.
    Handshaking,
    /// Identifying to start a brand new session.
    Identifying,
    /// Resuming a previous session.
    Resuming,
}

impl Default for Stage {
    fn default() -> Self {
        Self::Disconnected
    }
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(match self {
            Self::Connected => "Connected",
            Self::Disconnected => "Disconnected",
            Self::Handshaking => "Handshaking",
            Self::Identifying => "Identifying",
            Self::Resuming => "Resuming",
        })
    }
}

impl TryFrom<u8> for Stage {
    type Error = StageConversionError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Connected,
            1 => Self::Disconnected,
            2 => Self::Handshaking,
            3 => Self::Identifying,
            4 => Self::Resuming,
            _ => return Err(StageConversionError { value }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::Stage;
    use std::convert::TryFrom;

    #[test]
    fn round_trips() {
        for stage in [
            Stage::Connected,
            Stage::Disconnected,
            Stage::Handshaking,
            Stage::Identifying,
            Stage::Resuming,
        ] {
            assert_eq!(stage, Stage::try_from(stage as u8).unwrap());
        }

        assert!(Stage::try_from(5).is_err());
    }

    #[test]
    fn default_is_disconnected() {
        assert_eq!(Stage::Disconnected, Stage::default());
    }
}
