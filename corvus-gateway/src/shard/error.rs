//! Errors surfaced by the event loop itself, as opposed to the
//! background-error events it publishes for non-fatal frame problems.

use std::{
    error::Error,
    fmt::{Display, Formatter, Result as FmtResult},
};

/// The engine exited without completing the work it was asked to do.
#[derive(Debug)]
pub struct ShardInitError {
    kind: ShardInitErrorType,
    source: Option<Box<dyn Error + Send + Sync>>,
}

impl ShardInitError {
    #[must_use]
    pub fn kind(&self) -> &ShardInitErrorType {
        &self.kind
    }

    pub(crate) fn new(
        kind: ShardInitErrorType,
        source: impl Into<Box<dyn Error + Send + Sync>>,
    ) -> Self {
        Self {
            kind,
            source: Some(source.into()),
        }
    }

    pub(crate) fn bare(kind: ShardInitErrorType) -> Self {
        Self { kind, source: None }
    }
}

/// Type of [`ShardInitError`] that occurred.
#[derive(Debug)]
#[non_exhaustive]
pub enum ShardInitErrorType {
    /// Establishing the websocket connection failed repeatedly, past the
    /// configured retry cap.
    RetriesExhausted,
    /// The gateway closed with a fatal, non-retriable code during the
    /// handshake itself, before a `Ready`/`Resumed` was ever observed.
    FatalClose { code: u16 },
    /// The stream ended before `Hello` arrived.
    StreamEndedDuringHandshake,
}

impl Display for ShardInitError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match &self.kind {
            ShardInitErrorType::RetriesExhausted => {
                f.write_str("exceeded the configured reconnect retry limit")
            }
            ShardInitErrorType::FatalClose { code } => {
                write!(f, "gateway closed the connection with fatal code {code}")
            }
            ShardInitErrorType::StreamEndedDuringHandshake => {
                f.write_str("connection closed before the handshake completed")
            }
        }
    }
}

impl Error for ShardInitError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source.as_deref().map(|e| e as &(dyn Error + 'static))
    }
}

#[cfg(test)]
mod tests {
    use super::ShardInitError;
    use static_assertions::assert_impl_all;
    use std::fmt::Debug;

    assert_impl_all!(ShardInitError: Debug, std::error::Error, Send, Sync);
}
