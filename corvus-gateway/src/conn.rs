//! Thin websocket transport wrapper: dialing, sending with a serialized
//! write lock, and closing, so the event loop doesn't juggle
//! `SplitSink`/`SplitStream` bookkeeping directly.

use futures_util::{SinkExt, StreamExt};
use std::{
    error::Error,
    fmt::{Display, Formatter, Result as FmtResult},
};
use tokio::{net::TcpStream, sync::Mutex};
use tokio_tungstenite::{
    tungstenite::{
        protocol::{frame::coding::CloseCode, CloseFrame},
        Message,
    },
    MaybeTlsStream, WebSocketStream,
};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Establishing or using the websocket connection failed.
#[derive(Debug)]
pub struct ConnError {
    kind: ConnErrorType,
    source: Option<Box<dyn Error + Send + Sync>>,
}

impl ConnError {
    #[must_use]
    pub fn kind(&self) -> &ConnErrorType {
        &self.kind
    }
}

/// Type of [`ConnError`] that occurred.
#[derive(Debug)]
#[non_exhaustive]
pub enum ConnErrorType {
    /// The gateway URL couldn't be parsed.
    ParsingUrl,
    /// The websocket handshake itself failed.
    Establishing,
    /// Writing a frame to an already-closed socket.
    SendingAfterClose,
}

impl Display for ConnError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self.kind {
            ConnErrorType::ParsingUrl => f.write_str("gateway URL is not a valid websocket URL"),
            ConnErrorType::Establishing => f.write_str("failed establishing the websocket connection"),
            ConnErrorType::SendingAfterClose => f.write_str("attempted to send on a closed connection"),
        }
    }
}

impl Error for ConnError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source.as_deref().map(|e| e as &(dyn Error + 'static))
    }
}

/// A single websocket connection to the gateway.
///
/// Writes are serialized behind an internal lock so the event loop and
/// the heartbeater can both hold a reference and send concurrently
/// without interleaving partial frames.
pub(crate) struct Conn {
    socket: Mutex<Socket>,
}

impl Conn {
    /// Establish a new connection to `url`.
    pub(crate) async fn connect(url: &str) -> Result<Self, ConnError> {
        let (socket, _response) =
            tokio_tungstenite::connect_async(url)
                .await
                .map_err(|source| ConnError {
                    kind: ConnErrorType::Establishing,
                    source: Some(Box::new(source)),
                })?;

        Ok(Self {
            socket: Mutex::new(socket),
        })
    }

    /// Read the next message off the socket. `None` means the stream
    /// ended without an explicit close frame.
    pub(crate) async fn next(&self) -> Option<tokio_tungstenite::tungstenite::Result<Message>> {
        self.socket.lock().await.next().await
    }

    /// Send a single frame, holding the write lock only for the duration
    /// of the send.
    pub(crate) async fn send(&self, message: Message) -> Result<(), ConnError> {
        self.socket
            .lock()
            .await
            .send(message)
            .await
            .map_err(|source| ConnError {
                kind: ConnErrorType::SendingAfterClose,
                source: Some(Box::new(source)),
            })
    }

    /// Close the connection gracefully with the given close code, if
    /// any; a closed connection dropped abruptly (transport already
    /// gone) is not treated as an error.
    pub(crate) async fn close(&self, code: Option<u16>, reason: String) {
        let frame = code.map(|code| CloseFrame {
            code: CloseCode::from(code),
            reason: reason.into(),
        });

        let _ = self.socket.lock().await.close(frame).await;
    }
}

#[cfg(test)]
mod tests {
    use super::ConnError;
    use static_assertions::assert_impl_all;
    use std::fmt::Debug;

    assert_impl_all!(ConnError: Debug, std::error::Error, Send, Sync);
}
