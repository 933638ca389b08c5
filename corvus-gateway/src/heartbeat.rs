//! The heartbeater: a background task that sends `Heartbeat` frames on
//! the interval `Hello` specified, and notices when two consecutive
//! heartbeats go unacknowledged (§4.1).

use crate::{json, payload::Heartbeat, session::Session};
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

/// Why the heartbeater stopped itself instead of running forever.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum HeartbeaterStop {
    /// The engine asked it to stop (shard shutting down or reconnecting).
    Shutdown,
    /// Two consecutive heartbeats went unacknowledged; the connection
    /// should be treated as dead and reconnected.
    AckTimeout,
    /// The outbound channel closed, meaning the connection is already
    /// gone.
    ChannelClosed,
}

/// Spawn the heartbeater for one connection's lifetime.
///
/// Returns a handle that resolves to the reason the loop stopped. The
/// caller drives reconnection; this task only detects the failure.
pub(crate) fn spawn(
    session: Arc<Session>,
    outbound: mpsc::UnboundedSender<Message>,
) -> tokio::task::JoinHandle<HeartbeaterStop> {
    tokio::spawn(run(session, outbound))
}

async fn run(session: Arc<Session>, outbound: mpsc::UnboundedSender<Message>) -> HeartbeaterStop {
    let mut shutdown = session.shutdown_receiver();

    loop {
        let interval = session.heartbeat_interval();
        let sleep = tokio::time::sleep(Duration::from_millis(interval.max(1)));

        tokio::select! {
            _ = sleep => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return HeartbeaterStop::Shutdown;
                }
                continue;
            }
        }

        if !session.heartbeats().is_acked() {
            return HeartbeaterStop::AckTimeout;
        }

        let heartbeat = Heartbeat::new(session.seq());
        let Ok(bytes) = json::encode(crate::event::OpCode::Heartbeat, &heartbeat) else {
            continue;
        };

        if outbound.send(Message::Text(String::from_utf8_lossy(&bytes).into_owned())).is_err() {
            return HeartbeaterStop::ChannelClosed;
        }

        session.heartbeats().record_sent();
    }
}

#[cfg(test)]
mod tests {
    use super::{spawn, HeartbeaterStop};
    use crate::session::Session;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    #[tokio::test(start_paused = true)]
    async fn stops_when_shutdown_is_signaled() {
        let session = Arc::new(Session::new());
        session.set_heartbeat_interval(1_000);
        let (tx, _rx) = mpsc::unbounded_channel();

        let handle = spawn(Arc::clone(&session), tx);
        session.stop_heartbeater();

        assert_eq!(HeartbeaterStop::Shutdown, handle.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn detects_unacked_heartbeat() {
        let session = Arc::new(Session::new());
        session.set_heartbeat_interval(10);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let handle = spawn(Arc::clone(&session), tx);

        // First heartbeat goes out unacked; the next tick should notice.
        let _ = rx.recv().await;

        assert_eq!(HeartbeaterStop::AckTimeout, handle.await.unwrap());
    }
}
