//! Session state shared between the event loop and its heartbeater
//! task: identity, sequence counter, and heartbeat bookkeeping.

use crate::stage::Stage;
use std::sync::{
    atomic::{AtomicU64, AtomicU8, Ordering},
    Mutex,
};
use tokio::sync::watch;

/// Round-trip time of the most recent heartbeat/ack pair, and whether
/// the last heartbeat sent has been acknowledged yet.
#[derive(Clone, Copy, Debug, Default)]
pub struct Latency {
    pub recent: Option<std::time::Duration>,
    pub sent: u64,
    pub received: u64,
}

/// Tracks outstanding heartbeats so the engine can tell a stalled
/// connection (no ack within two intervals) from a healthy one.
#[derive(Debug)]
pub(crate) struct Heartbeats {
    sent_at: Mutex<Option<std::time::Instant>>,
    last_acked: Mutex<Option<std::time::Instant>>,
    sent: AtomicU64,
    received: AtomicU64,
}

impl Heartbeats {
    fn new() -> Self {
        Self {
            sent_at: Mutex::new(None),
            last_acked: Mutex::new(None),
            sent: AtomicU64::new(0),
            received: AtomicU64::new(0),
        }
    }

    pub(crate) fn record_sent(&self) {
        *self.sent_at.lock().unwrap() = Some(std::time::Instant::now());
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_ack(&self) {
        let now = std::time::Instant::now();
        *self.last_acked.lock().unwrap() = Some(now);
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    /// Whether an ack has arrived since the most recent heartbeat was
    /// sent (§4.1's two-strikes-then-reconnect rule).
    pub(crate) fn is_acked(&self) -> bool {
        let sent_at = *self.sent_at.lock().unwrap();
        let last_acked = *self.last_acked.lock().unwrap();

        match (sent_at, last_acked) {
            (Some(sent_at), Some(last_acked)) => last_acked >= sent_at,
            (None, _) => true,
            (Some(_), None) => false,
        }
    }

    pub(crate) fn latency(&self) -> Latency {
        let sent_at = *self.sent_at.lock().unwrap();
        let last_acked = *self.last_acked.lock().unwrap();

        Latency {
            recent: match (sent_at, last_acked) {
                (Some(sent_at), Some(last_acked)) if last_acked >= sent_at => {
                    Some(last_acked.saturating_duration_since(sent_at))
                }
                _ => None,
            },
            sent: self.sent.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
        }
    }
}

/// State of a single gateway session: identity, sequence, and the
/// current connection [`Stage`].
///
/// Cloning is cheap; every clone refers to the same underlying state via
/// `Arc`, matching how the engine and its heartbeater task share one
/// session.
#[derive(Debug)]
pub(crate) struct Session {
    id: Mutex<Option<String>>,
    resume_gateway_url: Mutex<Option<String>>,
    seq: AtomicU64,
    stage: AtomicU8,
    heartbeat_interval: AtomicU64,
    heartbeats: Heartbeats,
    shutdown: watch::Sender<bool>,
}

impl Session {
    pub(crate) fn new() -> Self {
        let (shutdown, _) = watch::channel(false);

        Self {
            id: Mutex::new(None),
            resume_gateway_url: Mutex::new(None),
            seq: AtomicU64::new(0),
            stage: AtomicU8::new(Stage::Disconnected as u8),
            heartbeat_interval: AtomicU64::new(0),
            heartbeats: Heartbeats::new(),
            shutdown,
        }
    }

    pub(crate) fn id(&self) -> Option<String> {
        self.id.lock().unwrap().clone()
    }

    pub(crate) fn set_id(&self, id: impl Into<String>) {
        *self.id.lock().unwrap() = Some(id.into());
    }

    /// Forget the session id entirely, as opposed to [`Session::set_id`]
    /// with an empty string: `id().is_some()` must go false so a
    /// subsequent reconnect takes the fresh-identify path, not resume.
    pub(crate) fn clear_id(&self) {
        *self.id.lock().unwrap() = None;
    }

    pub(crate) fn resume_gateway_url(&self) -> Option<String> {
        self.resume_gateway_url.lock().unwrap().clone()
    }

    pub(crate) fn set_resume_gateway_url(&self, url: Option<String>) {
        *self.resume_gateway_url.lock().unwrap() = url;
    }

    pub(crate) fn seq(&self) -> u64 {
        self.seq.load(Ordering::Relaxed)
    }

    /// Advance the sequence counter, per the protocol spec's monotonicity
    /// invariant (P2): a lower or equal `s` never regresses it.
    pub(crate) fn set_seq(&self, seq: u64) {
        self.seq.fetch_max(seq, Ordering::Relaxed);
    }

    /// Reset the sequence counter to zero. Only valid on a fresh
    /// identify, never on resume: resuming relies on the last-known
    /// sequence to ask the server to replay missed dispatches.
    pub(crate) fn reset_seq(&self) {
        self.seq.store(0, Ordering::Relaxed);
    }

    pub(crate) fn stage(&self) -> Stage {
        Stage::try_from(self.stage.load(Ordering::Relaxed)).unwrap_or_default()
    }

    pub(crate) fn set_stage(&self, stage: Stage) {
        self.stage.store(stage as u8, Ordering::Relaxed);
    }

    pub(crate) fn heartbeat_interval(&self) -> u64 {
        self.heartbeat_interval.load(Ordering::Relaxed)
    }

    pub(crate) fn set_heartbeat_interval(&self, interval: u64) {
        self.heartbeat_interval.store(interval, Ordering::Relaxed);
    }

    pub(crate) fn heartbeats(&self) -> &Heartbeats {
        &self.heartbeats
    }

    pub(crate) fn latency(&self) -> Latency {
        self.heartbeats.latency()
    }

    /// Signal the heartbeater task for this session to stop.
    pub(crate) fn stop_heartbeater(&self) {
        let _ = self.shutdown.send(true);
    }

    pub(crate) fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::Session;
    use crate::stage::Stage;

    #[test]
    fn seq_never_regresses() {
        let session = Session::new();
        session.set_seq(5);
        session.set_seq(2);
        assert_eq!(5, session.seq());
    }

    #[test]
    fn clear_id_makes_id_none_not_empty_string() {
        let session = Session::new();
        session.set_id("abc");
        assert!(session.id().is_some());
        session.clear_id();
        assert_eq!(None, session.id());
    }

    #[test]
    fn stage_round_trips() {
        let session = Session::new();
        session.set_stage(Stage::Identifying);
        assert_eq!(Stage::Identifying, session.stage());
    }

    #[test]
    fn heartbeats_start_acked() {
        let session = Session::new();
        assert!(session.heartbeats().is_acked());
    }

    #[test]
    fn heartbeat_without_ack_is_unacked() {
        let session = Session::new();
        session.heartbeats().record_sent();
        assert!(!session.heartbeats().is_acked());
        session.heartbeats().record_ack();
        assert!(session.heartbeats().is_acked());
    }
}
