//! The event loop itself (§4.4): handshake, steady-state dispatch,
//! heartbeat supervision, and reconnect-with-backoff, all serialized
//! through one task so session state is never touched from two places
//! at once.

use super::{config::Config, error::ShardInitErrorType, Events};
use crate::{
    compression::Inflater,
    conn::Conn,
    event::{is_fatal_close_code, BackgroundError, Connecting, DispatchEvent, Disconnected, Event, GatewayEvent, OpCode, Reconnecting},
    heartbeat::{self, HeartbeaterStop},
    json,
    payload::{Heartbeat, Identify, IdentifyInfo, Resume},
    ratelimit::{CommandRatelimiter, DialRatelimiter},
    session::Session,
    stage::Stage,
};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_tungstenite::tungstenite::Message;

/// Default function computing the delay before reconnect attempt number
/// `try_` (0-indexed): `4 + 2*try_` seconds, per §4.4 step 2.
fn default_backoff(try_: u32) -> std::time::Duration {
    std::time::Duration::from_secs(4 + 2 * u64::from(try_))
}

/// Maximum number of consecutive reconnect attempts before giving up.
/// `0` means unlimited; the default matches the teacher's choice of a
/// generous but finite cap so a permanently unreachable gateway doesn't
/// spin forever.
const DEFAULT_MAX_RETRIES: u32 = 0;

/// Handle to a running shard: send commands into it, or drop it to
/// request a (graceful, by default) shutdown.
pub struct Shard {
    session: Arc<Session>,
    commands: mpsc::UnboundedSender<Message>,
    shutdown: Arc<tokio::sync::Notify>,
    shard_id: u64,
    command_ratelimiter: Arc<AsyncMutex<Option<Arc<CommandRatelimiter>>>>,
}

impl Shard {
    #[must_use]
    pub fn builder(token: impl Into<String>, intents: crate::intents::Intents) -> super::ShardBuilder {
        super::ShardBuilder::new(token, intents)
    }

    /// Current connection stage.
    #[must_use]
    pub fn stage(&self) -> Stage {
        self.session.stage()
    }

    /// Latency of the most recent heartbeat/ack round trip.
    #[must_use]
    pub fn latency(&self) -> crate::session::Latency {
        self.session.latency()
    }

    /// Send a raw opcode frame, subject to the send ratelimiter (§4.3,
    /// P5). Used internally by the facade's command methods; exposed so
    /// a caller can send payloads this crate doesn't model.
    pub async fn command(&self, op: OpCode, payload: &impl serde::Serialize) -> Result<(), CommandError> {
        let bytes = json::encode(op, payload).map_err(CommandError::Serializing)?;

        if let Some(limiter) = self.command_ratelimiter.lock().await.clone() {
            limiter.acquire_one().await;
        }

        self.commands
            .send(Message::Text(String::from_utf8(bytes).expect("json is valid utf8")))
            .map_err(|_| CommandError::ShardClosed)
    }

    /// Send a frame under an opcode this crate doesn't otherwise model,
    /// such as the undocumented guild-subscribe op whose exact shape
    /// can't be committed to without verifying against a live server.
    /// Subject to the same send ratelimiter as [`Shard::command`].
    pub async fn command_raw(&self, op: u8, payload: &impl serde::Serialize) -> Result<(), CommandError> {
        #[derive(serde::Serialize)]
        struct Frame<'a, T> {
            op: u8,
            d: &'a T,
        }

        let bytes = serde_json::to_vec(&Frame { op, d: payload }).map_err(CommandError::Serializing)?;

        if let Some(limiter) = self.command_ratelimiter.lock().await.clone() {
            limiter.acquire_one().await;
        }

        self.commands
            .send(Message::Text(String::from_utf8(bytes).expect("json is valid utf8")))
            .map_err(|_| CommandError::ShardClosed)
    }

    /// Request shutdown. The engine finalizes (gracefully, unless the
    /// builder disabled it) and its event stream closes shortly after.
    pub fn shutdown(&self) {
        self.session.stop_heartbeater();
        self.shutdown.notify_one();
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.shard_id
    }
}

/// Reasons a [`CommandError`] can be returned from [`Shard::command`].
#[derive(Debug)]
pub enum CommandError {
    Serializing(serde_json::Error),
    ShardClosed,
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Serializing(_) => f.write_str("failed to serialize command payload"),
            Self::ShardClosed => f.write_str("shard's connection is no longer running"),
        }
    }
}

impl std::error::Error for CommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Serializing(source) => Some(source),
            Self::ShardClosed => None,
        }
    }
}

/// Build a [`Shard`] handle and spawn its event loop task.
pub(crate) fn spawn(config: Config) -> (Shard, Events) {
    let session = Arc::new(Session::new());
    let (event_tx, event_rx) = mpsc::channel(1);
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let shutdown = Arc::new(tokio::sync::Notify::new());
    let command_ratelimiter = Arc::new(AsyncMutex::new(None));

    let shard = Shard {
        session: Arc::clone(&session),
        commands: command_tx,
        shutdown: Arc::clone(&shutdown),
        shard_id: config.shard[0],
        command_ratelimiter: Arc::clone(&command_ratelimiter),
    };

    tokio::spawn(run(config, session, event_tx, command_rx, shutdown, command_ratelimiter));

    (shard, Events::new(event_rx))
}

struct Loop {
    config: Config,
    session: Arc<Session>,
    events: mpsc::Sender<Event>,
    commands: mpsc::UnboundedReceiver<Message>,
    shutdown: Arc<tokio::sync::Notify>,
    command_ratelimiter: Arc<AsyncMutex<Option<Arc<CommandRatelimiter>>>>,
    dial_ratelimiter: DialRatelimiter,
    conn: Option<Arc<Conn>>,
    inflater: Inflater,
    heartbeater: Option<tokio::task::JoinHandle<HeartbeaterStop>>,
    reconnect_attempts: u32,
}

async fn run(
    config: Config,
    session: Arc<Session>,
    events: mpsc::Sender<Event>,
    commands: mpsc::UnboundedReceiver<Message>,
    shutdown: Arc<tokio::sync::Notify>,
    command_ratelimiter: Arc<AsyncMutex<Option<Arc<CommandRatelimiter>>>>,
) {
    let shard_id = config.shard[0];

    let mut state = Loop {
        config,
        session,
        events,
        commands,
        shutdown,
        command_ratelimiter,
        dial_ratelimiter: DialRatelimiter::new(),
        conn: None,
        inflater: Inflater::new(),
        heartbeater: None,
        reconnect_attempts: 0,
    };

    if let Err(err) = state.connect_loop().await {
        tracing::warn!(shard.id = shard_id, error = %err, "shard exited");
    }

    state.finalize().await;
}

impl Loop {
    /// Top-level retry loop: (re)establish a connection, then drive it
    /// until it breaks, reconnecting with backoff until a fatal close or
    /// the retry cap is hit.
    async fn connect_loop(&mut self) -> Result<(), super::error::ShardInitError> {
        loop {
            let handshake_result = if self.session.id().is_some() {
                self.handshake_resume().await
            } else {
                self.handshake_initial().await
            };

            match handshake_result {
                Ok(()) => {
                    self.reconnect_attempts = 0;
                }
                Err(HandshakeOutcome::Fatal(code)) => {
                    self.emit_close(code, None).await;
                    return Err(super::error::ShardInitError::bare(
                        ShardInitErrorType::FatalClose { code },
                    ));
                }
                Err(HandshakeOutcome::Retry) => {
                    if !self.backoff_and_continue().await {
                        return Err(super::error::ShardInitError::bare(
                            ShardInitErrorType::RetriesExhausted,
                        ));
                    }
                    continue;
                }
            }

            match self.steady_state().await {
                SteadyStateExit::Shutdown => return Ok(()),
                SteadyStateExit::Fatal(code) => {
                    self.emit_close(code, None).await;
                    return Err(super::error::ShardInitError::bare(
                        ShardInitErrorType::FatalClose { code },
                    ));
                }
                SteadyStateExit::Reconnect => {
                    if !self.backoff_and_continue().await {
                        return Err(super::error::ShardInitError::bare(
                            ShardInitErrorType::RetriesExhausted,
                        ));
                    }
                }
            }
        }
    }

    async fn backoff_and_continue(&mut self) -> bool {
        if self.conn.take().is_some() {
            // Already broken; tear down without attempting a graceful close.
        }

        self.session.set_stage(Stage::Disconnected);
        let _ = self.events.send(Event::ShardReconnecting(Reconnecting { shard_id: self.config.shard[0] })).await;

        let cap = DEFAULT_MAX_RETRIES;
        if cap != 0 && self.reconnect_attempts >= cap {
            return false;
        }

        let delay = default_backoff(self.reconnect_attempts);
        self.reconnect_attempts += 1;
        tokio::time::sleep(delay).await;
        true
    }

    async fn dial(&mut self, url: &str) -> Result<(), HandshakeOutcome> {
        self.dial_ratelimiter.acquire_one().await;

        let _ = self
            .events
            .send(Event::ShardConnecting(Connecting {
                gateway: url.to_owned(),
                shard_id: self.config.shard[0],
            }))
            .await;

        self.session.set_stage(Stage::Handshaking);
        self.inflater.reset();

        let query_url = build_url(url, self.config.compression);
        let conn = Conn::connect(&query_url)
            .await
            .map_err(|_| HandshakeOutcome::Retry)?;

        self.conn = Some(Arc::new(conn));
        Ok(())
    }

    /// §4.4, "Handshake, initial".
    async fn handshake_initial(&mut self) -> Result<(), HandshakeOutcome> {
        let url = self.config.gateway_url.clone();
        self.dial(&url).await?;

        let hello = self.expect_hello().await?;
        self.session.set_heartbeat_interval(hello.heartbeat_interval);
        self.restart_heartbeater();

        self.config.queue.request(self.config.shard).await;
        self.session.set_stage(Stage::Identifying);
        self.session.reset_seq();

        let info = IdentifyInfo {
            token: self.config.token.to_string(),
            properties: self
                .config
                .identify_properties
                .clone()
                .unwrap_or_else(default_identify_properties),
            compress: false,
            large_threshold: self.config.large_threshold,
            shard: Some(self.config.shard),
            presence: self.config.presence.clone(),
            intents: self.config.intents,
        };
        self.send_raw(OpCode::Identify, &Identify::new(info)).await?;

        self.expect_ready().await
    }

    /// §4.4, "Handshake, resume".
    async fn handshake_resume(&mut self) -> Result<(), HandshakeOutcome> {
        let url = self
            .session
            .resume_gateway_url()
            .unwrap_or_else(|| self.config.gateway_url.to_string());
        self.dial(&url).await?;

        let hello = self.expect_hello().await?;
        self.session.set_heartbeat_interval(hello.heartbeat_interval);
        self.restart_heartbeater();

        self.session.set_stage(Stage::Resuming);
        let session_id = self.session.id().expect("resume handshake requires a session id");
        let resume = Resume::new(self.session.seq(), session_id, self.config.token.to_string());
        self.send_raw(OpCode::Resume, &resume).await?;

        loop {
            match self.next_event().await? {
                Some(GatewayEvent::Dispatch(seq, dispatch)) => {
                    self.session.set_seq(seq);
                    if matches!(*dispatch, DispatchEvent::Resumed) {
                        self.session.set_stage(Stage::Connected);
                        let _ = self
                            .events
                            .send(Event::ShardConnected {
                                shard_id: self.config.shard[0],
                                heartbeat_interval: self.session.heartbeat_interval(),
                            })
                            .await;
                        let _ = self.events.send(Event::Resumed).await;
                        return Ok(());
                    }
                    // Any other dispatch mid-resume (rare) is just forwarded.
                    self.forward_dispatch(seq, *dispatch).await;
                }
                Some(GatewayEvent::InvalidateSession(resumable)) => {
                    if resumable {
                        let jitter = std::time::Duration::from_millis(
                            1_000 + u64::from(rand::random::<u16>()) % 4_000,
                        );
                        tokio::time::sleep(jitter).await;
                        return self.handshake_resume_retry().await;
                    }

                    self.session.clear_id();
                    return self.handshake_initial().await;
                }
                Some(GatewayEvent::HeartbeatAck) => {
                    self.session.heartbeats().record_ack();
                }
                Some(_) => {}
                None => return Err(HandshakeOutcome::Retry),
            }
        }
    }

    async fn handshake_resume_retry(&mut self) -> Result<(), HandshakeOutcome> {
        // Re-dial and resend Resume against the same session id/seq.
        Box::pin(self.handshake_resume()).await
    }

    async fn expect_hello(&mut self) -> Result<crate::payload::Hello, HandshakeOutcome> {
        match self.next_event().await? {
            Some(GatewayEvent::Hello(hello)) => Ok(hello),
            Some(_) | None => Err(HandshakeOutcome::Retry),
        }
    }

    async fn expect_ready(&mut self) -> Result<(), HandshakeOutcome> {
        loop {
            match self.next_event().await? {
                Some(GatewayEvent::Dispatch(seq, dispatch)) => {
                    self.session.set_seq(seq);
                    if let DispatchEvent::Ready(ready) = *dispatch {
                        self.session.set_id(ready.session_id.clone());
                        self.session.set_resume_gateway_url(ready.resume_gateway_url.clone());
                        self.session.set_stage(Stage::Connected);
                        self.command_ratelimiter
                            .lock()
                            .await
                            .replace(Arc::new(CommandRatelimiter::new(self.session.heartbeat_interval())));
                        let _ = self
                            .events
                            .send(Event::ShardConnected {
                                shard_id: self.config.shard[0],
                                heartbeat_interval: self.session.heartbeat_interval(),
                            })
                            .await;
                        let _ = self.events.send(Event::Ready(ready)).await;
                        return Ok(());
                    }
                }
                Some(GatewayEvent::InvalidateSession(_)) => return Err(HandshakeOutcome::Retry),
                Some(_) => {}
                None => return Err(HandshakeOutcome::Retry),
            }
        }
    }

    /// §4.4, "Steady state".
    async fn steady_state(&mut self) -> SteadyStateExit {
        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    return SteadyStateExit::Shutdown;
                }

                stop = wait_heartbeater(&mut self.heartbeater) => {
                    match stop {
                        HeartbeaterStop::AckTimeout => {
                            tracing::warn!(shard.id = self.config.shard[0], "missed two heartbeat acks, reconnecting");
                            return SteadyStateExit::Reconnect;
                        }
                        HeartbeaterStop::Shutdown | HeartbeaterStop::ChannelClosed => {
                            continue;
                        }
                    }
                }

                outbound = self.commands.recv() => {
                    match outbound {
                        Some(message) => {
                            if let Some(conn) = self.conn.clone() {
                                if conn.send(message).await.is_err() {
                                    return SteadyStateExit::Reconnect;
                                }
                            }
                        }
                        None => continue,
                    }
                }

                event = next_raw(self.conn.clone(), &mut self.inflater) => {
                    match event {
                        Ok(Some(raw)) => {
                            match json::decode(&raw) {
                                Ok(gateway_event) => {
                                    if let Some(exit) = self.handle_gateway_event(gateway_event).await {
                                        return exit;
                                    }
                                }
                                Err(source) => {
                                    let _ = self.events.send(Event::BackgroundError(BackgroundError {
                                        shard_id: self.config.shard[0],
                                        message: source.to_string(),
                                    })).await;
                                }
                            }
                        }
                        Ok(None) => return SteadyStateExit::Reconnect,
                        Err(CloseOutcome::Fatal(code)) => return SteadyStateExit::Fatal(code),
                        Err(CloseOutcome::Retry) => return SteadyStateExit::Reconnect,
                    }
                }
            }
        }
    }

    async fn handle_gateway_event(&mut self, event: GatewayEvent) -> Option<SteadyStateExit> {
        match event {
            GatewayEvent::Dispatch(seq, dispatch) => {
                self.session.set_seq(seq);
                self.forward_dispatch(seq, *dispatch).await;
                None
            }
            GatewayEvent::Heartbeat(_) => {
                let heartbeat = Heartbeat::new(self.session.seq());
                let _ = self.send_raw(OpCode::Heartbeat, &heartbeat).await;
                None
            }
            GatewayEvent::HeartbeatAck => {
                self.session.heartbeats().record_ack();
                None
            }
            GatewayEvent::Reconnect => Some(SteadyStateExit::Reconnect),
            GatewayEvent::InvalidateSession(_) => Some(SteadyStateExit::Reconnect),
            GatewayEvent::Hello(_) => None,
        }
    }

    async fn forward_dispatch(&mut self, _seq: u64, dispatch: DispatchEvent) {
        let event_types = self.config.event_types;
        let event = match dispatch {
            DispatchEvent::Ready(ready) => Event::Ready(ready),
            DispatchEvent::Resumed => Event::Resumed,
            DispatchEvent::Other { event_type, raw_type, value } => {
                if !event_types.contains(event_type.into()) {
                    return;
                }
                Event::Unknown { event_type: raw_type, value }
            }
        };

        let _ = self.events.send(event).await;
    }

    async fn emit_close(&mut self, code: u16, reason: Option<String>) {
        let _ = self
            .events
            .send(Event::Close {
                shard_id: self.config.shard[0],
                code,
                reason,
            })
            .await;
    }

    /// Drains the websocket until either a gateway-level event decodes
    /// or the socket closes/errors.
    async fn next_event(&mut self) -> Result<Option<GatewayEvent>, CloseOutcome> {
        loop {
            match next_raw(self.conn.clone(), &mut self.inflater).await? {
                Some(raw) => match json::decode(&raw) {
                    Ok(event) => return Ok(Some(event)),
                    Err(_) => continue,
                },
                None => return Ok(None),
            }
        }
    }

    async fn send_raw(&mut self, op: OpCode, payload: &impl serde::Serialize) -> Result<(), HandshakeOutcome> {
        let Some(conn) = self.conn.clone() else {
            return Err(HandshakeOutcome::Retry);
        };

        let bytes = json::encode(op, payload).map_err(|_| HandshakeOutcome::Retry)?;
        conn.send(Message::Text(String::from_utf8(bytes).expect("json is utf8")))
            .await
            .map_err(|_| HandshakeOutcome::Retry)
    }

    fn restart_heartbeater(&mut self) {
        if let Some(handle) = self.heartbeater.take() {
            handle.abort();
        }

        self.session.stop_heartbeater();

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
        let conn = self.conn.clone();
        tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                if let Some(conn) = &conn {
                    let _ = conn.send(message).await;
                }
            }
        });

        self.heartbeater = Some(heartbeat::spawn(Arc::clone(&self.session), outbound_tx));
    }

    async fn finalize(&mut self) {
        if let Some(handle) = self.heartbeater.take() {
            handle.abort();
        }

        if let Some(conn) = self.conn.take() {
            if self.config.graceful_close {
                conn.close(Some(1000), "shard shutting down".to_owned()).await;
            }
        }

        self.session.set_stage(Stage::Disconnected);
        let _ = self
            .events
            .send(Event::ShardDisconnected(Disconnected {
                code: None,
                reason: None,
                shard_id: self.config.shard[0],
            }))
            .await;
    }
}

/// Read the next already-decompressed message off `conn`, feeding any
/// binary frames through `inflater` first.
///
/// A free function (rather than a method) so it only borrows the two
/// fields it needs, letting it live alongside other `&mut self.field`
/// borrows inside the same `select!`.
async fn next_raw(conn: Option<Arc<Conn>>, inflater: &mut Inflater) -> Result<Option<Vec<u8>>, CloseOutcome> {
    let Some(conn) = conn else {
        return Ok(None);
    };

    loop {
        match conn.next().await {
            Some(Ok(Message::Text(text))) => return Ok(Some(text.into_bytes())),
            Some(Ok(Message::Binary(bytes))) => {
                inflater.extend(&bytes);
                match inflater.msg() {
                    Ok(Some(decompressed)) => return Ok(Some(decompressed.to_vec())),
                    Ok(None) => continue,
                    Err(_) => continue,
                }
            }
            Some(Ok(Message::Close(frame))) => {
                let code = frame.map_or(1000, |f| u16::from(f.code));
                if is_fatal_close_code(code) {
                    return Err(CloseOutcome::Fatal(code));
                }
                return Err(CloseOutcome::Retry);
            }
            Some(Ok(_)) => continue,
            Some(Err(_)) => return Err(CloseOutcome::Retry),
            None => return Ok(None),
        }
    }
}

/// Await the heartbeater's exit reason, taking its handle out of the
/// slot so it's never polled again once finished; stays pending forever
/// while no heartbeater is running (e.g. mid-handshake).
async fn wait_heartbeater(slot: &mut Option<tokio::task::JoinHandle<HeartbeaterStop>>) -> HeartbeaterStop {
    let Some(handle) = slot else {
        return std::future::pending().await;
    };

    let result = handle.await;
    *slot = None;
    result.unwrap_or(HeartbeaterStop::ChannelClosed)
}

enum HandshakeOutcome {
    Retry,
    Fatal(u16),
}

enum SteadyStateExit {
    Shutdown,
    Reconnect,
    Fatal(u16),
}

enum CloseOutcome {
    Retry,
    Fatal(u16),
}

impl From<CloseOutcome> for HandshakeOutcome {
    fn from(outcome: CloseOutcome) -> Self {
        match outcome {
            CloseOutcome::Retry => Self::Retry,
            CloseOutcome::Fatal(code) => Self::Fatal(code),
        }
    }
}

fn build_url(base: &str, compression: bool) -> String {
    let mut url = format!("{base}?v=10&encoding=json");
    if compression {
        url.push_str("&compress=zlib-stream");
    }
    url
}

fn default_identify_properties() -> crate::payload::IdentifyProperties {
    crate::payload::IdentifyProperties::new("corvus-gateway", "corvus-gateway", std::env::consts::OS)
}
