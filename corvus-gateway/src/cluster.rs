//! The Shard Manager (§4.7): owns one engine per shard id, merges their
//! event streams into one, and routes outbound commands and guild
//! traffic to the engine responsible for them.
//!
//! Automatic shard-count discovery ("Auto" scheme) is out of scope here:
//! it requires an authenticated REST call to `/gateway/bot`, and REST is
//! an external collaborator per the crate's scope (§1). A caller who
//! wants that still gets it: supply the count up front, or wire a
//! [`RescaleHook`] that does the REST call itself and returns the new
//! total when a "sharding required" close arrives.

use crate::{
    event::{Event, EventTypeFlags, OpCode},
    intents::Intents,
    payload::{IdentifyProperties, UpdatePresence},
    shard::{CommandError, Shard, ShardBuilder},
};
use corvus_gateway_queue::{LocalQueue, Queue};
use dashmap::{mapref::one::Ref, DashMap};
use futures_util::{
    future::BoxFuture,
    stream::{BoxStream, SelectAll, Stream, StreamExt},
};
use std::{
    error::Error,
    fmt::{Display, Formatter, Result as FmtResult},
    pin::Pin,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    task::{Context, Poll},
};
use tokio::sync::{mpsc, Mutex as AsyncMutex};

/// A hook invoked when a shard closes with the "sharding required" code,
/// returning the new shard total to rescale to.
pub type RescaleHook = Arc<dyn Fn() -> BoxFuture<'static, u64> + Send + Sync>;

/// Sending a command to a managed shard failed.
#[derive(Debug)]
pub enum ClusterCommandError {
    /// The shard exists, but sending through it failed.
    Sending { source: CommandError },
    /// No shard with this id is managed by the cluster.
    ShardNonexistent { id: u64 },
}

impl Display for ClusterCommandError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Sending { source } => Display::fmt(source, f),
            Self::ShardNonexistent { id } => write!(f, "shard {id} is not managed by this cluster"),
        }
    }
}

impl Error for ClusterCommandError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sending { source } => Some(source),
            Self::ShardNonexistent { .. } => None,
        }
    }
}

/// Builds a [`Cluster`]. Mirrors [`ShardBuilder`]'s shape; settings here
/// apply to every shard the cluster manages.
pub struct ClusterBuilder {
    token: Box<str>,
    intents: Intents,
    shard_total: u64,
    event_types: EventTypeFlags,
    queue: Arc<dyn Queue>,
    presence: Option<UpdatePresence>,
    identify_properties: Option<IdentifyProperties>,
    compression: bool,
    rescale_hook: Option<RescaleHook>,
}

impl ClusterBuilder {
    #[must_use]
    pub fn new(token: impl Into<String>, intents: Intents) -> Self {
        Self {
            token: token.into().into_boxed_str(),
            intents,
            shard_total: 1,
            event_types: EventTypeFlags::default(),
            queue: Arc::new(LocalQueue::new()),
            presence: None,
            identify_properties: None,
            compression: true,
            rescale_hook: None,
        }
    }

    /// Number of shards to bring up. Default `1`.
    #[must_use]
    pub fn shard_total(mut self, shard_total: u64) -> Self {
        self.shard_total = shard_total.max(1);
        self
    }

    #[must_use]
    pub fn event_types(mut self, event_types: EventTypeFlags) -> Self {
        self.event_types = event_types;
        self
    }

    /// Share one queue across every shard so identifies are serialized
    /// cluster-wide rather than per shard.
    #[must_use]
    pub fn queue(mut self, queue: Arc<dyn Queue>) -> Self {
        self.queue = queue;
        self
    }

    #[must_use]
    pub fn presence(mut self, presence: UpdatePresence) -> Self {
        self.presence = Some(presence);
        self
    }

    #[must_use]
    pub fn identify_properties(mut self, properties: IdentifyProperties) -> Self {
        self.identify_properties = Some(properties);
        self
    }

    #[must_use]
    pub fn compression(mut self, compression: bool) -> Self {
        self.compression = compression;
        self
    }

    /// Install the hook consulted when a managed shard closes with the
    /// "sharding required" code. Without one, that close is still
    /// forwarded through [`Cluster::events`] but no rescale happens.
    #[must_use]
    pub fn rescale_hook(mut self, hook: RescaleHook) -> Self {
        self.rescale_hook = Some(hook);
        self
    }

    #[must_use]
    pub fn build(self) -> Cluster {
        let (events_tx, events_rx) = mpsc::channel(64);

        Cluster(Arc::new(ClusterRef {
            token: self.token,
            intents: self.intents,
            event_types: self.event_types,
            queue: self.queue,
            presence: self.presence,
            identify_properties: self.identify_properties,
            compression: self.compression,
            rescale_hook: self.rescale_hook,
            shard_total: AtomicU64::new(self.shard_total),
            shards: DashMap::new(),
            events_tx,
            events_rx: AsyncMutex::new(Some(events_rx)),
            rescaling: AtomicBool::new(false),
        }))
    }
}

struct ClusterRef {
    token: Box<str>,
    intents: Intents,
    event_types: EventTypeFlags,
    queue: Arc<dyn Queue>,
    presence: Option<UpdatePresence>,
    identify_properties: Option<IdentifyProperties>,
    compression: bool,
    rescale_hook: Option<RescaleHook>,
    shard_total: AtomicU64,
    shards: DashMap<u64, Shard>,
    events_tx: mpsc::Sender<(u64, Event)>,
    events_rx: AsyncMutex<Option<mpsc::Receiver<(u64, Event)>>>,
    rescaling: AtomicBool,
}

/// A manager for multiple shards, cheaply cloneable (every clone points
/// at the same underlying cluster, same as [`Shard`] is a handle rather
/// than the engine itself).
#[derive(Clone)]
pub struct Cluster(Arc<ClusterRef>);

impl Cluster {
    #[must_use]
    pub fn builder(token: impl Into<String>, intents: Intents) -> ClusterBuilder {
        ClusterBuilder::new(token, intents)
    }

    #[must_use]
    pub fn shard_total(&self) -> u64 {
        self.0.shard_total.load(Ordering::SeqCst)
    }

    /// Start every shard `0..shard_total` and begin merging their event
    /// streams. Calling this again after a manual [`Cluster::down`]
    /// restarts the whole shard set.
    pub async fn up(&self) {
        Self::spawn_shard_set(Arc::clone(&self.0)).await;
    }

    /// Request shutdown of every managed shard. Their engines finalize
    /// asynchronously; [`Cluster::events`] observes each shard's stream
    /// ending in turn.
    pub fn down(&self) {
        for entry in self.0.shards.iter() {
            entry.value().shutdown();
        }
    }

    /// Borrow the handle for a single managed shard.
    #[must_use]
    pub fn shard(&self, id: u64) -> Option<Ref<'_, u64, Shard>> {
        self.0.shards.get(&id)
    }

    /// Send a raw opcode frame to the shard managing `id`.
    pub async fn command(&self, id: u64, op: OpCode, payload: &impl serde::Serialize) -> Result<(), ClusterCommandError> {
        let shard = self
            .0
            .shards
            .get(&id)
            .ok_or(ClusterCommandError::ShardNonexistent { id })?;
        shard.command(op, payload).await.map_err(|source| ClusterCommandError::Sending { source })
    }

    /// Send a raw opcode frame to the shard responsible for `guild_id`,
    /// per the `(guildID >> 22) mod shardTotal` assignment rule (§3).
    pub async fn command_for_guild(&self, guild_id: u64, op: OpCode, payload: &impl serde::Serialize) -> Result<(), ClusterCommandError> {
        self.command(self.shard_id_for_guild(guild_id), op, payload).await
    }

    /// Shard id responsible for `guild_id` under the current shard total.
    #[must_use]
    pub fn shard_id_for_guild(&self, guild_id: u64) -> u64 {
        (guild_id >> 22) % self.shard_total().max(1)
    }

    /// Take the merged `(shard_id, event)` stream. May only be called
    /// once per `up()`/rescale cycle; a second call panics, matching a
    /// single-consumer output channel elsewhere in this crate.
    pub async fn events(&self) -> ClusterEvents {
        let rx = self
            .0
            .events_rx
            .lock()
            .await
            .take()
            .expect("cluster events were already taken");
        ClusterEvents { rx }
    }

    async fn spawn_shard_set(cluster_ref: Arc<ClusterRef>) {
        let total = cluster_ref.shard_total.load(Ordering::SeqCst);
        let mut streams: Vec<BoxStream<'static, (u64, Event)>> = Vec::with_capacity(total as usize);

        for id in 0..total {
            let mut builder = ShardBuilder::new(cluster_ref.token.to_string(), cluster_ref.intents)
                .event_types(cluster_ref.event_types)
                .queue(Arc::clone(&cluster_ref.queue))
                .compression(cluster_ref.compression)
                .shard(id, total)
                .expect("id < total by construction of this loop");

            if let Some(presence) = cluster_ref.presence.clone() {
                builder = builder.presence(presence);
            }
            if let Some(properties) = cluster_ref.identify_properties.clone() {
                builder = builder.identify_properties(properties);
            }

            let (shard, events) = builder.build();
            cluster_ref.shards.insert(id, shard);
            streams.push(events.map(move |event| (id, event)).boxed());
        }

        let mut merged = SelectAll::from_iter(streams);
        let tx = cluster_ref.events_tx.clone();
        let watcher_ref = Arc::clone(&cluster_ref);

        tokio::spawn(async move {
            while let Some((id, event)) = merged.next().await {
                if matches!(event, Event::Close { code: 4011, .. }) {
                    Self::maybe_rescale(Arc::clone(&watcher_ref));
                }
                if tx.send((id, event)).await.is_err() {
                    break;
                }
            }
        });
    }

    /// Attempt one rescale. A no-op if a rescale is already in flight or
    /// no [`RescaleHook`] was configured (§4.7: "executed at most once
    /// concurrently").
    fn maybe_rescale(cluster_ref: Arc<ClusterRef>) {
        if cluster_ref.rescaling.swap(true, Ordering::SeqCst) {
            return;
        }

        let Some(hook) = cluster_ref.rescale_hook.clone() else {
            cluster_ref.rescaling.store(false, Ordering::SeqCst);
            return;
        };

        tokio::spawn(async move {
            let new_total = hook().await.max(1);

            for entry in cluster_ref.shards.iter() {
                entry.value().shutdown();
            }
            cluster_ref.shards.clear();
            cluster_ref.shard_total.store(new_total, Ordering::SeqCst);

            Self::spawn_shard_set(Arc::clone(&cluster_ref)).await;
            cluster_ref.rescaling.store(false, Ordering::SeqCst);
        });
    }
}

/// The merged `(shard_id, event)` stream a [`Cluster`] publishes.
pub struct ClusterEvents {
    rx: mpsc::Receiver<(u64, Event)>,
}

impl ClusterEvents {
    pub async fn next(&mut self) -> Option<(u64, Event)> {
        self.rx.recv().await
    }
}

impl Stream for ClusterEvents {
    type Item = (u64, Event);

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::{Cluster, ClusterCommandError};
    use crate::intents::Intents;
    use static_assertions::assert_impl_all;
    use std::{error::Error, fmt::Debug};

    assert_impl_all!(ClusterCommandError: Error, Send, Sync);
    assert_impl_all!(Cluster: Clone, Send, Sync);

    #[test]
    fn shard_id_for_guild_matches_the_documented_formula() {
        let cluster = Cluster::builder("token", Intents::empty()).shard_total(16).build();

        let guild_id: u64 = 41_771_983_423_143_936;
        assert_eq!((guild_id >> 22) % 16, cluster.shard_id_for_guild(guild_id));
    }

    #[tokio::test]
    async fn command_to_an_unmanaged_shard_is_rejected() {
        let cluster = Cluster::builder("token", Intents::empty()).build();
        let err = cluster.command(0, crate::event::OpCode::Heartbeat, &serde_json::Value::Null).await.unwrap_err();
        assert!(matches!(err, ClusterCommandError::ShardNonexistent { id: 0 }));
    }
}
