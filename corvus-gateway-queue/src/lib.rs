//! Queueing for gateway session starts across shards.
//!
//! Discord ratelimits how often an application may start new gateway
//! sessions (`identify`). A single shard can honor this with its own
//! internal rate limiters, but once more than one shard shares a process
//! (or more than one process shares a bot), session starts must be
//! serialized through a single broker so that two shards never dial at
//! once.
//!
//! Most users only need the [`LocalQueue`]: it serializes session starts
//! for every shard running in this process. Bots that run shards across
//! multiple processes need a broker that implements [`Queue`] over some
//! shared medium (IPC, a database, a dedicated queue service); that is
//! outside the scope of this crate.

use std::{fmt::Debug, future::Future, pin::Pin, time::Duration};
use tokio::{
    sync::{mpsc, oneshot},
    time::sleep,
};

/// Minimum spacing between two session starts, per Discord's
/// documented identify ratelimit of 1 per 5 seconds (padded to be safe
/// against clock drift between this process and Discord's).
const IDENTIFY_SPACING: Duration = Duration::from_secs(6);

/// Queue for shards to request permission to start a new gateway session.
///
/// Implementors only need to guarantee that the returned future resolves
/// no sooner than the broker has decided it's this shard's turn; ordering
/// between concurrent callers is otherwise implementation-defined.
pub trait Queue: Debug + Send + Sync {
    /// Request permission to identify.
    ///
    /// The returned future resolves once the caller may proceed with the
    /// identify handshake.
    fn request<'a>(&'a self, shard_id: [u64; 2]) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
}

/// An in-process [`Queue`] that serializes identifies for every shard
/// running in this process.
///
/// # When not to use this
///
/// If shards are split across multiple processes, two `LocalQueue`s in
/// two processes have no way of coordinating with each other and will
/// both believe they're free to identify at the same time. Implement
/// [`Queue`] against a shared broker instead.
#[derive(Clone, Debug)]
pub struct LocalQueue(mpsc::UnboundedSender<oneshot::Sender<()>>);

impl LocalQueue {
    /// Create a new local queue, spawning its background ticker.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(rx));

        Self(tx)
    }
}

impl Default for LocalQueue {
    fn default() -> Self {
        Self::new()
    }
}

async fn run(mut rx: mpsc::UnboundedReceiver<oneshot::Sender<()>>) {
    while let Some(waiter) = rx.recv().await {
        if waiter.send(()).is_err() {
            tracing::debug!("identify waiter dropped before being released");
        }

        sleep(IDENTIFY_SPACING).await;
    }
}

impl Queue for LocalQueue {
    fn request(&self, [id, total]: [u64; 2]) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            let (tx, rx) = oneshot::channel();

            if self.0.send(tx).is_err() {
                tracing::warn!("queue ticker is gone, proceeding unthrottled");
                return;
            }

            tracing::debug!(shard.id = id, shard.total = total, "waiting for identify slot");

            let _ = rx.await;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{LocalQueue, Queue};
    use static_assertions::{assert_impl_all, assert_obj_safe};
    use std::fmt::Debug;

    assert_impl_all!(LocalQueue: Clone, Debug, Queue, Send, Sync);
    assert_impl_all!(dyn Queue: Debug, Send, Sync);
    assert_obj_safe!(Queue);

    #[tokio::test]
    async fn grants_sequentially() {
        let queue = LocalQueue::new();

        queue.request([0, 2]).await;
        queue.request([1, 2]).await;
    }
}
