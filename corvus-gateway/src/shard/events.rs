//! The stream of [`Event`]s a [`super::Shard`] emits.

use crate::event::Event;
use futures_util::stream::Stream;
use std::{
    pin::Pin,
    task::{Context, Poll},
};
use tokio::sync::mpsc::Receiver;

/// A stream of events from a [`super::Shard`].
///
/// Buffered 1 deep (§4.4): the event loop treats publication as an
/// ordered send and will backpressure on a slow consumer rather than
/// drop events.
pub struct Events {
    rx: Receiver<Event>,
}

impl Events {
    pub(super) fn new(rx: Receiver<Event>) -> Self {
        Self { rx }
    }

    /// Receive the next event, or `None` once the shard has finalized.
    pub async fn next(&mut self) -> Option<Event> {
        self.rx.recv().await
    }
}

impl Stream for Events {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
