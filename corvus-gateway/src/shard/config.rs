use crate::{
    event::EventTypeFlags,
    intents::Intents,
    payload::{IdentifyProperties, UpdatePresence},
};
use corvus_gateway_queue::Queue;
use std::sync::Arc;

/// Resolved configuration a [`super::Shard`] is constructed from.
///
/// Produced by [`super::ShardBuilder`]; not constructed directly.
#[derive(Clone)]
pub(crate) struct Config {
    pub(crate) token: Box<str>,
    pub(crate) intents: Intents,
    pub(crate) event_types: EventTypeFlags,
    pub(crate) gateway_url: Box<str>,
    pub(crate) identify_properties: Option<IdentifyProperties>,
    pub(crate) large_threshold: u64,
    pub(crate) presence: Option<UpdatePresence>,
    pub(crate) queue: Arc<dyn Queue>,
    pub(crate) shard: [u64; 2],
    pub(crate) compression: bool,
    pub(crate) graceful_close: bool,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("intents", &self.intents)
            .field("event_types", &self.event_types)
            .field("gateway_url", &self.gateway_url)
            .field("large_threshold", &self.large_threshold)
            .field("shard", &self.shard)
            .field("compression", &self.compression)
            .field("graceful_close", &self.graceful_close)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::Config;
    use static_assertions::assert_impl_all;

    assert_impl_all!(Config: Clone, Send, Sync);
}
