use super::{config::Config, engine, Shard};
use crate::{
    event::EventTypeFlags,
    intents::Intents,
    payload::{IdentifyProperties, UpdatePresence},
};
use corvus_gateway_queue::{LocalQueue, Queue};
use std::{
    error::Error,
    fmt::{Display, Formatter, Result as FmtResult},
    sync::Arc,
};

const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg";

/// Large threshold configuration is invalid.
#[derive(Debug)]
pub struct LargeThresholdError {
    kind: LargeThresholdErrorType,
}

impl LargeThresholdError {
    #[must_use]
    pub const fn kind(&self) -> &LargeThresholdErrorType {
        &self.kind
    }
}

/// Type of [`LargeThresholdError`] that occurred.
#[derive(Debug)]
#[non_exhaustive]
pub enum LargeThresholdErrorType {
    TooFew { value: u64 },
    TooMany { value: u64 },
}

impl Display for LargeThresholdError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match &self.kind {
            LargeThresholdErrorType::TooFew { .. } => {
                f.write_str("large threshold must be at least 50")
            }
            LargeThresholdErrorType::TooMany { .. } => {
                f.write_str("large threshold must be at most 250")
            }
        }
    }
}

impl Error for LargeThresholdError {}

/// Shard ID configuration is invalid.
#[derive(Debug)]
pub struct ShardIdError {
    kind: ShardIdErrorType,
}

impl ShardIdError {
    #[must_use]
    pub const fn kind(&self) -> &ShardIdErrorType {
        &self.kind
    }
}

/// Type of [`ShardIdError`] that occurred.
#[derive(Debug)]
#[non_exhaustive]
pub enum ShardIdErrorType {
    IdTooLarge { id: u64, total: u64 },
}

impl Display for ShardIdError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match &self.kind {
            ShardIdErrorType::IdTooLarge { id, total } => {
                write!(f, "shard id {id} is not less than the shard total {total}")
            }
        }
    }
}

impl Error for ShardIdError {}

/// Builder to configure and construct a [`Shard`].
///
/// Programmer-misuse configuration (an out-of-range large threshold, a
/// shard id not less than the shard total) fails synchronously here
/// rather than once the engine is already running (§7).
#[derive(Clone, Debug)]
pub struct ShardBuilder(pub(crate) Config);

impl ShardBuilder {
    #[must_use]
    pub fn new(token: impl Into<String>, intents: Intents) -> Self {
        let mut token = token.into();
        if !token.starts_with("Bot ") {
            token.insert_str(0, "Bot ");
        }

        Self(Config {
            token: token.into_boxed_str(),
            intents,
            event_types: EventTypeFlags::default(),
            gateway_url: DEFAULT_GATEWAY_URL.into(),
            identify_properties: None,
            large_threshold: 250,
            presence: None,
            queue: Arc::new(LocalQueue::new()),
            shard: [0, 1],
            compression: true,
            graceful_close: true,
        })
    }

    /// Consume the builder, producing a [`Shard`] and its event stream.
    #[must_use]
    pub fn build(self) -> (Shard, crate::shard::Events) {
        engine::spawn(self.0)
    }

    #[must_use]
    pub fn event_types(mut self, event_types: EventTypeFlags) -> Self {
        self.0.event_types = event_types;
        self
    }

    #[must_use]
    pub fn gateway_url(mut self, url: impl Into<String>) -> Self {
        self.0.gateway_url = url.into().into_boxed_str();
        self
    }

    #[must_use]
    pub fn identify_properties(mut self, properties: IdentifyProperties) -> Self {
        self.0.identify_properties = Some(properties);
        self
    }

    /// Default `250`; valid range is `50..=250`.
    pub fn large_threshold(mut self, large_threshold: u64) -> Result<Self, LargeThresholdError> {
        match large_threshold {
            0..=49 => {
                return Err(LargeThresholdError {
                    kind: LargeThresholdErrorType::TooFew {
                        value: large_threshold,
                    },
                })
            }
            50..=250 => {}
            _ => {
                return Err(LargeThresholdError {
                    kind: LargeThresholdErrorType::TooMany {
                        value: large_threshold,
                    },
                })
            }
        }

        self.0.large_threshold = large_threshold;
        Ok(self)
    }

    #[must_use]
    pub fn presence(mut self, presence: UpdatePresence) -> Self {
        self.0.presence = Some(presence);
        self
    }

    /// Set the queue used to serialize identifies. A [`Shard`] managed by
    /// a [`crate::cluster::Cluster`] gets its queue set for it.
    #[must_use]
    pub fn queue(mut self, queue: Arc<dyn Queue>) -> Self {
        self.0.queue = queue;
        self
    }

    /// Set the shard id and shard total. `shard_id` is 0-indexed,
    /// `shard_total` is 1-indexed; the default is `(0, 1)`.
    pub fn shard(mut self, shard_id: u64, shard_total: u64) -> Result<Self, ShardIdError> {
        if shard_id >= shard_total {
            return Err(ShardIdError {
                kind: ShardIdErrorType::IdTooLarge {
                    id: shard_id,
                    total: shard_total,
                },
            });
        }

        self.0.shard = [shard_id, shard_total];
        Ok(self)
    }

    /// Disable compression of the gateway transport. Enabled by default.
    #[must_use]
    pub fn compression(mut self, compression: bool) -> Self {
        self.0.compression = compression;
        self
    }

    /// Whether to attempt a graceful close (send a close frame, wait up
    /// to 5s) on finalization. Default `true`.
    #[must_use]
    pub fn graceful_close(mut self, graceful_close: bool) -> Self {
        self.0.graceful_close = graceful_close;
        self
    }
}

impl<T: Into<String>> From<(T, Intents)> for ShardBuilder {
    fn from((token, intents): (T, Intents)) -> Self {
        Self::new(token, intents)
    }
}

#[cfg(test)]
mod tests {
    use super::{LargeThresholdError, ShardBuilder, ShardIdError};
    use crate::intents::Intents;
    use static_assertions::assert_impl_all;
    use std::{error::Error, fmt::Debug};

    assert_impl_all!(LargeThresholdError: Error, Send, Sync);
    assert_impl_all!(ShardIdError: Error, Send, Sync);
    assert_impl_all!(ShardBuilder: Clone, Debug, Send, Sync);

    #[test]
    fn rejects_large_threshold_outside_50_to_250() {
        let builder = ShardBuilder::new("token", Intents::empty());
        assert!(builder.clone().large_threshold(10).is_err());
        assert!(builder.clone().large_threshold(251).is_err());
        assert!(builder.large_threshold(50).is_ok());
    }

    #[test]
    fn rejects_shard_id_not_less_than_total() {
        let builder = ShardBuilder::new("token", Intents::empty());
        assert!(builder.clone().shard(5, 5).is_err());
        assert!(builder.shard(4, 5).is_ok());
    }

    #[test]
    fn prefixes_token_with_bot() {
        let builder = ShardBuilder::new("abc", Intents::empty());
        assert_eq!("Bot abc", &*builder.0.token);
    }
}
