//! A single connection to the Discord gateway: the [`Shard`] handle,
//! its [`builder`], and the [`Events`] stream it publishes to.

mod builder;
mod config;
mod engine;
pub mod error;
mod events;

pub use builder::{LargeThresholdError, LargeThresholdErrorType, ShardBuilder, ShardIdError, ShardIdErrorType};
pub use engine::{CommandError, Shard};
pub use events::Events;
