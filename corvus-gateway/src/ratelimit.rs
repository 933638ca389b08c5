//! Token-bucket rate limiters guarding the budgets the protocol spec
//! (§4.3) says a shard must respect on its own, without relying on the
//! gateway to enforce them via close codes:
//!
//! - one dial attempt per shard per 5 seconds
//! - 120 outbound commands per shard per 60 seconds, minus headroom kept
//!   for heartbeats (the gateway expects a heartbeat in response to its
//!   own, so twice the heartbeat count is reserved)
//!
//! Identify-global throttling (`max_concurrency` identifies per 5
//! seconds, shared application-wide) is delegated to
//! [`corvus_gateway_queue::Queue`] and intentionally not duplicated here.

use leaky_bucket_lite::LeakyBucket;
use std::time::{Duration, Instant};

/// Interval over which the command bucket resets, in milliseconds.
const RESET_DURATION_MILLISECONDS: u64 = 60_000;

/// Ratelimiter on outbound commands sent over an established connection.
#[derive(Debug)]
pub(crate) struct CommandRatelimiter {
    bucket: LeakyBucket,
}

impl CommandRatelimiter {
    /// Build a limiter sized for the given heartbeat interval: enough
    /// headroom is reserved that a command burst can never starve the
    /// heartbeat.
    pub(crate) fn new(heartbeat_interval: u64) -> Self {
        const REFILL_INTERVAL: Duration = Duration::from_millis(RESET_DURATION_MILLISECONDS);

        let commands_allotted = u32::from(available_commands_per_interval(heartbeat_interval));

        let bucket = LeakyBucket::builder()
            .max(commands_allotted)
            .tokens(commands_allotted)
            .refill_interval(REFILL_INTERVAL)
            .refill_amount(commands_allotted)
            .build();

        Self { bucket }
    }

    /// Number of commands still available within the current interval.
    pub(crate) fn available(&self) -> u32 {
        self.bucket.tokens()
    }

    /// When the bucket will next refill.
    pub(crate) fn next_refill(&self) -> Instant {
        self.bucket.next_refill().into_std()
    }

    /// Wait until a command slot is available.
    ///
    /// Cancellation-safe: dropping the returned future before it
    /// resolves returns the reservation to the bucket.
    pub(crate) async fn acquire_one(&self) {
        self.bucket.acquire_one().await;
    }
}

/// Number of commands to allot per reset period, reserving two slots per
/// expected heartbeat (one for the heartbeat, one in case the gateway
/// asks for an immediate one in reply).
fn available_commands_per_interval(heartbeat_interval: u64) -> u8 {
    const ALLOT_ON_FAIL: u8 = COMMANDS_PER_RESET - 10;
    const COMMANDS_PER_RESET: u8 = 120;

    if heartbeat_interval == 0 {
        return ALLOT_ON_FAIL;
    }

    let mut heartbeats = RESET_DURATION_MILLISECONDS / heartbeat_interval;
    let remainder = RESET_DURATION_MILLISECONDS % heartbeat_interval;

    if remainder > 0 {
        heartbeats = heartbeats.saturating_add(1);
    }

    let heartbeats: u8 = heartbeats.try_into().unwrap_or(ALLOT_ON_FAIL);

    COMMANDS_PER_RESET.saturating_sub(heartbeats * 2)
}

/// Ratelimiter on dial attempts, kept separate from the command budget
/// since it applies before a session even exists.
#[derive(Debug)]
pub(crate) struct DialRatelimiter {
    bucket: LeakyBucket,
}

impl DialRatelimiter {
    pub(crate) fn new() -> Self {
        Self {
            bucket: LeakyBucket::builder()
                .max(1_u32)
                .tokens(1_u32)
                .refill_interval(Duration::from_secs(5))
                .refill_amount(1_u32)
                .build(),
        }
    }

    pub(crate) async fn acquire_one(&self) {
        self.bucket.acquire_one().await;
    }
}

#[cfg(test)]
mod tests {
    use super::{available_commands_per_interval, CommandRatelimiter, DialRatelimiter};
    use static_assertions::assert_impl_all;
    use std::fmt::Debug;

    assert_impl_all!(CommandRatelimiter: Debug, Send, Sync);
    assert_impl_all!(DialRatelimiter: Debug, Send, Sync);

    #[test]
    fn reserves_headroom_for_heartbeats() {
        assert_eq!(118, available_commands_per_interval(60_000));
        assert_eq!(116, available_commands_per_interval(42_500));
        assert_eq!(116, available_commands_per_interval(30_000));
        assert_eq!(114, available_commands_per_interval(29_999));
    }

    #[tokio::test(start_paused = true)]
    async fn command_bucket_drains_down_to_its_max() {
        let limiter = CommandRatelimiter::new(45_000);
        let max = limiter.available();

        for _ in 0..max {
            limiter.acquire_one().await;
        }

        assert_eq!(0, limiter.available());
    }

    #[tokio::test(start_paused = true)]
    async fn dial_limiter_spaces_attempts_by_five_seconds() {
        let limiter = DialRatelimiter::new();
        limiter.acquire_one().await;

        let start = tokio::time::Instant::now();
        limiter.acquire_one().await;

        assert!(tokio::time::Instant::now() - start >= Duration::from_secs(5));
    }
}
