use corvus_gateway::{Event, Intents, Shard};
use std::{
    env,
    time::{Duration, Instant},
};

fn shard() -> (Shard, corvus_gateway::Events) {
    let token = env::var("DISCORD_TOKEN").unwrap();
    Shard::builder(token, Intents::empty()).build()
}

/// Needs a real gateway connection; run with `DISCORD_TOKEN` set and
/// `cargo test -- --ignored`.
#[ignore]
#[tokio::test]
async fn test_shard_command_ratelimit() {
    let (shard, mut events) = shard();

    loop {
        match events.next().await.unwrap() {
            Event::Ready(_) => break,
            Event::Close { .. } => panic!("gateway closed before Ready"),
            _ => continue,
        }
    }

    let payload = corvus_gateway::payload::UpdatePresence {
        since: None,
        activities: vec![],
        status: "online".to_owned(),
        afk: false,
    };

    // The bucket starts with at most 118 tokens (120 minus heartbeat
    // headroom), all granted up front, so the first several sends are not
    // held back at all. Drain it by rapid-firing more sends than it could
    // possibly hold; only once it's empty does a send have to wait out the
    // 60-second refill, which is what actually exercises the ratelimiter.
    const MORE_THAN_MAX_ALLOTMENT: usize = 130;

    let mut throttled = false;

    for _ in 0..MORE_THAN_MAX_ALLOTMENT {
        let now = Instant::now();
        shard.command(corvus_gateway::OpCode::PresenceUpdate, &payload).await.unwrap();

        if now.elapsed() > Duration::from_secs(1) {
            throttled = true;
            break;
        }
    }

    assert!(
        throttled,
        "ratelimiter never held a send back across {MORE_THAN_MAX_ALLOTMENT} rapid commands"
    );

    shard.shutdown();
}
