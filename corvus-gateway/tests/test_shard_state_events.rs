use corvus_gateway::{Event, Intents, Shard};
use std::env;

fn shard() -> (Shard, corvus_gateway::Events) {
    let token = env::var("DISCORD_TOKEN").unwrap();
    Shard::builder(token, Intents::empty()).build()
}

/// Needs a real gateway connection; run with `DISCORD_TOKEN` set and
/// `cargo test -- --ignored`.
#[ignore]
#[tokio::test]
async fn test_shard_event_emits() {
    let (shard, mut events) = shard();

    assert!(matches!(events.next().await.unwrap(), Event::ShardConnecting(_)));

    loop {
        match events.next().await.unwrap() {
            Event::ShardConnected { .. } => break,
            Event::Close { code, reason, .. } => panic!("fatal close {code}: {reason:?}"),
            _ => continue,
        }
    }

    assert!(matches!(events.next().await.unwrap(), Event::Ready(_)));

    shard.shutdown();

    loop {
        match events.next().await {
            Some(Event::ShardDisconnected(_)) => break,
            Some(_) => continue,
            None => panic!("event stream ended before ShardDisconnected"),
        }
    }
}
