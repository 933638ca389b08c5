use corvus_gateway::{event::EventType, Cluster, Facade, Intents, Shard};
use std::sync::Arc;

/// `required_intents` unions whatever privileged/non-privileged intents
/// each subscribed observer's event type demands, without the caller
/// having to know the mapping itself.
#[tokio::test]
async fn facade_required_intents_tracks_subscriptions() {
    let (shard, events) = Shard::builder("token", Intents::empty()).build();
    let (facade, handle) = Facade::spawn(shard, events);

    assert_eq!(Intents::empty(), facade.required_intents());

    facade.subscribe(EventType::GuildMemberAdd, Arc::new(|_event| {}));
    assert!(facade.required_intents().contains(Intents::GUILD_MEMBERS));

    handle.abort();
}

/// Before any `Ready` has been observed, the identity cache is empty.
#[tokio::test]
async fn facade_me_defaults_to_unknown() {
    let (shard, events) = Shard::builder("token", Intents::empty()).build();
    let (facade, handle) = Facade::spawn(shard, events);

    let me = facade.me();
    assert!(me.application_id.is_none());
    assert!(me.user_id.is_none());

    handle.abort();
}

/// Guild-to-shard assignment follows `(guildID >> 22) mod shardTotal`,
/// and a shard that hasn't been started yet isn't reachable by id.
#[tokio::test]
async fn cluster_routes_guilds_before_any_shard_is_up() {
    let cluster = Cluster::builder("token", Intents::empty()).shard_total(4).build();

    let guild_id: u64 = 41_771_983_423_143_936;
    assert_eq!((guild_id >> 22) % 4, cluster.shard_id_for_guild(guild_id));
    assert!(cluster.shard(cluster.shard_id_for_guild(guild_id)).is_none());
}
