//! The Session Facade (§4.5): sits between a [`Shard`]'s raw event
//! stream and application code. Maintains a registry of typed observers
//! invoked synchronously as events arrive, a one-shot `wait_for`
//! mechanism, an intent-derivation helper, and the small `me` cache
//! populated from `Ready`.
//!
//! The observer registry has no direct teacher file to ground on: the
//! teacher workspace's `standby` companion crate — the natural place
//! to look for this — ships only a `Cargo.toml` in this pack, no
//! source. It follows the dashmap-plus-atomic-counter-id idiom used
//! elsewhere in this crate (see [`crate::shard`]'s internal state),
//! adapted for synchronous fan-out instead of async broadcast.

use crate::{
    event::{Event, EventType},
    intents::{self, Intents},
    payload::{RequestGuildMembers, UpdatePresence, UpdateVoiceState},
    shard::{CommandError, Shard},
};
use dashmap::DashMap;
use serde::Serialize;
use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, RwLock,
    },
};
use tokio::sync::oneshot;

/// A synchronous callback invoked for every event matching its
/// registered [`EventType`]. Must not panic across the call boundary in
/// a way that poisons shared state; a panic is caught and logged, not
/// propagated (§4.5).
pub type Observer = Arc<dyn Fn(&Event) + Send + Sync>;

struct Waiter {
    predicate: Box<dyn Fn(&Event) -> bool + Send + Sync>,
    sender: Option<oneshot::Sender<Event>>,
}

/// The `me` cache: identity fields learned from `Ready`, populated once
/// a session completes its first handshake.
#[derive(Clone, Debug, Default)]
pub struct Me {
    pub application_id: Option<String>,
    pub user_id: Option<String>,
}

struct FacadeRef {
    shard: Shard,
    observers: DashMap<u64, (EventType, Observer)>,
    next_observer_id: AtomicU64,
    waiters: DashMap<u64, Waiter>,
    next_waiter_id: AtomicU64,
    me: RwLock<Me>,
}

/// Opaque handle returned by [`Facade::subscribe`]; pass it to
/// [`Facade::unsubscribe`] to remove the observer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SubscriptionId(u64);

/// Subscribes to a [`Shard`]'s event stream and fans it out to
/// registered observers. Cheaply cloneable.
#[derive(Clone)]
pub struct Facade(Arc<FacadeRef>);

impl Facade {
    /// Spawn the task that drains `events` and dispatches them to this
    /// facade's observers. The returned handle can be aborted to stop
    /// dispatch without affecting the shard itself.
    #[must_use]
    pub fn spawn(shard: Shard, mut events: crate::shard::Events) -> (Self, tokio::task::JoinHandle<()>) {
        let facade = Self(Arc::new(FacadeRef {
            shard,
            observers: DashMap::new(),
            next_observer_id: AtomicU64::new(0),
            waiters: DashMap::new(),
            next_waiter_id: AtomicU64::new(0),
            me: RwLock::new(Me::default()),
        }));

        let task_facade = facade.clone();
        let handle = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                task_facade.dispatch(event);
            }
        });

        (facade, handle)
    }

    /// Register an observer invoked synchronously, in registration
    /// order, for every event whose [`Event::kind`] equals `kind`.
    pub fn subscribe(&self, kind: EventType, observer: Observer) -> SubscriptionId {
        let id = self.0.next_observer_id.fetch_add(1, Ordering::Relaxed);
        self.0.observers.insert(id, (kind, observer));
        SubscriptionId(id)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.0.observers.remove(&id.0);
    }

    /// Union of the intents required by every currently registered
    /// observer's event type (§4.5).
    #[must_use]
    pub fn required_intents(&self) -> Intents {
        self.0
            .observers
            .iter()
            .filter_map(|entry| intents::required_for(entry.value().0))
            .fold(Intents::empty(), |acc, required| acc | required)
    }

    /// Complete with the first event for which `predicate` returns
    /// `true`. Registers a one-shot observer and unregisters it once
    /// fulfilled; dropping the returned future before that cancels it.
    pub async fn wait_for(&self, predicate: impl Fn(&Event) -> bool + Send + Sync + 'static) -> Option<Event> {
        let (tx, rx) = oneshot::channel();
        let id = self.0.next_waiter_id.fetch_add(1, Ordering::Relaxed);

        self.0.waiters.insert(
            id,
            Waiter {
                predicate: Box::new(predicate),
                sender: Some(tx),
            },
        );

        let result = rx.await.ok();
        self.0.waiters.remove(&id);
        result
    }

    #[must_use]
    pub fn me(&self) -> Me {
        self.0.me.read().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    pub async fn update_presence(&self, presence: UpdatePresence) -> Result<(), CommandError> {
        self.0.shard.command(crate::event::OpCode::PresenceUpdate, &presence).await
    }

    pub async fn update_voice_state(&self, state: UpdateVoiceState) -> Result<(), CommandError> {
        self.0.shard.command(crate::event::OpCode::VoiceStateUpdate, &state).await
    }

    pub async fn request_guild_members(&self, request: RequestGuildMembers) -> Result<(), CommandError> {
        self.0.shard.command(crate::event::OpCode::RequestGuildMembers, &request).await
    }

    /// Send a guild-subscribe frame. The wire opcode and payload shape
    /// for this are undocumented and unverified against a live server
    /// (§9 Open Question); callers supply both directly rather than
    /// trust a guessed constant.
    pub async fn guild_subscribe(&self, op: u8, payload: &impl Serialize) -> Result<(), CommandError> {
        self.0.shard.command_raw(op, payload).await
    }

    fn dispatch(&self, event: Event) {
        if let Event::Ready(ready) = &event {
            let mut me = self.0.me.write().unwrap_or_else(|poisoned| poisoned.into_inner());
            me.application_id = ready.application_id.clone();
            me.user_id = ready.user_id.clone();
        }

        let fulfilled: Vec<u64> = self
            .0
            .waiters
            .iter()
            .filter(|entry| (entry.value().predicate)(&event))
            .map(|entry| *entry.key())
            .collect();

        for id in fulfilled {
            if let Some((_, mut waiter)) = self.0.waiters.remove(&id) {
                if let Some(sender) = waiter.sender.take() {
                    let _ = sender.send(event.clone());
                }
            }
        }

        let kind = event.kind();
        for entry in self.0.observers.iter() {
            let (observer_kind, observer) = entry.value();
            if *observer_kind != kind {
                continue;
            }

            if catch_unwind(AssertUnwindSafe(|| observer(&event))).is_err() {
                tracing::error!(shard_id = self.0.shard.id(), "event observer panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{intents::Intents, shard::Shard};
    use std::sync::atomic::AtomicU32;

    #[tokio::test]
    async fn observer_is_invoked_for_its_event_type_only() {
        let (shard, events) = Shard::builder("token", Intents::empty()).build();
        let (facade, handle) = Facade::spawn(shard, events);

        let ready_calls = Arc::new(AtomicU32::new(0));
        let resumed_calls = Arc::new(AtomicU32::new(0));

        let ready_calls_in = Arc::clone(&ready_calls);
        facade.subscribe(
            EventType::Ready,
            Arc::new(move |_event| {
                ready_calls_in.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let resumed_calls_in = Arc::clone(&resumed_calls);
        facade.subscribe(
            EventType::Resumed,
            Arc::new(move |_event| {
                resumed_calls_in.fetch_add(1, Ordering::SeqCst);
            }),
        );

        facade.dispatch(Event::Resumed);

        assert_eq!(0, ready_calls.load(Ordering::SeqCst));
        assert_eq!(1, resumed_calls.load(Ordering::SeqCst));

        handle.abort();
    }

    #[tokio::test]
    async fn panicking_observer_does_not_stop_later_observers() {
        let (shard, events) = Shard::builder("token", Intents::empty()).build();
        let (facade, handle) = Facade::spawn(shard, events);

        facade.subscribe(EventType::Resumed, Arc::new(|_event| panic!("boom")));

        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = Arc::clone(&calls);
        facade.subscribe(
            EventType::Resumed,
            Arc::new(move |_event| {
                calls_in.fetch_add(1, Ordering::SeqCst);
            }),
        );

        facade.dispatch(Event::Resumed);
        assert_eq!(1, calls.load(Ordering::SeqCst));

        handle.abort();
    }

    #[tokio::test]
    async fn wait_for_resolves_on_first_matching_event() {
        let (shard, events) = Shard::builder("token", Intents::empty()).build();
        let (facade, handle) = Facade::spawn(shard, events);

        let waiting = facade.wait_for(|event| matches!(event, Event::Resumed));
        facade.dispatch(Event::GatewayHeartbeatAck);
        facade.dispatch(Event::Resumed);

        assert!(matches!(waiting.await, Some(Event::Resumed)));
        handle.abort();
    }

    #[tokio::test]
    async fn ready_populates_the_me_cache() {
        let (shard, events) = Shard::builder("token", Intents::empty()).build();
        let (facade, handle) = Facade::spawn(shard, events);

        facade.dispatch(Event::Ready(Box::new(crate::payload::Ready {
            session_id: "abc".into(),
            resume_gateway_url: None,
            application_id: Some("app".into()),
            user_id: Some("user".into()),
        })));

        let me = facade.me();
        assert_eq!(Some("app".to_owned()), me.application_id);
        assert_eq!(Some("user".to_owned()), me.user_id);

        handle.abort();
    }
}
