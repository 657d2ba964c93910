//! # Events — Typed Synchronous Bus with Tiered Deferral
//!
//! [`EventBus::invoke`] runs every live handler for one event type inline,
//! in subscription order, and hands the (possibly mutated) event back to the
//! caller. A handler can stop propagation by marking the event consumed.
//!
//! Handlers never get the scene. Side effects that need it are registered
//! through the [`EventContext`] and run later, at one of three
//! [`FlushTier`]s:
//!
//! ```text
//! AfterSystem  ← after every system hook
//! EndOfCycle   ← after every processing cycle
//! EndOfFrame   ← once, at the end of Scene::update
//! ```
//!
//! Flushing a tier also drains every earlier tier.
//!
//! Unsubscribing marks a subscription dead right away; the entry itself is
//! dropped at the next flush.

use std::any::{Any, TypeId};
use std::collections::HashMap;

use crate::error::Result;
use crate::scene::Scene;

/// Marker trait for event payloads.
pub trait Event: 'static {
    /// A consumed event is not passed to the remaining handlers.
    fn consumed(&self) -> bool {
        false
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// When a deferred action runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FlushTier {
    AfterSystem,
    EndOfCycle,
    EndOfFrame,
}

impl FlushTier {
    const COUNT: usize = 3;

    fn index(self) -> usize {
        self as usize
    }
}

/// A side effect that needs the scene.
pub type DeferredAction = Box<dyn FnOnce(&mut Scene) -> Result<()>>;

type Handler<E> = Box<dyn FnMut(&mut E, &mut EventContext<'_>)>;

/// Handed to every handler during [`EventBus::invoke`].
pub struct EventContext<'a> {
    deferred: &'a mut [Vec<DeferredAction>; FlushTier::COUNT],
}

impl EventContext<'_> {
    /// Run `action` against the scene at the given tier.
    pub fn defer(&mut self, tier: FlushTier, action: impl FnOnce(&mut Scene) -> Result<()> + 'static) {
        self.deferred[tier.index()].push(Box::new(action));
    }

    /// Invoke `event` at the given tier instead of now.
    pub fn raise_later<E: Event>(&mut self, tier: FlushTier, event: E) {
        self.defer(tier, move |scene| {
            scene.events_mut().invoke(event);
            Ok(())
        });
    }
}

struct Subscription<E> {
    id: SubscriptionId,
    owner: String,
    alive: bool,
    handler: Handler<E>,
}

struct Channel<E> {
    subscriptions: Vec<Subscription<E>>,
}

trait AnyChannel {
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn kill(&mut self, id: SubscriptionId) -> bool;
    fn kill_owner(&mut self, owner: &str) -> usize;
    /// Drop dead subscriptions, returning their ids.
    fn purge(&mut self) -> Vec<SubscriptionId>;
    fn live_count(&self) -> usize;
}

impl<E: Event> AnyChannel for Channel<E> {
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn kill(&mut self, id: SubscriptionId) -> bool {
        match self.subscriptions.iter_mut().find(|s| s.id == id && s.alive) {
            Some(subscription) => {
                subscription.alive = false;
                true
            }
            None => false,
        }
    }

    fn kill_owner(&mut self, owner: &str) -> usize {
        let mut killed = 0;
        for subscription in &mut self.subscriptions {
            if subscription.alive && subscription.owner == owner {
                subscription.alive = false;
                killed += 1;
            }
        }
        killed
    }

    fn purge(&mut self) -> Vec<SubscriptionId> {
        let dead = self
            .subscriptions
            .iter()
            .filter(|s| !s.alive)
            .map(|s| s.id)
            .collect();
        self.subscriptions.retain(|s| s.alive);
        dead
    }

    fn live_count(&self) -> usize {
        self.subscriptions.iter().filter(|s| s.alive).count()
    }
}

pub struct EventBus {
    channels: HashMap<TypeId, Box<dyn AnyChannel>>,
    routes: HashMap<SubscriptionId, TypeId>,
    deferred: [Vec<DeferredAction>; FlushTier::COUNT],
    next_id: u64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            channels: HashMap::new(),
            routes: HashMap::new(),
            deferred: Default::default(),
            next_id: 0,
        }
    }

    /// Register `handler` for events of type `E`. `owner` is usually the
    /// subscribing system's id.
    pub fn subscribe<E: Event>(
        &mut self,
        owner: impl Into<String>,
        handler: impl FnMut(&mut E, &mut EventContext<'_>) + 'static,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        let channel = self
            .channels
            .entry(TypeId::of::<E>())
            .or_insert_with(|| Box::new(Channel::<E> { subscriptions: Vec::new() }));
        if let Some(channel) = channel.as_any_mut().downcast_mut::<Channel<E>>() {
            channel.subscriptions.push(Subscription {
                id,
                owner: owner.into(),
                alive: true,
                handler: Box::new(handler),
            });
            self.routes.insert(id, TypeId::of::<E>());
        }
        id
    }

    /// Stop delivering to one subscription. Returns `false` if it was
    /// unknown or already dead.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let Some(type_id) = self.routes.get(&id) else {
            return false;
        };
        self.channels
            .get_mut(type_id)
            .is_some_and(|channel| channel.kill(id))
    }

    /// Stop delivering to every subscription of `owner`.
    pub fn unsubscribe_all(&mut self, owner: &str) -> usize {
        self.channels
            .values_mut()
            .map(|channel| channel.kill_owner(owner))
            .sum()
    }

    /// Deliver `event` to every live handler and return it.
    pub fn invoke<E: Event>(&mut self, mut event: E) -> E {
        let Self { channels, deferred, .. } = self;
        let Some(channel) = channels
            .get_mut(&TypeId::of::<E>())
            .and_then(|c| c.as_any_mut().downcast_mut::<Channel<E>>())
        else {
            return event;
        };

        let mut ctx = EventContext { deferred };
        for subscription in &mut channel.subscriptions {
            if !subscription.alive {
                continue;
            }
            (subscription.handler)(&mut event, &mut ctx);
            if event.consumed() {
                break;
            }
        }
        event
    }

    /// Queue a deferred action directly, without an event.
    pub fn defer(&mut self, tier: FlushTier, action: impl FnOnce(&mut Scene) -> Result<()> + 'static) {
        self.deferred[tier.index()].push(Box::new(action));
    }

    pub fn subscriber_count<E: Event>(&self) -> usize {
        self.channels
            .get(&TypeId::of::<E>())
            .map_or(0, |channel| channel.live_count())
    }

    pub fn has_deferred(&self, tier: FlushTier) -> bool {
        self.deferred[..=tier.index()].iter().any(|queue| !queue.is_empty())
    }

    /// Physically remove dead subscriptions.
    pub fn flush_dead(&mut self) {
        for channel in self.channels.values_mut() {
            for id in channel.purge() {
                self.routes.remove(&id);
            }
        }
    }

    /// Take every deferred action at `tier` and earlier, earliest tier first.
    pub(crate) fn take_deferred(&mut self, tier: FlushTier) -> Vec<DeferredAction> {
        let mut out = Vec::new();
        for queue in &mut self.deferred[..=tier.index()] {
            out.append(queue);
        }
        out
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
