//! # Scene — The Frame Loop
//!
//! A [`Scene`] owns one [`ComponentMap`], one [`SystemMap`], one
//! [`EventBus`] and the frame clock. [`Scene::update`] runs one frame:
//!
//! ```text
//! Input ─► FixedUpdate × n ─► Update ─► Render ─► end-of-frame flush
//! ```
//!
//! `n` comes from the fixed-step accumulator. Each cycle calls the hooks of
//! the systems registered for it, in order, and flushes after every system:
//!
//! ```text
//! for each system in cycle:
//!     poll_resources → cycle hook
//!     flush_after_system   (dead subscriptions, AfterSystem actions, components)
//! flush_end_of_cycle       (+ EndOfCycle actions, queued system changes)
//! ```
//!
//! When the scene is paused only systems that opt in with
//! [`System::run_when_paused`] are called.
//!
//! ## Nesting
//!
//! [`SubScene`] is a system that owns another scene and runs its whole frame
//! from the host's Update cycle. Nesting is composition; both scenes run on
//! the caller's thread.

use std::time::Duration;

use crate::config::SceneConfig;
use crate::ecs::component_map::ComponentMap;
use crate::ecs::entity::EntityId;
use crate::ecs::system::{PendingChange, ProcessingCycle, ProcessingCycles, SchedulerState, System, SystemMap, run_hook};
use crate::error::{EcsError, Result};
use crate::event::{EventBus, FlushTier};
use crate::time::{FixedTimestep, Time};

pub struct Scene {
    name: String,
    components: ComponentMap,
    systems: SystemMap,
    events: EventBus,
    time: Time,
    fixed: FixedTimestep,
    paused: bool,
    /// Set while the pending-change queue is being drained.
    applying_changes: bool,
}

impl Scene {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, &SceneConfig::default())
    }

    pub fn with_config(name: impl Into<String>, config: &SceneConfig) -> Self {
        let step = config.fixed_timestep();
        Self {
            name: name.into(),
            components: ComponentMap::new(),
            systems: SystemMap::new(),
            events: EventBus::new(),
            time: Time::new(step),
            fixed: FixedTimestep::new(step).with_max_steps(config.max_fixed_steps_per_frame),
            paused: config.start_paused,
            applying_changes: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn components(&self) -> &ComponentMap {
        &self.components
    }

    pub fn components_mut(&mut self) -> &mut ComponentMap {
        &mut self.components
    }

    /// The registered systems. The system currently running is not
    /// reachable through this map.
    pub fn systems(&self) -> &SystemMap {
        &self.systems
    }

    pub fn systems_mut(&mut self) -> &mut SystemMap {
        &mut self.systems
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn events_mut(&mut self) -> &mut EventBus {
        &mut self.events
    }

    pub fn time(&self) -> &Time {
        &self.time
    }

    pub fn fixed_timestep(&self) -> &FixedTimestep {
        &self.fixed
    }

    pub fn paused(&self) -> bool {
        self.paused
    }

    pub fn set_paused(&mut self, paused: bool) {
        if self.paused != paused {
            log::debug!("scene `{}` {}", self.name, if paused { "paused" } else { "resumed" });
        }
        self.paused = paused;
    }

    // ── Entities ───────────────────────────────────────────────────────────

    pub fn create_entity(&mut self, name: impl Into<String>) -> EntityId {
        self.components.create_entity(name)
    }

    pub fn delete_entity(&mut self, id: EntityId, reclaimable: bool, recursive: bool) -> Result<()> {
        self.components.delete_entity(id, reclaimable, recursive)
    }

    pub fn reclaim_entity(&mut self, id: EntityId) -> bool {
        self.components.reclaim_entity(id)
    }

    // ── Systems ────────────────────────────────────────────────────────────

    pub fn add_system<S: System>(&mut self, system: S) -> Result<()> {
        self.add_boxed_system(Box::new(system))
    }

    /// Queue `system` for activation. Outside a cycle it is activated
    /// (initialized and subscribed) before this returns.
    pub fn add_boxed_system(&mut self, system: Box<dyn System>) -> Result<()> {
        if self.systems.is_known(system.id()) {
            return Err(EcsError::DuplicateSystem(system.id().to_string()));
        }
        self.systems.enqueue(PendingChange::Add(system));
        self.apply_if_idle()
    }

    pub fn remove_system(&mut self, id: &str) -> Result<()> {
        if !self.systems.is_known(id) {
            return Err(EcsError::UnknownSystem(id.to_string()));
        }
        self.systems.enqueue(PendingChange::Remove(id.to_string()));
        self.apply_if_idle()
    }

    /// Move a system to `index` in the execution order.
    pub fn change_system_order(&mut self, id: &str, index: usize) -> Result<()> {
        if !self.systems.is_known(id) {
            return Err(EcsError::UnknownSystem(id.to_string()));
        }
        self.systems.enqueue(PendingChange::Reorder {
            id: id.to_string(),
            index,
        });
        self.apply_if_idle()
    }

    fn apply_if_idle(&mut self) -> Result<()> {
        match self.systems.state() {
            SchedulerState::Idle => self.apply_system_changes(),
            SchedulerState::InsideCycle => Ok(()),
        }
    }

    /// Drain the pending-change queue. Changes requested from inside a hook
    /// run here (such as `initialize` adding a helper) are queued behind the
    /// current one, so systems keep their registration order.
    fn apply_system_changes(&mut self) -> Result<()> {
        if self.applying_changes {
            return Ok(());
        }
        self.applying_changes = true;
        let result = self.drain_system_changes();
        self.applying_changes = false;
        result
    }

    fn drain_system_changes(&mut self) -> Result<()> {
        while let Some(change) = self.systems.pop_pending() {
            match change {
                PendingChange::Add(mut system) => {
                    if self.systems.contains(system.id()) {
                        return Err(EcsError::DuplicateSystem(system.id().to_string()));
                    }
                    system.initialize(self)?;
                    system.subscribe_to_events(&mut self.events);
                    log::debug!("scene `{}`: added system `{}`", self.name, system.id());
                    self.systems.insert(system)?;
                }
                PendingChange::Remove(id) => match self.systems.remove(&id) {
                    Some(mut system) => {
                        system.unsubscribe_from_events(&mut self.events);
                        log::debug!("scene `{}`: removed system `{id}`", self.name);
                    }
                    None => log::warn!("scene `{}`: system `{id}` was already gone", self.name),
                },
                PendingChange::Reorder { id, index } => {
                    self.systems.move_to(&id, index)?;
                    self.resubscribe_all();
                    log::debug!("scene `{}`: moved system `{id}` to {index}", self.name);
                }
            }
        }
        Ok(())
    }

    /// Drop and re-create every subscription, so handler order follows the
    /// new system order.
    fn resubscribe_all(&mut self) {
        for slot in 0..self.systems.len() {
            if let Some(mut system) = self.systems.take(slot) {
                system.unsubscribe_from_events(&mut self.events);
                self.systems.restore(slot, system);
            }
        }
        for slot in 0..self.systems.len() {
            if let Some(mut system) = self.systems.take(slot) {
                system.subscribe_to_events(&mut self.events);
                self.systems.restore(slot, system);
            }
        }
    }

    // ── Frame loop ─────────────────────────────────────────────────────────

    /// Run one frame.
    pub fn update(&mut self, delta: Duration) -> Result<()> {
        if self.systems.state() == SchedulerState::InsideCycle {
            return Err(EcsError::InsideCycle("Scene::update"));
        }
        self.time.advance(delta);

        self.invoke_cycle(ProcessingCycle::Input)?;
        let steps = self.fixed.accumulate(delta);
        for _ in 0..steps {
            self.invoke_cycle(ProcessingCycle::FixedUpdate)?;
        }
        self.invoke_cycle(ProcessingCycle::Update)?;
        self.invoke_cycle(ProcessingCycle::Render)?;
        self.flush()
    }

    /// Run one processing cycle outside of [`update`](Self::update).
    pub fn invoke_cycle(&mut self, cycle: ProcessingCycle) -> Result<()> {
        if self.systems.state() == SchedulerState::InsideCycle {
            return Err(EcsError::InsideCycle("Scene::invoke_cycle"));
        }
        self.systems.set_state(SchedulerState::InsideCycle);
        let result = self.run_cycle(cycle);
        self.systems.set_state(SchedulerState::Idle);
        result?;
        self.flush_end_of_cycle()
    }

    fn run_cycle(&mut self, cycle: ProcessingCycle) -> Result<()> {
        for slot in self.systems.cycle_slots(cycle) {
            if self.paused && !self.systems.runs_when_paused(slot) {
                continue;
            }
            let Some(mut system) = self.systems.take(slot) else {
                continue;
            };
            let outcome = system
                .poll_resources(self)
                .and_then(|()| run_hook(&mut *system, cycle, self));
            self.systems.restore(slot, system);
            outcome?;
            self.flush_after_system()?;
        }
        Ok(())
    }

    fn flush_after_system(&mut self) -> Result<()> {
        self.events.flush_dead();
        self.run_deferred(FlushTier::AfterSystem)?;
        self.components.flush();
        Ok(())
    }

    fn flush_end_of_cycle(&mut self) -> Result<()> {
        self.flush_after_system()?;
        self.run_deferred(FlushTier::EndOfCycle)?;
        self.apply_system_changes()
    }

    /// End-of-frame flush: every tier, every store, every queued change.
    pub fn flush(&mut self) -> Result<()> {
        self.flush_end_of_cycle()?;
        self.run_deferred(FlushTier::EndOfFrame)?;
        self.components.flush();
        log::trace!("scene `{}`: end of frame {}", self.name, self.time.frame_count());
        Ok(())
    }

    /// Run deferred actions up to `tier` until none are left. Actions may
    /// queue more actions.
    fn run_deferred(&mut self, tier: FlushTier) -> Result<()> {
        while self.events.has_deferred(tier) {
            for action in self.events.take_deferred(tier) {
                action(self)?;
            }
        }
        Ok(())
    }

    pub(crate) fn clear_systems(&mut self) {
        for id in self.systems.ids().into_iter().map(str::to_string).collect::<Vec<_>>() {
            if let Some(mut system) = self.systems.remove(&id) {
                system.unsubscribe_from_events(&mut self.events);
            }
        }
        while self.systems.pop_pending().is_some() {}
        self.events.flush_dead();
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.systems.state() == SchedulerState::Idle
    }
}

/// A system that runs a nested scene's full frame from the host's Update
/// cycle, with the host's frame delta.
pub struct SubScene {
    id: String,
    scene: Scene,
}

impl SubScene {
    pub fn new(id: impl Into<String>, scene: Scene) -> Self {
        Self { id: id.into(), scene }
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn scene_mut(&mut self) -> &mut Scene {
        &mut self.scene
    }
}

impl System for SubScene {
    fn id(&self) -> &str {
        &self.id
    }

    fn cycles(&self) -> ProcessingCycles {
        ProcessingCycles::UPDATE
    }

    fn on_update(&mut self, host: &mut Scene) -> Result<()> {
        self.scene.set_paused(host.paused());
        self.scene.update(host.time().delta())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use std::cell::RefCell;
    use std::rc::Rc;

    type Log = Rc<RefCell<Vec<String>>>;

    struct Recorder {
        id: String,
        cycles: ProcessingCycles,
        log: Log,
    }

    impl Recorder {
        fn new(id: &str, cycles: ProcessingCycles, log: &Log) -> Self {
            Self {
                id: id.to_string(),
                cycles,
                log: Rc::clone(log),
            }
        }

        fn note(&self, what: &str) {
            self.log.borrow_mut().push(format!("{}:{what}", self.id));
        }
    }

    impl System for Recorder {
        fn id(&self) -> &str {
            &self.id
        }

        fn cycles(&self) -> ProcessingCycles {
            self.cycles
        }

        fn initialize(&mut self, _scene: &mut Scene) -> Result<()> {
            self.note("init");
            Ok(())
        }

        fn on_input(&mut self, _scene: &mut Scene) -> Result<()> {
            self.note("input");
            Ok(())
        }

        fn on_fixed_update(&mut self, _scene: &mut Scene) -> Result<()> {
            self.note("fixed");
            Ok(())
        }

        fn on_update(&mut self, _scene: &mut Scene) -> Result<()> {
            self.note("update");
            Ok(())
        }

        fn on_render(&mut self, _scene: &mut Scene) -> Result<()> {
            self.note("render");
            Ok(())
        }
    }

    fn new_log() -> Log {
        Rc::new(RefCell::new(Vec::new()))
    }

    fn fixed_scene(step_ms: f64) -> Scene {
        let config = SceneConfig {
            fixed_timestep_secs: step_ms / 1000.0,
            ..SceneConfig::default()
        };
        Scene::with_config("test", &config)
    }

    #[test]
    fn cycles_run_in_frame_order() {
        let log = new_log();
        let mut scene = fixed_scene(10.0);
        scene.add_system(Recorder::new("a", ProcessingCycles::ALL, &log)).unwrap();
        log.borrow_mut().clear();

        scene.update(Duration::from_millis(25)).unwrap();
        assert_eq!(
            *log.borrow(),
            ["a:input", "a:fixed", "a:fixed", "a:update", "a:render"]
        );
    }

    #[test]
    fn add_outside_cycle_initializes_immediately() {
        let log = new_log();
        let mut scene = Scene::new("test");
        scene.add_system(Recorder::new("a", ProcessingCycles::UPDATE, &log)).unwrap();
        assert_eq!(*log.borrow(), ["a:init"]);
        assert!(scene.systems().contains("a"));
        assert!(matches!(
            scene.add_system(Recorder::new("a", ProcessingCycles::UPDATE, &log)),
            Err(EcsError::DuplicateSystem(_))
        ));
    }

    #[test]
    fn remove_unknown_system_fails() {
        let mut scene = Scene::new("test");
        assert!(matches!(scene.remove_system("ghost"), Err(EcsError::UnknownSystem(_))));
        assert!(matches!(
            scene.change_system_order("ghost", 0),
            Err(EcsError::UnknownSystem(_))
        ));
    }

    #[test]
    fn paused_scene_runs_opt_in_systems_only() {
        struct Always(Log);
        impl System for Always {
            fn id(&self) -> &str {
                "always"
            }
            fn cycles(&self) -> ProcessingCycles {
                ProcessingCycles::UPDATE
            }
            fn run_when_paused(&self) -> bool {
                true
            }
            fn on_update(&mut self, _scene: &mut Scene) -> Result<()> {
                self.0.borrow_mut().push("always".to_string());
                Ok(())
            }
        }

        let log = new_log();
        let mut scene = Scene::new("test");
        scene.add_system(Recorder::new("s1", ProcessingCycles::UPDATE, &log)).unwrap();
        scene.add_system(Always(Rc::clone(&log))).unwrap();
        log.borrow_mut().clear();

        scene.set_paused(true);
        scene.update(Duration::from_millis(16)).unwrap();
        assert_eq!(*log.borrow(), ["always"]);
    }

    /// Adds a follower system from inside its own update.
    struct Spawner {
        log: Log,
        spawned: bool,
    }

    impl System for Spawner {
        fn id(&self) -> &str {
            "spawner"
        }

        fn cycles(&self) -> ProcessingCycles {
            ProcessingCycles::UPDATE | ProcessingCycles::RENDER
        }

        fn on_update(&mut self, scene: &mut Scene) -> Result<()> {
            if !self.spawned {
                self.spawned = true;
                scene.add_system(Recorder::new("child", ProcessingCycles::UPDATE | ProcessingCycles::RENDER, &self.log))?;
                assert!(!scene.systems().contains("child"));
                assert_eq!(scene.systems().pending_len(), 1);
            }
            Ok(())
        }
    }

    #[test]
    fn systems_added_mid_cycle_join_after_the_cycle() {
        let log = new_log();
        let mut scene = Scene::new("test");
        scene
            .add_system(Spawner {
                log: Rc::clone(&log),
                spawned: false,
            })
            .unwrap();

        scene.update(Duration::from_millis(16)).unwrap();
        // Not run in the Update cycle it was added in, but active for Render.
        assert_eq!(*log.borrow(), ["child:init", "child:render"]);
        assert_eq!(scene.systems().ids(), ["spawner", "child"]);
    }

    /// Registers a helper system from its own `initialize`.
    struct WithHelper {
        log: Log,
    }

    impl System for WithHelper {
        fn id(&self) -> &str {
            "parent"
        }

        fn cycles(&self) -> ProcessingCycles {
            ProcessingCycles::UPDATE
        }

        fn initialize(&mut self, scene: &mut Scene) -> Result<()> {
            scene.add_system(Recorder::new("helper", ProcessingCycles::UPDATE, &self.log))?;
            assert!(!scene.systems().contains("helper"));
            self.log.borrow_mut().push("parent:init".to_string());
            Ok(())
        }

        fn on_update(&mut self, _scene: &mut Scene) -> Result<()> {
            self.log.borrow_mut().push("parent:update".to_string());
            Ok(())
        }
    }

    #[test]
    fn systems_added_during_initialize_follow_their_creator() {
        let log = new_log();
        let mut scene = Scene::new("test");
        scene.add_system(WithHelper { log: Rc::clone(&log) }).unwrap();
        assert_eq!(scene.systems().ids(), ["parent", "helper"]);
        assert_eq!(scene.systems().pending_len(), 0);

        scene.update(Duration::from_millis(16)).unwrap();
        assert_eq!(
            *log.borrow(),
            ["parent:init", "helper:init", "parent:update", "helper:update"]
        );
    }

    #[test]
    fn reorder_changes_execution_order() {
        let log = new_log();
        let mut scene = Scene::new("test");
        scene.add_system(Recorder::new("a", ProcessingCycles::UPDATE, &log)).unwrap();
        scene.add_system(Recorder::new("b", ProcessingCycles::UPDATE, &log)).unwrap();
        scene.change_system_order("b", 0).unwrap();
        log.borrow_mut().clear();

        scene.invoke_cycle(ProcessingCycle::Update).unwrap();
        assert_eq!(*log.borrow(), ["b:update", "a:update"]);
    }

    struct Tick;
    impl Event for Tick {}

    struct Listener {
        id: &'static str,
        log: Log,
    }

    impl System for Listener {
        fn id(&self) -> &str {
            self.id
        }

        fn cycles(&self) -> ProcessingCycles {
            ProcessingCycles::NONE
        }

        fn subscribe_to_events(&mut self, events: &mut EventBus) {
            let log = Rc::clone(&self.log);
            let id = self.id;
            events.subscribe::<Tick>(id, move |_, _| log.borrow_mut().push(id.to_string()));
        }
    }

    #[test]
    fn reorder_resubscribes_in_new_order() {
        let log = new_log();
        let mut scene = Scene::new("test");
        for id in ["first", "second"] {
            scene
                .add_system(Listener {
                    id,
                    log: Rc::clone(&log),
                })
                .unwrap();
        }
        scene.change_system_order("second", 0).unwrap();
        scene.flush().unwrap();
        scene.events_mut().invoke(Tick);
        assert_eq!(*log.borrow(), ["second", "first"]);
        assert_eq!(scene.events().subscriber_count::<Tick>(), 2);
    }

    #[test]
    fn remove_unsubscribes() {
        let log = new_log();
        let mut scene = Scene::new("test");
        scene
            .add_system(Listener {
                id: "l",
                log: Rc::clone(&log),
            })
            .unwrap();
        assert_eq!(scene.events().subscriber_count::<Tick>(), 1);
        scene.remove_system("l").unwrap();
        assert_eq!(scene.events().subscriber_count::<Tick>(), 0);
        assert!(scene.systems().is_empty());
    }

    #[test]
    fn deferred_actions_reach_the_scene() {
        let mut scene = Scene::new("test");
        scene.events_mut().subscribe::<Tick>("spawner", |_, ctx| {
            ctx.defer(FlushTier::EndOfFrame, |scene| {
                scene.create_entity("from event");
                Ok(())
            });
        });
        scene.events_mut().invoke(Tick);
        assert_eq!(scene.components().entity_count(), 0);
        scene.update(Duration::from_millis(16)).unwrap();
        assert_eq!(scene.components().entity_count(), 1);
    }

    #[test]
    fn failing_system_propagates_and_resets_state() {
        struct Broken;
        impl System for Broken {
            fn id(&self) -> &str {
                "broken"
            }
            fn cycles(&self) -> ProcessingCycles {
                ProcessingCycles::UPDATE
            }
            fn on_update(&mut self, scene: &mut Scene) -> Result<()> {
                let e = scene.create_entity("e");
                scene.delete_entity(e, true, false)?;
                scene.delete_entity(e, true, false)
            }
        }

        let mut scene = Scene::new("test");
        scene.add_system(Broken).unwrap();
        let err = scene.update(Duration::from_millis(16)).unwrap_err();
        assert!(matches!(err, EcsError::EntityAlreadyDeleted(_)));
        assert!(scene.is_idle());
        assert!(scene.systems().get::<Broken>("broken").is_some());
    }

    #[test]
    fn nested_update_is_rejected() {
        struct Reentrant;
        impl System for Reentrant {
            fn id(&self) -> &str {
                "reentrant"
            }
            fn cycles(&self) -> ProcessingCycles {
                ProcessingCycles::UPDATE
            }
            fn on_update(&mut self, scene: &mut Scene) -> Result<()> {
                scene.update(Duration::ZERO)
            }
        }

        let mut scene = Scene::new("test");
        scene.add_system(Reentrant).unwrap();
        assert!(matches!(
            scene.update(Duration::from_millis(1)),
            Err(EcsError::InsideCycle(_))
        ));
    }

    #[test]
    fn sub_scene_runs_a_full_frame() {
        let log = new_log();
        let mut inner = Scene::new("inner");
        inner.add_system(Recorder::new("inner", ProcessingCycles::ALL, &log)).unwrap();
        log.borrow_mut().clear();

        let mut host = fixed_scene(10.0);
        host.add_system(SubScene::new("sub", inner)).unwrap();
        host.update(Duration::from_millis(10)).unwrap();

        let sub = host.systems().get::<SubScene>("sub").unwrap();
        assert_eq!(sub.scene().time().frame_count(), 1);
        assert_eq!(log.borrow().first().map(String::as_str), Some("inner:input"));
        assert_eq!(log.borrow().last().map(String::as_str), Some("inner:render"));
    }
}
