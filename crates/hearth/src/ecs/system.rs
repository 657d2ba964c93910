//! # System — Per-Cycle Logic Owned by a Scene
//!
//! A system is a trait object with a stable string id and a set of
//! [`ProcessingCycles`] it wants to run in. Every frame the scene walks the
//! cycles in a fixed order (Input, FixedUpdate × n, Update, Render) and calls
//! each participating system's hook, in registration order.
//!
//! ## Membership changes
//!
//! Systems may add, remove or reorder systems from inside their own hooks.
//! Those changes are queued in the [`SystemMap`] and applied when the
//! scheduler is [`SchedulerState::Idle`], which is either immediately (when
//! requested from outside a cycle) or at the end of the current cycle. The
//! per-cycle lists are rebuilt from the declared bitmasks after every change.
//!
//! ## Borrowing
//!
//! Hooks receive `&mut Scene`. While a system runs it is taken out of its
//! slot, so the rest of the scene (including the other systems) remains
//! reachable through that borrow.

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::{EcsError, Result};
use crate::event::EventBus;
use crate::scene::Scene;

/// One phase of a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProcessingCycle {
    Input,
    FixedUpdate,
    Update,
    Render,
}

impl ProcessingCycle {
    /// Every cycle, in frame order.
    pub const ALL: [ProcessingCycle; 4] = [
        ProcessingCycle::Input,
        ProcessingCycle::FixedUpdate,
        ProcessingCycle::Update,
        ProcessingCycle::Render,
    ];

    pub fn flag(self) -> ProcessingCycles {
        match self {
            ProcessingCycle::Input => ProcessingCycles::INPUT,
            ProcessingCycle::FixedUpdate => ProcessingCycles::FIXED_UPDATE,
            ProcessingCycle::Update => ProcessingCycles::UPDATE,
            ProcessingCycle::Render => ProcessingCycles::RENDER,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ProcessingCycle::Input => "Input",
            ProcessingCycle::FixedUpdate => "FixedUpdate",
            ProcessingCycle::Update => "Update",
            ProcessingCycle::Render => "Render",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for ProcessingCycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ProcessingCycle {
    type Err = EcsError;

    fn from_str(s: &str) -> Result<Self> {
        ProcessingCycle::ALL
            .into_iter()
            .find(|cycle| cycle.name() == s)
            .ok_or_else(|| EcsError::UnknownProcessingCycle(s.to_string()))
    }
}

bitflags! {
    /// The cycles a system participates in.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct ProcessingCycles: u8 {
        const INPUT = 1 << 0;
        const FIXED_UPDATE = 1 << 1;
        const UPDATE = 1 << 2;
        const RENDER = 1 << 3;
    }
}

impl ProcessingCycles {
    pub const NONE: Self = Self::empty();
    pub const ALL: Self = Self::all();
}

/// Whether the owning scene is currently inside a processing cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SchedulerState {
    #[default]
    Idle,
    InsideCycle,
}

/// Downcasting support for trait objects.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A unit of per-frame logic.
///
/// Only [`id`](System::id) and [`cycles`](System::cycles) are required; every
/// hook defaults to doing nothing.
pub trait System: AsAny {
    /// Stable identifier, unique within a scene (e.g. `"hearth:editor.base"`).
    fn id(&self) -> &str;

    fn cycles(&self) -> ProcessingCycles;

    /// Keep running while the scene is paused.
    fn run_when_paused(&self) -> bool {
        false
    }

    /// Called once when the system joins a scene, before it subscribes.
    fn initialize(&mut self, _scene: &mut Scene) -> Result<()> {
        Ok(())
    }

    fn subscribe_to_events(&mut self, _events: &mut EventBus) {}

    /// Drops every subscription owned by [`id`](System::id) by default.
    fn unsubscribe_from_events(&mut self, events: &mut EventBus) {
        events.unsubscribe_all(self.id());
    }

    /// Called right before each cycle hook.
    fn poll_resources(&mut self, _scene: &mut Scene) -> Result<()> {
        Ok(())
    }

    fn on_input(&mut self, _scene: &mut Scene) -> Result<()> {
        Ok(())
    }

    fn on_fixed_update(&mut self, _scene: &mut Scene) -> Result<()> {
        Ok(())
    }

    fn on_update(&mut self, _scene: &mut Scene) -> Result<()> {
        Ok(())
    }

    fn on_render(&mut self, _scene: &mut Scene) -> Result<()> {
        Ok(())
    }

    /// State written into scene snapshots.
    fn save_state(&self) -> Option<serde_json::Value> {
        None
    }

    fn load_state(&mut self, _state: serde_json::Value) -> Result<()> {
        Ok(())
    }
}

/// Dispatch the hook for `cycle`.
pub(crate) fn run_hook(system: &mut dyn System, cycle: ProcessingCycle, scene: &mut Scene) -> Result<()> {
    match cycle {
        ProcessingCycle::Input => system.on_input(scene),
        ProcessingCycle::FixedUpdate => system.on_fixed_update(scene),
        ProcessingCycle::Update => system.on_update(scene),
        ProcessingCycle::Render => system.on_render(scene),
    }
}

struct SystemSlot {
    id: String,
    cycles: ProcessingCycles,
    run_when_paused: bool,
    /// `None` while the system is running.
    system: Option<Box<dyn System>>,
}

/// A queued membership change.
pub(crate) enum PendingChange {
    Add(Box<dyn System>),
    Remove(String),
    Reorder { id: String, index: usize },
}

/// Ordered registry of the systems in one scene.
pub struct SystemMap {
    slots: Vec<SystemSlot>,
    per_cycle: [Vec<usize>; 4],
    pending: VecDeque<PendingChange>,
    state: SchedulerState,
}

impl SystemMap {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            per_cycle: Default::default(),
            pending: VecDeque::new(),
            state: SchedulerState::Idle,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.position(id).is_some()
    }

    /// System ids in registration order.
    pub fn ids(&self) -> Vec<&str> {
        self.slots.iter().map(|slot| slot.id.as_str()).collect()
    }

    /// Ids of the systems that run in `cycle`, in order.
    pub fn cycle_ids(&self, cycle: ProcessingCycle) -> Vec<&str> {
        self.per_cycle[cycle.index()]
            .iter()
            .map(|&slot| self.slots[slot].id.as_str())
            .collect()
    }

    /// Borrow a system by id as its concrete type. Returns `None` for the
    /// system that is currently running.
    pub fn get<S: System>(&self, id: &str) -> Option<&S> {
        let slot = &self.slots[self.position(id)?];
        slot.system.as_deref()?.as_any().downcast_ref()
    }

    pub fn get_mut<S: System>(&mut self, id: &str) -> Option<&mut S> {
        let position = self.position(id)?;
        self.slots[position]
            .system
            .as_deref_mut()?
            .as_any_mut()
            .downcast_mut()
    }

    /// Every system that is not currently running, in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &dyn System> {
        self.slots.iter().filter_map(|slot| slot.system.as_deref())
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// `true` if `id` is registered or waiting to be added.
    pub(crate) fn is_known(&self, id: &str) -> bool {
        self.contains(id) || self.pending_add(id)
    }

    pub(crate) fn pending_add(&self, id: &str) -> bool {
        self.pending
            .iter()
            .any(|change| matches!(change, PendingChange::Add(system) if system.id() == id))
    }

    pub(crate) fn set_state(&mut self, state: SchedulerState) {
        self.state = state;
    }

    pub(crate) fn enqueue(&mut self, change: PendingChange) {
        self.pending.push_back(change);
    }

    pub(crate) fn pop_pending(&mut self) -> Option<PendingChange> {
        self.pending.pop_front()
    }

    pub(crate) fn cycle_slots(&self, cycle: ProcessingCycle) -> Vec<usize> {
        self.per_cycle[cycle.index()].clone()
    }

    pub(crate) fn take(&mut self, slot: usize) -> Option<Box<dyn System>> {
        self.slots.get_mut(slot)?.system.take()
    }

    pub(crate) fn restore(&mut self, slot: usize, system: Box<dyn System>) {
        if let Some(entry) = self.slots.get_mut(slot) {
            entry.system = Some(system);
        }
    }

    pub(crate) fn runs_when_paused(&self, slot: usize) -> bool {
        self.slots.get(slot).is_some_and(|s| s.run_when_paused)
    }

    pub(crate) fn insert(&mut self, system: Box<dyn System>) -> Result<()> {
        if self.contains(system.id()) {
            return Err(EcsError::DuplicateSystem(system.id().to_string()));
        }
        self.slots.push(SystemSlot {
            id: system.id().to_string(),
            cycles: system.cycles(),
            run_when_paused: system.run_when_paused(),
            system: Some(system),
        });
        self.rebuild();
        Ok(())
    }

    pub(crate) fn remove(&mut self, id: &str) -> Option<Box<dyn System>> {
        let position = self.position(id)?;
        let slot = self.slots.remove(position);
        self.rebuild();
        slot.system
    }

    /// Move `id` to `index`, clamped to the end of the list.
    pub(crate) fn move_to(&mut self, id: &str, index: usize) -> Result<()> {
        let position = self
            .position(id)
            .ok_or_else(|| EcsError::UnknownSystem(id.to_string()))?;
        let slot = self.slots.remove(position);
        let index = index.min(self.slots.len());
        self.slots.insert(index, slot);
        self.rebuild();
        Ok(())
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.slots.iter().position(|slot| slot.id == id)
    }

    fn rebuild(&mut self) {
        for cycle in ProcessingCycle::ALL {
            self.per_cycle[cycle.index()] = self
                .slots
                .iter()
                .enumerate()
                .filter(|(_, slot)| slot.cycles.contains(cycle.flag()))
                .map(|(i, _)| i)
                .collect();
        }
    }
}

impl Default for SystemMap {
    fn default() -> Self {
        Self::new()
    }
}

pub type SystemConstructor = fn() -> Box<dyn System>;

/// Maps system identifiers to constructors, so snapshots can rebuild the
/// systems they name.
#[derive(Default)]
pub struct SystemRegistry {
    constructors: HashMap<String, SystemConstructor>,
}

impl SystemRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: impl Into<String>, constructor: SystemConstructor) {
        self.constructors.insert(id.into(), constructor);
    }

    /// Register `S` by its `Default` value.
    pub fn register_default<S: System + Default>(&mut self, id: impl Into<String>) {
        self.register(id, || Box::new(S::default()));
    }

    pub fn contains(&self, id: &str) -> bool {
        self.constructors.contains_key(id)
    }

    pub fn create(&self, id: &str) -> Result<Box<dyn System>> {
        let constructor = self
            .constructors
            .get(id)
            .ok_or_else(|| EcsError::UnregisteredSystem(id.to_string()))?;
        Ok(constructor())
    }
}
