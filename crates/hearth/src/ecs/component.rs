//! # Component — Typed Sparse-Set Storage with Deferred Visibility
//!
//! Components are plain data keyed by `(type, entity)`. Each component type
//! gets its own [`ComponentStore`], a sparse set:
//!
//! ```text
//! dense: [T; n]          ← values, packed
//! ids:   [EntityId; n]   ← owner of dense[i]
//! slots: EntityId → i    ← O(1) lookup
//! ```
//!
//! ## Deferred visibility
//!
//! A [`ComponentIterator`](super::query::ComponentIterator) holds a clone of
//! the store's *scan token*. While any token is outstanding the store is
//! "scanning", and structural changes are parked instead of applied:
//!
//! - additions go to `staged`. They are reachable through `get`/`contains`,
//!   but are not part of the dense array an open scan walks.
//! - removals go to `doomed`. They are hidden from `get`/`contains`
//!   immediately, but the value stays in the dense array so the open scan
//!   still yields it.
//!
//! [`ComponentStore::flush`] applies removals first, then merges staged
//! additions in ascending id order. Once the last scan is gone, the next
//! structural change flushes lazily, so nothing stays parked forever.
//!
//! ## Descriptors
//!
//! Rather than reflecting over types at runtime, every component type is
//! described by an explicit [`ComponentDescriptor`]: a name, [`ComponentFlags`]
//! and optional serde function pointers. Snapshots and inspector views go
//! through these tables only.

use std::any::{Any, type_name};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::rc::Rc;

use bitflags::bitflags;
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::entity::EntityId;
use crate::error::{EcsError, Result};

/// Marker trait for component values. Every `'static` type qualifies.
pub trait Component: 'static {}

impl<T: 'static> Component for T {}

/// Interned integer identity of a component type, assigned at registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentTypeId(pub(crate) u32);

impl ComponentTypeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

bitflags! {
    /// Per-type metadata flags.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct ComponentFlags: u8 {
        /// Never written to snapshots.
        const DO_NOT_SERIALIZE = 1 << 0;
        /// Left out of [`ComponentMap::inspect`](super::component_map::ComponentMap::inspect).
        const HIDE_IN_INSPECTOR = 1 << 1;
    }
}

type SerializeFn = fn(&dyn Any) -> Result<serde_json::Value>;
type DeserializeFn = fn(serde_json::Value) -> Result<Box<dyn Any>>;

/// Descriptor table entry for one component type.
#[derive(Clone, Debug)]
pub struct ComponentDescriptor {
    name: String,
    flags: ComponentFlags,
    serialize: Option<SerializeFn>,
    deserialize: Option<DeserializeFn>,
}

impl ComponentDescriptor {
    /// A descriptor with no serde support.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            flags: ComponentFlags::empty(),
            serialize: None,
            deserialize: None,
        }
    }

    /// A descriptor whose values round-trip through serde.
    pub fn serde<T>(name: impl Into<String>) -> Self
    where
        T: Serialize + DeserializeOwned + 'static,
    {
        Self {
            name: name.into(),
            flags: ComponentFlags::empty(),
            serialize: Some(|any: &dyn Any| {
                let value = any
                    .downcast_ref::<T>()
                    .ok_or_else(|| EcsError::NotSerializable(type_name::<T>().to_string()))?;
                Ok(serde_json::to_value(value)?)
            }),
            deserialize: Some(|json: serde_json::Value| {
                let value: T = serde_json::from_value(json)?;
                let boxed: Box<dyn Any> = Box::new(value);
                Ok(boxed)
            }),
        }
    }

    pub fn with_flags(mut self, flags: ComponentFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn flags(&self) -> ComponentFlags {
        self.flags
    }

    /// Whether values of this type are written to snapshots.
    pub fn is_serializable(&self) -> bool {
        self.serialize.is_some()
            && self.deserialize.is_some()
            && !self.flags.contains(ComponentFlags::DO_NOT_SERIALIZE)
    }

    /// Whether values of this type appear in inspector views.
    pub fn is_inspectable(&self) -> bool {
        self.serialize.is_some() && !self.flags.contains(ComponentFlags::HIDE_IN_INSPECTOR)
    }

    pub(crate) fn serialize_value(&self, value: &dyn Any) -> Result<serde_json::Value> {
        let serialize = self
            .serialize
            .ok_or_else(|| EcsError::NotSerializable(self.name.clone()))?;
        serialize(value)
    }

    pub(crate) fn deserialize_value(&self, json: serde_json::Value) -> Result<Box<dyn Any>> {
        let deserialize = self
            .deserialize
            .ok_or_else(|| EcsError::NotSerializable(self.name.clone()))?;
        deserialize(json)
    }
}

/// Storage for every component of one type.
pub struct ComponentStore<T> {
    dense: Vec<T>,
    ids: Vec<EntityId>,
    slots: HashMap<EntityId, usize>,
    staged: BTreeMap<EntityId, T>,
    doomed: BTreeSet<EntityId>,
    scan_token: Rc<()>,
}

impl<T: Component> ComponentStore<T> {
    pub fn new() -> Self {
        Self {
            dense: Vec::new(),
            ids: Vec::new(),
            slots: HashMap::new(),
            staged: BTreeMap::new(),
            doomed: BTreeSet::new(),
            scan_token: Rc::new(()),
        }
    }

    /// `true` while at least one iterator over this store is alive.
    pub fn is_scanning(&self) -> bool {
        Rc::strong_count(&self.scan_token) > 1
    }

    /// `true` if additions or removals are parked, waiting for a flush.
    pub fn has_pending(&self) -> bool {
        !self.staged.is_empty() || !self.doomed.is_empty()
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.staged.contains_key(&id) || (self.slots.contains_key(&id) && !self.doomed.contains(&id))
    }

    pub fn get(&self, id: EntityId) -> Option<&T> {
        if let Some(value) = self.staged.get(&id) {
            return Some(value);
        }
        if self.doomed.contains(&id) {
            return None;
        }
        self.slots.get(&id).map(|&slot| &self.dense[slot])
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut T> {
        if let Some(value) = self.staged.get_mut(&id) {
            return Some(value);
        }
        if self.doomed.contains(&id) {
            return None;
        }
        self.slots.get(&id).map(|&slot| &mut self.dense[slot])
    }

    /// Insert a value that is not already present. Callers check
    /// [`contains`](Self::contains) first.
    pub(crate) fn insert(&mut self, id: EntityId, value: T) -> &mut T {
        if self.is_scanning() {
            return match self.staged.entry(id) {
                Entry::Vacant(vacant) => vacant.insert(value),
                Entry::Occupied(mut occupied) => {
                    occupied.insert(value);
                    occupied.into_mut()
                }
            };
        }
        self.flush();
        self.push(id, value)
    }

    /// Insert or overwrite.
    pub(crate) fn put(&mut self, id: EntityId, value: T) -> &mut T {
        self.remove(id);
        self.insert(id, value)
    }

    pub fn remove(&mut self, id: EntityId) -> bool {
        if self.staged.remove(&id).is_some() {
            return true;
        }
        if !self.slots.contains_key(&id) || self.doomed.contains(&id) {
            return false;
        }
        if self.is_scanning() {
            self.doomed.insert(id);
        } else {
            self.flush();
            self.swap_remove(id);
        }
        true
    }

    /// Apply parked removals, then merge staged additions.
    pub fn flush(&mut self) {
        if !self.has_pending() {
            return;
        }
        for id in std::mem::take(&mut self.doomed) {
            self.swap_remove(id);
        }
        for (id, value) in std::mem::take(&mut self.staged) {
            match self.slots.get(&id) {
                Some(&slot) => self.dense[slot] = value,
                None => {
                    self.push(id, value);
                }
            }
        }
    }

    /// Number of components visible to `get`/`contains`.
    pub fn len(&self) -> usize {
        self.dense.len() - self.doomed.len() + self.staged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Owners of visible components, ascending.
    pub fn visible_ids(&self) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self
            .ids
            .iter()
            .copied()
            .filter(|id| !self.doomed.contains(id))
            .chain(self.staged.keys().copied())
            .collect();
        ids.sort_unstable();
        ids
    }

    pub(crate) fn scan_token(&self) -> Rc<()> {
        Rc::clone(&self.scan_token)
    }

    /// Owners of the dense array, which is what an iterator walks.
    pub(crate) fn scan_ids(&self, ordered: bool) -> Vec<EntityId> {
        let mut ids = self.ids.clone();
        if ordered {
            ids.sort_unstable();
        }
        ids
    }

    /// Dense-array access that ignores parked removals.
    pub(crate) fn scan_get(&self, id: EntityId) -> Option<&T> {
        self.slots.get(&id).map(|&slot| &self.dense[slot])
    }

    pub(crate) fn scan_get_mut(&mut self, id: EntityId) -> Option<&mut T> {
        self.slots.get(&id).map(|&slot| &mut self.dense[slot])
    }

    fn push(&mut self, id: EntityId, value: T) -> &mut T {
        let slot = self.dense.len();
        self.dense.push(value);
        self.ids.push(id);
        self.slots.insert(id, slot);
        &mut self.dense[slot]
    }

    fn swap_remove(&mut self, id: EntityId) {
        let Some(slot) = self.slots.remove(&id) else {
            return;
        };
        self.dense.swap_remove(slot);
        self.ids.swap_remove(slot);
        if slot < self.ids.len() {
            self.slots.insert(self.ids[slot], slot);
        }
    }
}

impl<T: Component> Default for ComponentStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Type-erased view of a [`ComponentStore`], used by the component map for
/// operations that do not know `T` (entity deletion, flushing, snapshots).
pub(crate) trait AnyStore {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn contains(&self, id: EntityId) -> bool;
    fn remove(&mut self, id: EntityId) -> bool;
    fn flush(&mut self);
    fn visible_ids(&self) -> Vec<EntityId>;
    fn get_any(&self, id: EntityId) -> Option<&dyn Any>;
    /// Whether `value` is the type this store holds.
    fn accepts(&self, value: &dyn Any) -> bool;
    /// Insert a boxed value; returns `false` if the box holds the wrong type.
    fn insert_any(&mut self, id: EntityId, value: Box<dyn Any>) -> bool;
    fn clear(&mut self);
}

impl<T: Component> AnyStore for ComponentStore<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn contains(&self, id: EntityId) -> bool {
        ComponentStore::contains(self, id)
    }

    fn remove(&mut self, id: EntityId) -> bool {
        ComponentStore::remove(self, id)
    }

    fn flush(&mut self) {
        ComponentStore::flush(self);
    }

    fn visible_ids(&self) -> Vec<EntityId> {
        ComponentStore::visible_ids(self)
    }

    fn get_any(&self, id: EntityId) -> Option<&dyn Any> {
        self.get(id).map(|value| value as &dyn Any)
    }

    fn accepts(&self, value: &dyn Any) -> bool {
        value.is::<T>()
    }

    fn insert_any(&mut self, id: EntityId, value: Box<dyn Any>) -> bool {
        match value.downcast::<T>() {
            Ok(value) => {
                self.put(id, *value);
                true
            }
            Err(_) => false,
        }
    }

    fn clear(&mut self) {
        self.dense.clear();
        self.ids.clear();
        self.slots.clear();
        self.staged.clear();
        self.doomed.clear();
    }
}

/// Strip the module path from a fully-qualified type name
/// (e.g. `my_game::components::Health` → `Health`).
pub(crate) fn short_type_name(full: &str) -> String {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(index: u64) -> EntityId {
        EntityId::from_bits(index)
    }

    #[test]
    fn insert_get_remove() {
        let mut store = ComponentStore::new();
        store.insert(id(1), 10u32);
        store.insert(id(2), 20u32);
        assert_eq!(store.get(id(1)), Some(&10));
        assert!(store.remove(id(1)));
        assert!(!store.remove(id(1)));
        assert!(!store.contains(id(1)));
        assert_eq!(store.get(id(2)), Some(&20));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn swap_remove_keeps_slots_consistent() {
        let mut store = ComponentStore::new();
        for i in 0..5 {
            store.insert(id(i), i as u32 * 10);
        }
        store.remove(id(0));
        store.remove(id(3));
        for i in [1, 2, 4] {
            assert_eq!(store.get(id(i)), Some(&(i as u32 * 10)));
        }
    }

    #[test]
    fn scan_parks_additions() {
        let mut store = ComponentStore::new();
        store.insert(id(1), 1u8);
        let token = store.scan_token();
        assert!(store.is_scanning());

        store.insert(id(2), 2u8);
        assert!(store.contains(id(2)));
        assert_eq!(store.scan_ids(false), vec![id(1)]);

        drop(token);
        store.flush();
        assert_eq!(store.scan_ids(true), vec![id(1), id(2)]);
    }

    #[test]
    fn scan_parks_removals() {
        let mut store = ComponentStore::new();
        store.insert(id(1), 1u8);
        let token = store.scan_token();

        assert!(store.remove(id(1)));
        assert!(!store.contains(id(1)));
        assert_eq!(store.scan_get(id(1)), Some(&1));

        drop(token);
        store.flush();
        assert_eq!(store.scan_get(id(1)), None);
        assert!(store.is_empty());
    }

    #[test]
    fn recreate_after_parked_remove() {
        let mut store = ComponentStore::new();
        store.insert(id(1), 1u8);
        let token = store.scan_token();
        store.remove(id(1));
        assert!(!store.contains(id(1)));
        store.insert(id(1), 9u8);
        assert_eq!(store.get(id(1)), Some(&9));
        // The open scan still sees the old value.
        assert_eq!(store.scan_get(id(1)), Some(&1));
        drop(token);
        store.flush();
        assert_eq!(store.get(id(1)), Some(&9));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn lazy_flush_after_scan_ends() {
        let mut store = ComponentStore::new();
        let token = store.scan_token();
        store.insert(id(3), 3u8);
        drop(token);
        assert!(store.has_pending());
        store.insert(id(4), 4u8);
        assert!(!store.has_pending());
        assert_eq!(store.scan_ids(true), vec![id(3), id(4)]);
    }

    #[test]
    fn put_overwrites() {
        let mut store = ComponentStore::new();
        store.put(id(1), 1u8);
        store.put(id(1), 2u8);
        assert_eq!(store.get(id(1)), Some(&2));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn drop_called_on_remove() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        static DROP_COUNT: AtomicUsize = AtomicUsize::new(0);

        struct Tracked;
        impl Drop for Tracked {
            fn drop(&mut self) {
                DROP_COUNT.fetch_add(1, Ordering::SeqCst);
            }
        }

        DROP_COUNT.store(0, Ordering::SeqCst);
        let mut store = ComponentStore::new();
        store.insert(id(1), Tracked);
        store.insert(id(2), Tracked);
        store.remove(id(1));
        assert_eq!(DROP_COUNT.load(Ordering::SeqCst), 1);
        drop(store);
        assert_eq!(DROP_COUNT.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn descriptor_round_trips_through_json() {
        let descriptor = ComponentDescriptor::serde::<(u32, String)>("Pair");
        let value = (7u32, "seven".to_string());
        let json = descriptor.serialize_value(&value).unwrap();
        let back = descriptor.deserialize_value(json).unwrap();
        assert_eq!(back.downcast_ref::<(u32, String)>(), Some(&value));
        assert!(descriptor.is_serializable());
        assert!(!ComponentDescriptor::new("Opaque").is_serializable());
    }

    #[test]
    fn descriptor_flags_gate_serialization() {
        let hidden = ComponentDescriptor::serde::<u8>("Cache")
            .with_flags(ComponentFlags::DO_NOT_SERIALIZE | ComponentFlags::HIDE_IN_INSPECTOR);
        assert!(!hidden.is_serializable());
        assert!(!hidden.is_inspectable());
    }

    #[test]
    fn short_names() {
        assert_eq!(short_type_name("my_game::Health"), "Health");
        assert_eq!(short_type_name("my_game::Wrapper<alloc::string::String>"), "Wrapper");
        assert_eq!(short_type_name("u32"), "u32");
    }
}
