//! # ComponentMap — Entities, Descriptors and Typed Stores
//!
//! The component map owns everything keyed by entity: the
//! [`EntityAllocator`], one [`ComponentStore`] per registered type, and the
//! descriptor table used by snapshots and inspector views.
//!
//! ```text
//! type_ids:    TypeId → ComponentTypeId
//! descriptors: [ComponentDescriptor]     (indexed by ComponentTypeId)
//! stores:      [Box<dyn AnyStore>]       (indexed by ComponentTypeId)
//! ```
//!
//! Types are registered explicitly with [`ComponentMap::register`], or
//! implicitly the first time they are used. Implicit registration produces a
//! non-serializable descriptor named after the type.
//!
//! ## Comparison
//!
//! Archetype worlds move whole rows between tables when the component set of
//! an entity changes. Here every type lives in its own sparse set, so adding
//! or removing one component never touches the others, and per-type deferral
//! (see [`component`](super::component)) stays local to one store.

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;

use super::component::{AnyStore, Component, ComponentDescriptor, ComponentStore, ComponentTypeId, short_type_name};
use super::entity::{EntityAllocator, EntityId};
use super::hierarchy::{Hierarchical, Name, Transform};
use super::query::{ComponentIterator, IterFlags};
use crate::error::{EcsError, Result};

pub struct ComponentMap {
    entities: EntityAllocator,
    type_ids: HashMap<TypeId, ComponentTypeId>,
    names: HashMap<String, ComponentTypeId>,
    descriptors: Vec<ComponentDescriptor>,
    stores: Vec<Box<dyn AnyStore>>,
}

impl ComponentMap {
    /// An empty map with the built-in hierarchy types registered.
    pub fn new() -> Self {
        let mut map = Self {
            entities: EntityAllocator::new(),
            type_ids: HashMap::new(),
            names: HashMap::new(),
            descriptors: Vec::new(),
            stores: Vec::new(),
        };
        map.register::<Hierarchical>(ComponentDescriptor::serde::<Hierarchical>("Hierarchical"));
        map.register::<Transform>(ComponentDescriptor::serde::<Transform>("Transform"));
        map.register::<Name>(ComponentDescriptor::serde::<Name>("Name"));
        map
    }

    // ── Registration ───────────────────────────────────────────────────────

    /// Register `T` under `descriptor`. Re-registering a type replaces its
    /// descriptor and keeps its stored values.
    pub fn register<T: Component>(&mut self, descriptor: ComponentDescriptor) -> ComponentTypeId {
        if let Some(&existing) = self.type_ids.get(&TypeId::of::<T>()) {
            let old = &self.descriptors[existing.index()];
            self.names.remove(old.name());
            self.names.insert(descriptor.name().to_string(), existing);
            self.descriptors[existing.index()] = descriptor;
            return existing;
        }

        let id = ComponentTypeId(self.descriptors.len() as u32);
        log::debug!("registered component `{}` as {:?}", descriptor.name(), id);
        self.type_ids.insert(TypeId::of::<T>(), id);
        self.names.insert(descriptor.name().to_string(), id);
        self.descriptors.push(descriptor);
        self.stores.push(Box::new(ComponentStore::<T>::new()));
        id
    }

    pub fn component_type_id<T: Component>(&self) -> Option<ComponentTypeId> {
        self.type_ids.get(&TypeId::of::<T>()).copied()
    }

    pub fn type_id_by_name(&self, name: &str) -> Option<ComponentTypeId> {
        self.names.get(name).copied()
    }

    pub fn descriptor(&self, id: ComponentTypeId) -> Option<&ComponentDescriptor> {
        self.descriptors.get(id.index())
    }

    pub fn descriptors(&self) -> impl Iterator<Item = (ComponentTypeId, &ComponentDescriptor)> {
        self.descriptors
            .iter()
            .enumerate()
            .map(|(i, d)| (ComponentTypeId(i as u32), d))
    }

    /// Registered name of `T`, or its short type name if unregistered.
    pub fn component_name<T: Component>(&self) -> String {
        match self.component_type_id::<T>() {
            Some(id) => self.descriptors[id.index()].name().to_string(),
            None => short_type_name(type_name::<T>()),
        }
    }

    fn ensure_registered<T: Component>(&mut self) -> ComponentTypeId {
        if let Some(id) = self.component_type_id::<T>() {
            return id;
        }
        let short = short_type_name(type_name::<T>());
        let name = if self.names.contains_key(&short) {
            type_name::<T>().to_string()
        } else {
            short
        };
        self.register::<T>(ComponentDescriptor::new(name))
    }

    // ── Typed store access ─────────────────────────────────────────────────

    pub fn store<T: Component>(&self) -> Option<&ComponentStore<T>> {
        let id = self.component_type_id::<T>()?;
        self.stores[id.index()].as_any().downcast_ref()
    }

    /// The store for `T`, registering the type if needed.
    ///
    /// # Panics
    ///
    /// Panics if the store registered for `T` holds another type, which
    /// would mean the type table is corrupt.
    pub fn store_mut<T: Component>(&mut self) -> &mut ComponentStore<T> {
        let id = self.ensure_registered::<T>();
        downcast_store_mut(self.stores[id.index()].as_mut())
    }

    // ── Entity lifecycle ───────────────────────────────────────────────────

    /// Allocate an entity and attach the default `Hierarchical`, `Transform`
    /// and `Name` components. The entity starts as an active root.
    pub fn create_entity(&mut self, name: impl Into<String>) -> EntityId {
        let id = self.entities.allocate();
        self.store_mut::<Hierarchical>().put(id, Hierarchical::default());
        self.store_mut::<Transform>().put(id, Transform::IDENTITY);
        self.store_mut::<Name>().put(id, Name(name.into()));
        log::debug!("created entity {id}");
        id
    }

    /// Delete an entity.
    ///
    /// The entity is unlinked from its parent. Its children are deleted too
    /// when `recursive` is set; otherwise they become roots. Every component
    /// is removed and the id is released, becoming eligible for reissue when
    /// `reclaimable` is set.
    pub fn delete_entity(&mut self, id: EntityId, reclaimable: bool, recursive: bool) -> Result<()> {
        if self.entities.is_deleted(id) {
            return Err(EcsError::EntityAlreadyDeleted(id));
        }
        if !self.entities.is_alive(id) {
            return Err(EcsError::DeadEntity(id));
        }

        self.detach(id)?;
        for child in self.children(id) {
            if recursive {
                self.delete_entity(child, reclaimable, true)?;
            } else {
                self.detach(child)?;
            }
        }

        self.remove_all_components(id);
        self.entities.release(id, reclaimable)?;
        log::debug!("deleted entity {id} (reclaimable: {reclaimable}, recursive: {recursive})");
        Ok(())
    }

    /// Return a reclaimable deleted id to service; the next
    /// [`create_entity`](Self::create_entity) reuses it unchanged.
    pub fn reclaim_entity(&mut self, id: EntityId) -> bool {
        self.entities.reclaim(id)
    }

    pub fn is_alive(&self, id: EntityId) -> bool {
        self.entities.is_alive(id)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.alive_count()
    }

    pub fn live_entities(&self) -> Vec<EntityId> {
        self.entities.live_ids()
    }

    pub fn entities(&self) -> &EntityAllocator {
        &self.entities
    }

    // ── Components ─────────────────────────────────────────────────────────

    pub fn create_component<T: Component>(&mut self, id: EntityId, value: T) -> Result<&mut T> {
        if !self.entities.is_alive(id) {
            return Err(EcsError::DeadEntity(id));
        }
        if self.has_component::<T>(id) {
            return Err(EcsError::DuplicateComponent {
                component: self.component_name::<T>(),
                entity: id,
            });
        }
        Ok(self.store_mut::<T>().insert(id, value))
    }

    pub fn has_component<T: Component>(&self, id: EntityId) -> bool {
        self.store::<T>().is_some_and(|s| s.contains(id))
    }

    pub fn try_get<T: Component>(&self, id: EntityId) -> Option<&T> {
        self.store::<T>()?.get(id)
    }

    pub fn try_get_mut<T: Component>(&mut self, id: EntityId) -> Option<&mut T> {
        let type_id = self.component_type_id::<T>()?;
        downcast_store_mut::<T>(self.stores[type_id.index()].as_mut()).get_mut(id)
    }

    pub fn get_component<T: Component>(&self, id: EntityId) -> Result<&T> {
        self.try_get(id).ok_or_else(|| self.missing::<T>(id))
    }

    pub fn get_component_mut<T: Component>(&mut self, id: EntityId) -> Result<&mut T> {
        let missing = self.missing::<T>(id);
        self.try_get_mut(id).ok_or(missing)
    }

    /// Borrow two distinct component types of one entity mutably.
    pub fn get_pair_mut<A: Component, B: Component>(&mut self, id: EntityId) -> Result<(&mut A, &mut B)> {
        self.pair_mut(id, false)
    }

    /// Paired borrow where `A` is read the way an open scan sees it, so a
    /// value whose removal is parked is still reachable.
    pub(crate) fn pair_mut<A: Component, B: Component>(
        &mut self,
        id: EntityId,
        scanned_first: bool,
    ) -> Result<(&mut A, &mut B)> {
        let a = self.ensure_registered::<A>();
        let b = self.ensure_registered::<B>();
        if a == b {
            return Err(EcsError::AliasedComponent(self.component_name::<A>()));
        }
        let missing_a = self.missing::<A>(id);
        let missing_b = self.missing::<B>(id);

        let (lo, hi) = (a.index().min(b.index()), a.index().max(b.index()));
        let (left, right) = self.stores.split_at_mut(hi);
        let (store_lo, store_hi) = (left[lo].as_mut(), right[0].as_mut());
        let (store_a, store_b) = if a.index() < b.index() {
            (store_lo, store_hi)
        } else {
            (store_hi, store_lo)
        };

        let store_a = downcast_store_mut::<A>(store_a);
        let value_a = if scanned_first {
            store_a.scan_get_mut(id)
        } else {
            store_a.get_mut(id)
        }
        .ok_or(missing_a)?;
        let value_b = downcast_store_mut::<B>(store_b).get_mut(id).ok_or(missing_b)?;
        Ok((value_a, value_b))
    }

    pub fn remove_component<T: Component>(&mut self, id: EntityId) -> bool {
        match self.component_type_id::<T>() {
            Some(type_id) => self.stores[type_id.index()].remove(id),
            None => false,
        }
    }

    /// Remove every component attached to `id`.
    pub fn remove_all_components(&mut self, id: EntityId) {
        for store in &mut self.stores {
            store.remove(id);
        }
    }

    pub fn component_count<T: Component>(&self) -> usize {
        self.store::<T>().map_or(0, |s| s.len())
    }

    /// Apply every store's parked additions and removals.
    pub fn flush(&mut self) {
        for store in &mut self.stores {
            store.flush();
        }
        log::trace!("flushed component stores");
    }

    // ── Scans ──────────────────────────────────────────────────────────────

    /// Open a cursor over every `T`. While the cursor lives, structural
    /// changes to `T` are deferred.
    pub fn create_iterator<T: Component>(&mut self, flags: IterFlags) -> ComponentIterator<T> {
        self.ensure_registered::<T>();
        ComponentIterator::new(self, flags)
    }

    /// Entities with a visible `T`, ascending.
    pub fn entities_with<T: Component>(&self) -> Vec<EntityId> {
        self.store::<T>().map_or_else(Vec::new, |s| s.visible_ids())
    }

    pub fn for_each<T: Component>(&mut self, flags: IterFlags, mut f: impl FnMut(EntityId, &T)) {
        let mut iter = self.create_iterator::<T>(flags);
        while iter.next(self) {
            if let (Some(id), Ok(value)) = (iter.entity_id(), iter.component(self)) {
                f(id, value);
            }
        }
    }

    pub fn for_each_mut<T: Component>(&mut self, flags: IterFlags, mut f: impl FnMut(EntityId, &mut T)) {
        let mut iter = self.create_iterator::<T>(flags);
        while iter.next(self) {
            if let (Some(id), Ok(value)) = (iter.entity_id(), iter.component_mut(self)) {
                f(id, value);
            }
        }
    }

    // ── Inspector ──────────────────────────────────────────────────────────

    /// The serializable components of `id` that are not hidden from the
    /// inspector, in registration order.
    pub fn inspect(&self, id: EntityId) -> Result<Vec<(String, serde_json::Value)>> {
        if !self.entities.is_alive(id) {
            return Err(EcsError::DeadEntity(id));
        }
        let mut out = Vec::new();
        for (index, descriptor) in self.descriptors.iter().enumerate() {
            if !descriptor.is_inspectable() {
                continue;
            }
            if let Some(value) = self.stores[index].get_any(id) {
                out.push((descriptor.name().to_string(), descriptor.serialize_value(value)?));
            }
        }
        Ok(out)
    }

    // ── Snapshot support ───────────────────────────────────────────────────

    /// Serialize every visible value of one type, ascending by entity.
    pub(crate) fn serialize_type(&self, type_id: ComponentTypeId) -> Result<Vec<(EntityId, serde_json::Value)>> {
        let descriptor = &self.descriptors[type_id.index()];
        let store = &self.stores[type_id.index()];
        let mut out = Vec::new();
        for id in store.visible_ids() {
            if let Some(value) = store.get_any(id) {
                out.push((id, descriptor.serialize_value(value)?));
            }
        }
        Ok(out)
    }

    /// Decode a value by its registered name without touching any store.
    pub(crate) fn decode_serialized(
        &self,
        name: &str,
        json: serde_json::Value,
    ) -> Result<(ComponentTypeId, Box<dyn Any>)> {
        let type_id = self
            .type_id_by_name(name)
            .ok_or_else(|| EcsError::UnknownComponentType(name.to_string()))?;
        let value: Box<dyn Any> = self.descriptors[type_id.index()].deserialize_value(json)?;
        // A descriptor built for another type decodes values its store can't hold.
        if !self.stores[type_id.index()].accepts(&*value) {
            return Err(EcsError::NotSerializable(name.to_string()));
        }
        Ok((type_id, value))
    }

    /// Insert a value produced by [`decode_serialized`](Self::decode_serialized).
    pub(crate) fn insert_decoded(&mut self, type_id: ComponentTypeId, id: EntityId, value: Box<dyn Any>) {
        if !self.stores[type_id.index()].insert_any(id, value) {
            log::warn!("dropped decoded value for {id}: store type changed since decoding");
        }
    }

    /// Drop every component and rebuild the allocator.
    pub(crate) fn reset_entities(&mut self, entities: EntityAllocator) {
        for store in &mut self.stores {
            store.clear();
        }
        self.entities = entities;
    }

    fn missing<T: Component>(&self, id: EntityId) -> EcsError {
        EcsError::MissingComponent {
            component: self.component_name::<T>(),
            entity: id,
        }
    }
}

impl Default for ComponentMap {
    fn default() -> Self {
        Self::new()
    }
}

fn downcast_store_mut<T: Component>(store: &mut dyn AnyStore) -> &mut ComponentStore<T> {
    store.as_any_mut().downcast_mut().unwrap_or_else(|| {
        panic!(
            "Component type mismatch: store does not hold `{}`",
            type_name::<T>()
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::component::ComponentFlags;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Health(i32);

    #[derive(Debug, PartialEq)]
    struct Velocity(f32, f32);

    #[test]
    fn create_entity_attaches_defaults() {
        let mut map = ComponentMap::new();
        let e = map.create_entity("Player");
        assert!(map.has_component::<Hierarchical>(e));
        assert!(map.has_component::<Transform>(e));
        assert_eq!(map.get_component::<Name>(e).unwrap().0, "Player");
        assert_eq!(map.parent(e), None);
    }

    #[test]
    fn duplicate_component_is_rejected() {
        let mut map = ComponentMap::new();
        let e = map.create_entity("e");
        map.create_component(e, Health(10)).unwrap();
        let err = map.create_component(e, Health(5)).unwrap_err();
        assert!(matches!(err, EcsError::DuplicateComponent { .. }));
        assert_eq!(map.get_component::<Health>(e).unwrap(), &Health(10));
    }

    #[test]
    fn recreate_after_remove() {
        let mut map = ComponentMap::new();
        let e = map.create_entity("e");
        map.create_component(e, Health(1)).unwrap();
        assert!(map.remove_component::<Health>(e));
        assert!(!map.remove_component::<Health>(e));
        map.create_component(e, Health(2)).unwrap();
        assert_eq!(map.get_component::<Health>(e).unwrap(), &Health(2));
    }

    #[test]
    fn component_on_dead_entity_fails() {
        let mut map = ComponentMap::new();
        let e = map.create_entity("e");
        map.delete_entity(e, true, false).unwrap();
        assert!(matches!(
            map.create_component(e, Health(1)),
            Err(EcsError::DeadEntity(_))
        ));
    }

    #[test]
    fn missing_component_names_the_type() {
        let mut map = ComponentMap::new();
        let e = map.create_entity("e");
        match map.get_component::<Velocity>(e) {
            Err(EcsError::MissingComponent { component, entity }) => {
                assert_eq!(component, "Velocity");
                assert_eq!(entity, e);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn pair_mut_borrows_two_types() {
        let mut map = ComponentMap::new();
        let e = map.create_entity("e");
        map.create_component(e, Health(3)).unwrap();
        map.create_component(e, Velocity(1.0, 0.0)).unwrap();
        {
            let (health, velocity) = map.get_pair_mut::<Health, Velocity>(e).unwrap();
            health.0 += 1;
            velocity.1 = 2.0;
        }
        {
            // Reverse order exercises the other split.
            let (velocity, health) = map.get_pair_mut::<Velocity, Health>(e).unwrap();
            velocity.0 = health.0 as f32;
        }
        assert_eq!(map.get_component::<Health>(e).unwrap(), &Health(4));
        assert_eq!(map.get_component::<Velocity>(e).unwrap(), &Velocity(4.0, 2.0));
        assert!(matches!(
            map.get_pair_mut::<Health, Health>(e),
            Err(EcsError::AliasedComponent(_))
        ));
    }

    #[test]
    fn remove_all_components_clears_entity() {
        let mut map = ComponentMap::new();
        let e = map.create_entity("e");
        map.create_component(e, Health(1)).unwrap();
        map.remove_all_components(e);
        assert!(!map.has_component::<Health>(e));
        assert!(!map.has_component::<Transform>(e));
    }

    #[test]
    fn entities_with_is_ascending() {
        let mut map = ComponentMap::new();
        let ids: Vec<_> = (0..4).map(|i| map.create_entity(format!("e{i}"))).collect();
        for &id in ids.iter().rev() {
            map.create_component(id, Health(0)).unwrap();
        }
        assert_eq!(map.entities_with::<Health>(), ids);
        assert_eq!(map.component_count::<Health>(), 4);
    }

    #[test]
    fn delete_and_reclaim_reuses_id() {
        let mut map = ComponentMap::new();
        let e = map.create_entity("e");
        map.delete_entity(e, true, false).unwrap();
        assert!(matches!(
            map.delete_entity(e, true, false),
            Err(EcsError::EntityAlreadyDeleted(_))
        ));
        assert!(map.reclaim_entity(e));
        let again = map.create_entity("again");
        assert_eq!(again, e);
        assert_eq!(map.get_component::<Name>(again).unwrap().0, "again");
    }

    #[test]
    fn inspect_respects_flags() {
        let mut map = ComponentMap::new();
        map.register::<Health>(ComponentDescriptor::serde::<Health>("Health"));
        map.register::<Velocity>(ComponentDescriptor::new("Velocity"));
        let e = map.create_entity("e");
        map.create_component(e, Health(7)).unwrap();
        map.create_component(e, Velocity(0.0, 0.0)).unwrap();

        let names: Vec<_> = map.inspect(e).unwrap().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["Hierarchical", "Transform", "Name", "Health"]);

        map.register::<Health>(
            ComponentDescriptor::serde::<Health>("Health").with_flags(ComponentFlags::HIDE_IN_INSPECTOR),
        );
        let names: Vec<_> = map.inspect(e).unwrap().into_iter().map(|(n, _)| n).collect();
        assert!(!names.contains(&"Health".to_string()));
    }

    #[test]
    fn auto_registered_type_uses_short_name() {
        let mut map = ComponentMap::new();
        let e = map.create_entity("e");
        map.create_component(e, Velocity(0.0, 0.0)).unwrap();
        let id = map.component_type_id::<Velocity>().unwrap();
        let descriptor = map.descriptor(id).unwrap();
        assert_eq!(descriptor.name(), "Velocity");
        assert!(!descriptor.is_serializable());
    }
}
