//! # Query — Cursor Iteration over One Component Type
//!
//! [`ComponentIterator`] is a cursor, not a borrowing [`Iterator`]: it keeps
//! a snapshot of entity ids plus a position, and every accessor takes the
//! [`ComponentMap`] explicitly. That lets a system walk every `T` while it
//! creates, removes and mutates components through the same map.
//!
//! ```ignore
//! let mut iter = map.create_iterator::<Health>(IterFlags::ORDERED);
//! while iter.next(&map) {
//!     if iter.component(&map)?.0 <= 0 {
//!         let id = iter.entity_id().unwrap();
//!         map.remove_component::<Health>(id); // deferred until flush
//!     }
//! }
//! ```
//!
//! The iterator owns the store's scan token. While it is alive, additions
//! and removals of `T` are parked (see [`component`](super::component)),
//! so the walk sees a stable population.

use std::marker::PhantomData;
use std::rc::Rc;

use bitflags::bitflags;

use super::component::Component;
use super::component_map::ComponentMap;
use super::entity::EntityId;
use crate::error::{EcsError, Result};

bitflags! {
    /// Iteration options.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct IterFlags: u8 {
        /// Visit entities in ascending id order instead of storage order.
        const ORDERED = 1 << 0;
        /// Also visit entities that are inactive in the hierarchy.
        const INCLUDE_INACTIVE = 1 << 1;
    }
}

impl IterFlags {
    pub const NONE: Self = Self::empty();
}

pub struct ComponentIterator<T: Component> {
    flags: IterFlags,
    ids: Vec<EntityId>,
    cursor: usize,
    current: Option<EntityId>,
    scan: Option<Rc<()>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Component> ComponentIterator<T> {
    pub(crate) fn new(map: &ComponentMap, flags: IterFlags) -> Self {
        let mut iter = Self {
            flags,
            ids: Vec::new(),
            cursor: 0,
            current: None,
            scan: None,
            _marker: PhantomData,
        };
        iter.reset(map);
        iter
    }

    pub fn flags(&self) -> IterFlags {
        self.flags
    }

    /// Rewind to before the first element and re-snapshot the store.
    pub fn reset(&mut self, map: &ComponentMap) {
        self.cursor = 0;
        self.current = None;
        match map.store::<T>() {
            Some(store) => {
                self.ids = store.scan_ids(self.flags.contains(IterFlags::ORDERED));
                self.scan = Some(store.scan_token());
            }
            None => {
                self.ids.clear();
                self.scan = None;
            }
        }
    }

    /// Advance to the next element. Returns `false` once exhausted.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self, map: &ComponentMap) -> bool {
        let Some(store) = map.store::<T>() else {
            self.current = None;
            return false;
        };
        while let Some(&id) = self.ids.get(self.cursor) {
            self.cursor += 1;
            // Gone after a flush since the snapshot was taken.
            if store.scan_get(id).is_none() {
                continue;
            }
            if !self.flags.contains(IterFlags::INCLUDE_INACTIVE) && !map.is_active_in_hierarchy(id) {
                continue;
            }
            self.current = Some(id);
            return true;
        }
        self.current = None;
        false
    }

    pub fn entity_id(&self) -> Option<EntityId> {
        self.current
    }

    pub fn component<'m>(&self, map: &'m ComponentMap) -> Result<&'m T> {
        let id = self.position()?;
        map.store::<T>()
            .and_then(|s| s.scan_get(id))
            .ok_or_else(|| missing::<T>(map, id))
    }

    pub fn component_mut<'m>(&self, map: &'m mut ComponentMap) -> Result<&'m mut T> {
        let id = self.position()?;
        let missing = missing::<T>(map, id);
        map.store_mut::<T>().scan_get_mut(id).ok_or(missing)
    }

    /// Whether the current entity also has a `U`.
    pub fn has_co_component<U: Component>(&self, map: &ComponentMap) -> bool {
        self.current.is_some_and(|id| map.has_component::<U>(id))
    }

    pub fn co_component<'m, U: Component>(&self, map: &'m ComponentMap) -> Result<&'m U> {
        map.get_component::<U>(self.position()?)
    }

    pub fn co_component_mut<'m, U: Component>(&self, map: &'m mut ComponentMap) -> Result<&'m mut U> {
        map.get_component_mut::<U>(self.position()?)
    }

    /// Borrow the current `T` and a co-component `U` mutably at once.
    pub fn with_co_component_mut<U: Component, R>(
        &self,
        map: &mut ComponentMap,
        f: impl FnOnce(&mut T, &mut U) -> R,
    ) -> Result<R> {
        let (value, co) = map.pair_mut::<T, U>(self.position()?, true)?;
        Ok(f(value, co))
    }

    fn position(&self) -> Result<EntityId> {
        self.current.ok_or(EcsError::IteratorNotPositioned)
    }
}

fn missing<T: Component>(map: &ComponentMap, id: EntityId) -> EcsError {
    EcsError::MissingComponent {
        component: map.component_name::<T>(),
        entity: id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Score(u32);

    #[derive(Debug, PartialEq)]
    struct Bonus(u32);

    fn map_with_scores(n: u32) -> (ComponentMap, Vec<EntityId>) {
        let mut map = ComponentMap::new();
        let ids: Vec<_> = (0..n).map(|i| map.create_entity(format!("e{i}"))).collect();
        for (i, &id) in ids.iter().enumerate() {
            map.create_component(id, Score(i as u32)).unwrap();
        }
        (map, ids)
    }

    #[test]
    fn accessors_require_position() {
        let (mut map, _) = map_with_scores(1);
        let mut iter = map.create_iterator::<Score>(IterFlags::NONE);
        assert!(matches!(iter.component(&map), Err(EcsError::IteratorNotPositioned)));
        assert!(iter.next(&map));
        assert!(iter.component(&map).is_ok());
        assert!(!iter.next(&map));
        assert_eq!(iter.entity_id(), None);
        assert!(matches!(iter.component(&map), Err(EcsError::IteratorNotPositioned)));
    }

    #[test]
    fn ordered_iteration_is_ascending() {
        let mut map = ComponentMap::new();
        let ids: Vec<_> = (0..5).map(|i| map.create_entity(format!("e{i}"))).collect();
        for &id in ids.iter().rev() {
            map.create_component(id, Score(0)).unwrap();
        }
        let mut seen = Vec::new();
        let mut iter = map.create_iterator::<Score>(IterFlags::ORDERED);
        while iter.next(&map) {
            seen.push(iter.entity_id().unwrap());
        }
        assert_eq!(seen, ids);
    }

    #[test]
    fn additions_during_scan_are_invisible_to_it() {
        let (mut map, ids) = map_with_scores(2);
        let late = map.create_entity("late");
        let mut visited = 0;
        let mut iter = map.create_iterator::<Score>(IterFlags::ORDERED);
        while iter.next(&map) {
            visited += 1;
            if !map.has_component::<Score>(late) {
                map.create_component(late, Score(99)).unwrap();
                assert_eq!(map.get_component::<Score>(late).unwrap(), &Score(99));
            }
        }
        assert_eq!(visited, ids.len());
        drop(iter);
        map.flush();

        let mut count = 0;
        map.for_each::<Score>(IterFlags::NONE, |_, _| count += 1);
        assert_eq!(count, 3);
    }

    #[test]
    fn removals_during_scan_still_yield() {
        let (mut map, ids) = map_with_scores(3);
        let mut seen = Vec::new();
        let mut iter = map.create_iterator::<Score>(IterFlags::ORDERED);
        while iter.next(&map) {
            let id = iter.entity_id().unwrap();
            seen.push(iter.component(&map).unwrap().0);
            // Remove the last entity from the first element.
            if id == ids[0] {
                assert!(map.remove_component::<Score>(ids[2]));
                assert!(!map.has_component::<Score>(ids[2]));
            }
        }
        assert_eq!(seen, [0, 1, 2]);
        drop(iter);
        map.flush();
        assert_eq!(map.component_count::<Score>(), 2);
    }

    #[test]
    fn flush_mid_scan_skips_removed() {
        let (mut map, ids) = map_with_scores(3);
        let mut iter = map.create_iterator::<Score>(IterFlags::ORDERED);
        assert!(iter.next(&map));
        map.remove_component::<Score>(ids[1]);
        map.flush();
        assert!(iter.next(&map));
        assert_eq!(iter.entity_id(), Some(ids[2]));
    }

    #[test]
    fn inactive_entities_are_skipped_unless_requested() {
        let (mut map, ids) = map_with_scores(3);
        map.set_active(ids[1], false).unwrap();

        let mut count = 0;
        map.for_each::<Score>(IterFlags::NONE, |_, _| count += 1);
        assert_eq!(count, 2);

        let mut count = 0;
        map.for_each::<Score>(IterFlags::INCLUDE_INACTIVE, |_, _| count += 1);
        assert_eq!(count, 3);
    }

    #[test]
    fn co_components() {
        let (mut map, ids) = map_with_scores(2);
        map.create_component(ids[1], Bonus(10)).unwrap();
        let mut iter = map.create_iterator::<Score>(IterFlags::ORDERED);
        while iter.next(&map) {
            if iter.has_co_component::<Bonus>(&map) {
                iter.with_co_component_mut::<Bonus, _>(&mut map, |score, bonus| {
                    score.0 += bonus.0;
                    bonus.0 = 0;
                })
                .unwrap();
            } else {
                assert!(iter.co_component::<Bonus>(&map).is_err());
            }
        }
        drop(iter);
        assert_eq!(map.get_component::<Score>(ids[1]).unwrap(), &Score(11));
        assert_eq!(map.get_component::<Bonus>(ids[1]).unwrap(), &Bonus(0));
    }

    #[test]
    fn reset_rewinds_and_resnapshots() {
        let (mut map, _) = map_with_scores(2);
        let mut iter = map.create_iterator::<Score>(IterFlags::NONE);
        while iter.next(&map) {}
        let extra = map.create_entity("extra");
        map.create_component(extra, Score(5)).unwrap();
        map.flush();
        iter.reset(&map);
        let mut count = 0;
        while iter.next(&map) {
            count += 1;
        }
        assert_eq!(count, 3);
    }

    #[test]
    fn for_each_mut_writes() {
        let (mut map, ids) = map_with_scores(3);
        map.for_each_mut::<Score>(IterFlags::NONE, |_, s| s.0 *= 2);
        assert_eq!(map.get_component::<Score>(ids[2]).unwrap(), &Score(4));
    }
}
