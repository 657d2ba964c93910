//! # Entity — 64-bit Identities with Epoch Reuse
//!
//! An [`EntityId`] is just a number. The [`ComponentMap`](super::component_map::ComponentMap)
//! maps ids to component values; the id itself carries no data.
//!
//! ## Layout
//!
//! ```text
//!  63            32 31             0
//! ┌────────────────┬────────────────┐
//! │     epoch      │   slot index   │
//! └────────────────┴────────────────┘
//! ```
//!
//! Slot indices come from a monotonically increasing counter. When a deleted
//! id is reissued, its slot is reused with the epoch bumped by one, so the
//! reissued value is `deleted + (1 << 32)`. Stale copies of the old id never
//! compare equal to the new one.
//!
//! ## Deletion record
//!
//! Every deleted id is appended to a deleted-ids record. Deleting an id that
//! is already in the record is a hard error: it means two owners both think
//! they are responsible for freeing the same entity.
//!
//! Deletions come in two flavours:
//!
//! - **reclaimable** — the slot may be reissued to a future `allocate()`,
//!   and until that happens the exact id may be resurrected with
//!   [`EntityAllocator::reclaim`] (editor undo relies on this).
//! - **non-reclaimable** — the slot is retired for good.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{EcsError, Result};

const EPOCH_SHIFT: u32 = 32;

/// An opaque entity identity.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(u64);

impl EntityId {
    fn new(index: u32, epoch: u32) -> Self {
        Self((u64::from(epoch) << EPOCH_SHIFT) | u64::from(index))
    }

    /// Rebuild an id from its raw bits.
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// The raw 64-bit value.
    pub const fn to_bits(self) -> u64 {
        self.0
    }

    /// Slot index (low 32 bits).
    pub const fn index(self) -> u32 {
        self.0 as u32
    }

    /// Reuse epoch (high 32 bits).
    pub const fn generation(self) -> u32 {
        (self.0 >> EPOCH_SHIFT) as u32
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({}v{})", self.index(), self.generation())
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index(), self.generation())
    }
}

/// One entry of the deleted-ids record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedId {
    pub id: EntityId,
    pub reclaimable: bool,
}

/// Issues entity ids and tracks deletion and reclaim eligibility.
///
/// ```text
/// epochs:    [0, 1, 0, 2]     ← current epoch of every slot ever issued
/// alive:     [T, F, T, F]
/// reusable:  [3]              ← slots whose last holder was deleted reclaimably
/// reclaimed: [1v1]            ← exact ids queued for resurrection
/// deleted:   [1v0, 3v1, 1v1]  ← deletion order
/// ```
pub struct EntityAllocator {
    epochs: Vec<u32>,
    alive: Vec<bool>,
    reusable: Vec<u32>,
    reclaimed: VecDeque<EntityId>,
    deleted: Vec<DeletedId>,
    /// Position of each id inside `deleted`, for O(1) duplicate detection.
    deleted_lookup: HashMap<EntityId, usize>,
}

impl EntityAllocator {
    pub fn new() -> Self {
        Self {
            epochs: Vec::new(),
            alive: Vec::new(),
            reusable: Vec::new(),
            reclaimed: VecDeque::new(),
            deleted: Vec::new(),
            deleted_lookup: HashMap::new(),
        }
    }

    /// Issue an id: a reclaimed id first, then a reissued reclaimable slot,
    /// then a fresh counter value.
    pub fn allocate(&mut self) -> EntityId {
        if let Some(id) = self.reclaimed.pop_front() {
            self.alive[id.index() as usize] = true;
            self.forget_deleted(id);
            return id;
        }

        if let Some(index) = self.reusable.pop() {
            let slot = index as usize;
            self.epochs[slot] += 1;
            self.alive[slot] = true;
            return EntityId::new(index, self.epochs[slot]);
        }

        let index = self.next_index();
        self.epochs.push(0);
        self.alive.push(true);
        EntityId::new(index, 0)
    }

    /// Mark a live id as deleted.
    ///
    /// # Errors
    ///
    /// [`EcsError::EntityAlreadyDeleted`] if the id is already in the deleted
    /// record, [`EcsError::DeadEntity`] if it was never live.
    pub fn release(&mut self, id: EntityId, reclaimable: bool) -> Result<()> {
        if self.deleted_lookup.contains_key(&id) {
            return Err(EcsError::EntityAlreadyDeleted(id));
        }
        if !self.is_alive(id) {
            return Err(EcsError::DeadEntity(id));
        }

        let slot = id.index() as usize;
        self.alive[slot] = false;
        self.deleted_lookup.insert(id, self.deleted.len());
        self.deleted.push(DeletedId { id, reclaimable });
        if reclaimable {
            self.reusable.push(id.index());
        }
        Ok(())
    }

    /// Queue a deleted id so the next [`allocate`](Self::allocate) returns it
    /// unchanged.
    ///
    /// Fails (logging a warning) unless the id was deleted reclaimably and its
    /// slot has not been reissued since.
    pub fn reclaim(&mut self, id: EntityId) -> bool {
        let Some(&position) = self.deleted_lookup.get(&id) else {
            log::warn!("cannot reclaim {id}: it is not in the deleted-ids record");
            return false;
        };
        if !self.deleted[position].reclaimable {
            log::warn!("cannot reclaim {id}: it was deleted as non-reclaimable");
            return false;
        }
        let slot = id.index() as usize;
        if self.epochs[slot] != id.generation() || self.alive[slot] {
            log::warn!(
                "cannot reclaim {id}: slot {} was reissued as {}",
                id.index(),
                EntityId::new(id.index(), self.epochs[slot])
            );
            return false;
        }
        if self.reclaimed.contains(&id) {
            log::warn!("cannot reclaim {id}: it is already queued for reuse");
            return false;
        }

        self.reusable.retain(|&index| index != id.index());
        self.reclaimed.push_back(id);
        true
    }

    /// Whether the id refers to a currently live entity.
    pub fn is_alive(&self, id: EntityId) -> bool {
        let slot = id.index() as usize;
        slot < self.epochs.len() && self.alive[slot] && self.epochs[slot] == id.generation()
    }

    /// Whether the id is in the deleted-ids record.
    pub fn is_deleted(&self, id: EntityId) -> bool {
        self.deleted_lookup.contains_key(&id)
    }

    pub fn alive_count(&self) -> usize {
        self.alive.iter().filter(|&&alive| alive).count()
    }

    /// The next fresh slot index the counter would hand out.
    pub fn next_index(&self) -> u32 {
        self.epochs.len() as u32
    }

    /// The deleted-ids record in deletion order.
    pub fn deleted_ids(&self) -> &[DeletedId] {
        &self.deleted
    }

    /// Every live id, ascending.
    pub fn live_ids(&self) -> Vec<EntityId> {
        self.alive
            .iter()
            .enumerate()
            .filter(|(_, alive)| **alive)
            .map(|(slot, _)| EntityId::new(slot as u32, self.epochs[slot]))
            .collect()
    }

    /// Rebuild allocator state from a snapshot.
    ///
    /// `live` lists every entity present in the snapshot. A slot's epoch is
    /// the highest epoch seen for it among the live and deleted ids.
    pub fn restore(&mut self, next_index: u32, deleted: &[DeletedId], live: &[EntityId]) -> Result<()> {
        *self = Self::new();
        self.epochs = vec![0; next_index as usize];
        self.alive = vec![false; next_index as usize];

        for entry in deleted {
            let slot = entry.id.index() as usize;
            if slot >= self.epochs.len() {
                return Err(EcsError::DeadEntity(entry.id));
            }
            if self.deleted_lookup.contains_key(&entry.id) {
                return Err(EcsError::EntityAlreadyDeleted(entry.id));
            }
            self.epochs[slot] = self.epochs[slot].max(entry.id.generation());
            self.deleted_lookup.insert(entry.id, self.deleted.len());
            self.deleted.push(*entry);
        }

        for &id in live {
            let slot = id.index() as usize;
            if slot >= self.epochs.len() {
                return Err(EcsError::DeadEntity(id));
            }
            self.epochs[slot] = self.epochs[slot].max(id.generation());
            self.alive[slot] = true;
        }

        // A reclaimable deletion is reusable only if nothing took its slot
        // afterwards.
        for entry in &self.deleted {
            let slot = entry.id.index() as usize;
            if entry.reclaimable && !self.alive[slot] && self.epochs[slot] == entry.id.generation() {
                self.reusable.push(entry.id.index());
            }
        }
        Ok(())
    }

    fn forget_deleted(&mut self, id: EntityId) {
        if let Some(position) = self.deleted_lookup.remove(&id) {
            self.deleted.remove(position);
            for index in self.deleted_lookup.values_mut() {
                if *index > position {
                    *index -= 1;
                }
            }
        }
    }
}

impl Default for EntityAllocator {
    fn default() -> Self {
        Self::new()
    }
}
