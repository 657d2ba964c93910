//! # Snapshots — Saving and Loading Scenes
//!
//! A [`SceneSnapshot`] is a member tree: allocator state, the ordered list of
//! systems with their saved state, and every serializable component grouped
//! by registered type name.
//!
//! ```json
//! {
//!   "nextEntityId": 3,
//!   "deletedIds": [{ "id": 1, "reclaimable": true }],
//!   "entities": [0, 2],
//!   "systems": [{ "id": "hearth:editor.base", "state": null }],
//!   "components": {
//!     "Name": [{ "entity": 0, "value": "Camera" }, { "entity": 2, "value": "Light" }]
//!   }
//! }
//! ```
//!
//! The same tree is written either as JSON or as MessagePack with named
//! fields ([`SnapshotFormat`]). Readers ignore members they don't know.
//! Unknown component type names and system ids are errors.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::ecs::entity::{DeletedId, EntityAllocator, EntityId};
use crate::ecs::system::{System, SystemRegistry};
use crate::error::{EcsError, Result};
use crate::scene::Scene;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneSnapshot {
    pub next_entity_id: u32,
    #[serde(default)]
    pub deleted_ids: Vec<DeletedId>,
    /// Every live entity, including ones without serializable components.
    #[serde(default)]
    pub entities: Vec<EntityId>,
    #[serde(default)]
    pub systems: Vec<SystemSnapshot>,
    #[serde(default)]
    pub components: BTreeMap<String, Vec<ComponentEntry>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SystemSnapshot {
    pub id: String,
    #[serde(default)]
    pub state: Option<serde_json::Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ComponentEntry {
    pub entity: EntityId,
    pub value: serde_json::Value,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SnapshotFormat {
    Json,
    /// MessagePack with named fields.
    Binary,
}

impl SnapshotFormat {
    /// `.json` files are JSON, everything else is binary.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => SnapshotFormat::Json,
            _ => SnapshotFormat::Binary,
        }
    }
}

pub fn encode(snapshot: &SceneSnapshot, format: SnapshotFormat) -> Result<Vec<u8>> {
    match format {
        SnapshotFormat::Json => Ok(serde_json::to_vec_pretty(snapshot)?),
        SnapshotFormat::Binary => Ok(rmp_serde::to_vec_named(snapshot)?),
    }
}

pub fn decode(bytes: &[u8], format: SnapshotFormat) -> Result<SceneSnapshot> {
    match format {
        SnapshotFormat::Json => Ok(serde_json::from_slice(bytes)?),
        SnapshotFormat::Binary => Ok(rmp_serde::from_slice(bytes)?),
    }
}

pub fn save_to_file(snapshot: &SceneSnapshot, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let bytes = encode(snapshot, SnapshotFormat::from_path(path))?;
    std::fs::write(path, bytes)?;
    log::info!("saved scene snapshot to {}", path.display());
    Ok(())
}

pub fn load_from_file(path: impl AsRef<Path>) -> Result<SceneSnapshot> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)?;
    let snapshot = decode(&bytes, SnapshotFormat::from_path(path))?;
    log::info!("loaded scene snapshot from {}", path.display());
    Ok(snapshot)
}

impl Scene {
    /// Capture allocator state, systems and serializable components.
    pub fn snapshot(&self) -> Result<SceneSnapshot> {
        let map = self.components();
        let mut components = BTreeMap::new();
        for (type_id, descriptor) in map.descriptors() {
            if !descriptor.is_serializable() {
                continue;
            }
            let entries: Vec<ComponentEntry> = map
                .serialize_type(type_id)?
                .into_iter()
                .map(|(entity, value)| ComponentEntry { entity, value })
                .collect();
            if !entries.is_empty() {
                components.insert(descriptor.name().to_string(), entries);
            }
        }

        let systems = self
            .systems()
            .iter()
            .map(|system| SystemSnapshot {
                id: system.id().to_string(),
                state: system.save_state(),
            })
            .collect();

        let mut entities = map.live_entities();
        entities.sort_unstable();
        Ok(SceneSnapshot {
            next_entity_id: map.entities().next_index(),
            deleted_ids: map.entities().deleted_ids().to_vec(),
            entities,
            systems,
            components,
        })
    }

    /// Replace this scene's entities, components and systems with the
    /// snapshot's.
    ///
    /// Component values are decoded, systems are constructed and their state
    /// is loaded before anything is replaced, so a malformed snapshot leaves
    /// the scene untouched. Only a failing [`System::initialize`] can abort
    /// the load after the old contents are gone.
    pub fn load_snapshot(&mut self, snapshot: &SceneSnapshot, registry: &SystemRegistry) -> Result<()> {
        if !self.is_idle() {
            return Err(EcsError::InsideCycle("Scene::load_snapshot"));
        }

        let mut decoded = Vec::new();
        for (name, entries) in &snapshot.components {
            let map = self.components();
            let type_id = map
                .type_id_by_name(name)
                .ok_or_else(|| EcsError::UnknownComponentType(name.clone()))?;
            if !map.descriptor(type_id).is_some_and(|d| d.is_serializable()) {
                return Err(EcsError::NotSerializable(name.clone()));
            }
            for entry in entries {
                let (type_id, value) = map.decode_serialized(name, entry.value.clone())?;
                decoded.push((type_id, entry.entity, value));
            }
        }

        let mut ids = HashSet::new();
        let mut systems: Vec<Box<dyn System>> = Vec::with_capacity(snapshot.systems.len());
        for entry in &snapshot.systems {
            if !ids.insert(entry.id.as_str()) {
                return Err(EcsError::DuplicateSystem(entry.id.clone()));
            }
            let mut system = registry.create(&entry.id)?;
            if let Some(state) = &entry.state {
                system.load_state(state.clone())?;
            }
            systems.push(system);
        }

        let live: BTreeSet<EntityId> = snapshot
            .entities
            .iter()
            .copied()
            .chain(snapshot.components.values().flatten().map(|entry| entry.entity))
            .collect();
        let live: Vec<EntityId> = live.into_iter().collect();
        let mut allocator = EntityAllocator::new();
        allocator.restore(snapshot.next_entity_id, &snapshot.deleted_ids, &live)?;

        self.clear_systems();
        let map = self.components_mut();
        map.reset_entities(allocator);
        for (type_id, entity, value) in decoded {
            map.insert_decoded(type_id, entity, value);
        }

        for system in systems {
            self.add_boxed_system(system)?;
        }
        log::info!(
            "scene `{}`: loaded {} entities and {} systems",
            self.name(),
            live.len(),
            snapshot.systems.len()
        );
        Ok(())
    }
}
