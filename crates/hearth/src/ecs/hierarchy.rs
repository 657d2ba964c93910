//! # Entity Hierarchies — Intrusive Parent/Child Links
//!
//! Every entity created through
//! [`ComponentMap::create_entity`] carries a [`Hierarchical`] component: the
//! links of a doubly linked tree stored flat, next to the other components.
//!
//! ```text
//!            parent
//!              │ first_child            last_child
//!              ▼                            ▼
//!   child ◄──► child ◄──► ... ◄──► child
//!       prev / next sibling links
//! ```
//!
//! Inserting or unlinking a child is O(1). Roots have `parent == None`.
//!
//! World transforms are not cached: [`ComponentMap::world_matrix`] walks from
//! the entity up to its root and multiplies the local [`Transform`]s.
//!
//! ## Usage
//!
//! ```ignore
//! let ship = map.create_entity("Ship");
//! let turret = map.create_entity("Turret");
//! map.set_parent(turret, Some(ship))?;
//! map.get_component_mut::<Transform>(ship)?.translation = Vec3::new(10.0, 0.0, 0.0);
//! assert_eq!(map.world_translation(turret)?, Vec3::new(10.0, 0.0, 0.0));
//! ```

use serde::{Deserialize, Serialize};

use super::component_map::ComponentMap;
use super::entity::EntityId;
use crate::error::{EcsError, Result};
use crate::math::{Mat4, Vec3};

pub use crate::math::Transform;

/// Tree links of one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hierarchical {
    pub parent: Option<EntityId>,
    pub first_child: Option<EntityId>,
    pub last_child: Option<EntityId>,
    pub next_sibling: Option<EntityId>,
    pub prev_sibling: Option<EntityId>,
    /// The entity's own flag. See [`ComponentMap::is_active_in_hierarchy`].
    pub active: bool,
}

impl Default for Hierarchical {
    fn default() -> Self {
        Self {
            parent: None,
            first_child: None,
            last_child: None,
            next_sibling: None,
            prev_sibling: None,
            active: true,
        }
    }
}

/// Display name of an entity.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Name(pub String);

impl ComponentMap {
    /// Move `child` under `parent` (as its last child), or to the root.
    pub fn set_parent(&mut self, child: EntityId, parent: Option<EntityId>) -> Result<()> {
        if !self.is_alive(child) {
            return Err(EcsError::DeadEntity(child));
        }
        if let Some(parent) = parent {
            if !self.is_alive(parent) {
                return Err(EcsError::DeadEntity(parent));
            }
            let mut cursor = Some(parent);
            while let Some(ancestor) = cursor {
                if ancestor == child {
                    return Err(EcsError::HierarchyCycle { child, parent });
                }
                cursor = self.parent(ancestor);
            }
            if !self.has_component::<Hierarchical>(parent) {
                return Err(self.missing_links(parent));
            }
        }
        if !self.has_component::<Hierarchical>(child) {
            return Err(self.missing_links(child));
        }

        self.unlink(child);
        if let Some(parent) = parent {
            self.link_last(child, parent);
        }
        Ok(())
    }

    /// Move `child` to the root.
    pub fn detach(&mut self, child: EntityId) -> Result<()> {
        if !self.is_alive(child) {
            return Err(EcsError::DeadEntity(child));
        }
        self.unlink(child);
        Ok(())
    }

    pub fn parent(&self, id: EntityId) -> Option<EntityId> {
        self.try_get::<Hierarchical>(id).and_then(|h| h.parent)
    }

    /// Direct children, first to last.
    pub fn children(&self, id: EntityId) -> Vec<EntityId> {
        let mut out = Vec::new();
        let mut cursor = self.try_get::<Hierarchical>(id).and_then(|h| h.first_child);
        while let Some(child) = cursor {
            out.push(child);
            cursor = self.try_get::<Hierarchical>(child).and_then(|h| h.next_sibling);
        }
        out
    }

    /// Every descendant, depth-first pre-order.
    pub fn descendants(&self, id: EntityId) -> Vec<EntityId> {
        let mut out = Vec::new();
        let mut stack: Vec<EntityId> = self.children(id).into_iter().rev().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.children(next).into_iter().rev());
        }
        out
    }

    /// Entities without a parent, ascending.
    pub fn roots(&self) -> Vec<EntityId> {
        self.entities_with::<Hierarchical>()
            .into_iter()
            .filter(|&id| self.parent(id).is_none())
            .collect()
    }

    pub fn set_active(&mut self, id: EntityId, active: bool) -> Result<()> {
        self.get_component_mut::<Hierarchical>(id)?.active = active;
        Ok(())
    }

    /// `true` if the entity and every ancestor are active. Entities without
    /// hierarchy links count as active.
    pub fn is_active_in_hierarchy(&self, id: EntityId) -> bool {
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            match self.try_get::<Hierarchical>(current) {
                Some(links) if !links.active => return false,
                Some(links) => cursor = links.parent,
                None => break,
            }
        }
        true
    }

    /// Compose local transforms from the root down to `id`.
    pub fn world_matrix(&self, id: EntityId) -> Result<Mat4> {
        if !self.is_alive(id) {
            return Err(EcsError::DeadEntity(id));
        }
        let mut matrix = Mat4::IDENTITY;
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            if let Some(local) = self.try_get::<Transform>(current) {
                matrix = local.matrix() * matrix;
            }
            cursor = self.parent(current);
        }
        Ok(matrix)
    }

    pub fn world_translation(&self, id: EntityId) -> Result<Vec3> {
        Ok(self.world_matrix(id)?.transform_point3(Vec3::ZERO))
    }

    fn unlink(&mut self, child: EntityId) {
        let Some(links) = self.try_get::<Hierarchical>(child).copied() else {
            return;
        };
        let Some(parent) = links.parent else {
            return;
        };

        match links.prev_sibling {
            Some(prev) => self.with_links(prev, |h| h.next_sibling = links.next_sibling),
            None => self.with_links(parent, |h| h.first_child = links.next_sibling),
        }
        match links.next_sibling {
            Some(next) => self.with_links(next, |h| h.prev_sibling = links.prev_sibling),
            None => self.with_links(parent, |h| h.last_child = links.prev_sibling),
        }
        self.with_links(child, |h| {
            h.parent = None;
            h.prev_sibling = None;
            h.next_sibling = None;
        });
    }

    fn link_last(&mut self, child: EntityId, parent: EntityId) {
        let last = self.try_get::<Hierarchical>(parent).and_then(|h| h.last_child);
        self.with_links(child, |h| {
            h.parent = Some(parent);
            h.prev_sibling = last;
            h.next_sibling = None;
        });
        match last {
            Some(last) => self.with_links(last, |h| h.next_sibling = Some(child)),
            None => self.with_links(parent, |h| h.first_child = Some(child)),
        }
        self.with_links(parent, |h| h.last_child = Some(child));
    }

    fn with_links(&mut self, id: EntityId, f: impl FnOnce(&mut Hierarchical)) {
        if let Some(links) = self.try_get_mut::<Hierarchical>(id) {
            f(links);
        }
    }

    fn missing_links(&self, id: EntityId) -> EcsError {
        EcsError::MissingComponent {
            component: self.component_name::<Hierarchical>(),
            entity: id,
        }
    }
}
