//! # Sparse-Set ECS
//!
//! ## Module Overview
//!
//! - [`entity`] — 64-bit ids with epoch reuse, and the allocator
//! - [`component`] — per-type sparse sets with deferred visibility
//! - [`component_map`] — entities + descriptors + stores
//! - [`query`] — cursor iteration over one component type
//! - [`hierarchy`] — intrusive parent/child links and world transforms
//! - [`system`] — System trait, per-cycle scheduling, registry

pub mod component;
pub mod component_map;
pub mod entity;
pub mod hierarchy;
pub mod query;
pub mod system;

pub use component::{Component, ComponentDescriptor, ComponentFlags, ComponentTypeId};
pub use component_map::ComponentMap;
pub use entity::{DeletedId, EntityAllocator, EntityId};
pub use hierarchy::{Hierarchical, Name};
pub use query::{ComponentIterator, IterFlags};
pub use system::{ProcessingCycle, ProcessingCycles, SchedulerState, System, SystemMap, SystemRegistry};
