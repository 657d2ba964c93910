//! Convenience re-exports: `use hearth::prelude::*` for the common items.

pub use crate::config::SceneConfig;
pub use crate::ecs::{
    Component, ComponentDescriptor, ComponentFlags, ComponentIterator, ComponentMap, EntityId, Hierarchical,
    IterFlags, Name, ProcessingCycle, ProcessingCycles, System, SystemRegistry,
};
pub use crate::error::EcsError;
pub use crate::event::{Event, EventBus, EventContext, FlushTier, SubscriptionId};
pub use crate::math::{Mat4, Quat, Transform, Vec2, Vec3, Vec4};
pub use crate::scene::{Scene, SubScene};
pub use crate::snapshot::{SceneSnapshot, SnapshotFormat};
pub use crate::time::{FixedTimestep, FrameClock, Time};
