//! # Hearth — Entity/Component Runtime
//!
//! Entity identity, typed component storage, per-frame system scheduling and
//! an event bus with deterministic flush points. Rendering, input devices,
//! assets and editors are callers of this crate, not part of it.
//!
//! Start with `use hearth::prelude::*`, create a [`Scene`](scene::Scene),
//! add systems, and call `update` once per frame.

pub mod config;
pub mod ecs;
pub mod error;
pub mod event;
pub mod math;
pub mod prelude;
pub mod scene;
pub mod snapshot;
pub mod time;

pub use error::{EcsError, Result};
