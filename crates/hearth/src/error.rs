//! # Errors
//!
//! Every fallible operation in the crate returns [`EcsError`]. Variants fall
//! into three groups:
//!
//! - **Invariant violations** such as duplicate components or hierarchy
//!   cycles. These indicate a bug in the calling code and are meant to
//!   propagate all the way out of [`Scene::update`](crate::scene::Scene::update).
//! - **Lookup misses**: `MissingComponent`, `UnknownSystem`. Callers that
//!   expect a miss should use the `has_*`/`try_*` query methods first.
//! - **Format errors** raised while encoding or decoding a scene snapshot or
//!   a config file.

use crate::ecs::entity::EntityId;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, EcsError>;

/// Errors raised by the entity/component runtime.
#[derive(Debug, thiserror::Error)]
pub enum EcsError {
    /// The entity id is not alive (never allocated, or already deleted).
    #[error("entity {0} is not alive")]
    DeadEntity(EntityId),

    /// `delete_entity` was called on an id already in the deleted-ids record.
    #[error("entity {0} was already deleted")]
    EntityAlreadyDeleted(EntityId),

    /// A component of this type already exists on the entity.
    #[error("entity {entity} already has a `{component}` component")]
    DuplicateComponent {
        /// Registered component name.
        component: String,
        /// Owning entity.
        entity: EntityId,
    },

    /// The entity has no component of this type.
    #[error("entity {entity} has no `{component}` component")]
    MissingComponent {
        /// Registered component name.
        component: String,
        /// Owning entity.
        entity: EntityId,
    },

    /// Two distinct component types were required but the same one was named twice.
    #[error("component `{0}` requested twice in a paired borrow")]
    AliasedComponent(String),

    /// A snapshot referenced a component type name with no descriptor.
    #[error("no component type registered under the name `{0}`")]
    UnknownComponentType(String),

    /// The component type is registered but carries no serde functions.
    #[error("component `{0}` is not serializable")]
    NotSerializable(String),

    /// Re-parenting would create a cycle in the hierarchy.
    #[error("cannot parent {child} under {parent}: {parent} is {child} or one of its descendants")]
    HierarchyCycle {
        /// The entity being moved.
        child: EntityId,
        /// The requested new parent.
        parent: EntityId,
    },

    /// An iterator accessor was used before a successful `next()`.
    #[error("component iterator is not positioned on an element")]
    IteratorNotPositioned,

    /// A system with this identifier is already registered.
    #[error("system `{0}` is already registered")]
    DuplicateSystem(String),

    /// No registered system has this identifier.
    #[error("no system with id `{0}`")]
    UnknownSystem(String),

    /// The system registry has no constructor for this identifier.
    #[error("no constructor registered for system `{0}`")]
    UnregisteredSystem(String),

    /// A processing cycle name did not match any cycle.
    #[error("unknown processing cycle `{0}`")]
    UnknownProcessingCycle(String),

    /// The operation is not allowed while a cycle is running.
    #[error("`{0}` cannot run while a processing cycle is in progress")]
    InsideCycle(&'static str),

    /// A system hook reported a failure of its own.
    #[error("system `{system}` failed: {message}")]
    System {
        /// The failing system's identifier.
        system: String,
        /// Human-readable failure description.
        message: String,
    },

    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MessagePack encoding failed.
    #[error("failed to encode binary snapshot: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding failed.
    #[error("failed to decode binary snapshot: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// Reading or writing a file failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
