//! Core data substrate: pooled records, bodies, shapes, and shared types.

pub mod arena;
pub mod body;
pub mod pool;
pub mod shape;
pub mod types;

pub use arena::Arena;
pub use body::{BodyData, RigidBody, RigidBodyBuilder};
pub use pool::{ActivePool, ArbiterId, BodyHandle, ConstraintId, PoolHandle};
pub use shape::{Collider, ColliderShape, CollisionFilter, ShapeId};
pub use types::{MassProperties, Material, Transform, Velocity};
