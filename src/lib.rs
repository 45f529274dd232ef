//! Impulse Dynamics – an impulse-based rigid body dynamics engine.
//!
//! The crate centers on [`PhysicsWorld`]: pooled body storage with an active
//! partition, a dynamic AABB tree broadphase, a support-mapping narrowphase
//! (MPR with an EPA fallback) feeding persistent warm-started manifolds, a
//! row-based sequential-impulse solver with substepping and speculative
//! contacts, and island-granular sleeping and parallelism.

pub mod collision;
pub mod config;
pub mod core;
pub mod dynamics;
pub mod error;
pub mod utils;
pub mod world;

pub use glam::{Mat3, Quat, Vec3};

pub use crate::collision::{Aabb, AabbTree, Arbiter, ArbiterKey, ContactSeed, NarrowPhase};
pub use crate::core::{
    BodyHandle, Collider, ColliderShape, CollisionFilter, MassProperties, Material,
    RigidBodyBuilder, ShapeId, Transform, Velocity,
};
pub use crate::dynamics::{
    ConstraintBehavior, ConstraintData, DistanceConstraint, IslandId, SolverSettings,
    SolverStepTotals,
};
pub use crate::error::{PhysicsError, PhysicsResult};
pub use crate::world::{PhysicsWorld, PhysicsWorldBuilder, RayHit, ThreadModel};
