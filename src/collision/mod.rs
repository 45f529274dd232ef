//! Collision detection: broadphase tree, narrowphase driver, and persistent
//! contact manifolds.

pub mod aabb;
pub mod aabb_tree;
pub mod arbiter;
pub mod narrowphase;

pub use aabb::Aabb;
pub use aabb_tree::AabbTree;
pub use arbiter::{Arbiter, ArbiterKey, ArbiterSet, ContactPoint, MAX_CONTACTS};
pub use narrowphase::{ContactSeed, NarrowPhase};
