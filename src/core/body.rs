use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};

use glam::{Mat3, Quat, Vec3};
use log::warn;

use crate::{
    config,
    core::{
        pool::{ArbiterId, BodyHandle, ConstraintId},
        shape::ShapeId,
        types::{MassProperties, Transform, Velocity},
    },
    dynamics::island::IslandId,
};

/// Hot per-body record stored contiguously in the active-partition pool.
///
/// Everything the solver and integrator touch per substep lives here; the
/// cold bookkeeping sits in [`RigidBody`].
#[derive(Debug)]
pub struct BodyData {
    pub handle: BodyHandle,
    pub position: Vec3,
    pub orientation: Quat,
    pub linear_velocity: Vec3,
    pub angular_velocity: Vec3,
    /// Solver velocity corrections accumulated during iteration and folded
    /// into the velocities when positions integrate.
    pub delta_linear: Vec3,
    pub delta_angular: Vec3,
    pub inverse_mass: f32,
    pub inverse_inertia_local: Mat3,
    pub inverse_inertia_world: Mat3,
    pub is_active: bool,
    pub is_static: bool,
    /// Debug-only ownership tag checked during parallel island solves.
    lock: AtomicU32,
}

impl BodyData {
    pub fn new(handle: BodyHandle) -> Self {
        Self {
            handle,
            position: Vec3::ZERO,
            orientation: Quat::IDENTITY,
            linear_velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            delta_linear: Vec3::ZERO,
            delta_angular: Vec3::ZERO,
            inverse_mass: 1.0,
            inverse_inertia_local: Mat3::IDENTITY,
            inverse_inertia_world: Mat3::IDENTITY,
            is_active: true,
            is_static: false,
            lock: AtomicU32::new(0),
        }
    }

    pub fn transform(&self) -> Transform {
        Transform {
            position: self.position,
            rotation: self.orientation,
        }
    }

    pub fn velocity(&self) -> Velocity {
        Velocity {
            linear: self.linear_velocity,
            angular: self.angular_velocity,
        }
    }

    pub fn static_or_inactive(&self) -> bool {
        self.is_static || !self.is_active
    }

    /// Velocity of the material point at world-relative offset `r`, including
    /// the pending solver deltas.
    pub fn solver_velocity_at(&self, r: Vec3) -> Vec3 {
        self.linear_velocity
            + self.delta_linear
            + (self.angular_velocity + self.delta_angular).cross(r)
    }

    /// Applies an impulse at world-relative offset `r` to the solver deltas.
    pub fn apply_delta_impulse(&mut self, impulse: Vec3, r: Vec3) {
        self.delta_linear += impulse * self.inverse_mass;
        self.delta_angular += self.inverse_inertia_world * r.cross(impulse);
    }

    /// Applies an impulse at a world point directly to the velocities.
    pub fn apply_impulse(&mut self, impulse: Vec3, point: Vec3) {
        if self.is_static {
            return;
        }
        self.linear_velocity += impulse * self.inverse_mass;
        let r = point - self.position;
        self.angular_velocity += self.inverse_inertia_world * r.cross(impulse);
    }

    /// Folds the solver deltas into the velocities and clears them.
    pub fn fold_deltas(&mut self) {
        self.linear_velocity += self.delta_linear;
        self.angular_velocity += self.delta_angular;
        self.delta_linear = Vec3::ZERO;
        self.delta_angular = Vec3::ZERO;
    }

    /// Rebuilds the world-space inverse inertia from the current orientation.
    pub fn update_world_inertia(&mut self) {
        let rot = Mat3::from_quat(self.orientation);
        self.inverse_inertia_world = rot * self.inverse_inertia_local * rot.transpose();
    }

    pub fn set_mass_properties(&mut self, props: &MassProperties) {
        if self.is_static {
            self.inverse_mass = 0.0;
            self.inverse_inertia_local = Mat3::ZERO;
            self.inverse_inertia_world = Mat3::ZERO;
            return;
        }
        self.inverse_mass = if props.mass.abs() < f32::EPSILON {
            0.0
        } else {
            1.0 / props.mass
        };
        self.inverse_inertia_local = if props.inertia.determinant().abs() < f32::EPSILON {
            Mat3::ZERO
        } else {
            props.inertia.inverse()
        };
        self.update_world_inertia();
    }

    /// Clamps non-finite state produced by a numerical anomaly. Returns true
    /// if anything had to be repaired; such bodies are not woken.
    pub fn clamp_non_finite(&mut self) -> bool {
        let mut repaired = false;
        if !self.linear_velocity.is_finite() {
            self.linear_velocity = Vec3::ZERO;
            repaired = true;
        }
        if !self.angular_velocity.is_finite() {
            self.angular_velocity = Vec3::ZERO;
            repaired = true;
        }
        if !self.position.is_finite() {
            self.position = Vec3::ZERO;
            repaired = true;
        }
        if !self.orientation.is_finite() {
            self.orientation = Quat::IDENTITY;
            repaired = true;
        }
        if repaired {
            warn!("clamped non-finite state on body {:?}", self.handle);
        }
        repaired
    }

    /// Asserts island-exclusive write ownership; compiled out of release
    /// builds. Cross-island sharing cannot occur by the island invariant, so
    /// the lock word exists only to catch a violated invariant early.
    #[inline]
    pub fn debug_assert_owned(&self, island_tag: u32) {
        if cfg!(debug_assertions) {
            let tag = island_tag.wrapping_add(1);
            match self
                .lock
                .compare_exchange(0, tag, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {}
                Err(current) if current == tag => {}
                Err(current) => panic!(
                    "body {:?} written by island {} while owned by tag {}",
                    self.handle, island_tag, current
                ),
            }
        }
    }

    /// Clears the debug ownership tag at the end of a solve phase.
    #[inline]
    pub fn debug_release(&self) {
        if cfg!(debug_assertions) {
            self.lock.store(0, Ordering::Release);
        }
    }
}

/// Cold per-body record: ownership, connectivity, sleeping and force state.
#[derive(Debug)]
pub struct RigidBody {
    pub handle: BodyHandle,
    pub shapes: Vec<ShapeId>,
    /// Adjacent bodies with an edge refcount (contacts plus constraints).
    pub connections: HashMap<BodyHandle, u32>,
    pub arbiters: HashSet<ArbiterId>,
    pub constraints: HashSet<ConstraintId>,
    pub island: IslandId,
    pub linear_damping: f32,
    pub angular_damping: f32,
    pub force: Vec3,
    pub torque: Vec3,
    pub affected_by_gravity: bool,
    pub speculative_contacts: bool,
    pub sleep_linear_threshold: f32,
    pub sleep_angular_threshold: f32,
    pub deactivation_time: f32,
    pub sleep_timer: f32,
    pub mass_properties: MassProperties,
}

impl RigidBody {
    pub fn new(handle: BodyHandle) -> Self {
        Self {
            handle,
            shapes: Vec::new(),
            connections: HashMap::new(),
            arbiters: HashSet::new(),
            constraints: HashSet::new(),
            island: IslandId::NONE,
            linear_damping: config::DEFAULT_LINEAR_DAMPING,
            angular_damping: config::DEFAULT_ANGULAR_DAMPING,
            force: Vec3::ZERO,
            torque: Vec3::ZERO,
            affected_by_gravity: true,
            speculative_contacts: false,
            sleep_linear_threshold: config::DEFAULT_SLEEP_LINEAR_VELOCITY,
            sleep_angular_threshold: config::DEFAULT_SLEEP_ANGULAR_VELOCITY,
            deactivation_time: config::DEFAULT_DEACTIVATION_TIME,
            sleep_timer: 0.0,
            mass_properties: MassProperties::default(),
        }
    }

    pub fn add_connection(&mut self, other: BodyHandle) {
        *self.connections.entry(other).or_insert(0) += 1;
    }

    pub fn remove_connection(&mut self, other: BodyHandle) {
        if let Some(count) = self.connections.get_mut(&other) {
            *count -= 1;
            if *count == 0 {
                self.connections.remove(&other);
            }
        }
    }
}

/// Fluent description consumed by `PhysicsWorld::create_body`.
#[derive(Debug, Clone)]
pub struct RigidBodyBuilder {
    pub(crate) position: Vec3,
    pub(crate) rotation: Quat,
    pub(crate) velocity: Velocity,
    pub(crate) is_static: bool,
    pub(crate) affected_by_gravity: bool,
    pub(crate) speculative_contacts: bool,
    pub(crate) linear_damping: f32,
    pub(crate) angular_damping: f32,
    pub(crate) deactivation_time: f32,
}

impl Default for RigidBodyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RigidBodyBuilder {
    pub fn new() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            velocity: Velocity::default(),
            is_static: false,
            affected_by_gravity: true,
            speculative_contacts: false,
            linear_damping: config::DEFAULT_LINEAR_DAMPING,
            angular_damping: config::DEFAULT_ANGULAR_DAMPING,
            deactivation_time: config::DEFAULT_DEACTIVATION_TIME,
        }
    }

    pub fn position(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    pub fn rotation(mut self, rotation: Quat) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn velocity(mut self, linear: Vec3, angular: Vec3) -> Self {
        self.velocity = Velocity { linear, angular };
        self
    }

    pub fn is_static(mut self, is_static: bool) -> Self {
        self.is_static = is_static;
        self
    }

    pub fn affected_by_gravity(mut self, affected: bool) -> Self {
        self.affected_by_gravity = affected;
        self
    }

    pub fn speculative_contacts(mut self, enabled: bool) -> Self {
        self.speculative_contacts = enabled;
        self
    }

    pub fn damping(mut self, linear: f32, angular: f32) -> Self {
        self.linear_damping = linear;
        self.angular_damping = angular;
        self
    }

    pub fn deactivation_time(mut self, seconds: f32) -> Self {
        self.deactivation_time = seconds;
        self
    }
}
