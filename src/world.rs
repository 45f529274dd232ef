use glam::Vec3;
use log::{debug, warn};

use crate::{
    collision::{
        aabb_tree::AabbTree,
        arbiter::{ArbiterKey, ArbiterSet},
        narrowphase::NarrowPhase,
    },
    config,
    core::{
        arena::Arena,
        body::{BodyData, RigidBody, RigidBodyBuilder},
        pool::{ActivePool, ArbiterId, BodyHandle, ConstraintId},
        shape::{Collider, CollisionFilter, ShapeId, NULL_PROXY},
        types::{MassProperties, Material, Transform},
    },
    dynamics::{
        constraint::{ConstraintBehavior, ConstraintSlot},
        integrator,
        island::{IslandId, IslandManager},
        solver::{self, SolverSettings, SolverStepTotals},
    },
    error::{PhysicsError, PhysicsResult},
    utils::{logging::ScopedTimer, profiling::StepProfiler},
};

/// Worker idling policy of the solver pool.
///
/// `Regular` borrows rayon's global pool per step; `Persistent` owns a pool
/// sized to the hardware that stays warm for the world's lifetime, trading
/// CPU for latency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThreadModel {
    #[default]
    Regular,
    Persistent,
}

/// Result of a world ray cast.
#[derive(Debug, Clone, Copy)]
pub struct RayHit {
    pub body: BodyHandle,
    pub shape: ShapeId,
    pub fraction: f32,
    pub point: Vec3,
    pub normal: Vec3,
}

/// Central simulation container: owns every pool and runs the step pipeline.
pub struct PhysicsWorld {
    gravity: Vec3,
    solver_settings: SolverSettings,
    allow_deactivation: bool,
    use_full_epa: bool,
    speculative_margin: f32,

    bodies: ActivePool<BodyData>,
    cold: Vec<Option<RigidBody>>,
    shapes: Arena<Collider>,
    constraints: ActivePool<ConstraintSlot>,
    arbiters: ArbiterSet,
    broadphase: AabbTree,
    islands: IslandManager,

    null_body: BodyHandle,
    frame: u32,

    // Reused per-step buffers; they grow once and stay allocated.
    dirty_shapes: Vec<ShapeId>,
    moved_shapes: Vec<ShapeId>,
    pair_buffer: Vec<(ShapeId, ShapeId)>,
    wake_queue: Vec<BodyHandle>,
    island_arbiters: Vec<Vec<ArbiterId>>,
    island_constraints: Vec<Vec<ConstraintId>>,

    pub profiler: StepProfiler,
    step_totals: SolverStepTotals,
    solver_totals_logging: bool,

    #[cfg(feature = "parallel")]
    thread_pool: Option<rayon::ThreadPool>,
}

/// Builder configuring capacities and tunables; validation happens in
/// [`PhysicsWorldBuilder::build`] before any state exists.
pub struct PhysicsWorldBuilder {
    gravity: Vec3,
    solver_iterations: u32,
    substeps: u32,
    allow_deactivation: bool,
    use_full_epa: bool,
    thread_model: ThreadModel,
    speculative_margin: f32,
    num_bodies: usize,
    num_contacts: usize,
    num_constraints: usize,
}

impl Default for PhysicsWorldBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PhysicsWorldBuilder {
    pub fn new() -> Self {
        Self {
            gravity: Vec3::from_slice(&config::DEFAULT_GRAVITY),
            solver_iterations: config::DEFAULT_SOLVER_ITERATIONS,
            substeps: config::DEFAULT_SUBSTEPS,
            allow_deactivation: true,
            use_full_epa: false,
            thread_model: ThreadModel::Regular,
            speculative_margin: config::DEFAULT_SPECULATIVE_MARGIN,
            num_bodies: config::DEFAULT_BODY_CAPACITY,
            num_contacts: config::DEFAULT_CONTACT_CAPACITY,
            num_constraints: config::DEFAULT_CONSTRAINT_CAPACITY,
        }
    }

    pub fn gravity(mut self, gravity: Vec3) -> Self {
        self.gravity = gravity;
        self
    }

    pub fn solver_iterations(mut self, iterations: u32) -> Self {
        self.solver_iterations = iterations;
        self
    }

    pub fn substeps(mut self, substeps: u32) -> Self {
        self.substeps = substeps;
        self
    }

    pub fn allow_deactivation(mut self, allow: bool) -> Self {
        self.allow_deactivation = allow;
        self
    }

    pub fn use_full_epa(mut self, force: bool) -> Self {
        self.use_full_epa = force;
        self
    }

    pub fn thread_model(mut self, model: ThreadModel) -> Self {
        self.thread_model = model;
        self
    }

    pub fn capacities(mut self, num_bodies: usize, num_contacts: usize, num_constraints: usize) -> Self {
        self.num_bodies = num_bodies;
        self.num_contacts = num_contacts;
        self.num_constraints = num_constraints;
        self
    }

    pub fn build(self) -> PhysicsResult<PhysicsWorld> {
        if self.solver_iterations < 1 {
            return Err(PhysicsError::InvalidArgument("solver_iterations must be >= 1"));
        }
        if self.substeps < 1 {
            return Err(PhysicsError::InvalidArgument("substeps must be >= 1"));
        }
        if !self.gravity.is_finite() {
            return Err(PhysicsError::InvalidArgument("gravity must be finite"));
        }
        if self.num_bodies == 0 || self.num_contacts == 0 || self.num_constraints == 0 {
            return Err(PhysicsError::InvalidArgument("capacities must be non-zero"));
        }

        #[cfg(feature = "parallel")]
        let thread_pool = match self.thread_model {
            ThreadModel::Regular => None,
            ThreadModel::Persistent => Some(
                rayon::ThreadPoolBuilder::new()
                    .build()
                    .map_err(|_| PhysicsError::InvalidArgument("failed to build worker pool"))?,
            ),
        };
        #[cfg(not(feature = "parallel"))]
        let _ = self.thread_model;

        let mut world = PhysicsWorld {
            gravity: self.gravity,
            solver_settings: SolverSettings {
                iterations: self.solver_iterations,
                substeps: self.substeps,
                ..SolverSettings::default()
            },
            allow_deactivation: self.allow_deactivation,
            use_full_epa: self.use_full_epa,
            speculative_margin: self.speculative_margin,
            bodies: ActivePool::with_capacity("bodies", self.num_bodies),
            cold: Vec::new(),
            shapes: Arena::new(),
            constraints: ActivePool::with_capacity("constraints", self.num_constraints),
            arbiters: ArbiterSet::with_capacity(self.num_contacts),
            broadphase: AabbTree::new(config::DEFAULT_AABB_MARGIN),
            islands: IslandManager::new(),
            null_body: BodyHandle::default(),
            frame: 0,
            dirty_shapes: Vec::new(),
            moved_shapes: Vec::new(),
            pair_buffer: Vec::new(),
            wake_queue: Vec::new(),
            island_arbiters: Vec::new(),
            island_constraints: Vec::new(),
            profiler: StepProfiler::default(),
            step_totals: SolverStepTotals::default(),
            solver_totals_logging: false,
            #[cfg(feature = "parallel")]
            thread_pool,
        };

        // Pinned anchor for one-body constraints; occupies one body slot.
        world.null_body = world.create_body(RigidBodyBuilder::new().is_static(true))?;
        Ok(world)
    }
}

impl PhysicsWorld {
    pub fn builder() -> PhysicsWorldBuilder {
        PhysicsWorldBuilder::new()
    }

    pub fn new() -> Self {
        PhysicsWorldBuilder::new()
            .build()
            .expect("default world configuration is valid")
    }

    /// The pinned, infinite-mass body used to anchor one-body constraints.
    pub fn null_body(&self) -> BodyHandle {
        self.null_body
    }

    pub fn gravity(&self) -> Vec3 {
        self.gravity
    }

    pub fn set_gravity(&mut self, gravity: Vec3) -> PhysicsResult<()> {
        if !gravity.is_finite() {
            return Err(PhysicsError::InvalidArgument("gravity must be finite"));
        }
        self.gravity = gravity;
        Ok(())
    }

    pub fn set_solver_iterations(&mut self, iterations: u32) -> PhysicsResult<()> {
        if iterations < 1 {
            return Err(PhysicsError::InvalidArgument("solver_iterations must be >= 1"));
        }
        self.solver_settings.iterations = iterations;
        Ok(())
    }

    pub fn set_substeps(&mut self, substeps: u32) -> PhysicsResult<()> {
        if substeps < 1 {
            return Err(PhysicsError::InvalidArgument("substeps must be >= 1"));
        }
        self.solver_settings.substeps = substeps;
        Ok(())
    }

    pub fn set_allow_deactivation(&mut self, allow: bool) {
        self.allow_deactivation = allow;
    }

    pub fn set_solver_totals_logging(&mut self, enabled: bool) {
        self.solver_totals_logging = enabled;
    }

    pub fn last_solver_totals(&self) -> &SolverStepTotals {
        &self.step_totals
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    pub fn active_body_count(&self) -> usize {
        self.bodies.active_len()
    }

    pub fn arbiter_count(&self) -> usize {
        self.arbiters.len()
    }

    pub fn constraint_count(&self) -> usize {
        self.constraints.len()
    }

    pub fn island_count(&self) -> usize {
        self.islands.island_count()
    }

    pub fn active_island_count(&self) -> usize {
        self.islands.active_islands().len()
    }

    // ------------------------------------------------------------------
    // Body lifecycle
    // ------------------------------------------------------------------

    /// Creates a rigid body from its description. New bodies start with unit
    /// mass in a fresh singleton island.
    pub fn create_body(&mut self, desc: RigidBodyBuilder) -> PhysicsResult<BodyHandle> {
        if !desc.position.is_finite()
            || !desc.rotation.is_finite()
            || !desc.velocity.linear.is_finite()
            || !desc.velocity.angular.is_finite()
        {
            return Err(PhysicsError::InvalidArgument("body state must be finite"));
        }

        let mut data = BodyData::new(BodyHandle::default());
        data.position = desc.position;
        data.orientation = desc.rotation.normalize();
        data.linear_velocity = desc.velocity.linear;
        data.angular_velocity = desc.velocity.angular;
        data.is_static = desc.is_static;
        data.is_active = !desc.is_static;
        if desc.is_static {
            data.linear_velocity = Vec3::ZERO;
            data.angular_velocity = Vec3::ZERO;
        }
        data.set_mass_properties(&MassProperties::default());

        let handle = self.bodies.allocate(data, !desc.is_static)?;
        if let Some(data) = self.bodies.get_mut(handle) {
            data.handle = handle;
        }

        if self.cold.len() <= handle.index() {
            self.cold.resize_with(handle.index() + 1, || None);
        }
        let mut rigid = RigidBody::new(handle);
        rigid.linear_damping = desc.linear_damping;
        rigid.angular_damping = desc.angular_damping;
        rigid.affected_by_gravity = desc.affected_by_gravity;
        rigid.speculative_contacts = desc.speculative_contacts;
        rigid.deactivation_time = desc.deactivation_time;
        self.cold[handle.index()] = Some(rigid);

        self.islands.body_added(handle, desc.is_static, &mut self.cold);
        Ok(handle)
    }

    /// Removes a body and atomically detaches its shapes, arbiters,
    /// constraints and island membership. Peers of removed constraints and
    /// contacts are woken.
    pub fn remove_body(&mut self, handle: BodyHandle) -> PhysicsResult<()> {
        if handle == self.null_body {
            return Err(PhysicsError::InvalidArgument("cannot remove the null body"));
        }
        if !self.bodies.contains(handle) {
            return Err(PhysicsError::InvalidArgument("unknown body handle"));
        }

        let constraint_ids: Vec<ConstraintId> = self.cold[handle.index()]
            .as_ref()
            .map(|rigid| rigid.constraints.iter().copied().collect())
            .unwrap_or_default();
        for id in constraint_ids {
            self.remove_constraint(id)?;
        }

        let arbiter_ids: Vec<ArbiterId> = self.cold[handle.index()]
            .as_ref()
            .map(|rigid| rigid.arbiters.iter().copied().collect())
            .unwrap_or_default();
        for id in arbiter_ids {
            self.remove_arbiter_internal(id, true);
        }

        let shape_ids: Vec<ShapeId> = self.cold[handle.index()]
            .as_ref()
            .map(|rigid| rigid.shapes.clone())
            .unwrap_or_default();
        for shape in shape_ids {
            if let Some(collider) = self.shapes.get(shape) {
                if collider.proxy != NULL_PROXY {
                    self.broadphase.remove_proxy(collider.proxy);
                }
            }
            self.shapes.remove(shape);
        }

        self.flush_wake_queue();
        self.islands.body_removed(handle, &mut self.cold);
        self.islands.split_pass(&mut self.cold);

        self.cold[handle.index()] = None;
        self.bodies.free(handle);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Shapes
    // ------------------------------------------------------------------

    /// Attaches a shape and recomputes the body's mass properties from the
    /// sum of its shapes. Zero-mass shapes require a static body or
    /// [`PhysicsWorld::attach_shape_with_mass`].
    pub fn attach_shape(&mut self, body: BodyHandle, collider: Collider) -> PhysicsResult<ShapeId> {
        self.attach_shape_inner(body, collider, None)
    }

    /// Attaches a shape with an explicit mass contribution overriding the
    /// shape-derived one.
    pub fn attach_shape_with_mass(
        &mut self,
        body: BodyHandle,
        collider: Collider,
        mass: MassProperties,
    ) -> PhysicsResult<ShapeId> {
        self.attach_shape_inner(body, collider, Some(mass))
    }

    fn attach_shape_inner(
        &mut self,
        body: BodyHandle,
        mut collider: Collider,
        mass_override: Option<MassProperties>,
    ) -> PhysicsResult<ShapeId> {
        let Some(data) = self.bodies.get(body) else {
            return Err(PhysicsError::InvalidArgument("unknown body handle"));
        };
        if collider.body.is_some() {
            return Err(PhysicsError::ShapeAlreadyAttached);
        }

        let contributed = mass_override
            .unwrap_or_else(|| collider.shape.mass_properties(collider.material.density));
        if !data.is_static && contributed.mass <= f32::EPSILON {
            return Err(PhysicsError::ZeroMassShape);
        }

        let transform = data.transform();
        collider.body = Some(body);
        collider.mass_override = mass_override;
        collider.update_world_bounding_box(&transform);
        let world_aabb = collider.world_aabb;

        let shape = self.shapes.insert(collider);
        let proxy = self.broadphase.add_proxy(shape, &world_aabb);
        if let Some(collider) = self.shapes.get_mut(shape) {
            collider.proxy = proxy;
        }

        if let Some(rigid) = self.cold[body.index()].as_mut() {
            rigid.shapes.push(shape);
        }
        self.recompute_mass(body);
        self.wake_body(body);
        self.flush_wake_queue();
        Ok(shape)
    }

    /// Detaches a shape from its body, removing any arbiters built on it.
    pub fn detach_shape(&mut self, body: BodyHandle, shape: ShapeId) -> PhysicsResult<()> {
        let owned = self
            .cold
            .get(body.index())
            .and_then(|slot| slot.as_ref())
            .map(|rigid| rigid.shapes.contains(&shape))
            .unwrap_or(false);
        if !owned {
            return Err(PhysicsError::ShapeNotPresent);
        }

        let stale: Vec<ArbiterId> = self.cold[body.index()]
            .as_ref()
            .map(|rigid| {
                rigid
                    .arbiters
                    .iter()
                    .copied()
                    .filter(|id| {
                        self.arbiters
                            .get(*id)
                            .map(|arb| arb.shape_a == shape || arb.shape_b == shape)
                            .unwrap_or(false)
                    })
                    .collect()
            })
            .unwrap_or_default();
        for id in stale {
            self.remove_arbiter_internal(id, true);
        }

        if let Some(collider) = self.shapes.get(shape) {
            if collider.proxy != NULL_PROXY {
                self.broadphase.remove_proxy(collider.proxy);
            }
        }
        self.shapes.remove(shape);
        if let Some(rigid) = self.cold[body.index()].as_mut() {
            rigid.shapes.retain(|owned| *owned != shape);
        }
        self.recompute_mass(body);
        self.wake_body(body);
        self.flush_wake_queue();
        Ok(())
    }

    fn recompute_mass(&mut self, body: BodyHandle) {
        let Some(rigid) = self.cold[body.index()].as_ref() else {
            return;
        };
        let mut total = MassProperties::ZERO;
        let mut any = false;
        for &shape in &rigid.shapes {
            if let Some(collider) = self.shapes.get(shape) {
                let child = collider
                    .mass_override
                    .unwrap_or_else(|| collider.shape.mass_properties(collider.material.density));
                total.accumulate(&child, collider.offset.position);
                any = true;
            }
        }
        // Bodies without shapes keep the default unit mass.
        let properties = if any { total } else { MassProperties::default() };
        if let Some(rigid) = self.cold[body.index()].as_mut() {
            rigid.mass_properties = properties;
        }
        if let Some(data) = self.bodies.get_mut(body) {
            data.set_mass_properties(&properties);
        }
    }

    pub fn shape(&self, shape: ShapeId) -> Option<&Collider> {
        self.shapes.get(shape)
    }

    // ------------------------------------------------------------------
    // Constraints
    // ------------------------------------------------------------------

    /// Registers a constraint. The constraint must report itself initialized
    /// and reference live bodies.
    pub fn add_constraint(
        &mut self,
        behavior: Box<dyn ConstraintBehavior>,
    ) -> PhysicsResult<ConstraintId> {
        if !behavior.is_initialized() {
            return Err(PhysicsError::MissingConstraintInitialization);
        }
        let (body_a, body_b) = behavior.bodies();
        if !self.bodies.contains(body_a) || !self.bodies.contains(body_b) {
            return Err(PhysicsError::InvalidArgument("constraint references unknown bodies"));
        }

        let id = self.constraints.allocate(ConstraintSlot::new(behavior), true)?;

        let a_static = self.bodies.get(body_a).map(|d| d.is_static).unwrap_or(true);
        let b_static = self.bodies.get(body_b).map(|d| d.is_static).unwrap_or(true);
        for (own, other) in [(body_a, body_b), (body_b, body_a)] {
            if let Some(rigid) = self.cold[own.index()].as_mut() {
                rigid.constraints.insert(id);
                rigid.add_connection(other);
            }
        }
        self.islands
            .bodies_connected(body_a, a_static, body_b, b_static, &mut self.cold);
        self.wake_body(body_a);
        self.wake_body(body_b);
        self.flush_wake_queue();
        Ok(id)
    }

    /// Unregisters a constraint, waking both endpoint islands.
    pub fn remove_constraint(&mut self, id: ConstraintId) -> PhysicsResult<()> {
        let Some(slot) = self.constraints.free(id) else {
            return Err(PhysicsError::InvalidArgument("unknown constraint id"));
        };
        let (body_a, body_b) = slot.behavior.bodies();
        for (own, other) in [(body_a, body_b), (body_b, body_a)] {
            if let Some(rigid) = self.cold[own.index()].as_mut() {
                rigid.constraints.remove(&id);
                rigid.remove_connection(other);
            }
        }
        self.islands.edge_removed(body_a, body_b, &self.cold);
        self.wake_body(body_a);
        self.wake_body(body_b);
        self.flush_wake_queue();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Body state access and mutation (single-threaded, outside `step`)
    // ------------------------------------------------------------------

    pub fn body(&self, handle: BodyHandle) -> Option<&BodyData> {
        self.bodies.get(handle)
    }

    pub fn is_body_active(&self, handle: BodyHandle) -> bool {
        self.bodies.is_active(handle)
    }

    pub fn body_sleep_timer(&self, handle: BodyHandle) -> f32 {
        self.cold
            .get(handle.index())
            .and_then(|slot| slot.as_ref())
            .map(|rigid| rigid.sleep_timer)
            .unwrap_or(0.0)
    }

    pub fn set_body_position(&mut self, handle: BodyHandle, position: Vec3) -> PhysicsResult<()> {
        if !position.is_finite() {
            return Err(PhysicsError::InvalidArgument("position must be finite"));
        }
        let Some(data) = self.bodies.get_mut(handle) else {
            return Err(PhysicsError::InvalidArgument("unknown body handle"));
        };
        data.position = position;
        self.wake_body_and_neighbors(handle);
        Ok(())
    }

    pub fn set_body_velocity(&mut self, handle: BodyHandle, linear: Vec3, angular: Vec3) -> PhysicsResult<()> {
        if !linear.is_finite() || !angular.is_finite() {
            return Err(PhysicsError::InvalidArgument("velocity must be finite"));
        }
        let Some(data) = self.bodies.get_mut(handle) else {
            return Err(PhysicsError::InvalidArgument("unknown body handle"));
        };
        if !data.is_static {
            data.linear_velocity = linear;
            data.angular_velocity = angular;
        }
        self.wake_body_and_neighbors(handle);
        Ok(())
    }

    /// Accumulates a force (applied at the center of mass) for the next step.
    pub fn apply_force(&mut self, handle: BodyHandle, force: Vec3) -> PhysicsResult<()> {
        if !force.is_finite() {
            return Err(PhysicsError::InvalidArgument("force must be finite"));
        }
        let Some(rigid) = self.cold.get_mut(handle.index()).and_then(|s| s.as_mut()) else {
            return Err(PhysicsError::InvalidArgument("unknown body handle"));
        };
        rigid.force += force;
        self.wake_body(handle);
        self.flush_wake_queue();
        Ok(())
    }

    pub fn apply_torque(&mut self, handle: BodyHandle, torque: Vec3) -> PhysicsResult<()> {
        if !torque.is_finite() {
            return Err(PhysicsError::InvalidArgument("torque must be finite"));
        }
        let Some(rigid) = self.cold.get_mut(handle.index()).and_then(|s| s.as_mut()) else {
            return Err(PhysicsError::InvalidArgument("unknown body handle"));
        };
        rigid.torque += torque;
        self.wake_body(handle);
        self.flush_wake_queue();
        Ok(())
    }

    /// Applies an impulse at a world point, waking the body's island.
    pub fn apply_impulse(&mut self, handle: BodyHandle, impulse: Vec3, point: Vec3) -> PhysicsResult<()> {
        if !impulse.is_finite() || !point.is_finite() {
            return Err(PhysicsError::InvalidArgument("impulse must be finite"));
        }
        self.wake_body(handle);
        self.flush_wake_queue();
        let Some(data) = self.bodies.get_mut(handle) else {
            return Err(PhysicsError::InvalidArgument("unknown body handle"));
        };
        data.apply_impulse(impulse, point);
        Ok(())
    }

    /// User-directed activation of a body's island.
    pub fn activate_body(&mut self, handle: BodyHandle) {
        self.wake_body(handle);
        self.flush_wake_queue();
    }

    pub fn arbiter_between(&self, a: ShapeId, b: ShapeId) -> Option<&crate::collision::arbiter::Arbiter> {
        let id = self.arbiters.id_of(ArbiterKey::new(a, b))?;
        self.arbiters.get(id)
    }

    /// Total number of live contact points across all arbiters.
    pub fn contact_count(&self) -> usize {
        self.arbiters
            .ids()
            .into_iter()
            .filter_map(|id| self.arbiters.get(id))
            .map(|arb| arb.contact_count())
            .sum()
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Casts a ray through the broadphase tree, returning the closest shape
    /// hit within `max_t`.
    pub fn ray_cast(&self, origin: Vec3, direction: Vec3, max_t: f32) -> Option<RayHit> {
        let shapes = &self.shapes;
        let bodies = &self.bodies;
        let mut best: Option<RayHit> = None;

        self.broadphase.ray_cast(origin, direction, max_t, |shape_id, _enter| {
            let clip = best.map(|hit| hit.fraction).unwrap_or(max_t);
            let Some(collider) = shapes.get(shape_id) else {
                return clip;
            };
            let Some(body_handle) = collider.body else {
                return clip;
            };
            let Some(data) = bodies.get(body_handle) else {
                return clip;
            };

            let world = collider.world_transform(&data.transform());
            let local_origin = world.inverse_transform_point(origin);
            let local_direction = world.inverse_transform_direction(direction);
            if let Some((t, local_normal)) =
                collider.shape.ray_cast_local(local_origin, local_direction, clip)
            {
                if t < clip {
                    best = Some(RayHit {
                        body: body_handle,
                        shape: shape_id,
                        fraction: t,
                        point: origin + direction * t,
                        normal: world.transform_direction(local_normal),
                    });
                    return t;
                }
            }
            clip
        });

        best
    }

    // ------------------------------------------------------------------
    // The step pipeline
    // ------------------------------------------------------------------

    /// Advances the simulation by `dt`. With `multi_thread` set (and the
    /// `parallel` feature enabled), islands are solved on the worker pool.
    ///
    /// The pipeline: integrate forces → broadphase → narrowphase refresh →
    /// island maintenance → substepped solve and integration → finalize →
    /// sleep evaluation.
    pub fn step(&mut self, dt: f32, multi_thread: bool) {
        if dt <= 0.0 || !dt.is_finite() {
            warn!("ignoring step with non-positive dt {dt}");
            return;
        }

        self.frame = self.frame.wrapping_add(1);
        self.profiler.reset();
        let step_start = std::time::Instant::now();
        let _timer = ScopedTimer::new("world::step");

        let start = std::time::Instant::now();
        self.apply_external_forces(dt);
        self.profiler.forces_time = start.elapsed();

        let start = std::time::Instant::now();
        self.update_broadphase(dt);
        self.profiler.broadphase_time = start.elapsed();

        let start = std::time::Instant::now();
        self.run_narrowphase(dt);
        self.profiler.narrowphase_time = start.elapsed();

        let start = std::time::Instant::now();
        self.flush_deferred_removals();
        self.islands.split_pass(&mut self.cold);
        self.flush_wake_queue();
        self.profiler.island_time = start.elapsed();

        let start = std::time::Instant::now();
        self.step_totals = SolverStepTotals::default();
        self.rebuild_island_work_lists();
        let substeps = self.solver_settings.substeps.max(1);
        let sub_dt = dt / substeps as f32;
        for _ in 0..substeps {
            self.solve_substep(sub_dt, multi_thread);
            self.integrate_positions(sub_dt, multi_thread);
        }
        self.profiler.solver_time = start.elapsed();

        let start = std::time::Instant::now();
        self.finalize_bodies(dt);
        self.profiler.integration_time = start.elapsed();

        if self.allow_deactivation {
            self.evaluate_sleep(dt);
        }
        self.clear_forces();

        self.profiler.total_step_time = step_start.elapsed();
        self.profiler.body_count = self.bodies.len();
        self.profiler.contact_count = self.contact_count();
        self.profiler.active_island_count = self.islands.active_islands().len();
        self.log_solver_totals_if_needed();
    }

    fn apply_external_forces(&mut self, dt: f32) {
        for position in 0..self.bodies.active_len() {
            let handle = self.bodies.handle_at(position);
            let Some((force, torque, gravity)) =
                self.cold.get(handle.index()).and_then(|slot| slot.as_ref()).map(|rigid| {
                    let gravity = if rigid.affected_by_gravity {
                        self.gravity
                    } else {
                        Vec3::ZERO
                    };
                    (rigid.force, rigid.torque, gravity)
                })
            else {
                continue;
            };
            if let Some(data) = self.bodies.get_mut(handle) {
                integrator::apply_forces(data, force, torque, gravity, dt);
                data.clamp_non_finite();
            }
        }
    }

    fn update_broadphase(&mut self, dt: f32) {
        self.moved_shapes.clear();
        for position in 0..self.bodies.active_len() {
            let handle = self.bodies.handle_at(position);
            if let Some(rigid) = self.cold.get(handle.index()).and_then(|slot| slot.as_ref()) {
                self.moved_shapes.extend(rigid.shapes.iter().copied());
            }
        }
        let mut dirty = std::mem::take(&mut self.dirty_shapes);
        self.moved_shapes.append(&mut dirty);
        self.dirty_shapes = dirty;

        let moved = std::mem::take(&mut self.moved_shapes);
        for &shape in &moved {
            let Some(collider) = self.shapes.get_mut(shape) else {
                continue;
            };
            let Some(body_handle) = collider.body else {
                continue;
            };
            let Some(data) = self.bodies.get(body_handle) else {
                continue;
            };
            let speculative = self
                .cold
                .get(body_handle.index())
                .and_then(|slot| slot.as_ref())
                .map(|rigid| rigid.speculative_contacts)
                .unwrap_or(false);
            collider.update_world_bounding_box(&data.transform());
            // Fast bodies sweep their bounds by one step of travel so
            // speculative pairs show up before the overlap does.
            if speculative && !data.is_static {
                collider.world_aabb = collider.world_aabb.swept_by(data.linear_velocity * dt);
            }
            if collider.proxy != NULL_PROXY {
                self.broadphase.update_proxy(collider.proxy, &collider.world_aabb);
            }
        }
        self.moved_shapes = moved;

        self.pair_buffer.clear();
        let shapes = &self.shapes;
        let bodies = &self.bodies;
        let pairs = &mut self.pair_buffer;
        self.broadphase.enumerate_overlaps(
            |shape_a, shape_b| {
                let (Some(ca), Some(cb)) = (shapes.get(shape_a), shapes.get(shape_b)) else {
                    return false;
                };
                let (Some(body_a), Some(body_b)) = (ca.body, cb.body) else {
                    return false;
                };
                if body_a == body_b {
                    return false;
                }
                if !CollisionFilter::matches(&ca.filter, &cb.filter) {
                    return false;
                }
                let (Some(da), Some(db)) = (bodies.get(body_a), bodies.get(body_b)) else {
                    return false;
                };
                // Pairs where neither side can move are skipped; an
                // active-inactive pair stays so new contacts can wake.
                !(da.static_or_inactive() && db.static_or_inactive())
            },
            |shape_a, shape_b| pairs.push((shape_a, shape_b)),
        );
    }

    fn run_narrowphase(&mut self, dt: f32) {
        let pairs = std::mem::take(&mut self.pair_buffer);
        for &(shape_a, shape_b) in &pairs {
            self.process_pair(shape_a, shape_b, dt);
        }
        self.pair_buffer = pairs;

        // Arbiters whose pair was not enumerated this frame have drifted out
        // of broadphase overlap; drop them unless their islands are asleep.
        let frame = self.frame;
        for id in self.arbiters.ids() {
            let Some(arbiter) = self.arbiters.get(id) else {
                continue;
            };
            if arbiter.touched_frame == frame {
                continue;
            }
            let a_active = self
                .bodies
                .get(arbiter.body_a)
                .map(|d| d.is_active)
                .unwrap_or(false);
            let b_active = self
                .bodies
                .get(arbiter.body_b)
                .map(|d| d.is_active)
                .unwrap_or(false);
            if a_active || b_active {
                self.arbiters.deferred_removals.push(id);
            }
        }
    }

    fn process_pair(&mut self, raw_a: ShapeId, raw_b: ShapeId, dt: f32) {
        let key = ArbiterKey::new(raw_a, raw_b);
        let (shape_a, shape_b) = (key.shape_a, key.shape_b);

        // Gather the pair's state up front; the narrowphase only needs
        // support mappings and transforms.
        let Some((body_a, transform_a, velocity_a, a_static, a_speculative)) =
            self.shape_pair_state(shape_a)
        else {
            return;
        };
        let Some((body_b, transform_b, velocity_b, b_static, b_speculative)) =
            self.shape_pair_state(shape_b)
        else {
            return;
        };

        let (seed, extras, material) = {
            let (Some(ca), Some(cb)) = (self.shapes.get(shape_a), self.shapes.get(shape_b)) else {
                return;
            };
            let material = Material::combine_pair(&ca.material, &cb.material);
            let seed = NarrowPhase::collide(ca, &transform_a, cb, &transform_b, self.use_full_epa);

            let seed = match seed {
                Some(seed) => Some(seed),
                None if a_speculative || b_speculative => NarrowPhase::speculative_contact(
                    ca,
                    &transform_a,
                    velocity_a,
                    cb,
                    &transform_b,
                    velocity_b,
                    dt,
                    self.speculative_margin,
                ),
                None => None,
            };

            let extras = match &seed {
                Some(seed) if seed.penetration >= 0.0 => {
                    NarrowPhase::one_shot_manifold(ca, &transform_a, cb, &transform_b, seed)
                }
                _ => Vec::new(),
            };
            (seed, extras, material)
        };

        let Some(seed) = seed else {
            // Still-registered arbiter for a now-separated pair: refresh and
            // queue for removal once it empties.
            if let Some(id) = self.arbiters.id_of(key) {
                if let Some(arbiter) = self.arbiters.get_mut(id) {
                    arbiter.refresh(&transform_a, &transform_b);
                    arbiter.touched_frame = self.frame;
                    if arbiter.is_empty() {
                        self.arbiters.deferred_removals.push(id);
                    }
                }
            }
            return;
        };

        let (restitution, friction) = material;
        let created = match self
            .arbiters
            .get_or_create(key, body_a, body_b, friction, restitution)
        {
            Ok((id, created)) => {
                let frame = self.frame;
                if let Some(arbiter) = self.arbiters.get_mut(id) {
                    arbiter.friction = friction;
                    arbiter.restitution = restitution;
                    arbiter.refresh(&transform_a, &transform_b);
                    arbiter.add_contact(&seed, &transform_a, &transform_b);
                    for extra in &extras {
                        arbiter.add_contact(extra, &transform_a, &transform_b);
                    }
                    arbiter.touched_frame = frame;
                }
                created
            }
            Err(error) => {
                warn!("dropping contact {shape_a:?}/{shape_b:?}: {error}");
                return;
            }
        };

        if created {
            let id = self.arbiters.id_of(key).expect("arbiter just created");
            for (own, other) in [(body_a, body_b), (body_b, body_a)] {
                if let Some(rigid) = self.cold[own.index()].as_mut() {
                    rigid.arbiters.insert(id);
                    rigid.add_connection(other);
                }
            }
            self.islands
                .bodies_connected(body_a, a_static, body_b, b_static, &mut self.cold);
            // A new contact wakes both islands.
            self.wake_queue.push(body_a);
            self.wake_queue.push(body_b);
        }
    }

    #[allow(clippy::type_complexity)]
    fn shape_pair_state(
        &self,
        shape: ShapeId,
    ) -> Option<(BodyHandle, Transform, Vec3, bool, bool)> {
        let collider = self.shapes.get(shape)?;
        let body = collider.body?;
        let data = self.bodies.get(body)?;
        let speculative = self.cold[body.index()]
            .as_ref()
            .map(|rigid| rigid.speculative_contacts)
            .unwrap_or(false);
        Some((
            body,
            data.transform(),
            data.linear_velocity,
            data.is_static,
            speculative,
        ))
    }

    fn remove_arbiter_internal(&mut self, id: ArbiterId, wake: bool) {
        let Some(arbiter) = self.arbiters.remove(id) else {
            return;
        };
        let (body_a, body_b) = (arbiter.body_a, arbiter.body_b);
        for (own, other) in [(body_a, body_b), (body_b, body_a)] {
            if let Some(rigid) = self.cold.get_mut(own.index()).and_then(|slot| slot.as_mut()) {
                rigid.arbiters.remove(&id);
                rigid.remove_connection(other);
            }
        }
        self.islands.edge_removed(body_a, body_b, &self.cold);
        if wake {
            self.wake_queue.push(body_a);
            self.wake_queue.push(body_b);
        }
    }

    fn flush_deferred_removals(&mut self) {
        let ids = std::mem::take(&mut self.arbiters.deferred_removals);
        for id in &ids {
            self.remove_arbiter_internal(*id, true);
        }
        let mut ids = ids;
        ids.clear();
        self.arbiters.deferred_removals = ids;
    }

    fn wake_body(&mut self, handle: BodyHandle) {
        self.wake_queue.push(handle);
    }

    fn wake_body_and_neighbors(&mut self, handle: BodyHandle) {
        self.wake_queue.push(handle);
        if let Some(rigid) = self.cold.get(handle.index()).and_then(|slot| slot.as_ref()) {
            let neighbors: Vec<BodyHandle> = rigid.connections.keys().copied().collect();
            self.wake_queue.extend(neighbors);
        }
        self.touch_body_shapes(handle);
        self.flush_wake_queue();
    }

    fn touch_body_shapes(&mut self, handle: BodyHandle) {
        if let Some(rigid) = self.cold.get(handle.index()).and_then(|slot| slot.as_ref()) {
            self.dirty_shapes.extend(rigid.shapes.iter().copied());
        }
    }

    fn flush_wake_queue(&mut self) {
        let mut queue = std::mem::take(&mut self.wake_queue);
        for &handle in &queue {
            self.wake_island_of(handle);
        }
        queue.clear();
        self.wake_queue = queue;
    }

    fn wake_island_of(&mut self, handle: BodyHandle) {
        let is_static = self
            .bodies
            .get(handle)
            .map(|data| data.is_static)
            .unwrap_or(true);
        if is_static {
            return;
        }
        let Some(island_id) = self
            .cold
            .get(handle.index())
            .and_then(|slot| slot.as_ref())
            .map(|rigid| rigid.island)
        else {
            return;
        };
        if island_id.is_none() {
            return;
        }

        self.islands.mark_active(island_id);

        // Per-body activation: after an active island absorbs a sleeping
        // one, the island is already marked active while some members still
        // sit in the inactive suffix.
        let members: Vec<BodyHandle> = self
            .islands
            .get(island_id)
            .map(|island| island.bodies.clone())
            .unwrap_or_default();
        for member in members {
            if let Some(rigid) = self.cold.get_mut(member.index()).and_then(|slot| slot.as_mut()) {
                rigid.sleep_timer = 0.0;
            }
            if !self.bodies.is_active(member) {
                self.bodies.set_active(member, true);
                if let Some(data) = self.bodies.get_mut(member) {
                    data.is_active = true;
                }
            }
        }
    }

    fn rebuild_island_work_lists(&mut self) {
        let slots = self.islands.slot_count();
        if self.island_arbiters.len() < slots {
            self.island_arbiters.resize_with(slots, Vec::new);
        }
        if self.island_constraints.len() < slots {
            self.island_constraints.resize_with(slots, Vec::new);
        }
        for list in &mut self.island_arbiters {
            list.clear();
        }
        for list in &mut self.island_constraints {
            list.clear();
        }

        for id in self.arbiters.ids() {
            let Some(arbiter) = self.arbiters.get(id) else {
                continue;
            };
            if arbiter.is_empty() {
                continue;
            }
            if let Some(island) = self.owning_island(arbiter.body_a, arbiter.body_b) {
                self.island_arbiters[island.0 as usize].push(id);
            }
        }

        let constraint_ids: Vec<ConstraintId> = self.constraints.handles().collect();
        for id in constraint_ids {
            let Some(slot) = self.constraints.get(id) else {
                continue;
            };
            let (body_a, body_b) = slot.behavior.bodies();
            if let Some(island) = self.owning_island(body_a, body_b) {
                self.island_constraints[island.0 as usize].push(id);
            }
        }
    }

    /// The island that schedules a pair's work: the first dynamic body's.
    /// Returns `None` when that island is not scheduled this step.
    fn owning_island(&self, body_a: BodyHandle, body_b: BodyHandle) -> Option<IslandId> {
        let a_static = self
            .bodies
            .get(body_a)
            .map(|data| data.is_static)
            .unwrap_or(true);
        let owner = if a_static { body_b } else { body_a };
        let island = self
            .cold
            .get(owner.index())
            .and_then(|slot| slot.as_ref())
            .map(|rigid| rigid.island)?;
        if island.is_none() {
            return None;
        }
        self.islands
            .get(island)
            .filter(|island| island.marked_as_active)
            .map(|_| island)
    }

    fn solve_substep(&mut self, sub_dt: f32, multi_thread: bool) {
        let islands = &self.islands;
        let work_arbiters = &self.island_arbiters;
        let work_constraints = &self.island_constraints;
        let settings = &self.solver_settings;
        let body_view = self.bodies.solver_view();
        let arbiter_view = self.arbiters.solver_view();
        let constraint_view = self.constraints.solver_view();

        #[cfg(feature = "parallel")]
        if multi_thread {
            use rayon::prelude::*;

            let collected = parking_lot::Mutex::new(SolverStepTotals::default());
            let solve_all = || {
                islands.active_islands().par_iter().for_each(|&island_id| {
                    let Some(island) = islands.get(island_id) else {
                        return;
                    };
                    let totals = solver::solve_island_substep(
                        island_id.0,
                        &island.bodies,
                        &work_arbiters[island_id.0 as usize],
                        &work_constraints[island_id.0 as usize],
                        &body_view,
                        &arbiter_view,
                        &constraint_view,
                        settings,
                        sub_dt,
                    );
                    collected.lock().merge(&totals);
                });
            };
            match &self.thread_pool {
                Some(pool) => pool.install(solve_all),
                None => solve_all(),
            }
            self.step_totals.merge(&collected.into_inner());
            return;
        }

        #[cfg(not(feature = "parallel"))]
        let _ = multi_thread;

        let mut totals = SolverStepTotals::default();
        for &island_id in islands.active_islands() {
            let Some(island) = islands.get(island_id) else {
                continue;
            };
            let island_totals = solver::solve_island_substep(
                island_id.0,
                &island.bodies,
                &work_arbiters[island_id.0 as usize],
                &work_constraints[island_id.0 as usize],
                &body_view,
                &arbiter_view,
                &constraint_view,
                settings,
                sub_dt,
            );
            totals.merge(&island_totals);
        }
        self.step_totals.merge(&totals);
    }

    fn integrate_positions(&mut self, sub_dt: f32, multi_thread: bool) {
        #[cfg(feature = "parallel")]
        if multi_thread {
            use rayon::prelude::*;
            let active = self.bodies.active_mut();
            let mut run = || {
                active.par_iter_mut().for_each(|data| {
                    integrator::integrate_position(data, sub_dt);
                });
            };
            match &self.thread_pool {
                Some(pool) => pool.install(run),
                None => run(),
            }
            return;
        }

        #[cfg(not(feature = "parallel"))]
        let _ = multi_thread;

        for data in self.bodies.active_mut() {
            integrator::integrate_position(data, sub_dt);
        }
    }

    fn finalize_bodies(&mut self, dt: f32) {
        for position in 0..self.bodies.active_len() {
            let handle = self.bodies.handle_at(position);
            let Some((linear_damping, angular_damping)) = self
                .cold
                .get(handle.index())
                .and_then(|slot| slot.as_ref())
                .map(|rigid| (rigid.linear_damping, rigid.angular_damping))
            else {
                continue;
            };
            if let Some(data) = self.bodies.get_mut(handle) {
                integrator::finish_step(data, linear_damping, angular_damping, dt);
                data.clamp_non_finite();
            }
        }
    }

    /// Sleep bookkeeping: quiescent bodies accumulate time (scaled by the
    /// outer step, not the substep), and an island whose every non-static
    /// body has been quiet long enough deactivates as a whole.
    fn evaluate_sleep(&mut self, dt: f32) {
        for position in 0..self.bodies.active_len() {
            let handle = self.bodies.handle_at(position);
            let Some((linear_sq, angular_sq, is_static)) = self.bodies.get(handle).map(|data| {
                (
                    data.linear_velocity.length_squared(),
                    data.angular_velocity.length_squared(),
                    data.is_static,
                )
            }) else {
                continue;
            };
            if is_static {
                continue;
            }
            if let Some(rigid) = self.cold.get_mut(handle.index()).and_then(|slot| slot.as_mut()) {
                let quiet = linear_sq < rigid.sleep_linear_threshold * rigid.sleep_linear_threshold
                    && angular_sq < rigid.sleep_angular_threshold * rigid.sleep_angular_threshold;
                if quiet {
                    rigid.sleep_timer += dt;
                } else {
                    rigid.sleep_timer = 0.0;
                }
            }
        }

        let candidates: Vec<IslandId> = self.islands.active_islands().to_vec();
        for island_id in candidates {
            let sleepable = self
                .islands
                .get(island_id)
                .map(|island| {
                    island.bodies.iter().all(|&member| {
                        let is_static = self
                            .bodies
                            .get(member)
                            .map(|data| data.is_static)
                            .unwrap_or(true);
                        if is_static {
                            return true;
                        }
                        self.cold
                            .get(member.index())
                            .and_then(|slot| slot.as_ref())
                            .map(|rigid| rigid.sleep_timer >= rigid.deactivation_time)
                            .unwrap_or(false)
                    })
                })
                .unwrap_or(false);
            if sleepable {
                self.deactivate_island(island_id);
            }
        }
    }

    fn deactivate_island(&mut self, island_id: IslandId) {
        debug!("island {island_id:?} going to sleep");
        self.islands.mark_inactive(island_id);
        let members: Vec<BodyHandle> = self
            .islands
            .get(island_id)
            .map(|island| island.bodies.clone())
            .unwrap_or_default();
        for member in members {
            self.bodies.set_active(member, false);
            if let Some(data) = self.bodies.get_mut(member) {
                data.is_active = false;
                data.linear_velocity = Vec3::ZERO;
                data.angular_velocity = Vec3::ZERO;
                data.delta_linear = Vec3::ZERO;
                data.delta_angular = Vec3::ZERO;
            }
        }
    }

    fn clear_forces(&mut self) {
        for position in 0..self.bodies.active_len() {
            let handle = self.bodies.handle_at(position);
            if let Some(rigid) = self.cold.get_mut(handle.index()).and_then(|slot| slot.as_mut()) {
                rigid.force = Vec3::ZERO;
                rigid.torque = Vec3::ZERO;
            }
        }
    }

    fn log_solver_totals_if_needed(&self) {
        if !self.solver_totals_logging {
            return;
        }
        let totals = &self.step_totals;
        debug!(
            "solver totals: islands={} contacts={} constraints={} normal_sum={:.4} friction_sum={:.4}",
            totals.islands_solved,
            totals.contacts_solved,
            totals.constraints_solved,
            totals.normal_impulse_sum,
            totals.friction_impulse_sum
        );
    }
}

impl Default for PhysicsWorld {
    fn default() -> Self {
        Self::new()
    }
}
