use glam::Vec3;

use crate::{
    collision::arbiter::Arbiter,
    config,
    core::{
        body::BodyData,
        pool::{ArbiterId, BodyHandle, ConstraintId, PoolView},
    },
    dynamics::constraint::{ConstraintRow, ConstraintSlot},
};

/// Tunables of the sequential-impulse solver.
#[derive(Debug, Clone)]
pub struct SolverSettings {
    /// Sequential-impulse passes per substep (≥ 1).
    pub iterations: u32,
    /// Inner integration subdivisions per step (≥ 1).
    pub substeps: u32,
    /// Baumgarte factor feeding penetration into the velocity bias.
    pub bias_factor: f32,
    /// Penetration tolerated before positional correction.
    pub slop: f32,
    /// Closing speeds below this bounce no restitution.
    pub restitution_threshold: f32,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            iterations: config::DEFAULT_SOLVER_ITERATIONS,
            substeps: config::DEFAULT_SUBSTEPS,
            bias_factor: config::DEFAULT_BIAS_FACTOR,
            slop: config::DEFAULT_PENETRATION_SLOP,
            restitution_threshold: config::DEFAULT_RESTITUTION_THRESHOLD,
        }
    }
}

/// Per-step solver totals, aggregated across islands for diagnostics.
#[derive(Debug, Default, Clone)]
pub struct SolverStepTotals {
    pub islands_solved: usize,
    pub contacts_solved: usize,
    pub constraints_solved: usize,
    pub normal_impulse_sum: f32,
    pub friction_impulse_sum: f32,
}

impl SolverStepTotals {
    pub fn merge(&mut self, other: &Self) {
        self.islands_solved += other.islands_solved;
        self.contacts_solved += other.contacts_solved;
        self.constraints_solved += other.constraints_solved;
        self.normal_impulse_sum += other.normal_impulse_sum;
        self.friction_impulse_sum += other.friction_impulse_sum;
    }
}

/// Write access to one side of a pair during an island solve.
///
/// Dynamic bodies are island-exclusive and mutate in place; static bodies are
/// shared between islands and therefore only ever read (their velocities are
/// zero by invariant, so impulses against them vanish).
pub(crate) enum SolveBody<'a> {
    Dynamic(&'a mut BodyData),
    Frozen(&'a BodyData),
}

impl<'a> SolveBody<'a> {
    /// # Safety
    /// The caller must own `handle`'s island when the body is dynamic.
    pub(crate) unsafe fn fetch(view: &PoolView<'a, BodyData>, handle: BodyHandle) -> Option<Self> {
        let frozen = view.get_ref(handle)?.is_static;
        if frozen {
            view.get_ref(handle).map(SolveBody::Frozen)
        } else {
            view.get_mut(handle).map(SolveBody::Dynamic)
        }
    }

    pub(crate) fn data(&self) -> &BodyData {
        match self {
            SolveBody::Dynamic(data) => data,
            SolveBody::Frozen(data) => data,
        }
    }

    fn apply_impulse_at(&mut self, impulse: Vec3, r: Vec3) {
        if let SolveBody::Dynamic(data) = self {
            data.apply_delta_impulse(impulse, r);
        }
    }

    fn apply_jacobian(&mut self, lin: Vec3, ang: Vec3, lambda: f32) {
        if let SolveBody::Dynamic(data) = self {
            data.delta_linear += lin * (lambda * data.inverse_mass);
            data.delta_angular += data.inverse_inertia_world * (ang * lambda);
        }
    }
}

/// Runs one substep of the sequential-impulse solver over a single island:
/// prepare (effective masses, bias, warm start) followed by the iterate
/// passes. Returns the island's impulse totals.
///
/// # Safety contract
/// The caller guarantees the island owns every dynamic body, arbiter and
/// constraint it names, and that no two concurrent calls share any of them.
#[allow(clippy::too_many_arguments)]
pub(crate) fn solve_island_substep(
    island_tag: u32,
    body_list: &[BodyHandle],
    arbiter_ids: &[ArbiterId],
    constraint_ids: &[ConstraintId],
    bodies: &PoolView<'_, BodyData>,
    arbiters: &PoolView<'_, Arbiter>,
    constraints: &PoolView<'_, ConstraintSlot>,
    settings: &SolverSettings,
    dt: f32,
) -> SolverStepTotals {
    // Debug-only ownership tags; cross-island sharing cannot happen by the
    // island invariant, so these never fire in a correct build.
    for &handle in body_list {
        if let Some(data) = unsafe { bodies.get_ref(handle) } {
            data.debug_assert_owned(island_tag);
        }
    }

    let mut totals = SolverStepTotals {
        islands_solved: 1,
        ..SolverStepTotals::default()
    };

    // Prepare phase.
    for &id in arbiter_ids {
        let Some(arbiter) = (unsafe { arbiters.get_mut(id) }) else {
            continue;
        };
        let Some(mut a) = (unsafe { SolveBody::fetch(bodies, arbiter.body_a) }) else {
            continue;
        };
        let Some(mut b) = (unsafe { SolveBody::fetch(bodies, arbiter.body_b) }) else {
            continue;
        };
        prepare_arbiter(arbiter, &mut a, &mut b, settings, dt);
        totals.contacts_solved += arbiter.contact_count();
    }

    for &id in constraint_ids {
        let Some(slot) = (unsafe { constraints.get_mut(id) }) else {
            continue;
        };
        if !slot.behavior.is_enabled() {
            slot.data.begin(0);
            continue;
        }
        let (handle_a, handle_b) = slot.behavior.bodies();
        let Some(mut a) = (unsafe { SolveBody::fetch(bodies, handle_a) }) else {
            continue;
        };
        let Some(mut b) = (unsafe { SolveBody::fetch(bodies, handle_b) }) else {
            continue;
        };

        slot.behavior.prepare(a.data(), b.data(), &mut slot.data, dt);
        let row_count = slot.data.row_count;
        for row in slot.data.rows[..row_count].iter_mut() {
            row.effective_mass = effective_mass(row, a.data(), b.data());
            // Warm start with last step's impulse.
            let lambda = row.impulse;
            a.apply_jacobian(row.lin_a, row.ang_a, lambda);
            b.apply_jacobian(row.lin_b, row.ang_b, lambda);
        }
        totals.constraints_solved += 1;
    }

    // Iterate phase: row order is fixed by preparation order.
    for _ in 0..settings.iterations {
        for &id in constraint_ids {
            let Some(slot) = (unsafe { constraints.get_mut(id) }) else {
                continue;
            };
            if slot.data.row_count == 0 {
                continue;
            }
            let (handle_a, handle_b) = slot.behavior.bodies();
            let Some(mut a) = (unsafe { SolveBody::fetch(bodies, handle_a) }) else {
                continue;
            };
            let Some(mut b) = (unsafe { SolveBody::fetch(bodies, handle_b) }) else {
                continue;
            };
            let row_count = slot.data.row_count;
            for row in slot.data.rows[..row_count].iter_mut() {
                solve_row(row, &mut a, &mut b);
            }
        }

        for &id in arbiter_ids {
            let Some(arbiter) = (unsafe { arbiters.get_mut(id) }) else {
                continue;
            };
            let Some(mut a) = (unsafe { SolveBody::fetch(bodies, arbiter.body_a) }) else {
                continue;
            };
            let Some(mut b) = (unsafe { SolveBody::fetch(bodies, arbiter.body_b) }) else {
                continue;
            };
            iterate_arbiter(arbiter, &mut a, &mut b);
        }
    }

    for &id in arbiter_ids {
        if let Some(arbiter) = unsafe { arbiters.get_ref(id) } {
            for slot in arbiter.live_slots() {
                let point = &arbiter.contacts[slot];
                totals.normal_impulse_sum += point.normal_impulse.abs();
                totals.friction_impulse_sum +=
                    point.tangent_impulse[0].abs() + point.tangent_impulse[1].abs();
            }
        }
    }

    for &handle in body_list {
        if let Some(data) = unsafe { bodies.get_ref(handle) } {
            data.debug_release();
        }
    }

    totals
}

/// Computes effective masses, bias terms and warm-start impulses for every
/// live contact of one arbiter.
fn prepare_arbiter(
    arbiter: &mut Arbiter,
    a: &mut SolveBody<'_>,
    b: &mut SolveBody<'_>,
    settings: &SolverSettings,
    dt: f32,
) {
    let normal = arbiter.normal;
    let (tangent1, tangent2) = normal.any_orthonormal_pair();
    arbiter.tangent1 = tangent1;
    arbiter.tangent2 = tangent2;
    let restitution = arbiter.restitution;

    let transform_a = a.data().transform();
    let transform_b = b.data().transform();

    for slot in 0..crate::collision::arbiter::MAX_CONTACTS {
        if arbiter.usage_mask & (1 << slot) == 0 {
            continue;
        }
        let point = &mut arbiter.contacts[slot];

        // Anchors move with the bodies between substeps.
        point.world_a = transform_a.transform_point(point.local_a);
        point.world_b = transform_b.transform_point(point.local_b);
        point.penetration = (point.world_a - point.world_b).dot(normal);

        let mid = (point.world_a + point.world_b) * 0.5;
        point.r_a = mid - a.data().position;
        point.r_b = mid - b.data().position;

        point.normal_mass = 1.0 / effective_mass_at(normal, point.r_a, point.r_b, a.data(), b.data());
        point.tangent_mass = [
            1.0 / effective_mass_at(tangent1, point.r_a, point.r_b, a.data(), b.data()),
            1.0 / effective_mass_at(tangent2, point.r_a, point.r_b, a.data(), b.data()),
        ];

        // Velocity bias: Baumgarte push for penetration, restitution bounce
        // for fast closings, or the speculative cap for positive separation.
        if point.penetration >= 0.0 {
            let baumgarte =
                -settings.bias_factor * (point.penetration - settings.slop).max(0.0) / dt;
            let closing = relative_normal_velocity(point, normal, a.data(), b.data());
            let bounce = if closing < -settings.restitution_threshold {
                restitution * closing
            } else {
                0.0
            };
            point.bias = baumgarte.min(bounce);
        } else {
            // Positive separation: the impulse may only cancel the closing
            // velocity in excess of the remaining gap.
            point.bias = -point.penetration / dt;
        }

        // Warm start.
        let impulse = normal * point.normal_impulse
            + tangent1 * point.tangent_impulse[0]
            + tangent2 * point.tangent_impulse[1];
        if impulse.length_squared() > 0.0 {
            a.apply_impulse_at(-impulse, point.r_a);
            b.apply_impulse_at(impulse, point.r_b);
        }
    }
}

/// One sequential-impulse pass over an arbiter: friction rows bounded by the
/// current normal impulse, then the normal row.
fn iterate_arbiter(arbiter: &mut Arbiter, a: &mut SolveBody<'_>, b: &mut SolveBody<'_>) {
    let normal = arbiter.normal;
    let tangents = [arbiter.tangent1, arbiter.tangent2];
    let friction = arbiter.friction;

    for slot in 0..crate::collision::arbiter::MAX_CONTACTS {
        if arbiter.usage_mask & (1 << slot) == 0 {
            continue;
        }
        let point = &mut arbiter.contacts[slot];

        // Friction, clamped to the friction cone of the accumulated normal
        // impulse.
        let limit = friction * point.normal_impulse;
        for (axis, tangent) in tangents.iter().enumerate() {
            let velocity = relative_velocity(point, a.data(), b.data()).dot(*tangent);
            let mut lambda = -velocity * point.tangent_mass[axis];
            let total = (point.tangent_impulse[axis] + lambda).clamp(-limit, limit);
            lambda = total - point.tangent_impulse[axis];
            point.tangent_impulse[axis] = total;

            let impulse = *tangent * lambda;
            a.apply_impulse_at(-impulse, point.r_a);
            b.apply_impulse_at(impulse, point.r_b);
        }

        // Normal row, accumulated impulse clamped to [0, ∞).
        let closing = relative_normal_velocity(point, normal, a.data(), b.data());
        let mut lambda = -(closing + point.bias) * point.normal_mass;
        let total = (point.normal_impulse + lambda).max(0.0);
        lambda = total - point.normal_impulse;
        point.normal_impulse = total;

        let impulse = normal * lambda;
        a.apply_impulse_at(-impulse, point.r_a);
        b.apply_impulse_at(impulse, point.r_b);
    }
}

fn relative_velocity(
    point: &crate::collision::arbiter::ContactPoint,
    a: &BodyData,
    b: &BodyData,
) -> Vec3 {
    b.solver_velocity_at(point.r_b) - a.solver_velocity_at(point.r_a)
}

fn relative_normal_velocity(
    point: &crate::collision::arbiter::ContactPoint,
    normal: Vec3,
    a: &BodyData,
    b: &BodyData,
) -> f32 {
    relative_velocity(point, a, b).dot(normal)
}

/// K = Σ J M⁻¹ Jᵀ for a contact direction at the given lever arms.
fn effective_mass_at(direction: Vec3, r_a: Vec3, r_b: Vec3, a: &BodyData, b: &BodyData) -> f32 {
    let ra_cross = r_a.cross(direction);
    let rb_cross = r_b.cross(direction);
    let k = a.inverse_mass
        + b.inverse_mass
        + ra_cross.dot(a.inverse_inertia_world * ra_cross)
        + rb_cross.dot(b.inverse_inertia_world * rb_cross);
    k.max(1e-9)
}

/// K for a generic constraint row.
fn effective_mass(row: &ConstraintRow, a: &BodyData, b: &BodyData) -> f32 {
    let k = a.inverse_mass * row.lin_a.length_squared()
        + b.inverse_mass * row.lin_b.length_squared()
        + row.ang_a.dot(a.inverse_inertia_world * row.ang_a)
        + row.ang_b.dot(b.inverse_inertia_world * row.ang_b);
    if k > 1e-9 {
        1.0 / k
    } else {
        0.0
    }
}

/// Shared row kernel: clamped accumulated impulse against the row bounds.
fn solve_row(row: &mut ConstraintRow, a: &mut SolveBody<'_>, b: &mut SolveBody<'_>) {
    let va = a.data();
    let vb = b.data();
    let jv = row.lin_a.dot(va.linear_velocity + va.delta_linear)
        + row.ang_a.dot(va.angular_velocity + va.delta_angular)
        + row.lin_b.dot(vb.linear_velocity + vb.delta_linear)
        + row.ang_b.dot(vb.angular_velocity + vb.delta_angular);

    let mut lambda = -(jv + row.bias) * row.effective_mass;
    let total = (row.impulse + lambda).clamp(row.lower, row.upper);
    lambda = total - row.impulse;
    row.impulse = total;

    a.apply_jacobian(row.lin_a, row.ang_a, lambda);
    b.apply_jacobian(row.lin_b, row.ang_b, lambda);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::pool::PoolHandle;

    fn dynamic_body(index: u32) -> BodyData {
        BodyData::new(PoolHandle::new(index, 0))
    }

    #[test]
    fn effective_mass_of_two_unit_point_masses() {
        let a = dynamic_body(0);
        let b = dynamic_body(1);
        let k = effective_mass_at(Vec3::Y, Vec3::ZERO, Vec3::ZERO, &a, &b);
        assert!((k - 2.0).abs() < 1e-6);
    }

    #[test]
    fn solve_row_drives_relative_velocity_to_zero() {
        let mut a = dynamic_body(0);
        let mut b = dynamic_body(1);
        a.linear_velocity = Vec3::new(1.0, 0.0, 0.0);
        b.linear_velocity = Vec3::new(-1.0, 0.0, 0.0);

        let mut row = ConstraintRow {
            lin_a: -Vec3::X,
            lin_b: Vec3::X,
            lower: f32::NEG_INFINITY,
            upper: f32::INFINITY,
            ..ConstraintRow::default()
        };
        row.effective_mass = 1.0 / 2.0;

        {
            let mut sa = SolveBody::Dynamic(&mut a);
            let mut sb = SolveBody::Dynamic(&mut b);
            solve_row(&mut row, &mut sa, &mut sb);
        }
        a.fold_deltas();
        b.fold_deltas();

        // The row's relative velocity (vb - va)·x must be cancelled.
        assert!((b.linear_velocity.x - a.linear_velocity.x).abs() < 1e-5);
    }

    #[test]
    fn static_bodies_absorb_no_impulse() {
        let mut body = dynamic_body(0);
        body.is_static = true;
        body.inverse_mass = 0.0;

        let mut solve = SolveBody::Frozen(&body);
        solve.apply_impulse_at(Vec3::Y * 10.0, Vec3::ZERO);
        assert_eq!(body.delta_linear, Vec3::ZERO);
    }
}
