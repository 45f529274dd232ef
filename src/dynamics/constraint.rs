use glam::Vec3;

use crate::core::{
    body::BodyData,
    pool::BodyHandle,
};

/// Maximum rows a single constraint may contribute.
pub const MAX_CONSTRAINT_ROWS: usize = 6;

/// One scalar row of a constraint: Jacobian blocks for both bodies, the bias,
/// bounds, and the accumulated impulse that persists across steps for warm
/// starting. The effective mass is computed by the solver after `prepare`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConstraintRow {
    pub lin_a: Vec3,
    pub ang_a: Vec3,
    pub lin_b: Vec3,
    pub ang_b: Vec3,
    pub effective_mass: f32,
    pub bias: f32,
    pub lower: f32,
    pub upper: f32,
    pub impulse: f32,
}

/// Solver-facing block filled in by a concrete constraint during `prepare`.
///
/// Rows keep their accumulated impulse when refilled; `set_row` overwrites
/// everything but the warm-start state.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConstraintData {
    pub rows: [ConstraintRow; MAX_CONSTRAINT_ROWS],
    pub row_count: usize,
}

impl ConstraintData {
    /// Declares the number of rows this step; impulses of surviving rows are
    /// preserved, rows beyond the previous count start cold.
    pub fn begin(&mut self, row_count: usize) {
        debug_assert!(row_count <= MAX_CONSTRAINT_ROWS);
        for row in self.rows.iter_mut().skip(self.row_count.min(row_count)) {
            row.impulse = 0.0;
        }
        self.row_count = row_count;
    }

    /// Fills one row, keeping its accumulated impulse for warm starting.
    #[allow(clippy::too_many_arguments)]
    pub fn set_row(
        &mut self,
        index: usize,
        lin_a: Vec3,
        ang_a: Vec3,
        lin_b: Vec3,
        ang_b: Vec3,
        bias: f32,
        lower: f32,
        upper: f32,
    ) {
        let impulse = self.rows[index].impulse;
        self.rows[index] = ConstraintRow {
            lin_a,
            ang_a,
            lin_b,
            ang_b,
            effective_mass: 0.0,
            bias,
            lower,
            upper,
            impulse,
        };
    }

    pub fn active_rows(&self) -> &[ConstraintRow] {
        &self.rows[..self.row_count]
    }
}

/// Contract a concrete constraint implements to participate in the solver.
///
/// `prepare` fills the row block each substep; the shared row kernel then
/// warm-starts and iterates every row with clamped accumulated impulses, so a
/// constraint's per-pass behavior is fully described by the rows it emits.
/// One-body constraints anchor their second side to the world's null body.
pub trait ConstraintBehavior: Send + Sync {
    fn bodies(&self) -> (BodyHandle, BodyHandle);

    /// Disabled constraints are skipped without being removed.
    fn is_enabled(&self) -> bool {
        true
    }

    /// Checked when the constraint is added to the world; adding an
    /// uninitialized constraint is refused.
    fn is_initialized(&self) -> bool {
        true
    }

    fn prepare(&mut self, body_a: &BodyData, body_b: &BodyData, data: &mut ConstraintData, dt: f32);
}

/// A registered constraint: the consumer-provided behavior plus the pooled
/// solver block it fills. Stored in the world's constraint pool so warm-start
/// state survives across steps without reallocation.
pub struct ConstraintSlot {
    pub behavior: Box<dyn ConstraintBehavior>,
    pub data: ConstraintData,
}

impl ConstraintSlot {
    pub fn new(behavior: Box<dyn ConstraintBehavior>) -> Self {
        Self {
            behavior,
            data: ConstraintData::default(),
        }
    }
}

/// Keeps two anchor points at a fixed distance. The reference implementation
/// of [`ConstraintBehavior`].
pub struct DistanceConstraint {
    body_a: BodyHandle,
    body_b: BodyHandle,
    local_anchor_a: Vec3,
    local_anchor_b: Vec3,
    rest_length: f32,
    bias_factor: f32,
    enabled: bool,
}

impl DistanceConstraint {
    pub fn new(
        body_a: BodyHandle,
        body_b: BodyHandle,
        local_anchor_a: Vec3,
        local_anchor_b: Vec3,
        rest_length: f32,
    ) -> Self {
        Self {
            body_a,
            body_b,
            local_anchor_a,
            local_anchor_b,
            rest_length,
            bias_factor: 0.2,
            enabled: true,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn rest_length(&self) -> f32 {
        self.rest_length
    }
}

impl ConstraintBehavior for DistanceConstraint {
    fn bodies(&self) -> (BodyHandle, BodyHandle) {
        (self.body_a, self.body_b)
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn is_initialized(&self) -> bool {
        self.rest_length.is_finite() && self.rest_length >= 0.0
    }

    fn prepare(&mut self, body_a: &BodyData, body_b: &BodyData, data: &mut ConstraintData, dt: f32) {
        let anchor_a = body_a.transform().transform_point(self.local_anchor_a);
        let anchor_b = body_b.transform().transform_point(self.local_anchor_b);

        let delta = anchor_b - anchor_a;
        let distance = delta.length();
        if distance < 1e-6 {
            data.begin(0);
            return;
        }
        let normal = delta / distance;
        let r_a = anchor_a - body_a.position;
        let r_b = anchor_b - body_b.position;

        let error = distance - self.rest_length;
        let bias = self.bias_factor * error / dt;

        data.begin(1);
        data.set_row(
            0,
            -normal,
            -r_a.cross(normal),
            normal,
            r_b.cross(normal),
            bias,
            f32::NEG_INFINITY,
            f32::INFINITY,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::pool::PoolHandle;

    #[test]
    fn begin_preserves_surviving_impulses() {
        let mut data = ConstraintData::default();
        data.begin(2);
        data.rows[0].impulse = 1.5;
        data.rows[1].impulse = -0.5;

        data.begin(1);
        assert!((data.rows[0].impulse - 1.5).abs() < 1e-6);

        data.begin(2);
        assert_eq!(data.rows[1].impulse, 0.0);
    }

    #[test]
    fn distance_constraint_emits_a_single_row() {
        let a = BodyData::new(PoolHandle::new(0, 0));
        let mut b = BodyData::new(PoolHandle::new(1, 0));
        b.position = Vec3::new(3.0, 0.0, 0.0);

        let mut constraint =
            DistanceConstraint::new(a.handle, b.handle, Vec3::ZERO, Vec3::ZERO, 2.0);
        let mut data = ConstraintData::default();
        constraint.prepare(&a, &b, &mut data, 1.0 / 60.0);

        assert_eq!(data.row_count, 1);
        let row = &data.rows[0];
        assert!((row.lin_b - Vec3::X).length() < 1e-6);
        // Stretched by one meter: the bias pulls the bodies together.
        assert!(row.bias > 0.0);
    }
}
