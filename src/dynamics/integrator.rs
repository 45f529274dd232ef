//! Semi-implicit Euler integration of the hot body records.

use glam::Quat;

use crate::core::body::BodyData;

/// Folds the pending solver deltas into the velocities, then advances the
/// position and orientation by `dt`. Called once per substep per body.
pub fn integrate_position(data: &mut BodyData, dt: f32) {
    if data.static_or_inactive() {
        return;
    }

    data.fold_deltas();
    data.position += data.linear_velocity * dt;

    let omega = data.angular_velocity;
    let angle = omega.length() * dt;
    if angle > 1e-9 {
        let delta = Quat::from_axis_angle(omega / omega.length(), angle);
        data.orientation = (delta * data.orientation).normalize();
    }
}

/// Applies external force and gravity over the full step, producing the
/// predicted velocities the pipeline works with.
pub fn apply_forces(
    data: &mut BodyData,
    force: glam::Vec3,
    torque: glam::Vec3,
    gravity: glam::Vec3,
    dt: f32,
) {
    if data.static_or_inactive() {
        return;
    }
    data.linear_velocity += (force * data.inverse_mass + gravity) * dt;
    data.angular_velocity += data.inverse_inertia_world * torque * dt;
}

/// End-of-step bookkeeping: damping (once per outer step), orientation
/// renormalization and the world-space inertia rebuild.
pub fn finish_step(data: &mut BodyData, linear_damping: f32, angular_damping: f32, dt: f32) {
    if data.static_or_inactive() {
        return;
    }
    data.linear_velocity *= (1.0 - linear_damping * dt).max(0.0);
    data.angular_velocity *= (1.0 - angular_damping * dt).max(0.0);
    data.orientation = data.orientation.normalize();
    data.update_world_inertia();
}
