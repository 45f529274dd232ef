use glam::{Mat3, Quat, Vec3};
use serde::{Deserialize, Serialize};

/// Position and orientation of a rigid body or shape offset.
///
/// Orientation is stored as a unit quaternion and renormalized after
/// integration so the equivalent rotation matrix stays orthonormal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
        }
    }
}

impl Transform {
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            rotation: Quat::IDENTITY,
        }
    }

    pub fn from_position_rotation(position: Vec3, rotation: Quat) -> Self {
        Self { position, rotation }
    }

    /// Applies another transform on top of this one, returning the composition.
    pub fn combine(&self, other: &Transform) -> Transform {
        Transform {
            position: self.position + self.rotation * other.position,
            rotation: (self.rotation * other.rotation).normalize(),
        }
    }

    /// Maps a local-space point into world space.
    pub fn transform_point(&self, point: Vec3) -> Vec3 {
        self.position + self.rotation * point
    }

    /// Maps a world-space point into local space.
    pub fn inverse_transform_point(&self, point: Vec3) -> Vec3 {
        self.rotation.conjugate() * (point - self.position)
    }

    /// Rotates a direction into world space without translating it.
    pub fn transform_direction(&self, direction: Vec3) -> Vec3 {
        self.rotation * direction
    }

    /// Rotates a world-space direction into local space.
    pub fn inverse_transform_direction(&self, direction: Vec3) -> Vec3 {
        self.rotation.conjugate() * direction
    }
}

/// Linear and angular velocity of a rigid body.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Velocity {
    pub linear: Vec3,
    pub angular: Vec3,
}

/// Mass and body-local inertia tensor data.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MassProperties {
    pub mass: f32,
    pub inertia: Mat3,
}

impl Default for MassProperties {
    fn default() -> Self {
        Self {
            mass: 1.0,
            inertia: Mat3::IDENTITY,
        }
    }
}

impl MassProperties {
    pub const ZERO: Self = Self {
        mass: 0.0,
        inertia: Mat3::ZERO,
    };

    /// Accumulates another shape's contribution, shifting its inertia by the
    /// parallel-axis theorem with `offset` measured from the body origin.
    pub fn accumulate(&mut self, other: &MassProperties, offset: Vec3) {
        self.mass += other.mass;
        self.inertia += other.inertia + inertia_offset(offset, other.mass);
    }
}

fn inertia_offset(d: Vec3, mass: f32) -> Mat3 {
    let d2 = d.length_squared();
    (Mat3::from_diagonal(Vec3::splat(d2)) - Mat3::from_cols(d * d.x, d * d.y, d * d.z)) * mass
}

/// Surface coefficients that govern contact response.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct Material {
    pub density: f32,
    pub restitution: f32,
    pub friction: f32,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            density: 1.0,
            restitution: 0.0,
            friction: 0.5,
        }
    }
}

impl Material {
    /// Combines two materials into the coefficients used by one arbiter.
    ///
    /// Restitution takes the larger coefficient, friction the geometric mean.
    pub fn combine_pair(a: &Material, b: &Material) -> (f32, f32) {
        let restitution = a.restitution.max(b.restitution);
        let friction = (a.friction * b.friction).max(0.0).sqrt();
        (restitution, friction)
    }
}

/// Inertia tensor constructors for the primitive shapes.
pub trait InertiaTensorExt {
    fn for_solid_box(half_extents: Vec3, mass: f32) -> Mat3;
    fn for_solid_sphere(radius: f32, mass: f32) -> Mat3;
    fn for_solid_capsule(radius: f32, height: f32, mass: f32) -> Mat3;
}

impl InertiaTensorExt for Mat3 {
    fn for_solid_box(half_extents: Vec3, mass: f32) -> Mat3 {
        let lx = half_extents.x * 2.0;
        let ly = half_extents.y * 2.0;
        let lz = half_extents.z * 2.0;
        let factor = mass / 12.0;
        Mat3::from_diagonal(Vec3::new(
            factor * (ly * ly + lz * lz),
            factor * (lx * lx + lz * lz),
            factor * (lx * lx + ly * ly),
        ))
    }

    fn for_solid_sphere(radius: f32, mass: f32) -> Mat3 {
        Mat3::from_diagonal(Vec3::splat(0.4 * mass * radius * radius))
    }

    fn for_solid_capsule(radius: f32, height: f32, mass: f32) -> Mat3 {
        // Cylinder trunk plus two hemispherical caps, aligned along Y.
        let cylinder_mass = mass * 0.6;
        let cap_mass = (mass - cylinder_mass) / 2.0;

        let cylinder = Mat3::from_diagonal(Vec3::new(
            (1.0 / 12.0) * cylinder_mass * (3.0 * radius * radius + height * height),
            0.5 * cylinder_mass * radius * radius,
            (1.0 / 12.0) * cylinder_mass * (3.0 * radius * radius + height * height),
        ));
        let caps = Mat3::from_diagonal(Vec3::splat(0.4 * cap_mass * radius * radius * 2.0));

        cylinder + caps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transform_round_trips_points() {
        let t = Transform::from_position_rotation(
            Vec3::new(1.0, 2.0, 3.0),
            Quat::from_rotation_y(0.7),
        );
        let p = Vec3::new(-2.0, 0.5, 4.0);
        let back = t.inverse_transform_point(t.transform_point(p));
        assert!((back - p).length() < 1e-5);
    }

    #[test]
    fn accumulate_applies_parallel_axis_shift() {
        let unit = MassProperties {
            mass: 2.0,
            inertia: Mat3::IDENTITY,
        };
        let mut sum = MassProperties::ZERO;
        sum.accumulate(&unit, Vec3::new(0.0, 3.0, 0.0));

        assert!((sum.mass - 2.0).abs() < 1e-6);
        // Shifting along Y adds m*d^2 to the X and Z moments and nothing to Y.
        assert!((sum.inertia.x_axis.x - (1.0 + 18.0)).abs() < 1e-4);
        assert!((sum.inertia.y_axis.y - 1.0).abs() < 1e-4);
    }

    #[test]
    fn material_pair_uses_max_restitution() {
        let a = Material {
            restitution: 0.2,
            friction: 0.4,
            ..Material::default()
        };
        let b = Material {
            restitution: 0.8,
            friction: 0.9,
            ..Material::default()
        };
        let (restitution, friction) = Material::combine_pair(&a, &b);
        assert!((restitution - 0.8).abs() < 1e-6);
        assert!((friction - (0.4f32 * 0.9).sqrt()).abs() < 1e-6);
    }
}
