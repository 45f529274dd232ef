use glam::{Mat3, Vec3};
use serde::{Deserialize, Serialize};

use crate::{
    collision::aabb::Aabb,
    core::{
        pool::{BodyHandle, PoolHandle},
        types::{InertiaTensorExt, MassProperties, Material, Transform},
    },
};

pub type ShapeId = PoolHandle;

/// Proxy slot meaning "not inserted in the broadphase".
pub const NULL_PROXY: i32 = -1;

/// Closed set of convex geometries consumed through their support mapping.
///
/// The narrowphase never inspects a variant directly; it only evaluates
/// `support_local` (plus the triangle surface normal for the edge filter).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ColliderShape {
    Sphere {
        radius: f32,
    },
    Box {
        half_extents: Vec3,
    },
    /// Cylinder of `height` between two hemispherical caps, aligned along Y.
    Capsule {
        radius: f32,
        height: f32,
    },
    ConvexHull {
        vertices: Vec<Vec3>,
    },
    /// Single triangle, used as the building block of static geometry.
    Triangle {
        a: Vec3,
        b: Vec3,
        c: Vec3,
    },
    Compound {
        shapes: Vec<(Transform, ColliderShape)>,
    },
}

impl ColliderShape {
    /// Furthest local point in `direction`. The direction need not be
    /// normalized.
    pub fn support_local(&self, direction: Vec3) -> Vec3 {
        match self {
            ColliderShape::Sphere { radius } => direction.normalize_or_zero() * *radius,
            ColliderShape::Box { half_extents } => Vec3::new(
                half_extents.x.copysign(direction.x),
                half_extents.y.copysign(direction.y),
                half_extents.z.copysign(direction.z),
            ),
            ColliderShape::Capsule { radius, height } => {
                let cap = Vec3::Y * (0.5 * height).copysign(direction.y);
                cap + direction.normalize_or_zero() * *radius
            }
            ColliderShape::ConvexHull { vertices } => max_support(vertices.iter().copied(), direction),
            ColliderShape::Triangle { a, b, c } => {
                max_support([*a, *b, *c].into_iter(), direction)
            }
            ColliderShape::Compound { shapes } => {
                let mut best = Vec3::ZERO;
                let mut best_dot = f32::MIN;
                for (offset, shape) in shapes {
                    let local_dir = offset.inverse_transform_direction(direction);
                    let point = offset.transform_point(shape.support_local(local_dir));
                    let dot = point.dot(direction);
                    if dot > best_dot {
                        best_dot = dot;
                        best = point;
                    }
                }
                best
            }
        }
    }

    /// Tight local bounds, derived from the support mapping along the cardinal
    /// axes (exact for every convex variant).
    pub fn local_bounding_box(&self) -> Aabb {
        let max = Vec3::new(
            self.support_local(Vec3::X).x,
            self.support_local(Vec3::Y).y,
            self.support_local(Vec3::Z).z,
        );
        let min = Vec3::new(
            self.support_local(Vec3::NEG_X).x,
            self.support_local(Vec3::NEG_Y).y,
            self.support_local(Vec3::NEG_Z).z,
        );
        Aabb::new(min, max)
    }

    /// Mass and inertia about the shape origin for the given density.
    ///
    /// Hulls are approximated by their bounding box; triangles contribute
    /// nothing and may only back static bodies (or an explicit override).
    pub fn mass_properties(&self, density: f32) -> MassProperties {
        match self {
            ColliderShape::Sphere { radius } => {
                let mass = density * (4.0 / 3.0) * std::f32::consts::PI * radius.powi(3);
                MassProperties {
                    mass,
                    inertia: Mat3::for_solid_sphere(*radius, mass),
                }
            }
            ColliderShape::Box { half_extents } => {
                let volume = 8.0 * half_extents.x * half_extents.y * half_extents.z;
                let mass = density * volume;
                MassProperties {
                    mass,
                    inertia: Mat3::for_solid_box(*half_extents, mass),
                }
            }
            ColliderShape::Capsule { radius, height } => {
                let cylinder = std::f32::consts::PI * radius * radius * height;
                let caps = (4.0 / 3.0) * std::f32::consts::PI * radius.powi(3);
                let mass = density * (cylinder + caps);
                MassProperties {
                    mass,
                    inertia: Mat3::for_solid_capsule(*radius, *height, mass),
                }
            }
            ColliderShape::ConvexHull { .. } => {
                let aabb = self.local_bounding_box();
                let half = aabb.extents() * 0.5;
                let volume = 8.0 * half.x * half.y * half.z;
                let mass = density * volume;
                MassProperties {
                    mass,
                    inertia: Mat3::for_solid_box(half, mass),
                }
            }
            ColliderShape::Triangle { .. } => MassProperties::ZERO,
            ColliderShape::Compound { shapes } => {
                let mut total = MassProperties::ZERO;
                for (offset, shape) in shapes {
                    let child = shape.mass_properties(density);
                    total.accumulate(&child, offset.position);
                }
                total
            }
        }
    }

    /// A point guaranteed to lie inside the shape, used to seed portal
    /// discovery in the narrowphase.
    pub fn centroid_local(&self) -> Vec3 {
        match self {
            ColliderShape::Sphere { .. }
            | ColliderShape::Box { .. }
            | ColliderShape::Capsule { .. } => Vec3::ZERO,
            ColliderShape::ConvexHull { vertices } => {
                if vertices.is_empty() {
                    Vec3::ZERO
                } else {
                    vertices.iter().sum::<Vec3>() / vertices.len() as f32
                }
            }
            ColliderShape::Triangle { a, b, c } => (*a + *b + *c) / 3.0,
            ColliderShape::Compound { shapes } => {
                if shapes.is_empty() {
                    Vec3::ZERO
                } else {
                    shapes
                        .iter()
                        .map(|(offset, shape)| offset.transform_point(shape.centroid_local()))
                        .sum::<Vec3>()
                        / shapes.len() as f32
                }
            }
        }
    }

    /// Outward surface normal for triangle variants, `None` otherwise.
    pub fn triangle_normal(&self) -> Option<Vec3> {
        match self {
            ColliderShape::Triangle { a, b, c } => {
                Some((*b - *a).cross(*c - *a).normalize_or_zero())
            }
            _ => None,
        }
    }

    /// Local-space ray cast returning `(t, local_normal)`.
    ///
    /// Exact for spheres, boxes, capsules and triangles; hulls and compounds
    /// fall back to their bounding box.
    pub fn ray_cast_local(&self, origin: Vec3, direction: Vec3, max_t: f32) -> Option<(f32, Vec3)> {
        match self {
            ColliderShape::Sphere { radius } => ray_sphere(origin, direction, *radius, max_t),
            ColliderShape::Box { half_extents } => ray_box(origin, direction, *half_extents, max_t),
            ColliderShape::Capsule { radius, height } => {
                ray_capsule(origin, direction, *radius, *height, max_t)
            }
            ColliderShape::Triangle { a, b, c } => ray_triangle(origin, direction, *a, *b, *c, max_t),
            _ => {
                let aabb = self.local_bounding_box();
                let half = aabb.extents() * 0.5;
                ray_box(origin - aabb.center(), direction, half, max_t)
            }
        }
    }
}

fn max_support(points: impl Iterator<Item = Vec3>, direction: Vec3) -> Vec3 {
    let mut best = Vec3::ZERO;
    let mut best_dot = f32::MIN;
    for point in points {
        let dot = point.dot(direction);
        if dot > best_dot {
            best_dot = dot;
            best = point;
        }
    }
    best
}

fn ray_sphere(origin: Vec3, direction: Vec3, radius: f32, max_t: f32) -> Option<(f32, Vec3)> {
    let a = direction.length_squared();
    if a < 1e-12 {
        return None;
    }
    let b = origin.dot(direction);
    let c = origin.length_squared() - radius * radius;
    let discriminant = b * b - a * c;
    if discriminant < 0.0 {
        return None;
    }
    let t = (-b - discriminant.sqrt()) / a;
    if t < 0.0 || t > max_t {
        return None;
    }
    let normal = (origin + direction * t).normalize_or_zero();
    Some((t, normal))
}

fn ray_box(origin: Vec3, direction: Vec3, half_extents: Vec3, max_t: f32) -> Option<(f32, Vec3)> {
    let mut t_min = 0.0f32;
    let mut t_max = max_t;
    let mut hit_axis = 0;
    let mut hit_sign = 1.0f32;

    for axis in 0..3 {
        let o = origin[axis];
        let d = direction[axis];
        let h = half_extents[axis];

        if d.abs() < 1e-12 {
            if o.abs() > h {
                return None;
            }
            continue;
        }

        let inv = 1.0 / d;
        let mut t0 = (-h - o) * inv;
        let mut t1 = (h - o) * inv;
        let mut sign = -1.0;
        if t0 > t1 {
            std::mem::swap(&mut t0, &mut t1);
            sign = 1.0;
        }
        if t0 > t_min {
            t_min = t0;
            hit_axis = axis;
            hit_sign = sign;
        }
        t_max = t_max.min(t1);
        if t_min > t_max {
            return None;
        }
    }

    let mut normal = Vec3::ZERO;
    normal[hit_axis] = hit_sign;
    Some((t_min, normal))
}

fn ray_capsule(
    origin: Vec3,
    direction: Vec3,
    radius: f32,
    height: f32,
    max_t: f32,
) -> Option<(f32, Vec3)> {
    let half = height * 0.5;

    // Infinite cylinder around the Y axis.
    let o = Vec3::new(origin.x, 0.0, origin.z);
    let d = Vec3::new(direction.x, 0.0, direction.z);
    let a = d.length_squared();
    let mut best: Option<(f32, Vec3)> = None;

    if a > 1e-12 {
        let b = o.dot(d);
        let c = o.length_squared() - radius * radius;
        let discriminant = b * b - a * c;
        if discriminant >= 0.0 {
            let t = (-b - discriminant.sqrt()) / a;
            if t >= 0.0 && t <= max_t {
                let y = origin.y + direction.y * t;
                if y.abs() <= half {
                    let point = origin + direction * t;
                    let normal = Vec3::new(point.x, 0.0, point.z).normalize_or_zero();
                    best = Some((t, normal));
                }
            }
        }
    }

    // Hemispherical caps.
    for cap_y in [half, -half] {
        let cap_center = Vec3::Y * cap_y;
        if let Some((t, normal)) = ray_sphere(origin - cap_center, direction, radius, max_t) {
            if best.map(|(bt, _)| t < bt).unwrap_or(true) {
                best = Some((t, normal));
            }
        }
    }

    best
}

fn ray_triangle(
    origin: Vec3,
    direction: Vec3,
    a: Vec3,
    b: Vec3,
    c: Vec3,
    max_t: f32,
) -> Option<(f32, Vec3)> {
    let ab = b - a;
    let ac = c - a;
    let pvec = direction.cross(ac);
    let det = ab.dot(pvec);
    if det.abs() < 1e-12 {
        return None;
    }
    let inv_det = 1.0 / det;
    let tvec = origin - a;
    let u = tvec.dot(pvec) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let qvec = tvec.cross(ab);
    let v = direction.dot(qvec) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = ac.dot(qvec) * inv_det;
    if t < 0.0 || t > max_t {
        return None;
    }
    let mut normal = ab.cross(ac).normalize_or_zero();
    if normal.dot(direction) > 0.0 {
        normal = -normal;
    }
    Some((t, normal))
}

/// Layer/mask filter controlling which shape pairs may collide.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CollisionFilter {
    pub layer: u32,
    pub mask: u32,
}

impl Default for CollisionFilter {
    fn default() -> Self {
        Self {
            layer: 1,
            mask: u32::MAX,
        }
    }
}

impl CollisionFilter {
    pub fn matches(a: &CollisionFilter, b: &CollisionFilter) -> bool {
        (a.mask & b.layer) != 0 && (b.mask & a.layer) != 0
    }
}

/// A shape instance registered with the world.
///
/// Carries the back-reference to its body, the cached local and world bounds,
/// and the broadphase proxy slot keeping both in sync.
#[derive(Debug, Clone)]
pub struct Collider {
    pub shape: ColliderShape,
    pub offset: Transform,
    pub material: Material,
    pub filter: CollisionFilter,
    pub body: Option<BodyHandle>,
    /// Explicit mass contribution overriding the one derived from the shape.
    pub mass_override: Option<MassProperties>,
    pub local_aabb: Aabb,
    pub world_aabb: Aabb,
    pub proxy: i32,
}

impl Collider {
    pub fn new(shape: ColliderShape) -> Self {
        let local_aabb = shape.local_bounding_box();
        Self {
            shape,
            offset: Transform::default(),
            material: Material::default(),
            filter: CollisionFilter::default(),
            body: None,
            mass_override: None,
            local_aabb,
            world_aabb: local_aabb,
            proxy: NULL_PROXY,
        }
    }

    pub fn with_offset(mut self, offset: Transform) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_material(mut self, material: Material) -> Self {
        self.material = material;
        self
    }

    pub fn with_filter(mut self, filter: CollisionFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Shape-to-world transform given the owning body's transform.
    pub fn world_transform(&self, body_transform: &Transform) -> Transform {
        body_transform.combine(&self.offset)
    }

    /// World-space support mapping.
    pub fn support_world(&self, world: &Transform, direction: Vec3) -> Vec3 {
        let local_dir = world.inverse_transform_direction(direction);
        world.transform_point(self.shape.support_local(local_dir))
    }

    /// Refreshes the cached world bounds from the support mapping along the
    /// cardinal axes (tight for every convex variant).
    pub fn update_world_bounding_box(&mut self, body_transform: &Transform) {
        let world = self.world_transform(body_transform);
        let max = Vec3::new(
            self.support_world(&world, Vec3::X).x,
            self.support_world(&world, Vec3::Y).y,
            self.support_world(&world, Vec3::Z).z,
        );
        let min = Vec3::new(
            self.support_world(&world, Vec3::NEG_X).x,
            self.support_world(&world, Vec3::NEG_Y).y,
            self.support_world(&world, Vec3::NEG_Z).z,
        );
        self.world_aabb = Aabb::new(min, max);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Quat;

    #[test]
    fn box_support_picks_corners() {
        let shape = ColliderShape::Box {
            half_extents: Vec3::new(1.0, 2.0, 3.0),
        };
        let p = shape.support_local(Vec3::new(0.3, -0.5, 0.1));
        assert_eq!(p, Vec3::new(1.0, -2.0, 3.0));
    }

    #[test]
    fn rotated_box_world_bounds_are_tight() {
        let mut collider = Collider::new(ColliderShape::Box {
            half_extents: Vec3::splat(1.0),
        });
        let transform = Transform::from_position_rotation(
            Vec3::new(10.0, 0.0, 0.0),
            Quat::from_rotation_y(std::f32::consts::FRAC_PI_4),
        );
        collider.update_world_bounding_box(&transform);

        let expected = std::f32::consts::SQRT_2;
        assert!((collider.world_aabb.max.x - (10.0 + expected)).abs() < 1e-4);
        assert!((collider.world_aabb.max.y - 1.0).abs() < 1e-4);
    }

    #[test]
    fn sphere_mass_scales_with_density() {
        let shape = ColliderShape::Sphere { radius: 1.0 };
        let props = shape.mass_properties(2.0);
        let expected = 2.0 * (4.0 / 3.0) * std::f32::consts::PI;
        assert!((props.mass - expected).abs() < 1e-4);
    }

    #[test]
    fn triangle_contributes_no_mass() {
        let shape = ColliderShape::Triangle {
            a: Vec3::ZERO,
            b: Vec3::X,
            c: Vec3::Z,
        };
        assert_eq!(shape.mass_properties(1.0).mass, 0.0);
    }

    #[test]
    fn ray_hits_box_face() {
        let shape = ColliderShape::Box {
            half_extents: Vec3::splat(1.0),
        };
        let (t, normal) = shape
            .ray_cast_local(Vec3::new(-5.0, 0.0, 0.0), Vec3::X, 100.0)
            .unwrap();
        assert!((t - 4.0).abs() < 1e-5);
        assert_eq!(normal, Vec3::NEG_X);
    }
}
