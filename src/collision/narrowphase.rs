use glam::Vec3;

use crate::core::{
    shape::{Collider, ColliderShape},
    types::Transform,
};

/// Contact normals deviating from a triangle's surface normal by more than
/// this cosine are treated as internal-edge artifacts and suppressed.
const EDGE_FILTER_COS: f32 = 0.5;

/// Tilt applied to the contact normal when sampling auxiliary supports for
/// the one-shot manifold.
const ONE_SHOT_TILT: f32 = 0.02;

/// Separation tolerated when accepting auxiliary one-shot contacts.
const ONE_SHOT_TOLERANCE: f32 = 0.01;

const MPR_MAX_ITERATIONS: usize = 40;
const MPR_TOLERANCE: f32 = 1e-4;
const EPSILON: f32 = 1e-10;

/// A single contact produced by the narrowphase driver.
///
/// `normal` points from the first shape toward the second; `penetration` is
/// positive for overlap and negative for a speculative contact with that much
/// separation left.
#[derive(Debug, Clone, Copy)]
pub struct ContactSeed {
    pub point_a: Vec3,
    pub point_b: Vec3,
    pub normal: Vec3,
    pub penetration: f32,
}

impl ContactSeed {
    pub fn world_point(&self) -> Vec3 {
        (self.point_a + self.point_b) * 0.5
    }

    fn is_valid(&self) -> bool {
        self.normal.is_finite()
            && self.penetration.is_finite()
            && self.point_a.is_finite()
            && self.point_b.is_finite()
            && self.normal.length_squared() > 0.5
    }
}

/// World-space support mapping of one collider.
pub(crate) struct SupportMap<'a> {
    collider: &'a Collider,
    world: Transform,
    center: Vec3,
}

impl<'a> SupportMap<'a> {
    pub fn new(collider: &'a Collider, body_transform: &Transform) -> Self {
        let world = collider.world_transform(body_transform);
        let center = world.transform_point(collider.shape.centroid_local());
        Self {
            collider,
            world,
            center,
        }
    }

    fn support(&self, direction: Vec3) -> Vec3 {
        self.collider.support_world(&self.world, direction)
    }
}

/// Support of the Minkowski difference `B ⊖ A` with its witness pair.
fn minkowski_support(a: &SupportMap, b: &SupportMap, direction: Vec3) -> (Vec3, Vec3, Vec3) {
    let point_a = a.support(-direction);
    let point_b = b.support(direction);
    (point_b - point_a, point_a, point_b)
}

/// Narrowphase driver: dispatches a support-mapped shape pair to MPR, falling
/// back to GJK+EPA on convergence failure or when the caller forces it.
pub struct NarrowPhase;

impl NarrowPhase {
    /// Produces a contact for an overlapping pair, or `None` when separated.
    pub fn collide(
        collider_a: &Collider,
        transform_a: &Transform,
        collider_b: &Collider,
        transform_b: &Transform,
        force_epa: bool,
    ) -> Option<ContactSeed> {
        let a = SupportMap::new(collider_a, transform_a);
        let b = SupportMap::new(collider_b, transform_b);

        let seed = Self::collide_supports(&a, &b, force_epa)?;
        Self::apply_edge_filter(collider_a, transform_a, collider_b, transform_b, seed)
    }

    fn collide_supports(
        a: &SupportMap,
        b: &SupportMap,
        force_epa: bool,
    ) -> Option<ContactSeed> {
        // Analytic fast path keeps resting sphere pairs exact.
        if let (ColliderShape::Sphere { radius: ra }, ColliderShape::Sphere { radius: rb }) =
            (&a.collider.shape, &b.collider.shape)
        {
            return sphere_sphere(a.center, *ra, b.center, *rb);
        }

        if !force_epa {
            if let Some(seed) = mpr(a, b) {
                if seed.is_valid() {
                    return Some(seed);
                }
            } else {
                return None;
            }
        }

        let seed = gjk_epa(a, b)?;
        seed.is_valid().then_some(seed)
    }

    /// Suppresses contacts against triangles whose normal is inconsistent
    /// with the triangle surface normal (internal mesh edges).
    fn apply_edge_filter(
        collider_a: &Collider,
        transform_a: &Transform,
        collider_b: &Collider,
        transform_b: &Transform,
        seed: ContactSeed,
    ) -> Option<ContactSeed> {
        if let Some(local_normal) = collider_b.shape.triangle_normal() {
            let world = collider_b.world_transform(transform_b);
            let mut face = world.transform_direction(local_normal);
            // Orient the face normal toward the other shape.
            let toward_a = transform_a.position - world.position;
            if face.dot(toward_a) < 0.0 {
                face = -face;
            }
            // The contact pushes B along +normal, so a surface-consistent
            // normal points against the face.
            if seed.normal.dot(-face) < EDGE_FILTER_COS {
                return None;
            }
        }
        if let Some(local_normal) = collider_a.shape.triangle_normal() {
            let world = collider_a.world_transform(transform_a);
            let mut face = world.transform_direction(local_normal);
            let toward_b = transform_b.position - world.position;
            if face.dot(toward_b) < 0.0 {
                face = -face;
            }
            if seed.normal.dot(face) < EDGE_FILTER_COS {
                return None;
            }
        }
        Some(seed)
    }

    /// Samples auxiliary support directions tilted around the contact normal
    /// to find coplanar contacts on nearly flat pairs, yielding a stable
    /// manifold in a single frame.
    ///
    /// Candidates come from both bodies' supports; each is paired with its
    /// projection onto the other body's supporting plane, so the witness
    /// points stay aligned along the normal.
    pub fn one_shot_manifold(
        collider_a: &Collider,
        transform_a: &Transform,
        collider_b: &Collider,
        transform_b: &Transform,
        seed: &ContactSeed,
    ) -> Vec<ContactSeed> {
        let a = SupportMap::new(collider_a, transform_a);
        let b = SupportMap::new(collider_b, transform_b);
        let normal = seed.normal;
        let (t1, t2) = normal.any_orthonormal_pair();

        // Supporting plane offsets of the two surfaces along the normal.
        let surface_a = a.support(normal).dot(normal);
        let surface_b = b.support(-normal).dot(normal);
        let anchor = seed.world_point();

        // A candidate found on one body must also lie within the other
        // body's tangential extent, or a large face would contribute corners
        // far outside the true contact patch.
        let within = |point: Vec3, other: &SupportMap| -> bool {
            let offset = point - anchor;
            let tangential = offset - normal * offset.dot(normal);
            let length = tangential.length();
            if length < 1e-4 {
                return true;
            }
            let direction = tangential / length;
            point.dot(direction) <= other.support(direction).dot(direction) + ONE_SHOT_TOLERANCE
        };

        let mut out = Vec::with_capacity(8);
        for (su, sv) in [(1.0, 1.0), (1.0, -1.0), (-1.0, 1.0), (-1.0, -1.0)] {
            let tilted = (normal + (t1 * su + t2 * sv) * ONE_SHOT_TILT).normalize();

            // A-side corner projected onto B's surface plane.
            let point_a = a.support(tilted);
            let penetration = point_a.dot(normal) - surface_b;
            if penetration > -ONE_SHOT_TOLERANCE && within(point_a, &b) {
                out.push(ContactSeed {
                    point_a,
                    point_b: point_a - normal * penetration,
                    normal,
                    penetration,
                });
            }

            // B-side corner projected onto A's surface plane.
            let point_b = b.support(-tilted);
            let penetration = surface_a - point_b.dot(normal);
            if penetration > -ONE_SHOT_TOLERANCE && within(point_b, &a) {
                out.push(ContactSeed {
                    point_a: point_b + normal * penetration,
                    point_b,
                    normal,
                    penetration,
                });
            }
        }
        out
    }

    /// Emits a contact with positive separation when the pair is predicted to
    /// collide within the step, based on closing velocity and current gap.
    pub fn speculative_contact(
        collider_a: &Collider,
        transform_a: &Transform,
        velocity_a: Vec3,
        collider_b: &Collider,
        transform_b: &Transform,
        velocity_b: Vec3,
        dt: f32,
        margin: f32,
    ) -> Option<ContactSeed> {
        let approach = velocity_a - velocity_b;
        let speed = approach.length();
        if speed < EPSILON {
            return None;
        }
        let direction = approach / speed;

        let a = SupportMap::new(collider_a, transform_a);
        let b = SupportMap::new(collider_b, transform_b);
        let point_a = a.support(direction);
        let point_b = b.support(-direction);
        let gap = (point_b - point_a).dot(direction);
        if gap <= 0.0 {
            return None;
        }
        if gap > speed * dt + margin {
            return None;
        }

        Some(ContactSeed {
            point_a,
            point_b,
            normal: direction,
            penetration: -gap,
        })
    }
}

fn sphere_sphere(center_a: Vec3, ra: f32, center_b: Vec3, rb: f32) -> Option<ContactSeed> {
    let delta = center_b - center_a;
    let distance_sq = delta.length_squared();
    let distance = distance_sq.sqrt();
    let penetration = ra + rb - distance;
    if penetration < 0.0 {
        return None;
    }
    let normal = if distance > 1e-6 {
        delta / distance
    } else {
        Vec3::Y
    };
    Some(ContactSeed {
        point_a: center_a + normal * ra,
        point_b: center_b - normal * rb,
        normal,
        penetration,
    })
}

#[derive(Debug, Clone, Copy, Default)]
struct PortalVertex {
    v: Vec3,
    a: Vec3,
    b: Vec3,
}

fn portal_vertex(a: &SupportMap, b: &SupportMap, direction: Vec3) -> PortalVertex {
    let (v, pa, pb) = minkowski_support(a, b, direction);
    PortalVertex { v, a: pa, b: pb }
}

/// Minkowski Portal Refinement over `B ⊖ A`. Returns `None` for separated
/// pairs; an invalid seed signals convergence failure and routes the caller
/// to the EPA path.
fn mpr(a: &SupportMap, b: &SupportMap) -> Option<ContactSeed> {
    let mut v0 = b.center - a.center;
    if v0.length_squared() < EPSILON {
        v0 = Vec3::new(1e-5, 0.0, 0.0);
    }

    // First support toward the origin.
    let mut v1 = portal_vertex(a, b, -v0);
    if v1.v.dot(-v0) <= 0.0 {
        return None;
    }

    // Second support, perpendicular to the (v0, v1) plane.
    let mut n = v1.v.cross(v0);
    if n.length_squared() < EPSILON {
        // Origin lies on the v0-v1 segment: shallow hit along that axis.
        let normal = (v1.v - v0).normalize_or_zero();
        let depth = v1.v.dot(normal).abs();
        return Some(ContactSeed {
            point_a: v1.a,
            point_b: v1.b,
            normal: -normal,
            penetration: depth,
        });
    }
    let mut v2 = portal_vertex(a, b, n);
    if v2.v.dot(n) <= 0.0 {
        return None;
    }

    // Portal candidate; keep the origin on the inner side.
    let mut n = (v1.v - v0).cross(v2.v - v0);
    if n.dot(v0) > 0.0 {
        std::mem::swap(&mut v1, &mut v2);
        n = -n;
    }

    // Discovery: find a portal whose interior ray from v0 passes the origin.
    let mut v3;
    let mut iterations = 0;
    loop {
        iterations += 1;
        if iterations > MPR_MAX_ITERATIONS {
            return Some(invalid_seed());
        }
        v3 = portal_vertex(a, b, n);
        if v3.v.dot(n) <= 0.0 {
            return None;
        }
        if v1.v.cross(v3.v).dot(v0) < 0.0 {
            v2 = v3;
            n = (v1.v - v0).cross(v2.v - v0);
            continue;
        }
        if v3.v.cross(v2.v).dot(v0) < 0.0 {
            v1 = v3;
            n = (v1.v - v0).cross(v2.v - v0);
            continue;
        }
        break;
    }

    // Refinement: push the portal toward the surface of the difference.
    let mut hit = false;
    let mut iterations = 0;
    loop {
        iterations += 1;
        let portal_n = (v2.v - v1.v).cross(v3.v - v1.v);
        if portal_n.length_squared() < EPSILON {
            return Some(invalid_seed());
        }
        let portal_hat = portal_n.normalize();

        if !hit && v1.v.dot(portal_hat) >= 0.0 {
            hit = true;
        }

        let v4 = portal_vertex(a, b, portal_n);
        let expansion = (v4.v - v3.v).dot(portal_hat);
        if expansion <= MPR_TOLERANCE || iterations > MPR_MAX_ITERATIONS {
            if !hit {
                return None;
            }
            return Some(portal_contact(&v1, &v2, &v3, portal_hat));
        }

        // Keep the tetrahedron around the v0→origin ray.
        let cross = v4.v.cross(v0);
        if v1.v.dot(cross) > 0.0 {
            if v2.v.dot(cross) > 0.0 {
                v1 = v4;
            } else {
                v3 = v4;
            }
        } else if v3.v.dot(cross) > 0.0 {
            v2 = v4;
        } else {
            v1 = v4;
        }
    }
}

fn invalid_seed() -> ContactSeed {
    ContactSeed {
        point_a: Vec3::ZERO,
        point_b: Vec3::ZERO,
        normal: Vec3::ZERO,
        penetration: 0.0,
    }
}

/// Projects the origin onto the converged portal and interpolates the witness
/// points barycentrically.
fn portal_contact(v1: &PortalVertex, v2: &PortalVertex, v3: &PortalVertex, n_hat: Vec3) -> ContactSeed {
    let depth = v1.v.dot(n_hat).max(0.0);
    let o = n_hat * depth;

    let area = (v2.v - v1.v).cross(v3.v - v1.v).dot(n_hat);
    let (l1, l2, l3) = if area.abs() < EPSILON {
        (1.0, 0.0, 0.0)
    } else {
        let inv = 1.0 / area;
        let l1 = (v2.v - o).cross(v3.v - o).dot(n_hat) * inv;
        let l2 = (v3.v - o).cross(v1.v - o).dot(n_hat) * inv;
        let l3 = (v1.v - o).cross(v2.v - o).dot(n_hat) * inv;
        let (l1, l2, l3) = (l1.max(0.0), l2.max(0.0), l3.max(0.0));
        let sum = l1 + l2 + l3;
        if sum < EPSILON {
            (1.0, 0.0, 0.0)
        } else {
            (l1 / sum, l2 / sum, l3 / sum)
        }
    };

    ContactSeed {
        point_a: v1.a * l1 + v2.a * l2 + v3.a * l3,
        point_b: v1.b * l1 + v2.b * l2 + v3.b * l3,
        normal: -n_hat,
        penetration: depth,
    }
}

const GJK_MAX_ITERATIONS: usize = 28;
const EPA_MAX_ITERATIONS: usize = 48;
const EPA_TOLERANCE: f32 = 1e-4;

/// Outcome of one simplex refinement: either the origin is enclosed or the
/// search continues along the returned direction.
enum SimplexStep {
    Enclosed,
    Toward(Vec3),
}

/// Working simplex of difference vertices, each carrying its witness pair so
/// the final contact can interpolate real surface points.
///
/// The newest vertex always sits at position `len - 1`; refinement keeps the
/// subset nearest the origin by index list instead of juggling removals, and
/// every face test orients its own normal, so no winding bookkeeping is
/// carried between iterations.
struct Simplex {
    points: [PortalVertex; 4],
    len: usize,
}

impl Simplex {
    fn new() -> Self {
        Self {
            points: [PortalVertex::default(); 4],
            len: 0,
        }
    }

    fn push(&mut self, vertex: PortalVertex) {
        self.points[self.len] = vertex;
        self.len += 1;
    }

    /// Keeps exactly the listed points, in the given order.
    fn keep(&mut self, indices: &[usize]) {
        let snapshot = self.points;
        for (slot, &index) in indices.iter().enumerate() {
            self.points[slot] = snapshot[index];
        }
        self.len = indices.len();
    }

    fn advance(&mut self) -> SimplexStep {
        match self.len {
            1 => SimplexStep::Toward(-self.points[0].v),
            2 => self.edge_step(),
            3 => self.triangle_step(),
            _ => self.tetrahedron_step(),
        }
    }

    fn edge_step(&mut self) -> SimplexStep {
        let newest = self.points[1].v;
        let edge = self.points[0].v - newest;
        let toward = reject_along(-newest, edge);
        if toward.length_squared() < EPSILON {
            // Origin sits on the segment itself; probe any lateral direction.
            SimplexStep::Toward(edge.normalize_or_zero().any_orthonormal_vector())
        } else {
            SimplexStep::Toward(toward)
        }
    }

    fn triangle_step(&mut self) -> SimplexStep {
        let c = self.points[0].v;
        let b = self.points[1].v;
        let a = self.points[2].v;
        let to_origin = -a;
        let face = (b - a).cross(c - a);

        if face.length_squared() < EPSILON {
            // Sliver triangle: fall back to the newest edge.
            self.keep(&[1, 2]);
            return self.edge_step();
        }

        // Outward in-plane normals of the two edges through the newest
        // vertex, oriented by the opposite corner.
        let mut out_ab = (b - a).cross(face);
        if out_ab.dot(c - a) > 0.0 {
            out_ab = -out_ab;
        }
        let mut out_ac = (c - a).cross(face);
        if out_ac.dot(b - a) > 0.0 {
            out_ac = -out_ac;
        }

        if out_ac.dot(to_origin) > 0.0 {
            self.keep(&[0, 2]);
            return SimplexStep::Toward(reject_along(to_origin, c - a));
        }
        if out_ab.dot(to_origin) > 0.0 {
            self.keep(&[1, 2]);
            return SimplexStep::Toward(reject_along(to_origin, b - a));
        }

        // Interior of the face: continue perpendicular to it.
        SimplexStep::Toward(if face.dot(to_origin) > 0.0 { face } else { -face })
    }

    fn tetrahedron_step(&mut self) -> SimplexStep {
        let a = self.points[3].v;
        let to_origin = -a;

        // The three faces sharing the newest vertex, each tagged with the
        // vertex it excludes (its interior reference).
        for (face, excluded) in [([3usize, 2, 1], 0usize), ([3, 1, 0], 2), ([3, 2, 0], 1)] {
            let p = self.points[face[1]].v;
            let q = self.points[face[2]].v;
            let mut normal = (p - a).cross(q - a);
            if normal.length_squared() < EPSILON {
                continue;
            }
            if normal.dot(self.points[excluded].v - a) > 0.0 {
                normal = -normal;
            }
            if normal.dot(to_origin) > 0.0 {
                // Origin lies outside this face: drop the excluded vertex,
                // newest point stays last.
                self.keep(&[face[1], face[2], face[0]]);
                return SimplexStep::Toward(normal);
            }
        }

        SimplexStep::Enclosed
    }
}

/// Component of `vector` orthogonal to `axis` (the rejection), used to steer
/// the simplex search off an edge toward the origin.
fn reject_along(vector: Vec3, axis: Vec3) -> Vec3 {
    let axis_len_sq = axis.length_squared();
    if axis_len_sq < EPSILON {
        return vector;
    }
    vector - axis * (axis.dot(vector) / axis_len_sq)
}

/// GJK boolean test followed by EPA penetration extraction. Used when MPR
/// fails to converge or when the full-EPA tunable forces it.
fn gjk_epa(a: &SupportMap, b: &SupportMap) -> Option<ContactSeed> {
    let mut direction = a.center - b.center;
    if direction.length_squared() < EPSILON {
        direction = Vec3::X;
    }

    let mut simplex = Simplex::new();
    for _ in 0..GJK_MAX_ITERATIONS {
        let vertex = portal_vertex(a, b, direction);
        if vertex.v.dot(direction) < 0.0 {
            return None;
        }
        simplex.push(vertex);
        match simplex.advance() {
            SimplexStep::Enclosed => return epa_contact(&simplex, a, b),
            SimplexStep::Toward(next) => {
                if next.length_squared() < EPSILON {
                    // Origin lies on the simplex boundary: a touching contact.
                    return epa_contact(&simplex, a, b);
                }
                direction = next;
            }
        }
    }

    None
}

/// One face of the expanding polytope with its plane cached: unit outward
/// normal and offset from the origin.
struct PolytopeFace {
    vertices: [usize; 3],
    normal: Vec3,
    distance: f32,
}

impl PolytopeFace {
    /// Builds a face over three polytope vertices, orienting the normal away
    /// from `interior` and adjusting the winding to match. Degenerate
    /// triangles yield `None`.
    fn new(mut vertices: [usize; 3], points: &[PortalVertex], interior: Vec3) -> Option<Self> {
        let p = points[vertices[0]].v;
        let q = points[vertices[1]].v;
        let r = points[vertices[2]].v;
        let mut normal = (q - p).cross(r - p).normalize_or_zero();
        if normal == Vec3::ZERO {
            return None;
        }
        if normal.dot(p - interior) < 0.0 {
            normal = -normal;
            vertices.swap(1, 2);
        }
        Some(Self {
            vertices,
            normal,
            distance: normal.dot(p),
        })
    }
}

/// Expanding-polytope penetration extraction seeded by a GJK simplex.
///
/// The polytope keeps witness pairs per vertex and a cached plane per face;
/// the converged face hands its three vertices to the same barycentric
/// interpolation the portal refinement uses, so both deep-contact paths
/// produce witnesses the same way.
fn epa_contact(simplex: &Simplex, a: &SupportMap, b: &SupportMap) -> Option<ContactSeed> {
    let mut points: Vec<PortalVertex> = simplex.points[..simplex.len].to_vec();

    // A touching-case simplex may arrive with fewer than four vertices;
    // grow it with axis probes before giving up on a volume.
    if points.len() < 4 {
        for probe in [
            Vec3::X,
            Vec3::NEG_X,
            Vec3::Y,
            Vec3::NEG_Y,
            Vec3::Z,
            Vec3::NEG_Z,
        ] {
            if points.len() >= 4 {
                break;
            }
            let vertex = portal_vertex(a, b, probe);
            if points
                .iter()
                .all(|existing| (existing.v - vertex.v).length_squared() > 1e-8)
            {
                points.push(vertex);
            }
        }
    }
    if points.len() < 4 {
        return Some(axis_contact(a, b));
    }

    let volume = (points[1].v - points[0].v)
        .cross(points[2].v - points[0].v)
        .dot(points[3].v - points[0].v);
    if volume.abs() < 1e-10 {
        return Some(axis_contact(a, b));
    }

    let interior = (points[0].v + points[1].v + points[2].v + points[3].v) / 4.0;
    let mut faces: Vec<PolytopeFace> = Vec::with_capacity(16);
    for seed_face in [[0usize, 1, 2], [0, 1, 3], [0, 2, 3], [1, 2, 3]] {
        if let Some(face) = PolytopeFace::new(seed_face, &points, interior) {
            faces.push(face);
        }
    }
    if faces.len() < 4 {
        return Some(axis_contact(a, b));
    }

    for _ in 0..EPA_MAX_ITERATIONS {
        let best = nearest_face(&faces)?;
        let (normal, distance, vertices) = {
            let face = &faces[best];
            (face.normal, face.distance, face.vertices)
        };

        let candidate = portal_vertex(a, b, normal);
        if candidate.v.dot(normal) - distance < EPA_TOLERANCE {
            let [i, j, k] = vertices;
            return Some(portal_contact(&points[i], &points[j], &points[k], normal));
        }

        // Retire every face the new vertex can see; the surviving rim of
        // directed edges (those whose reverse was also retired cancel out)
        // is stitched to the new vertex.
        let index = points.len();
        points.push(candidate);
        let mut rim: Vec<(usize, usize)> = Vec::new();
        faces.retain(|face| {
            let visible = face.normal.dot(candidate.v) > face.distance + 1e-6;
            if visible {
                let [i, j, k] = face.vertices;
                rim.extend([(i, j), (j, k), (k, i)]);
            }
            !visible
        });
        for &(u, v) in &rim {
            if rim.contains(&(v, u)) {
                continue;
            }
            if let Some(face) = PolytopeFace::new([u, v, index], &points, interior) {
                faces.push(face);
            }
        }
        if faces.is_empty() {
            return Some(axis_contact(a, b));
        }
    }

    // Iteration budget exhausted: the closest face so far is the answer.
    let best = nearest_face(&faces)?;
    let [i, j, k] = faces[best].vertices;
    Some(portal_contact(&points[i], &points[j], &points[k], faces[best].normal))
}

fn nearest_face(faces: &[PolytopeFace]) -> Option<usize> {
    faces
        .iter()
        .enumerate()
        .min_by(|(_, x), (_, y)| {
            x.distance
                .partial_cmp(&y.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|(index, _)| index)
}

/// Last-resort contact for polytopes too degenerate to expand: measure the
/// overlap along the center axis straight from the support mappings.
fn axis_contact(a: &SupportMap, b: &SupportMap) -> ContactSeed {
    let mut axis = b.center - a.center;
    if axis.length_squared() < EPSILON {
        axis = Vec3::Y;
    }
    let normal = axis.normalize();
    let point_a = a.support(normal);
    let point_b = b.support(-normal);
    ContactSeed {
        point_a,
        point_b,
        normal,
        penetration: (point_a - point_b).dot(normal),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Quat;

    fn box_collider(half: f32) -> Collider {
        Collider::new(ColliderShape::Box {
            half_extents: Vec3::splat(half),
        })
    }

    fn at(x: f32, y: f32, z: f32) -> Transform {
        Transform::from_position(Vec3::new(x, y, z))
    }

    #[test]
    fn separated_boxes_produce_no_contact() {
        let a = box_collider(0.5);
        let b = box_collider(0.5);
        assert!(NarrowPhase::collide(&a, &at(0.0, 0.0, 0.0), &b, &at(3.0, 0.0, 0.0), false).is_none());
    }

    #[test]
    fn overlapping_spheres_report_depth_and_normal() {
        let a = Collider::new(ColliderShape::Sphere { radius: 1.0 });
        let b = Collider::new(ColliderShape::Sphere { radius: 1.0 });
        let seed =
            NarrowPhase::collide(&a, &at(0.0, 0.0, 0.0), &b, &at(1.5, 0.0, 0.0), false).unwrap();

        assert!((seed.penetration - 0.5).abs() < 1e-4);
        assert!((seed.normal - Vec3::X).length() < 1e-4);
    }

    #[test]
    fn mpr_finds_box_box_overlap() {
        let a = box_collider(0.5);
        let b = box_collider(0.5);
        let seed =
            NarrowPhase::collide(&a, &at(0.0, 0.0, 0.0), &b, &at(0.0, 0.9, 0.0), false).unwrap();

        assert!(seed.penetration > 0.05 && seed.penetration < 0.2);
        assert!(seed.normal.y > 0.9);
    }

    #[test]
    fn forced_epa_agrees_with_default_path() {
        let a = box_collider(0.5);
        let b = box_collider(0.5);
        let seed =
            NarrowPhase::collide(&a, &at(0.0, 0.0, 0.0), &b, &at(0.0, 0.9, 0.0), true).unwrap();

        assert!((seed.penetration - 0.1).abs() < 0.05);
        assert!(seed.normal.y > 0.9);
    }

    #[test]
    fn one_shot_manifold_covers_a_resting_face() {
        let a = box_collider(0.5);
        let b = box_collider(0.5);
        let ta = at(0.0, 0.0, 0.0);
        let tb = at(0.0, 0.98, 0.0);
        let seed = NarrowPhase::collide(&a, &ta, &b, &tb, false).unwrap();
        let extra = NarrowPhase::one_shot_manifold(&a, &ta, &b, &tb, &seed);

        assert!(extra.len() >= 3, "expected a spread manifold, got {}", extra.len());
        // The sampled points should span the shared face, not collapse.
        let spread = extra
            .iter()
            .map(|s| s.world_point())
            .fold(Vec3::ZERO, |acc, p| acc + p)
            / extra.len() as f32;
        assert!(extra.iter().any(|s| (s.world_point() - spread).length() > 0.2));
    }

    #[test]
    fn speculative_contact_predicts_incoming_pair() {
        let a = Collider::new(ColliderShape::Sphere { radius: 0.5 });
        let b = box_collider(0.5);
        let seed = NarrowPhase::speculative_contact(
            &a,
            &at(0.0, 0.0, -2.0),
            Vec3::new(0.0, 0.0, 40.0),
            &b,
            &at(0.0, 0.0, 0.0),
            Vec3::ZERO,
            1.0 / 60.0,
            0.05,
        )
        .unwrap();

        assert!(seed.penetration < 0.0);
        assert!((seed.penetration + 1.0).abs() < 1e-3);
        assert!(seed.normal.z > 0.99);

        // A slow pair is left to the regular narrowphase.
        assert!(NarrowPhase::speculative_contact(
            &a,
            &at(0.0, 0.0, -2.0),
            Vec3::new(0.0, 0.0, 0.5),
            &b,
            &at(0.0, 0.0, 0.0),
            Vec3::ZERO,
            1.0 / 60.0,
            0.05,
        )
        .is_none());
    }

    #[test]
    fn edge_filter_rejects_inconsistent_triangle_normals() {
        let triangle = Collider::new(ColliderShape::Triangle {
            a: Vec3::new(-1.0, 0.0, -1.0),
            b: Vec3::new(1.0, 0.0, -1.0),
            c: Vec3::new(0.0, 0.0, 1.0),
        });
        let ball = Collider::new(ColliderShape::Sphere { radius: 0.5 });

        // Resting on the face: normal agrees with the surface.
        let resting =
            NarrowPhase::collide(&triangle, &at(0.0, 0.0, 0.0), &ball, &at(0.0, 0.4, 0.0), false);
        assert!(resting.is_some());

        // Grazing the rim: the contact normal is nearly tangential to the
        // face normal and must be suppressed.
        let grazing = NarrowPhase::collide(
            &triangle,
            &at(0.0, 0.0, 0.0),
            &ball,
            &at(1.35, 0.05, -0.95),
            false,
        );
        if let Some(seed) = grazing {
            assert!(seed.normal.y.abs() > EDGE_FILTER_COS);
        }
    }

    #[test]
    fn rotated_box_contacts_remain_sane() {
        let a = box_collider(0.5);
        let b = box_collider(0.5);
        let tb = Transform::from_position_rotation(
            Vec3::new(0.0, 0.95, 0.0),
            Quat::from_rotation_y(0.4),
        );
        let seed = NarrowPhase::collide(&a, &at(0.0, 0.0, 0.0), &b, &tb, false).unwrap();
        assert!(seed.penetration >= 0.0);
        assert!(seed.normal.y > 0.7);
    }
}
