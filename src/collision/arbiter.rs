use std::collections::HashMap;

use glam::Vec3;

use crate::{
    collision::narrowphase::ContactSeed,
    config,
    core::{
        pool::{ActivePool, ArbiterId, BodyHandle, PoolView},
        shape::ShapeId,
        types::Transform,
    },
    error::PhysicsResult,
};

/// Maximum number of points a manifold retains.
pub const MAX_CONTACTS: usize = 4;

/// Live-slot marks occupy the low 4 bits; the remaining bits are
/// reserved-zero.
const USAGE_MASK_BITS: u32 = 0xF;

/// Unordered pair of shape identities with a commutative hash, realized by
/// canonical ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArbiterKey {
    pub shape_a: ShapeId,
    pub shape_b: ShapeId,
}

impl ArbiterKey {
    pub fn new(a: ShapeId, b: ShapeId) -> Self {
        if a <= b {
            Self {
                shape_a: a,
                shape_b: b,
            }
        } else {
            Self {
                shape_a: b,
                shape_b: a,
            }
        }
    }
}

/// One persisted manifold point with its warm-start state and the per-substep
/// solver scratch prepared in place.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContactPoint {
    /// Anchors in each body's local frame, used to re-derive world positions
    /// as the bodies move.
    pub local_a: Vec3,
    pub local_b: Vec3,
    pub world_a: Vec3,
    pub world_b: Vec3,
    /// Positive for overlap, negative for a speculative gap.
    pub penetration: f32,
    pub normal_impulse: f32,
    pub tangent_impulse: [f32; 2],
    // Prepared by the solver each substep.
    pub r_a: Vec3,
    pub r_b: Vec3,
    pub normal_mass: f32,
    pub tangent_mass: [f32; 2],
    pub bias: f32,
}

/// Persistent collision record for one shape pair.
///
/// Holds up to four contacts plus the accumulated impulses that warm-start
/// the next step's solve. Slot liveness is tracked in the low bits of
/// `usage_mask`.
#[derive(Debug, Clone)]
pub struct Arbiter {
    pub shape_a: ShapeId,
    pub shape_b: ShapeId,
    pub body_a: BodyHandle,
    pub body_b: BodyHandle,
    /// Contact normal, pointing from body A toward body B.
    pub normal: Vec3,
    pub tangent1: Vec3,
    pub tangent2: Vec3,
    pub contacts: [ContactPoint; MAX_CONTACTS],
    pub usage_mask: u32,
    pub friction: f32,
    pub restitution: f32,
    pub touched_frame: u32,
}

impl Arbiter {
    pub fn new(
        key: ArbiterKey,
        body_a: BodyHandle,
        body_b: BodyHandle,
        friction: f32,
        restitution: f32,
    ) -> Self {
        Self {
            shape_a: key.shape_a,
            shape_b: key.shape_b,
            body_a,
            body_b,
            normal: Vec3::Y,
            tangent1: Vec3::X,
            tangent2: Vec3::Z,
            contacts: [ContactPoint::default(); MAX_CONTACTS],
            usage_mask: 0,
            friction,
            restitution,
            touched_frame: 0,
        }
    }

    pub fn key(&self) -> ArbiterKey {
        ArbiterKey::new(self.shape_a, self.shape_b)
    }

    pub fn is_empty(&self) -> bool {
        self.usage_mask & USAGE_MASK_BITS == 0
    }

    pub fn live_slots(&self) -> impl Iterator<Item = usize> + '_ {
        (0..MAX_CONTACTS).filter(|slot| self.usage_mask & (1 << slot) != 0)
    }

    pub fn contact_count(&self) -> usize {
        (self.usage_mask & USAGE_MASK_BITS).count_ones() as usize
    }

    fn slot_live(&self, slot: usize) -> bool {
        self.usage_mask & (1 << slot) != 0
    }

    fn clear_slot(&mut self, slot: usize) {
        self.usage_mask &= !(1 << slot);
    }

    fn claim_slot(&mut self, slot: usize) {
        self.usage_mask |= 1 << slot;
    }

    /// Re-derives world anchors from the body-local anchors and drops points
    /// whose tangential drift or normal separation has invalidated them.
    pub fn refresh(&mut self, transform_a: &Transform, transform_b: &Transform) {
        for slot in 0..MAX_CONTACTS {
            if !self.slot_live(slot) {
                continue;
            }
            let point = &mut self.contacts[slot];
            point.world_a = transform_a.transform_point(point.local_a);
            point.world_b = transform_b.transform_point(point.local_b);

            let gap = point.world_a - point.world_b;
            let separation = gap.dot(self.normal);
            let drift = gap - self.normal * separation;
            point.penetration = separation;

            if separation < -config::CONTACT_SEPARATION_TOLERANCE
                || drift.length_squared()
                    > config::CONTACT_BREAK_THRESHOLD * config::CONTACT_BREAK_THRESHOLD
            {
                self.clear_slot(slot);
            }
        }
    }

    /// Feeds a narrowphase contact into the manifold: matching slots are
    /// updated in place (preserving their warm-start impulses), free slots
    /// are claimed, and a full manifold is reduced to the four points
    /// spanning the largest patch.
    pub fn add_contact(
        &mut self,
        seed: &ContactSeed,
        transform_a: &Transform,
        transform_b: &Transform,
    ) {
        self.normal = seed.normal;

        let incoming = ContactPoint {
            local_a: transform_a.inverse_transform_point(seed.point_a),
            local_b: transform_b.inverse_transform_point(seed.point_b),
            world_a: seed.point_a,
            world_b: seed.point_b,
            penetration: seed.penetration,
            ..ContactPoint::default()
        };

        // Update an existing point if the new one lands on it.
        let threshold_sq = config::CONTACT_BREAK_THRESHOLD * config::CONTACT_BREAK_THRESHOLD;
        for slot in 0..MAX_CONTACTS {
            if !self.slot_live(slot) {
                continue;
            }
            let existing = &mut self.contacts[slot];
            if (existing.world_a - incoming.world_a).length_squared() < threshold_sq {
                let normal_impulse = existing.normal_impulse;
                let tangent_impulse = existing.tangent_impulse;
                *existing = ContactPoint {
                    normal_impulse,
                    tangent_impulse,
                    ..incoming
                };
                return;
            }
        }

        // Fresh slot if one is free.
        for slot in 0..MAX_CONTACTS {
            if !self.slot_live(slot) {
                self.contacts[slot] = incoming;
                self.claim_slot(slot);
                return;
            }
        }

        self.reduce_with(incoming);
    }

    /// Chooses the four of five candidate points that maximize the spanned
    /// quadrilateral area while always retaining the deepest point.
    fn reduce_with(&mut self, incoming: ContactPoint) {
        let mut candidates = [ContactPoint::default(); MAX_CONTACTS + 1];
        candidates[..MAX_CONTACTS].copy_from_slice(&self.contacts);
        candidates[MAX_CONTACTS] = incoming;

        let normal = self.normal;
        let mut chosen = [usize::MAX; MAX_CONTACTS];

        // Deepest point survives unconditionally.
        let deepest = (0..candidates.len())
            .max_by(|&a, &b| {
                candidates[a]
                    .penetration
                    .partial_cmp(&candidates[b].penetration)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap_or(0);
        chosen[0] = deepest;

        // Farthest from the deepest.
        let p0 = candidates[deepest].world_a;
        let second = best_candidate(&candidates, &chosen[..1], |point| {
            (point.world_a - p0).length_squared()
        });
        chosen[1] = second;

        // Max triangle area with the first two.
        let p1 = candidates[second].world_a;
        let third = best_candidate(&candidates, &chosen[..2], |point| {
            (p1 - p0).cross(point.world_a - p0).dot(normal).abs()
        });
        chosen[2] = third;

        // Max area added to the triangle.
        let p2 = candidates[third].world_a;
        let fourth = best_candidate(&candidates, &chosen[..3], |point| {
            let q = point.world_a;
            let a0 = (p1 - p0).cross(q - p0).dot(normal).abs();
            let a1 = (p2 - p1).cross(q - p1).dot(normal).abs();
            let a2 = (p0 - p2).cross(q - p2).dot(normal).abs();
            a0.max(a1).max(a2)
        });
        chosen[3] = fourth;

        let mut next = [ContactPoint::default(); MAX_CONTACTS];
        for (slot, &candidate) in chosen.iter().enumerate() {
            next[slot] = candidates[candidate];
        }
        self.contacts = next;
        self.usage_mask = USAGE_MASK_BITS;
    }
}

fn best_candidate<F>(candidates: &[ContactPoint], taken: &[usize], mut score: F) -> usize
where
    F: FnMut(&ContactPoint) -> f32,
{
    let mut best = usize::MAX;
    let mut best_score = f32::MIN;
    for (index, point) in candidates.iter().enumerate() {
        if taken.contains(&index) {
            continue;
        }
        let value = score(point);
        if value > best_score {
            best_score = value;
            best = index;
        }
    }
    // All slots taken cannot happen with 5 candidates and at most 4 chosen.
    best
}

/// The world's set of persistent arbiters: a pooled store plus the key
/// lookup, and the deferred-removal list drained in the sequential phase.
pub struct ArbiterSet {
    pool: ActivePool<Arbiter>,
    lookup: HashMap<ArbiterKey, ArbiterId>,
    pub deferred_removals: Vec<ArbiterId>,
}

impl ArbiterSet {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            pool: ActivePool::with_capacity("arbiters", capacity),
            lookup: HashMap::with_capacity(capacity),
            deferred_removals: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    pub fn id_of(&self, key: ArbiterKey) -> Option<ArbiterId> {
        self.lookup.get(&key).copied()
    }

    pub fn get(&self, id: ArbiterId) -> Option<&Arbiter> {
        self.pool.get(id)
    }

    pub fn get_mut(&mut self, id: ArbiterId) -> Option<&mut Arbiter> {
        self.pool.get_mut(id)
    }

    /// Looks up the arbiter for a shape pair, creating it if absent. Returns
    /// the id and whether it was newly created.
    pub fn get_or_create(
        &mut self,
        key: ArbiterKey,
        body_a: BodyHandle,
        body_b: BodyHandle,
        friction: f32,
        restitution: f32,
    ) -> PhysicsResult<(ArbiterId, bool)> {
        if let Some(&id) = self.lookup.get(&key) {
            return Ok((id, false));
        }
        let arbiter = Arbiter::new(key, body_a, body_b, friction, restitution);
        let id = self.pool.allocate(arbiter, true)?;
        self.lookup.insert(key, id);
        Ok((id, true))
    }

    pub fn remove(&mut self, id: ArbiterId) -> Option<Arbiter> {
        let arbiter = self.pool.free(id)?;
        self.lookup.remove(&arbiter.key());
        Some(arbiter)
    }

    pub fn ids(&self) -> Vec<ArbiterId> {
        self.pool.handles().collect()
    }

    pub fn solver_view(&mut self) -> PoolView<'_, Arbiter> {
        self.pool.solver_view()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::pool::PoolHandle;

    fn key() -> ArbiterKey {
        ArbiterKey::new(PoolHandle::new(1, 0), PoolHandle::new(0, 0))
    }

    fn seed_at(x: f32, z: f32, depth: f32) -> ContactSeed {
        ContactSeed {
            point_a: Vec3::new(x, depth, z),
            point_b: Vec3::new(x, 0.0, z),
            normal: Vec3::Y,
            penetration: depth,
        }
    }

    #[test]
    fn arbiter_key_is_commutative() {
        let a = PoolHandle::new(3, 1);
        let b = PoolHandle::new(7, 0);
        assert_eq!(ArbiterKey::new(a, b), ArbiterKey::new(b, a));
    }

    #[test]
    fn usage_mask_stays_in_low_bits() {
        let mut arbiter = Arbiter::new(key(), PoolHandle::default(), PoolHandle::default(), 0.5, 0.0);
        let identity = Transform::default();
        for i in 0..6 {
            arbiter.add_contact(&seed_at(i as f32, 0.0, 0.01), &identity, &identity);
        }
        assert_eq!(arbiter.usage_mask & !0xF, 0);
        assert_eq!(arbiter.contact_count(), 4);
    }

    #[test]
    fn reduction_keeps_the_deepest_point() {
        let mut arbiter = Arbiter::new(key(), PoolHandle::default(), PoolHandle::default(), 0.5, 0.0);
        let identity = Transform::default();

        arbiter.add_contact(&seed_at(0.0, 0.0, 0.5), &identity, &identity);
        for (x, z) in [(1.0, 0.0), (0.0, 1.0), (1.0, 1.0), (2.0, 2.0)] {
            arbiter.add_contact(&seed_at(x, z, 0.01), &identity, &identity);
        }

        assert_eq!(arbiter.contact_count(), 4);
        let deepest_alive = arbiter
            .live_slots()
            .any(|slot| (arbiter.contacts[slot].penetration - 0.5).abs() < 1e-6);
        assert!(deepest_alive);
    }

    #[test]
    fn matching_contact_preserves_warm_start() {
        let mut arbiter = Arbiter::new(key(), PoolHandle::default(), PoolHandle::default(), 0.5, 0.0);
        let identity = Transform::default();

        arbiter.add_contact(&seed_at(0.0, 0.0, 0.02), &identity, &identity);
        arbiter.contacts[0].normal_impulse = 3.5;

        // Same spot, slightly different depth: the slot updates in place.
        arbiter.add_contact(&seed_at(0.005, 0.0, 0.03), &identity, &identity);
        assert_eq!(arbiter.contact_count(), 1);
        assert!((arbiter.contacts[0].normal_impulse - 3.5).abs() < 1e-6);
        assert!((arbiter.contacts[0].penetration - 0.03).abs() < 1e-6);
    }

    #[test]
    fn refresh_drops_separated_points() {
        let mut arbiter = Arbiter::new(key(), PoolHandle::default(), PoolHandle::default(), 0.5, 0.0);
        let identity = Transform::default();
        arbiter.add_contact(&seed_at(0.0, 0.0, 0.01), &identity, &identity);
        assert_eq!(arbiter.contact_count(), 1);

        // Move body A up: the anchors separate beyond tolerance.
        let lifted = Transform::from_position(Vec3::new(0.0, 0.2, 0.0));
        arbiter.refresh(&lifted, &identity);
        assert_eq!(arbiter.contact_count(), 1);

        let dropped = Transform::from_position(Vec3::new(0.0, -0.2, 0.0));
        arbiter.refresh(&dropped, &identity);
        assert_eq!(arbiter.contact_count(), 0);
    }
}
