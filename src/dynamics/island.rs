use std::collections::HashSet;

use crate::core::{body::RigidBody, pool::BodyHandle};

/// Identifier of an island slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IslandId(pub u32);

impl IslandId {
    pub const NONE: Self = Self(u32::MAX);

    pub fn is_none(&self) -> bool {
        *self == Self::NONE
    }
}

/// A maximal set of bodies coupled through contacts and constraints: the unit
/// of sleeping and parallel scheduling.
#[derive(Debug, Default)]
pub struct Island {
    pub bodies: Vec<BodyHandle>,
    pub marked_as_active: bool,
    /// Set when an edge was removed; a deferred split pass repartitions the
    /// island in the next sequential phase.
    pub needs_update: bool,
}

/// Incremental connectivity over bodies joined by arbiters or constraints.
///
/// Merges happen eagerly when an edge appears; splits are deferred to
/// [`IslandManager::split_pass`], which never runs mid-solve. Static bodies
/// keep singleton islands that are never scheduled and never merge.
pub struct IslandManager {
    islands: Vec<Option<Island>>,
    free: Vec<u32>,
    active: Vec<IslandId>,
}

impl Default for IslandManager {
    fn default() -> Self {
        Self::new()
    }
}

impl IslandManager {
    pub fn new() -> Self {
        Self {
            islands: Vec::new(),
            free: Vec::new(),
            active: Vec::new(),
        }
    }

    pub fn get(&self, id: IslandId) -> Option<&Island> {
        self.islands.get(id.0 as usize)?.as_ref()
    }

    pub fn get_mut(&mut self, id: IslandId) -> Option<&mut Island> {
        self.islands.get_mut(id.0 as usize)?.as_mut()
    }

    /// Islands currently scheduled for simulation work.
    pub fn active_islands(&self) -> &[IslandId] {
        &self.active
    }

    pub fn island_count(&self) -> usize {
        self.islands.iter().filter(|slot| slot.is_some()).count()
    }

    /// Upper bound on island slot indices, for sizing per-island work lists.
    pub fn slot_count(&self) -> usize {
        self.islands.len()
    }

    /// Creates the singleton island of a freshly added body.
    pub fn body_added(
        &mut self,
        body: BodyHandle,
        is_static: bool,
        cold: &mut [Option<RigidBody>],
    ) -> IslandId {
        let id = self.allocate_island(Island {
            bodies: vec![body],
            marked_as_active: !is_static,
            needs_update: false,
        });
        if !is_static {
            self.active.push(id);
        }
        if let Some(rigid) = cold[body.index()].as_mut() {
            rigid.island = id;
        }
        id
    }

    /// Joins the islands of two bodies when an arbiter or constraint connects
    /// them. Static bodies never merge; their singleton island stays put.
    pub fn bodies_connected(
        &mut self,
        a: BodyHandle,
        a_static: bool,
        b: BodyHandle,
        b_static: bool,
        cold: &mut [Option<RigidBody>],
    ) {
        if a_static || b_static {
            return;
        }
        let island_a = cold[a.index()].as_ref().map(|rigid| rigid.island);
        let island_b = cold[b.index()].as_ref().map(|rigid| rigid.island);
        let (Some(island_a), Some(island_b)) = (island_a, island_b) else {
            return;
        };
        if island_a == island_b {
            return;
        }

        // Absorb the smaller island into the larger one.
        let len_a = self.get(island_a).map(|i| i.bodies.len()).unwrap_or(0);
        let len_b = self.get(island_b).map(|i| i.bodies.len()).unwrap_or(0);
        let (keep, absorb) = if len_a >= len_b {
            (island_a, island_b)
        } else {
            (island_b, island_a)
        };

        let Some(absorbed) = self.islands[absorb.0 as usize].take() else {
            return;
        };
        self.free.push(absorb.0);
        self.remove_from_active(absorb);

        for body in &absorbed.bodies {
            if let Some(rigid) = cold[body.index()].as_mut() {
                rigid.island = keep;
            }
        }

        let was_active = absorbed.marked_as_active;
        if let Some(island) = self.get_mut(keep) {
            island.bodies.extend(absorbed.bodies);
            island.needs_update |= absorbed.needs_update;
            // If any body of a merged island is active, the whole island is.
            if was_active && !island.marked_as_active {
                island.marked_as_active = true;
                self.active.push(keep);
            }
        }
    }

    /// Marks both endpoints' islands for the deferred split pass.
    pub fn edge_removed(&mut self, a: BodyHandle, b: BodyHandle, cold: &[Option<RigidBody>]) {
        for body in [a, b] {
            if let Some(island) = cold[body.index()]
                .as_ref()
                .map(|rigid| rigid.island)
                .filter(|id| !id.is_none())
            {
                if let Some(island) = self.get_mut(island) {
                    island.needs_update = true;
                }
            }
        }
    }

    /// Detaches a body from its island. The caller must already have removed
    /// every edge touching the body, so it leaves as a singleton.
    pub fn body_removed(&mut self, body: BodyHandle, cold: &mut [Option<RigidBody>]) {
        let Some(island_id) = cold[body.index()].as_ref().map(|rigid| rigid.island) else {
            return;
        };
        if island_id.is_none() {
            return;
        }
        let Some(island) = self.get_mut(island_id) else {
            return;
        };
        island.bodies.retain(|member| *member != body);
        if island.bodies.is_empty() {
            self.islands[island_id.0 as usize] = None;
            self.free.push(island_id.0);
            self.remove_from_active(island_id);
        } else {
            island.needs_update = true;
        }
        if let Some(rigid) = cold[body.index()].as_mut() {
            rigid.island = IslandId::NONE;
        }
    }

    /// Repartitions every island flagged `needs_update` by walking the
    /// remaining connection edges. Runs only in the sequential phase.
    pub fn split_pass(&mut self, cold: &mut [Option<RigidBody>]) {
        let flagged: Vec<IslandId> = self
            .islands
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                slot.as_ref()
                    .filter(|island| island.needs_update)
                    .map(|_| IslandId(index as u32))
            })
            .collect();

        for island_id in flagged {
            let (members, was_active) = {
                let island = self.get_mut(island_id).expect("flagged island exists");
                island.needs_update = false;
                (std::mem::take(&mut island.bodies), island.marked_as_active)
            };

            let member_set: HashSet<BodyHandle> = members.iter().copied().collect();
            let mut visited: HashSet<BodyHandle> = HashSet::with_capacity(members.len());
            let mut first_component = true;

            for &start in &members {
                if visited.contains(&start) {
                    continue;
                }

                let mut component = Vec::new();
                let mut stack = vec![start];
                while let Some(body) = stack.pop() {
                    if !visited.insert(body) {
                        continue;
                    }
                    component.push(body);
                    if let Some(rigid) = cold[body.index()].as_ref() {
                        for neighbor in rigid.connections.keys() {
                            if member_set.contains(neighbor) && !visited.contains(neighbor) {
                                stack.push(*neighbor);
                            }
                        }
                    }
                }

                if first_component {
                    first_component = false;
                    if let Some(island) = self.get_mut(island_id) {
                        island.bodies = component;
                    }
                } else {
                    let new_id = self.allocate_island(Island {
                        bodies: component,
                        marked_as_active: was_active,
                        needs_update: false,
                    });
                    if was_active {
                        self.active.push(new_id);
                    }
                    if let Some(island) = self.get(new_id) {
                        let bodies = island.bodies.clone();
                        for body in bodies {
                            if let Some(rigid) = cold[body.index()].as_mut() {
                                rigid.island = new_id;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Schedules an island; the world is responsible for moving its bodies
    /// into the active prefix of the pool.
    pub fn mark_active(&mut self, id: IslandId) {
        if let Some(island) = self.get_mut(id) {
            if !island.marked_as_active {
                island.marked_as_active = true;
                self.active.push(id);
            }
        }
    }

    /// Unschedules an island after a sleep transition.
    pub fn mark_inactive(&mut self, id: IslandId) {
        if let Some(island) = self.get_mut(id) {
            if island.marked_as_active {
                island.marked_as_active = false;
                self.remove_from_active(id);
            }
        }
    }

    fn allocate_island(&mut self, island: Island) -> IslandId {
        if let Some(index) = self.free.pop() {
            self.islands[index as usize] = Some(island);
            IslandId(index)
        } else {
            self.islands.push(Some(island));
            IslandId(self.islands.len() as u32 - 1)
        }
    }

    fn remove_from_active(&mut self, id: IslandId) {
        if let Some(position) = self.active.iter().position(|&active| active == id) {
            self.active.swap_remove(position);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::pool::PoolHandle;

    fn cold_store(count: usize) -> Vec<Option<RigidBody>> {
        (0..count)
            .map(|i| Some(RigidBody::new(PoolHandle::new(i as u32, 0))))
            .collect()
    }

    fn handle(index: u32) -> BodyHandle {
        PoolHandle::new(index, 0)
    }

    #[test]
    fn connecting_bodies_merges_their_islands() {
        let mut manager = IslandManager::new();
        let mut cold = cold_store(3);
        for i in 0..3 {
            manager.body_added(handle(i), false, &mut cold);
        }
        assert_eq!(manager.active_islands().len(), 3);

        manager.bodies_connected(handle(0), false, handle(1), false, &mut cold);
        assert_eq!(manager.active_islands().len(), 2);

        let island_0 = cold[0].as_ref().unwrap().island;
        let island_1 = cold[1].as_ref().unwrap().island;
        assert_eq!(island_0, island_1);
        assert_ne!(island_0, cold[2].as_ref().unwrap().island);
    }

    #[test]
    fn static_bodies_do_not_join_islands() {
        let mut manager = IslandManager::new();
        let mut cold = cold_store(3);
        manager.body_added(handle(0), false, &mut cold);
        manager.body_added(handle(1), true, &mut cold);
        manager.body_added(handle(2), false, &mut cold);

        // Both dynamic bodies touch the static one; they stay separate.
        manager.bodies_connected(handle(0), false, handle(1), true, &mut cold);
        manager.bodies_connected(handle(2), false, handle(1), true, &mut cold);

        assert_ne!(
            cold[0].as_ref().unwrap().island,
            cold[2].as_ref().unwrap().island
        );
        assert_eq!(manager.active_islands().len(), 2);
    }

    #[test]
    fn split_pass_separates_disconnected_components() {
        let mut manager = IslandManager::new();
        let mut cold = cold_store(4);
        for i in 0..4 {
            manager.body_added(handle(i), false, &mut cold);
        }

        // Chain 0-1-2-3.
        for (a, b) in [(0, 1), (1, 2), (2, 3)] {
            cold[a].as_mut().unwrap().add_connection(handle(b as u32));
            cold[b].as_mut().unwrap().add_connection(handle(a as u32));
            manager.bodies_connected(handle(a as u32), false, handle(b as u32), false, &mut cold);
        }
        assert_eq!(manager.active_islands().len(), 1);

        // Break the middle edge and repartition.
        cold[1].as_mut().unwrap().remove_connection(handle(2));
        cold[2].as_mut().unwrap().remove_connection(handle(1));
        manager.edge_removed(handle(1), handle(2), &cold);
        manager.split_pass(&mut cold);

        assert_eq!(manager.active_islands().len(), 2);
        assert_eq!(
            cold[0].as_ref().unwrap().island,
            cold[1].as_ref().unwrap().island
        );
        assert_eq!(
            cold[2].as_ref().unwrap().island,
            cold[3].as_ref().unwrap().island
        );
        assert_ne!(
            cold[0].as_ref().unwrap().island,
            cold[2].as_ref().unwrap().island
        );
    }

    #[test]
    fn removed_body_leaves_as_singleton() {
        let mut manager = IslandManager::new();
        let mut cold = cold_store(2);
        manager.body_added(handle(0), false, &mut cold);
        manager.body_added(handle(1), false, &mut cold);
        manager.bodies_connected(handle(0), false, handle(1), false, &mut cold);

        manager.body_removed(handle(0), &mut cold);
        assert!(cold[0].as_ref().unwrap().island.is_none());
        let remaining = cold[1].as_ref().unwrap().island;
        assert_eq!(manager.get(remaining).unwrap().bodies, vec![handle(1)]);
    }
}
