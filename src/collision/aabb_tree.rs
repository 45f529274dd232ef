use glam::Vec3;

use crate::{collision::aabb::Aabb, core::shape::ShapeId};

const NULL_NODE: i32 = -1;

#[derive(Debug, Clone)]
struct TreeNode {
    aabb: Aabb,
    parent: i32,
    child1: i32,
    child2: i32,
    /// Leaf height is 0; free nodes are -1.
    height: i32,
    next_free: i32,
    shape: ShapeId,
}

impl TreeNode {
    fn is_leaf(&self) -> bool {
        self.child1 == NULL_NODE
    }
}

/// Dynamic bounding-volume tree used as the broadphase.
///
/// Leaves carry a shape proxy inside a fattened AABB; internal nodes hold the
/// union of their children. Insertion picks the sibling minimizing the summed
/// expansion of internal surface areas, and rotations repair height skew on
/// the way back up. Structural mutation requires exclusive access; queries are
/// read-only.
pub struct AabbTree {
    nodes: Vec<TreeNode>,
    root: i32,
    free_list: i32,
    margin: f32,
}

impl AabbTree {
    pub fn new(margin: f32) -> Self {
        Self {
            nodes: Vec::new(),
            root: NULL_NODE,
            free_list: NULL_NODE,
            margin,
        }
    }

    /// Inserts a leaf for `shape` with a fattened copy of `aabb`; returns the
    /// proxy id used for later updates.
    pub fn add_proxy(&mut self, shape: ShapeId, aabb: &Aabb) -> i32 {
        let node = self.allocate_node();
        self.nodes[node as usize].aabb = aabb.fattened(self.margin);
        self.nodes[node as usize].shape = shape;
        self.nodes[node as usize].height = 0;
        self.insert_leaf(node);
        node
    }

    pub fn remove_proxy(&mut self, proxy: i32) {
        self.remove_leaf(proxy);
        self.free_node(proxy);
    }

    /// Re-fits a proxy to a moved AABB. A no-op while the fattened bounds
    /// still contain the new box; returns whether the leaf was reinserted.
    pub fn update_proxy(&mut self, proxy: i32, aabb: &Aabb) -> bool {
        if self.nodes[proxy as usize].aabb.contains(aabb) {
            return false;
        }
        self.remove_leaf(proxy);
        self.nodes[proxy as usize].aabb = aabb.fattened(self.margin);
        self.insert_leaf(proxy);
        true
    }

    pub fn shape_at(&self, proxy: i32) -> ShapeId {
        self.nodes[proxy as usize].shape
    }

    pub fn fat_aabb(&self, proxy: i32) -> &Aabb {
        &self.nodes[proxy as usize].aabb
    }

    /// Emits every overlapping leaf pair accepted by `filter`.
    pub fn enumerate_overlaps<P, V>(&self, mut filter: P, mut visitor: V)
    where
        P: FnMut(ShapeId, ShapeId) -> bool,
        V: FnMut(ShapeId, ShapeId),
    {
        if self.root == NULL_NODE || self.nodes[self.root as usize].is_leaf() {
            return;
        }

        let mut stack: Vec<(i32, i32)> = Vec::with_capacity(64);
        stack.push((self.root, self.root));

        while let Some((a, b)) = stack.pop() {
            let node_a = &self.nodes[a as usize];
            let node_b = &self.nodes[b as usize];

            if a == b {
                if !node_a.is_leaf() {
                    stack.push((node_a.child1, node_a.child1));
                    stack.push((node_a.child2, node_a.child2));
                    stack.push((node_a.child1, node_a.child2));
                }
                continue;
            }

            if !node_a.aabb.overlaps(&node_b.aabb) {
                continue;
            }

            match (node_a.is_leaf(), node_b.is_leaf()) {
                (true, true) => {
                    if filter(node_a.shape, node_b.shape) {
                        visitor(node_a.shape, node_b.shape);
                    }
                }
                (false, true) => {
                    stack.push((node_a.child1, b));
                    stack.push((node_a.child2, b));
                }
                (true, false) => {
                    stack.push((a, node_b.child1));
                    stack.push((a, node_b.child2));
                }
                (false, false) => {
                    // Descend the larger subtree to keep the stack shallow.
                    if node_a.aabb.surface_area() >= node_b.aabb.surface_area() {
                        stack.push((node_a.child1, b));
                        stack.push((node_a.child2, b));
                    } else {
                        stack.push((a, node_b.child1));
                        stack.push((a, node_b.child2));
                    }
                }
            }
        }
    }

    /// Visits every leaf whose fattened AABB overlaps `aabb`.
    pub fn query<V>(&self, aabb: &Aabb, mut visitor: V)
    where
        V: FnMut(ShapeId),
    {
        if self.root == NULL_NODE {
            return;
        }
        let mut stack = Vec::with_capacity(64);
        stack.push(self.root);
        while let Some(index) = stack.pop() {
            let node = &self.nodes[index as usize];
            if !node.aabb.overlaps(aabb) {
                continue;
            }
            if node.is_leaf() {
                visitor(node.shape);
            } else {
                stack.push(node.child1);
                stack.push(node.child2);
            }
        }
    }

    /// Casts a ray through the tree. `hit` receives each leaf whose bounds the
    /// ray enters (with the entry parameter) and returns the new clipping
    /// parameter, letting callers shrink the search as hits are found.
    pub fn ray_cast<F>(&self, origin: Vec3, direction: Vec3, max_t: f32, mut hit: F)
    where
        F: FnMut(ShapeId, f32) -> f32,
    {
        if self.root == NULL_NODE {
            return;
        }
        let mut clip_t = max_t;
        let mut stack = Vec::with_capacity(64);
        stack.push(self.root);
        while let Some(index) = stack.pop() {
            let node = &self.nodes[index as usize];
            let Some(enter_t) = node.aabb.ray_hit(origin, direction, clip_t) else {
                continue;
            };
            if node.is_leaf() {
                clip_t = hit(node.shape, enter_t).min(clip_t);
            } else {
                stack.push(node.child1);
                stack.push(node.child2);
            }
        }
    }

    /// Debug walk over the tree down to `max_depth`.
    pub fn enumerate_all<V>(&self, mut visitor: V, max_depth: usize)
    where
        V: FnMut(&Aabb, usize, bool),
    {
        if self.root == NULL_NODE {
            return;
        }
        let mut stack = vec![(self.root, 0usize)];
        while let Some((index, depth)) = stack.pop() {
            let node = &self.nodes[index as usize];
            visitor(&node.aabb, depth, node.is_leaf());
            if depth < max_depth && !node.is_leaf() {
                stack.push((node.child1, depth + 1));
                stack.push((node.child2, depth + 1));
            }
        }
    }

    pub fn leaf_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| n.height == 0 && n.is_leaf())
            .count()
    }

    fn allocate_node(&mut self) -> i32 {
        if self.free_list != NULL_NODE {
            let index = self.free_list;
            self.free_list = self.nodes[index as usize].next_free;
            let node = &mut self.nodes[index as usize];
            node.parent = NULL_NODE;
            node.child1 = NULL_NODE;
            node.child2 = NULL_NODE;
            node.height = 0;
            node.next_free = NULL_NODE;
            return index;
        }
        let index = self.nodes.len() as i32;
        self.nodes.push(TreeNode {
            aabb: Aabb::EMPTY,
            parent: NULL_NODE,
            child1: NULL_NODE,
            child2: NULL_NODE,
            height: 0,
            next_free: NULL_NODE,
            shape: ShapeId::default(),
        });
        index
    }

    fn free_node(&mut self, index: i32) {
        let node = &mut self.nodes[index as usize];
        node.height = -1;
        node.next_free = self.free_list;
        self.free_list = index;
    }

    fn insert_leaf(&mut self, leaf: i32) {
        if self.root == NULL_NODE {
            self.root = leaf;
            self.nodes[leaf as usize].parent = NULL_NODE;
            return;
        }

        // Walk down picking the child whose expansion costs least.
        let leaf_aabb = self.nodes[leaf as usize].aabb;
        let mut index = self.root;
        while !self.nodes[index as usize].is_leaf() {
            let node = &self.nodes[index as usize];
            let area = node.aabb.surface_area();
            let combined_area = node.aabb.union(&leaf_aabb).surface_area();

            // Cost of making a new parent here versus pushing down.
            let cost = 2.0 * combined_area;
            let inheritance = 2.0 * (combined_area - area);

            let child_cost = |tree: &Self, child: i32| -> f32 {
                let child_node = &tree.nodes[child as usize];
                let union_area = leaf_aabb.union(&child_node.aabb).surface_area();
                if child_node.is_leaf() {
                    union_area + inheritance
                } else {
                    (union_area - child_node.aabb.surface_area()) + inheritance
                }
            };

            let cost1 = child_cost(self, node.child1);
            let cost2 = child_cost(self, node.child2);

            if cost < cost1 && cost < cost2 {
                break;
            }
            index = if cost1 < cost2 {
                self.nodes[index as usize].child1
            } else {
                self.nodes[index as usize].child2
            };
        }

        let sibling = index;
        let old_parent = self.nodes[sibling as usize].parent;
        let new_parent = self.allocate_node();
        {
            let sibling_aabb = self.nodes[sibling as usize].aabb;
            let sibling_height = self.nodes[sibling as usize].height;
            let node = &mut self.nodes[new_parent as usize];
            node.parent = old_parent;
            node.aabb = leaf_aabb.union(&sibling_aabb);
            node.height = sibling_height + 1;
            node.child1 = sibling;
            node.child2 = leaf;
        }
        self.nodes[sibling as usize].parent = new_parent;
        self.nodes[leaf as usize].parent = new_parent;

        if old_parent == NULL_NODE {
            self.root = new_parent;
        } else if self.nodes[old_parent as usize].child1 == sibling {
            self.nodes[old_parent as usize].child1 = new_parent;
        } else {
            self.nodes[old_parent as usize].child2 = new_parent;
        }

        self.refit_ancestors(new_parent);
    }

    fn remove_leaf(&mut self, leaf: i32) {
        if leaf == self.root {
            self.root = NULL_NODE;
            return;
        }

        let parent = self.nodes[leaf as usize].parent;
        let grandparent = self.nodes[parent as usize].parent;
        let sibling = if self.nodes[parent as usize].child1 == leaf {
            self.nodes[parent as usize].child2
        } else {
            self.nodes[parent as usize].child1
        };

        if grandparent == NULL_NODE {
            self.root = sibling;
            self.nodes[sibling as usize].parent = NULL_NODE;
        } else {
            if self.nodes[grandparent as usize].child1 == parent {
                self.nodes[grandparent as usize].child1 = sibling;
            } else {
                self.nodes[grandparent as usize].child2 = sibling;
            }
            self.nodes[sibling as usize].parent = grandparent;
            self.refit_ancestors(grandparent);
        }
        self.free_node(parent);
        self.nodes[leaf as usize].parent = NULL_NODE;
    }

    /// Walks toward the root rebalancing and recomputing bounds and heights.
    fn refit_ancestors(&mut self, start: i32) {
        let mut index = start;
        while index != NULL_NODE {
            index = self.balance(index);

            let child1 = self.nodes[index as usize].child1;
            let child2 = self.nodes[index as usize].child2;
            let aabb = self.nodes[child1 as usize]
                .aabb
                .union(&self.nodes[child2 as usize].aabb);
            let height = 1 + self.nodes[child1 as usize]
                .height
                .max(self.nodes[child2 as usize].height);
            let node = &mut self.nodes[index as usize];
            node.aabb = aabb;
            node.height = height;

            index = self.nodes[index as usize].parent;
        }
    }

    /// Performs a rotation if the subtree at `a` is skewed by more than one
    /// level; returns the index now occupying `a`'s position.
    fn balance(&mut self, a: i32) -> i32 {
        let node_a = &self.nodes[a as usize];
        if node_a.is_leaf() || node_a.height < 2 {
            return a;
        }

        let b = node_a.child1;
        let c = node_a.child2;
        let skew = self.nodes[c as usize].height - self.nodes[b as usize].height;

        if skew > 1 {
            self.rotate_up(a, c, b)
        } else if skew < -1 {
            self.rotate_up(a, b, c)
        } else {
            a
        }
    }

    /// Promotes `up` (the taller child of `a`) to `a`'s place; `keep` is the
    /// other child.
    fn rotate_up(&mut self, a: i32, up: i32, keep: i32) -> i32 {
        let up_child1 = self.nodes[up as usize].child1;
        let up_child2 = self.nodes[up as usize].child2;
        let parent = self.nodes[a as usize].parent;

        // `up` takes over a's slot.
        self.nodes[up as usize].parent = parent;
        if parent == NULL_NODE {
            self.root = up;
        } else if self.nodes[parent as usize].child1 == a {
            self.nodes[parent as usize].child1 = up;
        } else {
            self.nodes[parent as usize].child2 = up;
        }

        // The shorter grandchild moves under `a`.
        let (promote, demote) =
            if self.nodes[up_child1 as usize].height >= self.nodes[up_child2 as usize].height {
                (up_child1, up_child2)
            } else {
                (up_child2, up_child1)
            };

        self.nodes[up as usize].child1 = a;
        self.nodes[up as usize].child2 = promote;
        self.nodes[a as usize].parent = up;
        self.nodes[a as usize].child1 = keep;
        self.nodes[a as usize].child2 = demote;
        self.nodes[demote as usize].parent = a;
        self.nodes[keep as usize].parent = a;

        let refresh = |tree: &mut Self, index: i32| {
            let c1 = tree.nodes[index as usize].child1;
            let c2 = tree.nodes[index as usize].child2;
            tree.nodes[index as usize].aabb = tree.nodes[c1 as usize]
                .aabb
                .union(&tree.nodes[c2 as usize].aabb);
            tree.nodes[index as usize].height = 1 + tree.nodes[c1 as usize]
                .height
                .max(tree.nodes[c2 as usize].height);
        };
        refresh(self, a);
        refresh(self, up);

        up
    }
}
