//! C3: the `TreeStore`, a mutable RRT* tree keyed directly on `Point` (bitwise
//! equality) rather than by index, so that subtree severance can remove an arbitrary
//! vertex without invalidating references held elsewhere.

use std::collections::{HashMap, HashSet};

use crate::base::error::TreeError;
use crate::base::state::Point;

/// Canonicalizes an undirected edge so each unordered pair is stored once,
/// independent of which endpoint was the parent at insertion time.
fn canonical_edge(a: Point, b: Point) -> (Point, Point) {
    let key = |p: &Point| (p.x.to_bits(), p.y.to_bits());
    if key(&a) <= key(&b) {
        (a, b)
    } else {
        (b, a)
    }
}

/// The incremental RRT*/FARRT* tree.
///
/// Invariants (checked at every mutation; a violation returns
/// `TreeError::InvariantViolation` rather than silently corrupting state):
/// - `v ∈ vertices` for every `v` referenced by `edges`, `parent` or `children`.
/// - `parent[v] = u ⇒ u ∈ children` and `v ∈ children[u]`.
/// - the root is the only vertex with no parent.
#[derive(Default)]
pub struct TreeStore {
    vertices: HashSet<Point>,
    edges: HashSet<(Point, Point)>,
    parent: HashMap<Point, Point>,
    children: HashMap<Point, HashSet<Point>>,
    cost: HashMap<Point, f64>,
    root: Option<Point>,
}

impl TreeStore {
    pub fn new() -> Self {
        TreeStore::default()
    }

    /// Resets the tree to a single root vertex with cost 0.
    pub fn reset(&mut self, root: Point) {
        self.vertices.clear();
        self.edges.clear();
        self.parent.clear();
        self.children.clear();
        self.cost.clear();
        self.vertices.insert(root);
        self.children.insert(root, HashSet::new());
        self.cost.insert(root, 0.0);
        self.root = Some(root);
    }

    pub fn root(&self) -> Option<Point> {
        self.root
    }

    pub fn contains(&self, v: &Point) -> bool {
        self.vertices.contains(v)
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn vertices(&self) -> impl Iterator<Item = &Point> {
        self.vertices.iter()
    }

    pub fn cost_of(&self, v: &Point) -> f64 {
        self.cost.get(v).copied().unwrap_or(f64::INFINITY)
    }

    pub fn parent_of(&self, v: &Point) -> Option<Point> {
        self.parent.get(v).copied()
    }

    pub fn children_of(&self, v: &Point) -> Vec<Point> {
        self.children
            .get(v)
            .map(|c| c.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Adds `new` to the tree as a child of `parent`, with the given accumulated cost.
    pub fn insert_vertex(&mut self, parent: Point, new: Point, cost: f64) -> Result<(), TreeError> {
        if !self.vertices.contains(&parent) {
            return Err(TreeError::InvariantViolation {
                detail: format!("insert_vertex: parent {:?} not in tree", parent),
            });
        }
        self.vertices.insert(new);
        self.edges.insert(canonical_edge(parent, new));
        self.parent.insert(new, parent);
        self.children.entry(parent).or_default().insert(new);
        self.children.entry(new).or_default();
        self.cost.insert(new, cost);
        Ok(())
    }

    /// Re-points `v`'s parent to `new_parent`, updating its cost and the edge/children
    /// bookkeeping on both sides. Used by RRT*'s rewire step and FARRT*'s inconsistency
    /// rewiring.
    pub fn reassign_parent(
        &mut self,
        v: Point,
        new_parent: Point,
        new_cost: f64,
    ) -> Result<(), TreeError> {
        if !self.vertices.contains(&v) || !self.vertices.contains(&new_parent) {
            return Err(TreeError::InvariantViolation {
                detail: format!(
                    "reassign_parent: vertex or new parent not in tree ({:?}, {:?})",
                    v, new_parent
                ),
            });
        }
        if let Some(old_parent) = self.parent.get(&v).copied() {
            self.edges.remove(&canonical_edge(old_parent, v));
            if let Some(siblings) = self.children.get_mut(&old_parent) {
                siblings.remove(&v);
            }
        }
        self.parent.insert(v, new_parent);
        self.edges.insert(canonical_edge(new_parent, v));
        self.children.entry(new_parent).or_default().insert(v);
        self.cost.insert(v, new_cost);
        Ok(())
    }

    /// Removes `v` from the tree: unlinks it from its parent's children, drops its
    /// outgoing edge and cost entry, and sets its cost to `+inf` so that any stale
    /// reference still comparing against it treats it as unreachable. Does not remove
    /// `v`'s descendants — the caller (`severance`) is responsible for walking and
    /// severing the whole affected subtree.
    pub fn sever_vertex(&mut self, v: Point) -> Result<(), TreeError> {
        if Some(v) == self.root {
            return Err(TreeError::InvariantViolation {
                detail: "sever_vertex: cannot sever the root".to_string(),
            });
        }
        if let Some(parent) = self.parent.remove(&v) {
            self.edges.remove(&canonical_edge(parent, v));
            if let Some(siblings) = self.children.get_mut(&parent) {
                siblings.remove(&v);
            }
        }
        self.children.remove(&v);
        self.vertices.remove(&v);
        self.cost.insert(v, f64::INFINITY);
        Ok(())
    }

    /// Fully forgets `v` (drops its cost entry too). Used once a severed vertex has
    /// been classified as permanently `conflict` (inside an obstacle) rather than
    /// `freed` (a rewiring candidate).
    pub fn forget_vertex(&mut self, v: &Point) {
        self.cost.remove(v);
    }

    /// Walks from `from` up to the root via `parent`, returning the path in
    /// root-to-`from` order.
    pub fn path_to_root(&self, from: Point) -> Result<Vec<Point>, TreeError> {
        let mut path = vec![from];
        let mut current = from;
        loop {
            match self.parent.get(&current) {
                Some(&p) => {
                    path.push(p);
                    current = p;
                }
                None => {
                    if Some(current) != self.root {
                        return Err(TreeError::InvariantViolation {
                            detail: format!("path_to_root: {:?} has no parent and is not root", current),
                        });
                    }
                    break;
                }
            }
        }
        path.reverse();
        if path.is_empty() {
            return Err(TreeError::EmptyPath);
        }
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_creates_root_with_zero_cost() {
        let mut tree = TreeStore::new();
        let root = Point::new(0.0, 0.0);
        tree.reset(root);
        assert!(tree.contains(&root));
        assert_eq!(tree.cost_of(&root), 0.0);
        assert_eq!(tree.parent_of(&root), None);
    }

    #[test]
    fn test_insert_vertex_links_parent_and_child() {
        let mut tree = TreeStore::new();
        let root = Point::new(0.0, 0.0);
        tree.reset(root);
        let a = Point::new(1.0, 0.0);
        tree.insert_vertex(root, a, 1.0).unwrap();
        assert_eq!(tree.parent_of(&a), Some(root));
        assert_eq!(tree.children_of(&root), vec![a]);
        assert_eq!(tree.cost_of(&a), 1.0);
    }

    #[test]
    fn test_reassign_parent_moves_edge() {
        let mut tree = TreeStore::new();
        let root = Point::new(0.0, 0.0);
        tree.reset(root);
        let a = Point::new(1.0, 0.0);
        let b = Point::new(0.0, 1.0);
        tree.insert_vertex(root, a, 1.0).unwrap();
        tree.insert_vertex(root, b, 1.0).unwrap();
        tree.reassign_parent(b, a, 1.5).unwrap();
        assert_eq!(tree.parent_of(&b), Some(a));
        assert!(!tree.children_of(&root).contains(&b));
        assert_eq!(tree.children_of(&a), vec![b]);
        assert_eq!(tree.cost_of(&b), 1.5);
    }

    #[test]
    fn test_sever_vertex_unlinks_but_preserves_cost_as_infinite() {
        let mut tree = TreeStore::new();
        let root = Point::new(0.0, 0.0);
        tree.reset(root);
        let a = Point::new(1.0, 0.0);
        tree.insert_vertex(root, a, 1.0).unwrap();
        tree.sever_vertex(a).unwrap();
        assert!(!tree.contains(&a));
        assert!(tree.children_of(&root).is_empty());
        assert_eq!(tree.cost_of(&a), f64::INFINITY);
    }

    #[test]
    fn test_path_to_root_orders_root_first() {
        let mut tree = TreeStore::new();
        let root = Point::new(0.0, 0.0);
        tree.reset(root);
        let a = Point::new(1.0, 0.0);
        let b = Point::new(2.0, 0.0);
        tree.insert_vertex(root, a, 1.0).unwrap();
        tree.insert_vertex(a, b, 2.0).unwrap();
        let path = tree.path_to_root(b).unwrap();
        assert_eq!(path, vec![root, a, b]);
    }

    #[test]
    fn test_cannot_sever_root() {
        let mut tree = TreeStore::new();
        let root = Point::new(0.0, 0.0);
        tree.reset(root);
        assert!(tree.sever_vertex(root).is_err());
    }
}
