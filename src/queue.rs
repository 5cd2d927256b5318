//! C8: the inconsistency priority queue used by FARRT*'s rewiring pass.
//!
//! Mirrors the RRTx paper's `reduceInconsistency` (Algorithm 5) queue: a min-heap
//! ordered on a vertex's key, with a side `key_map` recording each vertex's
//! most-recently-pushed key so that a stale heap entry (one whose key has since been
//! superseded by a cheaper `update`) is discarded lazily on pop rather than removed
//! eagerly from the heap, which `BinaryHeap` cannot do in place.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use ordered_float::OrderedFloat;

use crate::base::state::Point;
use crate::geometry;
use crate::tree::TreeStore;

/// `key(p) = cost[nearest(V, p)] + dist(nearest(V, p), p)`. `None` if the tree is
/// empty (there is no nearest vertex to key against).
pub fn compute_key(tree: &TreeStore, p: Point) -> Option<f64> {
    let nearest = geometry::nearest(tree.vertices(), p)?;
    Some(tree.cost_of(&nearest) + nearest.dist(&p))
}

#[derive(Default)]
pub struct InconsistencyQueue {
    heap: BinaryHeap<Reverse<(OrderedFloat<f64>, PointKey)>>,
    key_map: HashMap<Point, f64>,
}

/// A `Point` wrapper that is `Ord` purely by coordinate so it can sit in the heap's
/// tuple alongside its key; ties in key are broken by coordinate rather than being
/// left ambiguous.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct PointKey {
    x: OrderedFloat<f64>,
    y: OrderedFloat<f64>,
}
impl From<Point> for PointKey {
    fn from(p: Point) -> Self {
        PointKey {
            x: OrderedFloat(p.x),
            y: OrderedFloat(p.y),
        }
    }
}
impl From<PointKey> for Point {
    fn from(k: PointKey) -> Self {
        Point::new(k.x.0, k.y.0)
    }
}

impl InconsistencyQueue {
    pub fn new() -> Self {
        InconsistencyQueue::default()
    }

    /// Inserts or updates `v`'s key. A vertex already present with a stale key simply
    /// gets a second, newer heap entry; the old one is discarded when popped (its
    /// recorded key will no longer match `key_map`).
    fn push(&mut self, v: Point, key: f64) {
        self.key_map.insert(v, key);
        self.heap.push(Reverse((OrderedFloat(key), v.into())));
    }

    /// `insert(p)`: pushes `p` at `key` unless it's already present with that exact
    /// key, in which case it's a no-op (logged, since re-inserting an unchanged key
    /// usually means the caller recomputed a key it didn't need to).
    pub fn insert(&mut self, v: Point, key: f64) {
        if self.key_map.get(&v) == Some(&key) {
            log::warn!("InconsistencyQueue::insert: {:?} already queued at key {key}", v);
            return;
        }
        self.push(v, key);
    }

    /// `update(p)`: replaces `p`'s key if present; a no-op if `p` isn't queued at all.
    pub fn update(&mut self, v: Point, key: f64) {
        if self.key_map.contains_key(&v) {
            self.push(v, key);
        }
    }

    /// `verify(p)`: `update` if already queued, `insert` otherwise.
    pub fn verify(&mut self, v: Point, key: f64) {
        if self.key_map.contains_key(&v) {
            self.update(v, key);
        } else {
            self.insert(v, key);
        }
    }

    /// Retained for call sites that don't care whether `v` is new or already queued.
    pub fn insert_or_update(&mut self, v: Point, key: f64) {
        self.push(v, key);
    }

    /// Removes `v` from the queue outright (it is no longer a rewiring candidate).
    pub fn remove(&mut self, v: &Point) {
        self.key_map.remove(v);
    }

    pub fn contains(&self, v: &Point) -> bool {
        self.key_map.contains_key(v)
    }

    pub fn key_of(&self, v: &Point) -> Option<f64> {
        self.key_map.get(v).copied()
    }

    /// Pops the minimum-key vertex, discarding any stale heap entries along the way.
    pub fn pop(&mut self) -> Option<(Point, f64)> {
        while let Some(Reverse((key, point_key))) = self.heap.pop() {
            let v: Point = point_key.into();
            match self.key_map.get(&v) {
                Some(&current_key) if current_key == key.0 => {
                    self.key_map.remove(&v);
                    return Some((v, key.0));
                }
                _ => continue, // stale entry: key_map has since moved on, or v was removed
            }
        }
        None
    }

    /// Looks at the minimum-key vertex without removing it, by popping and
    /// immediately reinserting — the same "pop-then-reinsert" pattern used to test
    /// non-emptiness and to compare keys in the RRTx reference.
    pub fn peek(&mut self) -> Option<(Point, f64)> {
        let top = self.pop()?;
        self.insert_or_update(top.0, top.1);
        Some(top)
    }

    /// `true` if the queue has at least one live (non-stale) entry.
    pub fn not_empty(&mut self) -> bool {
        self.peek().is_some()
    }

    /// Snapshot of every vertex currently queued, independent of heap ordering.
    pub fn queued_points(&self) -> Vec<Point> {
        self.key_map.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.key_map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.key_map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pop_returns_minimum_key_first() {
        let mut q = InconsistencyQueue::new();
        q.insert_or_update(Point::new(0.0, 0.0), 5.0);
        q.insert_or_update(Point::new(1.0, 0.0), 1.0);
        q.insert_or_update(Point::new(2.0, 0.0), 3.0);

        let (p, k) = q.pop().unwrap();
        assert_eq!(p, Point::new(1.0, 0.0));
        assert_eq!(k, 1.0);

        let (p, k) = q.pop().unwrap();
        assert_eq!(p, Point::new(2.0, 0.0));
        assert_eq!(k, 3.0);
    }

    #[test]
    fn test_update_supersedes_stale_entry() {
        let mut q = InconsistencyQueue::new();
        let v = Point::new(0.0, 0.0);
        q.insert_or_update(v, 10.0);
        q.insert_or_update(v, 2.0); // cheaper key found before v was ever popped

        let (p, k) = q.pop().unwrap();
        assert_eq!(p, v);
        assert_eq!(k, 2.0);
        // the stale key=10.0 heap entry must not resurface as a second pop of v
        assert!(q.pop().is_none());
    }

    #[test]
    fn test_remove_prevents_future_pop() {
        let mut q = InconsistencyQueue::new();
        let v = Point::new(0.0, 0.0);
        q.insert_or_update(v, 1.0);
        q.remove(&v);
        assert!(q.pop().is_none());
    }

    #[test]
    fn test_not_empty_does_not_consume_the_entry() {
        let mut q = InconsistencyQueue::new();
        q.insert_or_update(Point::new(0.0, 0.0), 1.0);
        assert!(q.not_empty());
        assert!(q.not_empty());
        assert_eq!(q.len(), 1);
    }
}
