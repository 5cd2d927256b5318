//! C6: subtree severance. When newly observed obstacles conflict with the standing
//! tree, this module identifies every vertex that must be torn out, severs them from
//! `TreeStore`, and seeds the inconsistency queue with whatever survives clear of the
//! obstacles so the rewiring pass in `partially_observable` has somewhere to start.

use std::collections::{HashSet, VecDeque};

use geo::MultiPolygon;

use crate::base::error::TreeError;
use crate::base::state::Point;
use crate::geometry;
use crate::queue::{self, InconsistencyQueue};
use crate::tree::TreeStore;

/// The three outcomes of a severance pass, per §4.7 step 7-8.
pub struct SeveranceResult {
    /// Severed vertices that landed inside an obstacle: gone for good.
    pub conflict: HashSet<Point>,
    /// Surviving vertices near enough to the obstacles to be rewire candidates but
    /// never themselves severed.
    pub frontier: HashSet<Point>,
    /// Severed vertices clear of the obstacles: candidates for rewiring.
    pub freed: HashSet<Point>,
}

/// Runs a full severance pass against `tree`, given the accumulated obstacle set `O`
/// and `r_av = obstacle_avoidance_radius`. `previous_plan` is the planned path whose
/// edges are additionally checked for obstacle intersection (step 2); pass an empty
/// slice if there is no outstanding plan. Freed vertices clear of `O` are pushed onto
/// `queue` as a side effect (step 6).
pub fn sever(
    tree: &mut TreeStore,
    previous_plan: &[Point],
    obstacles: &MultiPolygon<f64>,
    r_av: f64,
    queue: &mut InconsistencyQueue,
) -> Result<SeveranceResult, TreeError> {
    // Step 1: conflict0 = V ∩ buffer(O, r_av/2).
    let mut conflict0: HashSet<Point> = tree
        .vertices()
        .copied()
        .filter(|&v| geometry::within_distance_of(v, obstacles, r_av / 2.0))
        .collect();

    // Step 2: for each node on the outgoing plan whose parent-edge crosses O, add the
    // parent to conflict0.
    for &v in previous_plan {
        if let Some(parent) = tree.parent_of(&v) {
            if !geometry::edge_clear(parent, v, obstacles) {
                conflict0.insert(parent);
            }
        }
    }

    // Step 4 (computed ahead of step 3 so step 3 can exclude every severed vertex, not
    // just conflict0): BFS from conflict0 over children to collect all transitive
    // descendants.
    let mut severed: HashSet<Point> = conflict0.clone();
    let mut queue_bfs: VecDeque<Point> = conflict0.iter().copied().collect();
    while let Some(v) = queue_bfs.pop_front() {
        for child in tree.children_of(&v) {
            if severed.insert(child) {
                queue_bfs.push_back(child);
            }
        }
    }

    // Step 3: frontier = V ∩ buffer(O, r_av) \ conflict0. A vertex inside the wider
    // buffer(O, r_av) but also a transitive descendant of conflict0 is about to be
    // severed, not a surviving frontier candidate, so it must be excluded by `severed`
    // (the full step-4 set) rather than by `conflict0` alone — otherwise step 8's
    // disjointness requirement can be violated by construction whenever r_av is large
    // enough to pull a freed descendant into the buffer too.
    let frontier: HashSet<Point> = tree
        .vertices()
        .copied()
        .filter(|&v| geometry::within_distance_of(v, obstacles, r_av) && !severed.contains(&v))
        .collect();

    // Step 5: sever every collected vertex. Children are walked root-down so a parent
    // is never severed after a child that depends on it being still attached.
    let mut ordered: Vec<Point> = severed.iter().copied().collect();
    ordered.sort_by_key(|v| tree.path_to_root(*v).map(|p| p.len()).unwrap_or(0));
    for &v in &ordered {
        if tree.root() == Some(v) {
            continue; // the root can never be severed; conflict0 cannot legally include it
        }
        tree.sever_vertex(v)?;
    }

    // Step 6: push severed vertices clear of O onto the inconsistency queue.
    for &v in &severed {
        if geometry::point_clear(v, obstacles) {
            if let Some(key) = queue::compute_key(tree, v) {
                queue.verify(v, key);
            }
        }
    }

    // Step 7: partition severed into conflict (inside O) and freed (clear of O).
    let conflict: HashSet<Point> = severed
        .iter()
        .copied()
        .filter(|&v| !geometry::point_clear(v, obstacles))
        .collect();
    let freed: HashSet<Point> = severed.difference(&conflict).copied().collect();

    for v in &conflict {
        tree.forget_vertex(v);
    }

    // Step 8: frontier ∩ freed = ∅. `frontier` is built by subtracting the full `severed`
    // set (step 3, above) and `freed ⊆ severed`, so this holds by construction rather
    // than needing to be enforced here.
    debug_assert!(frontier.intersection(&freed).next().is_none());

    Ok(SeveranceResult {
        conflict,
        frontier,
        freed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::parse_multipolygon_wkt;

    /// A chain of 5 vertices along y=50 from (10,50) to (50,50), obstacle covering
    /// (30,50): expect conflict={(30,50)}, freed={(40,50),(50,50)}, frontier={(20,50)}.
    ///
    /// `r_av = 9.0` is chosen so `buffer(O, r_av)` reaches exactly as far as (20,50) and
    /// (40,50) (each 9 units from the obstacle's nearest edge), while `r_av/2 = 4.5`
    /// reaches neither — only (30,50), which sits inside the obstacle, falls within the
    /// tighter `conflict0` buffer. This deliberately exercises step 3's requirement that
    /// the wider buffer can catch a vertex on *both* sides of a severed region: (40,50)
    /// falls in `buffer(O, r_av)` too, but it's a freed descendant of `conflict0`, not a
    /// frontier vertex.
    #[test]
    fn test_severance_correctness_on_handcrafted_chain() {
        let mut tree = TreeStore::new();
        let root = Point::new(10.0, 50.0);
        tree.reset(root);
        let p20 = Point::new(20.0, 50.0);
        let p30 = Point::new(30.0, 50.0);
        let p40 = Point::new(40.0, 50.0);
        let p50 = Point::new(50.0, 50.0);
        tree.insert_vertex(root, p20, 10.0).unwrap();
        tree.insert_vertex(p20, p30, 20.0).unwrap();
        tree.insert_vertex(p30, p40, 30.0).unwrap();
        tree.insert_vertex(p40, p50, 40.0).unwrap();

        let obstacles =
            parse_multipolygon_wkt("MULTIPOLYGON (((29 49, 31 49, 31 51, 29 51, 29 49)))").unwrap();
        let mut q = InconsistencyQueue::new();
        let result = sever(&mut tree, &[], &obstacles, 9.0, &mut q).unwrap();

        assert_eq!(result.conflict, HashSet::from([p30]));
        assert_eq!(result.freed, HashSet::from([p40, p50]));
        assert_eq!(result.frontier, HashSet::from([p20]));

        assert!(!tree.contains(&p30));
        assert!(!tree.contains(&p40));
        assert!(!tree.contains(&p50));
        assert!(tree.contains(&p20));
    }

    #[test]
    fn test_freed_vertices_are_queued() {
        let mut tree = TreeStore::new();
        let root = Point::new(0.0, 0.0);
        tree.reset(root);
        let a = Point::new(10.0, 0.0);
        tree.insert_vertex(root, a, 10.0).unwrap();

        let obstacles =
            parse_multipolygon_wkt("MULTIPOLYGON (((9 -1, 11 -1, 11 1, 9 1, 9 -1)))").unwrap();
        let mut q = InconsistencyQueue::new();
        let result = sever(&mut tree, &[], &obstacles, 3.0, &mut q).unwrap();

        assert!(result.conflict.contains(&a));
        assert!(q.is_empty()); // a landed inside the obstacle, so it is never queued
    }
}
