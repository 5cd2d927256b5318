//! C5: the RRT* core — sampling, steering, near-ball radius, one-step expansion, tree
//! construction and path extraction. These are free functions operating directly on a
//! `TreeStore` rather than methods of a planner struct, so that both a one-shot build
//! (`RrtStarPlanner`, below) and FARRT*'s incremental rewiring (`partially_observable`)
//! can share the exact same expansion step.

use std::sync::Arc;

use geo::MultiPolygon;
use rand::Rng;

use crate::base::{
    error::{PlanningError, TreeError},
    goal::{Goal, GoalSampleableRegion},
    planner::{Path, Planner},
    problem_definition::ProblemDefinition,
    space::{StateSpace, WorkspaceSpace},
    state::Point,
    validity::StateValidityChecker,
};
use crate::geometry;
use crate::tree::TreeStore;

const MAX_REJECTION_SAMPLES: usize = 1000;

/// Dimension `D=2` near-ball radius (spec.md §4.4). `None` when `n <= 1`, for which the
/// formula is undefined — callers fall back to `steer_distance`.
pub fn near_ball_radius(n: usize, width: f64, height: f64, steer_distance: f64) -> Option<f64> {
    if n <= 1 {
        return None;
    }
    const D: f64 = 2.0;
    let gamma = 2f64.powf(D) * (1.0 + 1.0 / D) * width * height;
    let n = n as f64;
    let r = (gamma / std::f64::consts::PI * n.ln() / n).powf(1.0 / D);
    Some(r.min(steer_distance))
}

/// Steers from `near` toward `rand`, stopping after at most `steer_distance`.
pub fn steer(near: Point, rand: Point, steer_distance: f64) -> Point {
    let d = near.dist(&rand);
    if d == 0.0 {
        return rand;
    }
    let t = (steer_distance / d).min(1.0);
    Point::new(near.x + (rand.x - near.x) * t, near.y + (rand.y - near.y) * t)
}

/// Samples `goal_pt` with probability `eps`, otherwise rejection-samples a uniform
/// point whose `buffer_radius` disc does not intersect `obstacles`.
pub fn sample_free(
    width: f64,
    height: f64,
    goal_pt: Point,
    eps: f64,
    obstacles: &MultiPolygon<f64>,
    buffer_radius: f64,
    rng: &mut impl Rng,
) -> Point {
    if rng.random_bool(eps) {
        return goal_pt;
    }
    let mut candidate = geometry::random_point_in_box(width, height, rng);
    for _ in 0..MAX_REJECTION_SAMPLES {
        if !geometry::within_distance_of(candidate, obstacles, buffer_radius) {
            return candidate;
        }
        candidate = geometry::random_point_in_box(width, height, rng);
    }
    log::warn!("sample_free: exhausted {MAX_REJECTION_SAMPLES} rejection samples, returning last candidate anyway");
    candidate
}

/// The outcome of a successful `expand_one_step` call (skipped steps, because the
/// steered edge collided, return `Ok(None)`).
pub struct ExpandResult {
    pub x_new: Point,
    pub reached_goal: bool,
}

/// Runs one RRT* expansion (spec.md §4.5, steps 2-9) against `x_rand`.
#[allow(clippy::too_many_arguments)]
pub fn expand_one_step(
    tree: &mut TreeStore,
    x_rand: Point,
    obstacles: &MultiPolygon<f64>,
    steer_distance: f64,
    width: f64,
    height: f64,
    goal_pt: Point,
    goal_threshold: f64,
) -> Result<Option<ExpandResult>, TreeError> {
    let x_near = geometry::nearest(tree.vertices(), x_rand).ok_or(TreeError::InvariantViolation {
        detail: "expand_one_step: tree has no vertices to steer from".to_string(),
    })?;
    let x_new = steer(x_near, x_rand, steer_distance);

    if !geometry::edge_clear(x_near, x_new, obstacles) {
        return Ok(None);
    }

    let r_ball = near_ball_radius(tree.len(), width, height, steer_distance).unwrap_or(steer_distance);
    let neighbours: Vec<Point> = geometry::within_radius(tree.vertices(), x_new, r_ball)
        .into_iter()
        .filter(|&v| v != x_new)
        .collect();

    // Choose-parent: among {x_near} ∪ neighbours with an obstacle-free edge to x_new,
    // pick the one minimizing cost[v] + dist(v, x_new).
    let mut x_min = x_near;
    let mut c_min = tree.cost_of(&x_near) + x_near.dist(&x_new);
    for &v in &neighbours {
        let cost_via_v = tree.cost_of(&v) + v.dist(&x_new);
        if cost_via_v < c_min && geometry::edge_clear(v, x_new, obstacles) {
            c_min = cost_via_v;
            x_min = v;
        }
    }

    tree.insert_vertex(x_min, x_new, c_min)?;

    // Local rewire: for each remaining neighbour, reroute it through x_new if cheaper.
    for &x in &neighbours {
        if x == x_min {
            continue;
        }
        let cost_via_new = c_min + x_new.dist(&x);
        if cost_via_new < tree.cost_of(&x) && geometry::edge_clear(x_new, x, obstacles) {
            tree.reassign_parent(x, x_new, cost_via_new)?;
        }
    }

    let reached_goal = x_new.dist(&goal_pt) < goal_threshold;
    Ok(Some(ExpandResult { x_new, reached_goal }))
}

/// Parameters governing a full `build_rrt_tree` call.
pub struct BuildConfig {
    pub iters: usize,
    pub eps: f64,
    pub steer_distance: f64,
    pub width: f64,
    pub height: f64,
    pub goal_threshold: f64,
    pub obstacle_avoidance_radius: f64,
    pub built_tree: bool,
}

/// Runs RRT* until termination (spec.md §4.5's termination policy) and returns the
/// chosen goal-reaching vertex.
///
/// - First build (`built_tree = false`): runs at least `iters` iterations and until at
///   least one goal-reacher is found, then returns the minimum-cost goal-reacher seen.
///   The effective obstacle buffer is halved after the midpoint if no goal has been
///   reached yet, to permit tighter passages.
/// - Subsequent rewirings (`built_tree = true`): returns the first goal-reacher found.
pub fn build_rrt_tree(
    tree: &mut TreeStore,
    goal_pt: Point,
    obstacles: &MultiPolygon<f64>,
    cfg: &BuildConfig,
    rng: &mut impl Rng,
) -> Result<Point, TreeError> {
    let mut best: Option<(Point, f64)> = None;
    let mut buffer_radius = cfg.obstacle_avoidance_radius;
    let mut i = 0usize;

    loop {
        let should_stop = if cfg.built_tree {
            best.is_some()
        } else {
            i >= cfg.iters && best.is_some()
        };
        if should_stop {
            break;
        }
        if i >= cfg.iters.max(1) * 50 {
            // safety backstop against obstacle configurations with no feasible goal
            return Err(TreeError::PlanInfeasible);
        }

        if !cfg.built_tree && best.is_none() && i == cfg.iters / 2 {
            buffer_radius /= 2.0;
        }

        let x_rand = sample_free(
            cfg.width,
            cfg.height,
            goal_pt,
            cfg.eps,
            obstacles,
            buffer_radius,
            rng,
        );
        if let Some(result) = expand_one_step(
            tree,
            x_rand,
            obstacles,
            cfg.steer_distance,
            cfg.width,
            cfg.height,
            goal_pt,
            cfg.goal_threshold,
        )? {
            if result.reached_goal {
                let cost = tree.cost_of(&result.x_new);
                let better = best.map(|(_, c)| cost < c).unwrap_or(true);
                if better {
                    best = Some((result.x_new, cost));
                }
            }
        }
        i += 1;
    }

    best.map(|(p, _)| p).ok_or(TreeError::PlanInfeasible)
}

/// Walks `parent` pointers from `endpoint` to `root` (spec.md §4.6).
///
/// FARRT*'s tree is rooted at the goal and grown toward `curr_pos`, so `reverse=true`
/// (used by `partially_observable`'s replan step) returns the ancestors of `endpoint`
/// nearest-neighbour-first and root-last, with `endpoint` itself excluded — exactly the
/// order `step_through_plan` consumes front-to-back as `curr_pos` advances toward the
/// root/goal. `reverse=false` (used by the start-rooted, single-shot `RrtStarPlanner`)
/// returns the plain root-first ancestor chain including both endpoints, i.e. curr-to-goal
/// order for a conventionally start-rooted tree.
pub fn extract_path(
    tree: &TreeStore,
    endpoint: Point,
    root: Point,
    reverse: bool,
) -> Result<Vec<Point>, TreeError> {
    let full = tree.path_to_root(endpoint)?;
    if full.first() != Some(&root) {
        return Err(TreeError::InvariantViolation {
            detail: format!("extract_path: {:?} does not root at {:?}", endpoint, root),
        });
    }
    if reverse {
        let mut ancestors = full;
        ancestors.pop(); // drop endpoint
        ancestors.reverse(); // nearest-to-endpoint first, root last
        Ok(ancestors)
    } else {
        Ok(full) // root-first, endpoint-last, both included
    }
}

/// A fixed-threshold point goal, analogous to `oxmpl`'s goal-region implementations but
/// specialized to a single target `Point` in the 2D workspace.
pub struct PointGoal {
    pub target: Point,
    pub threshold: f64,
}
impl Goal<Point> for PointGoal {
    fn is_satisfied(&self, state: &Point) -> bool {
        self.target.dist(state) < self.threshold
    }
}
impl crate::base::goal::GoalRegion<Point> for PointGoal {
    fn distance_goal(&self, state: &Point) -> f64 {
        (self.target.dist(state) - self.threshold).max(0.0)
    }
}
impl GoalSampleableRegion<Point> for PointGoal {
    fn sample_goal(&self, _rng: &mut impl Rng) -> Result<Point, crate::base::error::StateSamplingError> {
        Ok(self.target)
    }
}

/// A one-shot (non-incremental) RRT* planner, implementing `oxmpl`'s generic `Planner`
/// trait on top of the shared `expand_one_step`/`build_rrt_tree` core. Useful on its
/// own; the partially-observable driver uses the same core functions directly against
/// a persistent `TreeStore` instead of going through this adapter, since it needs to
/// mutate the tree across many non-`solve`-shaped replans.
pub struct RrtStarPlanner {
    pub steer_distance: f64,
    pub eps: f64,
    pub goal_threshold: f64,
    tree: TreeStore,
    problem_def: Option<Arc<ProblemDefinition<Point, WorkspaceSpace, PointGoal>>>,
    validity_checker: Option<Arc<dyn StateValidityChecker<Point>>>,
}

impl RrtStarPlanner {
    pub fn new(steer_distance: f64, eps: f64, goal_threshold: f64) -> Self {
        RrtStarPlanner {
            steer_distance,
            eps,
            goal_threshold,
            tree: TreeStore::new(),
            problem_def: None,
            validity_checker: None,
        }
    }
}

/// Checks every point along the segment `from -> to` at the space's valid-segment
/// resolution, exactly mirroring `oxmpl`'s `RRTStar::check_motion`.
fn check_motion(
    space: &WorkspaceSpace,
    checker: &dyn StateValidityChecker<Point>,
    from: Point,
    to: Point,
) -> bool {
    let dist = space.distance(&from, &to);
    let num_steps = (dist / (space.get_longest_valid_segment_length() * 0.1)).ceil() as usize;
    if num_steps <= 1 {
        return checker.is_valid(&to);
    }
    let mut interpolated = from;
    for i in 1..=num_steps {
        let t = i as f64 / num_steps as f64;
        space.interpolate(&from, &to, t, &mut interpolated);
        if !checker.is_valid(&interpolated) {
            return false;
        }
    }
    true
}

impl Planner<Point, WorkspaceSpace, PointGoal> for RrtStarPlanner {
    fn setup(
        &mut self,
        problem_def: Arc<ProblemDefinition<Point, WorkspaceSpace, PointGoal>>,
        validity_checker: Arc<dyn StateValidityChecker<Point>>,
    ) {
        let root = problem_def.start_states[0];
        self.tree.reset(root);
        self.problem_def = Some(problem_def);
        self.validity_checker = Some(validity_checker);
    }

    /// A self-contained choose-parent/rewire loop backed by `TreeStore`, checking
    /// motions through the generic `StateValidityChecker` rather than `rrtstar`'s
    /// `MultiPolygon`-specific `expand_one_step` — this is the generic-obstacle-model
    /// counterpart of that function, for callers who don't have `geo` geometry at all.
    fn solve(&mut self, timeout: crate::time::Duration) -> Result<Path<Point>, PlanningError> {
        let pd = self
            .problem_def
            .as_ref()
            .ok_or(PlanningError::PlannerUninitialised)?
            .clone();
        let checker = self
            .validity_checker
            .as_ref()
            .ok_or(PlanningError::PlannerUninitialised)?
            .clone();

        let start_time = crate::time::Instant::now();
        let root = pd.start_states[0];
        let mut rng = rand::rng();

        loop {
            if start_time.elapsed() > timeout {
                return Err(PlanningError::Timeout);
            }

            let x_rand = if rng.random_bool(self.eps) {
                pd.goal.sample_goal(&mut rng).map_err(|_| PlanningError::UnsampledStateSpace)?
            } else {
                pd.space.sample_uniform(&mut rng).map_err(|_| PlanningError::UnsampledStateSpace)?
            };

            let x_near = match geometry::nearest(self.tree.vertices(), x_rand) {
                Some(v) => v,
                None => return Err(PlanningError::PlannerUninitialised),
            };
            let x_new = steer(x_near, x_rand, self.steer_distance);
            if !check_motion(&pd.space, checker.as_ref(), x_near, x_new) {
                continue;
            }

            let r_ball =
                near_ball_radius(self.tree.len(), pd.space.width, pd.space.height, self.steer_distance)
                    .unwrap_or(self.steer_distance);
            let neighbours: Vec<Point> = geometry::within_radius(self.tree.vertices(), x_new, r_ball)
                .into_iter()
                .filter(|&v| v != x_new)
                .collect();

            let mut x_min = x_near;
            let mut c_min = self.tree.cost_of(&x_near) + x_near.dist(&x_new);
            for &v in &neighbours {
                let cost_via_v = self.tree.cost_of(&v) + v.dist(&x_new);
                if cost_via_v < c_min && check_motion(&pd.space, checker.as_ref(), v, x_new) {
                    c_min = cost_via_v;
                    x_min = v;
                }
            }
            self.tree
                .insert_vertex(x_min, x_new, c_min)
                .map_err(|_| PlanningError::NoSolutionFound)?;

            for &x in &neighbours {
                if x == x_min {
                    continue;
                }
                let cost_via_new = c_min + x_new.dist(&x);
                if cost_via_new < self.tree.cost_of(&x) && check_motion(&pd.space, checker.as_ref(), x_new, x) {
                    self.tree
                        .reassign_parent(x, x_new, cost_via_new)
                        .map_err(|_| PlanningError::NoSolutionFound)?;
                }
            }

            if pd.goal.is_satisfied(&x_new) {
                log::info!("solution found after {} nodes", self.tree.len());
                let path = extract_path(&self.tree, x_new, root, false)
                    .map_err(|_| PlanningError::NoSolutionFound)?;
                return Ok(Path(path));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_steer_caps_at_steer_distance() {
        let near = Point::new(0.0, 0.0);
        let rand = Point::new(10.0, 0.0);
        let new = steer(near, rand, 3.0);
        assert!((near.dist(&new) - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_steer_returns_rand_if_closer_than_steer_distance() {
        let near = Point::new(0.0, 0.0);
        let rand = Point::new(1.0, 0.0);
        let new = steer(near, rand, 3.0);
        assert_eq!(new, rand);
    }

    #[test]
    fn test_near_ball_radius_undefined_for_n_leq_1() {
        assert!(near_ball_radius(0, 100.0, 100.0, 3.0).is_none());
        assert!(near_ball_radius(1, 100.0, 100.0, 3.0).is_none());
    }

    #[test]
    fn test_near_ball_radius_capped_by_steer_distance() {
        let r = near_ball_radius(1000, 1.0, 1.0, 0.01).unwrap();
        assert!(r <= 0.01);
    }

    #[test]
    fn test_extract_path_reverse_true_is_goal_rooted_and_excludes_endpoint() {
        // tree rooted at the goal, grown toward curr_pos, as FARRT*'s replan does.
        let mut tree = TreeStore::new();
        let goal = Point::new(0.0, 0.0);
        tree.reset(goal);
        let a = Point::new(1.0, 0.0);
        let b = Point::new(2.0, 0.0);
        tree.insert_vertex(goal, a, 1.0).unwrap();
        tree.insert_vertex(a, b, 2.0).unwrap();

        let path = extract_path(&tree, b, goal, true).unwrap();
        assert_eq!(path, vec![a, goal]); // nearest-to-endpoint first, root/goal last, b excluded
    }

    #[test]
    fn test_build_rrt_tree_finds_trivial_straight_line() {
        let mut tree = TreeStore::new();
        let start = Point::new(0.0, 0.0);
        let goal = Point::new(10.0, 0.0);
        tree.reset(start);
        let obstacles = MultiPolygon::new(vec![]);
        let cfg = BuildConfig {
            iters: 200,
            eps: 0.5,
            steer_distance: 3.0,
            width: 20.0,
            height: 20.0,
            goal_threshold: 1.0,
            obstacle_avoidance_radius: 0.0,
            built_tree: false,
        };
        let mut rng = rand::rng();
        let endpoint = build_rrt_tree(&mut tree, goal, &obstacles, &cfg, &mut rng).unwrap();
        let path = extract_path(&tree, endpoint, start, false).unwrap();
        assert_eq!(path.last(), Some(&endpoint));
        assert!(path[0] == start);
    }
}
