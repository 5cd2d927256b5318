//! C4 + C9: the partially-observable planner driver and the FARRT* replan orchestrator.
//!
//! The tree built here is rooted at the goal and grown toward `curr_pos`, mirroring the
//! reference's `build_rrt_tree(root=x_goal, goal_pt=curr_pos)`: as the robot advances,
//! the goal-anchored root never moves, so a replan only has to rewire the frontier
//! around newly detected obstacles rather than rebuild the whole tree from a moving
//! start.

use geo::{Area, BooleanOps, MultiPolygon};
use rand::Rng;

use crate::base::{error::TreeError, state::Point};
use crate::field::PotentialField;
use crate::geometry;
use crate::queue::{self, InconsistencyQueue};
use crate::rrtstar::{self, BuildConfig};
use crate::severance;
use crate::tree::TreeStore;
use crate::world::World;

/// Every tunable knob spec.md §6 names, with `Default` resolving to the spec's stated
/// defaults. `max_step_length`/`obstacle_avoidance_radius`/`merge_threshold` stay
/// `Option` so their documented derivations (off `vision_radius`/`steer_distance`) only
/// kick in when the caller hasn't overridden them.
pub struct PlannerConfig {
    pub start: Point,
    pub goal: Point,
    pub world_dims: (f64, f64),
    pub vision_radius: f64,
    pub iters: usize,
    pub eps: f64,
    pub max_step_length: Option<f64>,
    pub obstacle_avoidance_radius: Option<f64>,
    pub goal_reached_thresh: f64,
    pub merge_threshold: Option<f64>,
    pub potential_field_force: f64,
    pub tree_attr_force: f64,
    pub goal_attr_force: f64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        PlannerConfig {
            start: Point::new(0.0, 0.0),
            goal: Point::new(0.0, 0.0),
            world_dims: (90.0, 90.0),
            vision_radius: 10.0,
            iters: 2000,
            eps: 0.01,
            max_step_length: None,
            obstacle_avoidance_radius: None,
            goal_reached_thresh: 1.0,
            merge_threshold: None,
            potential_field_force: 3.0,
            tree_attr_force: 0.5,
            goal_attr_force: 0.2,
        }
    }
}

impl PlannerConfig {
    pub fn effective_steer_distance(&self) -> f64 {
        self.max_step_length.unwrap_or(self.vision_radius / 3.0)
    }
    pub fn effective_obstacle_avoidance_radius(&self) -> f64 {
        self.obstacle_avoidance_radius
            .unwrap_or(self.effective_steer_distance() * 2.0 / 3.0)
    }
    pub fn effective_merge_threshold(&self) -> f64 {
        self.merge_threshold.unwrap_or(self.effective_steer_distance() / 8.0)
    }
    /// FARRT*'s rewiring loop always runs at least `max(iters, 5000)` iterations
    /// (spec.md §6), regardless of the configured `iters`.
    pub fn farrt_iters(&self) -> usize {
        self.iters.max(5000)
    }
}

/// Drives one `start -> goal` run: observe, build/replan, step, repeat until `curr_pos`
/// is within `goal_reached_thresh` of `goal`.
pub struct PartiallyObservablePlanner {
    cfg: PlannerConfig,
    steer_distance: f64,
    obstacle_avoidance_radius: f64,
    world: World,
    tree: TreeStore,
    queue: InconsistencyQueue,
    field: PotentialField,
    detected_obstacles: MultiPolygon<f64>,
    planned_path: Vec<Point>,
    curr_pos: Point,
    built_tree: bool,
}

impl PartiallyObservablePlanner {
    pub fn new(cfg: PlannerConfig, world: World) -> Self {
        let steer_distance = cfg.effective_steer_distance();
        let obstacle_avoidance_radius = cfg.effective_obstacle_avoidance_radius();
        let (width, height) = cfg.world_dims;
        let mut tree = TreeStore::new();
        tree.reset(cfg.goal);
        let curr_pos = cfg.start;
        PartiallyObservablePlanner {
            cfg,
            steer_distance,
            obstacle_avoidance_radius,
            world,
            tree,
            queue: InconsistencyQueue::new(),
            field: PotentialField::new(width, height),
            detected_obstacles: MultiPolygon::new(vec![]),
            planned_path: Vec::new(),
            curr_pos,
            built_tree: false,
        }
    }

    pub fn curr_pos(&self) -> Point {
        self.curr_pos
    }

    pub fn planned_path(&self) -> &[Point] {
        &self.planned_path
    }

    pub fn detected_obstacles(&self) -> &MultiPolygon<f64> {
        &self.detected_obstacles
    }

    /// Runs the full observe -> step -> observe -> replan loop until `curr_pos` reaches
    /// `goal` within `goal_reached_thresh`, returning the sequence of positions visited
    /// (including the start).
    pub fn run(&mut self, rng: &mut impl Rng) -> Result<Vec<Point>, TreeError> {
        let mut visited = vec![self.curr_pos];
        self.observe_world(rng)?;
        while self.curr_pos.dist(&self.cfg.goal) >= self.cfg.goal_reached_thresh {
            self.curr_pos = self.step_through_plan();
            visited.push(self.curr_pos);
            self.observe_world(rng)?;
        }
        Ok(visited)
    }

    /// Pops the next waypoint off the front of `planned_path`, or stays put if the plan
    /// is empty (matches the reference's `step_through_plan`, which returns `curr_pos`
    /// unchanged rather than panicking on an empty plan).
    fn step_through_plan(&mut self) -> Point {
        if self.planned_path.is_empty() {
            self.curr_pos
        } else {
            self.planned_path.remove(0)
        }
    }

    /// Observes the world from `curr_pos`, folds the observation into
    /// `detected_obstacles`, and reacts to anything newly seen or no longer seen.
    fn observe_world(&mut self, rng: &mut impl Rng) -> Result<(), TreeError> {
        let observation = self.world.observe(self.curr_pos, self.cfg.vision_radius);
        let new_obstacles = observation.difference(&self.detected_obstacles);
        let deleted_obstacles = self.detected_obstacles.difference(&observation);
        self.detected_obstacles = geometry::union(&self.detected_obstacles, &observation);

        if !new_obstacles.0.is_empty() {
            self.handle_new_obstacles(&new_obstacles, rng)?;
        }
        if !deleted_obstacles.0.is_empty() {
            self.handle_deleted_obstacles(&deleted_obstacles);
        }
        Ok(())
    }

    fn handle_new_obstacles(
        &mut self,
        new_obstacles: &MultiPolygon<f64>,
        rng: &mut impl Rng,
    ) -> Result<(), TreeError> {
        if !self.built_tree {
            self.do_first_plan(rng)?;
            return Ok(());
        }
        if self.plan_intersects(new_obstacles) {
            log::info!("path is inconsistent with new obstacles, replanning");
            self.replan(new_obstacles, rng)?;
        }
        Ok(())
    }

    /// spec.md §4.1: deletions are observed but the default policy does not react to
    /// them — logged so the decision is visible, not silently dropped.
    fn handle_deleted_obstacles(&self, deleted_obstacles: &MultiPolygon<f64>) {
        log::info!(
            "{} previously detected obstacle region(s) no longer observed; default policy does not replan for deletions",
            deleted_obstacles.0.len()
        );
    }

    fn plan_intersects(&self, obstacles: &MultiPolygon<f64>) -> bool {
        let mut prev = self.curr_pos;
        for &p in &self.planned_path {
            if !geometry::edge_clear(prev, p, obstacles) {
                return true;
            }
            prev = p;
        }
        false
    }

    fn build_config(&self, built_tree: bool) -> BuildConfig {
        BuildConfig {
            iters: self.cfg.iters,
            eps: self.cfg.eps,
            steer_distance: self.steer_distance,
            width: self.cfg.world_dims.0,
            height: self.cfg.world_dims.1,
            goal_threshold: self.cfg.goal_reached_thresh,
            obstacle_avoidance_radius: self.obstacle_avoidance_radius,
            built_tree,
        }
    }

    fn do_first_plan(&mut self, rng: &mut impl Rng) -> Result<(), TreeError> {
        self.planned_path.clear();
        if !self.detected_obstacles.0.is_empty() {
            self.field.update(&self.detected_obstacles);
        }
        let cfg = self.build_config(false);
        let final_pt = rrtstar::build_rrt_tree(
            &mut self.tree,
            self.curr_pos,
            &self.detected_obstacles,
            &cfg,
            rng,
        )?;
        self.built_tree = true;
        self.planned_path = rrtstar::extract_path(&self.tree, final_pt, self.cfg.goal, true)?;
        Ok(())
    }

    /// C9: the FARRT* replan orchestrator (spec.md §4.10).
    ///
    /// spec.md §7: if the rewiring pass cannot reach `curr_pos` before its safety cap,
    /// that's a recoverable `ReplanStale`, not a fatal error — the previous plan is kept
    /// and replanning is deferred to the next observation step, rather than aborting the
    /// whole `run`.
    fn replan(&mut self, new_obstacles: &MultiPolygon<f64>, rng: &mut impl Rng) -> Result<(), TreeError> {
        let previous_plan = std::mem::take(&mut self.planned_path);

        let severed = severance::sever(
            &mut self.tree,
            &previous_plan,
            &self.detected_obstacles,
            self.obstacle_avoidance_radius,
            &mut self.queue,
        )?;
        log::info!(
            "severance: conflict={} frontier={} freed={}",
            severed.conflict.len(),
            severed.frontier.len(),
            severed.freed.len()
        );

        self.field.update(new_obstacles);

        match self.do_farrt_rewiring(&severed.frontier, rng) {
            Ok(final_pt) => {
                self.planned_path = rrtstar::extract_path(&self.tree, final_pt, self.cfg.goal, true)?;
                Ok(())
            }
            Err(TreeError::ReplanStale) => {
                log::warn!("replan: rewiring could not reach curr_pos within its safety cap; keeping previous plan and deferring to next observation");
                self.planned_path = previous_plan;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// spec.md §4.10's rewiring loop. Drains the inconsistency queue (falling back to
    /// `sample_free` when it runs dry) against `curr_pos` as the search target, using
    /// the same choose-parent/rewire machinery as the initial build, until a `final_pt`
    /// has been recorded and the loop's termination condition holds.
    ///
    /// The reach-goal threshold used against `curr_pos` here is `goal_reached_thresh`,
    /// not the literal `0` spec.md §4.10 step 4 names: the reference's `reached_goal`
    /// check always compares against `goal_reached_thresh` regardless of which goal it's
    /// being tested against, and a literal `0` threshold makes `x_new.dist(&curr_pos) <
    /// 0.0` uninhabitable, so `final_pt` could never be recorded and every replan would
    /// run to the safety cap.
    fn do_farrt_rewiring(
        &mut self,
        initial_frontier: &std::collections::HashSet<Point>,
        rng: &mut impl Rng,
    ) -> Result<Point, TreeError> {
        for &v in initial_frontier {
            if let Some(key) = queue::compute_key(&self.tree, v) {
                self.queue.verify(v, key);
            }
        }

        let safety_cap = self.cfg.farrt_iters();
        let mut final_pt: Option<Point> = None;
        let mut final_cost = f64::INFINITY;
        let mut iterations = 0usize;

        loop {
            let terminate = self.queue.not_empty()
                && (self.tree.cost_of(&self.curr_pos).is_infinite()
                    || self.queue.contains(&self.curr_pos)
                    || self.key_less_than_curr_pos())
                && final_pt.is_some();
            if terminate {
                break;
            }
            if iterations >= safety_cap {
                return final_pt.ok_or(TreeError::ReplanStale);
            }
            iterations += 1;

            let x_free = match self.queue.pop() {
                Some((v, _)) => v,
                None => rrtstar::sample_free(
                    self.cfg.world_dims.0,
                    self.cfg.world_dims.1,
                    self.curr_pos,
                    0.0,
                    &self.detected_obstacles,
                    0.0,
                    rng,
                ),
            };

            let x_field = if x_free != self.curr_pos {
                let tree_points: Vec<Point> = self.tree.vertices().copied().collect();
                let detected_obstacle_area = self.detected_obstacles.unsigned_area().max(1e-9);
                self.field.apply_field_to_point(
                    x_free,
                    &tree_points,
                    self.cfg.goal,
                    self.steer_distance,
                    self.world.width * self.world.height,
                    detected_obstacle_area,
                    self.cfg.potential_field_force,
                    self.cfg.tree_attr_force,
                    self.cfg.goal_attr_force,
                )
            } else {
                x_free
            };

            let x_near = match geometry::nearest(self.tree.vertices(), x_field) {
                Some(v) => v,
                None => continue,
            };
            let x_new = rrtstar::steer(x_near, x_field, self.steer_distance);

            if geometry::edge_clear(x_near, x_new, &self.detected_obstacles) {
                if let Some(result) = rrtstar::expand_one_step(
                    &mut self.tree,
                    x_new,
                    &self.detected_obstacles,
                    self.steer_distance,
                    self.cfg.world_dims.0,
                    self.cfg.world_dims.1,
                    self.curr_pos,
                    self.cfg.goal_reached_thresh,
                )? {
                    if result.reached_goal {
                        let cost = self.tree.cost_of(&result.x_new);
                        if cost < final_cost {
                            final_cost = cost;
                            final_pt = Some(result.x_new);
                        }
                    }
                }
            }

            // "For every point in N \ V, call queue.verify" (spec.md §4.10 step 5): N
            // itself is internal to `expand_one_step`, so the equivalent refresh here is
            // to re-key every point still sitting in the queue (necessarily outside V,
            // since insertion into V never leaves a point queued) against the tree's
            // latest costs.
            for v in self.queue.queued_points() {
                if let Some(key) = queue::compute_key(&self.tree, v) {
                    self.queue.verify(v, key);
                }
            }
        }

        final_pt.ok_or(TreeError::PlanInfeasible)
    }

    /// spec.md §4.10's `keyLess` test: pop the queue's top, compare its key against
    /// `curr_pos`'s key, then reinsert the top so the queue is left unchanged.
    fn key_less_than_curr_pos(&mut self) -> bool {
        let Some((top, top_key)) = self.queue.pop() else {
            return false;
        };
        self.queue.insert_or_update(top, top_key);
        let curr_key = queue::compute_key(&self.tree, self.curr_pos).unwrap_or(f64::INFINITY);
        top_key < curr_key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_reaches_goal_on_empty_world() {
        let cfg = PlannerConfig {
            start: Point::new(5.0, 5.0),
            goal: Point::new(40.0, 5.0),
            world_dims: (50.0, 50.0),
            iters: 300,
            eps: 0.3,
            ..PlannerConfig::default()
        };
        let world = World::new(50.0, 50.0, MultiPolygon::new(vec![]));
        let mut planner = PartiallyObservablePlanner::new(cfg, world);
        let mut rng = rand::rng();
        let visited = planner.run(&mut rng).unwrap();
        assert!(visited.last().unwrap().dist(&Point::new(40.0, 5.0)) < 1.0);
    }

    #[test]
    fn test_step_through_plan_holds_position_when_plan_empty() {
        let cfg = PlannerConfig {
            start: Point::new(1.0, 1.0),
            goal: Point::new(2.0, 2.0),
            ..PlannerConfig::default()
        };
        let world = World::new(90.0, 90.0, MultiPolygon::new(vec![]));
        let mut planner = PartiallyObservablePlanner::new(cfg, world);
        let next = planner.step_through_plan();
        assert_eq!(next, Point::new(1.0, 1.0));
    }
}
