use rand::Rng;

use crate::base::{
    error::{StateSamplingError, StateSpaceError},
    space::StateSpace,
    state::Point,
};

/// The 2D bounded workspace `[0, width] x [0, height]` that the planner samples and
/// steers within.
///
/// This is the `Point`-specialized counterpart of `RealVectorStateSpace`: same distance,
/// interpolation and bounds-clamping semantics, but fixed to two dimensions so that
/// `Point` (with its bitwise `Eq`/`Hash`) can be the state type instead of a generic
/// `Vec<f64>`.
#[derive(Clone, Copy)]
pub struct WorkspaceSpace {
    pub width: f64,
    pub height: f64,
    longest_valid_segment_fraction: f64,
}

impl WorkspaceSpace {
    /// Creates a new workspace of the given `width` x `height`.
    pub fn new(width: f64, height: f64) -> Result<Self, StateSpaceError> {
        if width <= 0.0 || height <= 0.0 {
            return Err(StateSpaceError::InvalidBound {
                lower: 0.0,
                upper: width.min(height),
            });
        }
        Ok(WorkspaceSpace {
            width,
            height,
            longest_valid_segment_fraction: 0.05,
        })
    }

    /// The diagonal of the workspace's bounding box.
    pub fn get_maximum_extent(&self) -> f64 {
        (self.width.powi(2) + self.height.powi(2)).sqrt()
    }

    /// Allows a user to configure the motion checking resolution.
    pub fn set_longest_valid_segment_fraction(&mut self, fraction: f64) {
        self.longest_valid_segment_fraction = fraction.clamp(0.0, 1.0);
    }
}

impl StateSpace for WorkspaceSpace {
    type StateType = Point;

    fn distance(&self, state1: &Point, state2: &Point) -> f64 {
        state1.dist(state2)
    }

    fn interpolate(&self, from: &Point, to: &Point, t: f64, out_state: &mut Point) {
        out_state.x = from.x + (to.x - from.x) * t;
        out_state.y = from.y + (to.y - from.y) * t;
    }

    fn enforce_bounds(&self, state: &mut Point) {
        state.x = state.x.clamp(0.0, self.width);
        state.y = state.y.clamp(0.0, self.height);
    }

    fn satisfies_bounds(&self, state: &Point) -> bool {
        state.x + f64::EPSILON >= 0.0
            && state.x - f64::EPSILON <= self.width
            && state.y + f64::EPSILON >= 0.0
            && state.y - f64::EPSILON <= self.height
    }

    fn sample_uniform(&self, rng: &mut impl Rng) -> Result<Point, StateSamplingError> {
        Ok(Point::new(
            rng.random_range(0.0..self.width),
            rng.random_range(0.0..self.height),
        ))
    }

    fn get_longest_valid_segment_length(&self) -> f64 {
        self.get_maximum_extent() * self.longest_valid_segment_fraction
    }
}
