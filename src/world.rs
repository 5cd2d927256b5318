//! C1: the true obstacle model. Holds the full obstacle geometry (never seen by the
//! planner all at once) and answers vision-disc observation queries.
//!
//! World generation and random obstacle seeding are an external collaborator's
//! responsibility; this module only ever holds obstacle geometry handed to it by a
//! caller (e.g. parsed from a WKT fixture).

use geo::MultiPolygon;

use crate::base::state::Point;
use crate::geometry;

/// The ground-truth obstacle layout of the workspace.
pub struct World {
    pub width: f64,
    pub height: f64,
    obstacles: MultiPolygon<f64>,
}

impl World {
    pub fn new(width: f64, height: f64, obstacles: MultiPolygon<f64>) -> Self {
        World {
            width,
            height,
            obstacles,
        }
    }

    /// The full, true obstacle geometry. Only the planner's `observe` calls are meant
    /// to see slices of this; a caller implementing visualization or scoring may read
    /// the whole thing.
    pub fn all_obstacles(&self) -> &MultiPolygon<f64> {
        &self.obstacles
    }

    /// Returns `obstacles ∩ disc(pos, radius)`, a possibly-empty polygon collection.
    pub fn observe(&self, pos: Point, radius: f64) -> MultiPolygon<f64> {
        let disc = geometry::disc_polygon(pos, radius);
        geometry::intersection(&self.obstacles, &disc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::parse_multipolygon_wkt;

    #[test]
    fn test_observe_empty_world_returns_empty() {
        let world = World::new(100.0, 100.0, MultiPolygon::new(vec![]));
        let obs = world.observe(Point::new(50.0, 50.0), 10.0);
        assert_eq!(obs.0.len(), 0);
    }

    #[test]
    fn test_observe_sees_only_nearby_obstacle() {
        let near = "MULTIPOLYGON (((48 48, 52 48, 52 52, 48 52, 48 48)))";
        let obstacles = parse_multipolygon_wkt(near).unwrap();
        let world = World::new(100.0, 100.0, obstacles);

        let near_obs = world.observe(Point::new(50.0, 50.0), 10.0);
        assert!(near_obs.0.len() > 0);

        let far_obs = world.observe(Point::new(0.0, 0.0), 5.0);
        assert_eq!(far_obs.0.len(), 0);
    }
}
