//! Thin facade over the `geo` crate: the handful of vector-geometry primitives the
//! planner needs, expressed in terms of this crate's `Point` rather than `geo`'s own
//! point/coordinate types.

use geo::{BooleanOps, Centroid, Contains, Intersects, Line, MultiPoint, MultiPolygon};
use rand::Rng;
use wkt::TryFromWkt;

use crate::base::{state::Point, validity::StateValidityChecker};

/// Parses a `MULTIPOLYGON (...)` WKT string into obstacle geometry.
///
/// Used to load the fixed map fixtures (`MAP_WITH_PASSAGE`, `MAP_CLUTTER`,
/// `MAP_WITH_TINY_BOTTOM_GAP`) rather than any random obstacle generator, which this
/// crate leaves to its caller.
pub fn parse_multipolygon_wkt(wkt_str: &str) -> Result<MultiPolygon<f64>, String> {
    MultiPolygon::<f64>::try_from_wkt_str(wkt_str).map_err(|e| e.to_string())
}

/// Returns `true` if `p` does not lie inside any obstacle.
pub fn point_clear(p: Point, obstacles: &MultiPolygon<f64>) -> bool {
    !obstacles.contains(&geo::Point::<f64>::from(p))
}

/// Returns `true` if the straight segment `a -> b` does not cross any obstacle.
///
/// Endpoints are checked explicitly in addition to the segment itself so that a
/// segment lying entirely inside a single obstacle (and therefore not "intersecting"
/// any obstacle boundary) is still correctly rejected.
pub fn edge_clear(a: Point, b: Point, obstacles: &MultiPolygon<f64>) -> bool {
    if !point_clear(a, obstacles) || !point_clear(b, obstacles) {
        return false;
    }
    let line = Line::new(geo::Coord::from(a), geo::Coord::from(b));
    !line.intersects(obstacles)
}

/// `true` if `p` lies within Euclidean distance `r` of `obstacles` (including being
/// inside one). This realizes the spec's `buffer(obstacles, r)` membership test
/// without materializing a buffered polygon: for a single distance threshold, "is `p`
/// in the r-buffer of `obstacles`" and "is `p` within distance `r` of `obstacles`" are
/// the same predicate.
pub fn within_distance_of(p: Point, obstacles: &MultiPolygon<f64>, r: f64) -> bool {
    use geo::EuclideanDistance;
    let gp = geo::Point::<f64>::from(p);
    gp.euclidean_distance(obstacles) <= r
}

/// Finds the closest point to `q` among `candidates` by linear scan.
///
/// This is a simple linear scan; TODO: Consider using kd-trees (same limitation as
/// `RRTStar::find_neighbours`, whose candidate sets are the same shape).
pub fn nearest<'a, I: IntoIterator<Item = &'a Point>>(candidates: I, q: Point) -> Option<Point> {
    candidates
        .into_iter()
        .copied()
        .min_by(|a, b| a.dist(&q).partial_cmp(&b.dist(&q)).unwrap())
}

/// Finds every candidate within `radius` of `q`.
pub fn within_radius<'a, I: IntoIterator<Item = &'a Point>>(
    candidates: I,
    q: Point,
    radius: f64,
) -> Vec<Point> {
    candidates
        .into_iter()
        .copied()
        .filter(|p| p.dist(&q) < radius)
        .collect()
}

/// Approximates a disc of the given `radius` centered on `center` as a 48-gon, for use
/// with `geo`'s polygon intersection when computing a vision disc's overlap with
/// obstacle geometry.
pub fn disc_polygon(center: Point, radius: f64) -> MultiPolygon<f64> {
    const SEGMENTS: usize = 48;
    let mut coords: Vec<geo::Coord<f64>> = (0..SEGMENTS)
        .map(|i| {
            let theta = 2.0 * std::f64::consts::PI * (i as f64) / (SEGMENTS as f64);
            geo::Coord {
                x: center.x + radius * theta.cos(),
                y: center.y + radius * theta.sin(),
            }
        })
        .collect();
    coords.push(coords[0]);
    let polygon = geo::Polygon::new(geo::LineString::new(coords), vec![]);
    MultiPolygon::new(vec![polygon])
}

/// Spatial intersection of two polygon collections.
pub fn intersection(a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> MultiPolygon<f64> {
    a.intersection(b)
}

/// Spatial union of two polygon collections.
pub fn union(a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> MultiPolygon<f64> {
    a.union(b)
}

/// Samples a point uniformly at random from `[0, width] x [0, height]`.
pub fn random_point_in_box(width: f64, height: f64, rng: &mut impl Rng) -> Point {
    Point::new(rng.random_range(0.0..width), rng.random_range(0.0..height))
}

/// Centroid of a point set, or `None` if the set is empty.
pub fn centroid_of(points: &[Point]) -> Option<Point> {
    if points.is_empty() {
        return None;
    }
    let mp: MultiPoint<f64> = points.iter().map(|p| geo::Point::<f64>::from(*p)).collect();
    mp.centroid().map(Point::from)
}

/// Merges points that are within `merge_threshold` of one another, replacing each
/// resulting cluster with its centroid.
///
/// The reference implementation buffers every point by `merge_threshold / 2` and takes
/// the centroid of each connected component of the resulting union of circles. Two
/// circles of radius `merge_threshold / 2` overlap exactly when their centers are
/// within `merge_threshold` of each other, so clustering directly on pairwise distance
/// is equivalent and avoids needing a polygon-buffer/union implementation for a single
/// call site.
pub fn merge_points(points: &[Point], merge_threshold: f64) -> Vec<Point> {
    let n = points.len();
    if n == 0 {
        return Vec::new();
    }
    let mut parent: Vec<usize> = (0..n).collect();
    fn find(parent: &mut [usize], x: usize) -> usize {
        if parent[x] != x {
            parent[x] = find(parent, parent[x]);
        }
        parent[x]
    }
    for i in 0..n {
        for j in (i + 1)..n {
            if points[i].dist(&points[j]) <= merge_threshold {
                let (ri, rj) = (find(&mut parent, i), find(&mut parent, j));
                if ri != rj {
                    parent[ri] = rj;
                }
            }
        }
    }
    let mut clusters: std::collections::HashMap<usize, Vec<Point>> = std::collections::HashMap::new();
    for i in 0..n {
        let root = find(&mut parent, i);
        clusters.entry(root).or_default().push(points[i]);
    }
    clusters
        .into_values()
        .filter_map(|cluster| centroid_of(&cluster))
        .collect()
}

/// A `StateValidityChecker` backed by a snapshot of detected obstacle geometry.
///
/// Mirrors `oxmpl`'s `validity.rs` doc example (a checker closing over the
/// problem-specific invalidity condition) but closes over obstacle polygons instead of
/// a hardcoded half-plane.
pub struct ObstacleValidityChecker {
    pub obstacles: MultiPolygon<f64>,
}

impl StateValidityChecker<Point> for ObstacleValidityChecker {
    fn is_valid(&self, state: &Point) -> bool {
        point_clear(*state, &self.obstacles)
    }
}
