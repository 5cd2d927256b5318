//! C7: the potential field engine. Rasterizes newly observed obstacles into a mask,
//! Gaussian-blurs it, and accumulates its gradient into a persistent 2D vector field
//! that nudges sampled points away from obstacle-dense regions.

use geo::{BoundingRect, Contains, MultiPolygon};
use ndarray::Array3;

use crate::base::state::Point;
use crate::geometry;

const OBSTACLE_VALUE: f64 = 5.0;
const BLUR_SIGMA: f32 = 3.0;

/// A `height x width x 2` accumulated force field, where `field[y][x] = (fx, fy)`.
pub struct PotentialField {
    width: usize,
    height: usize,
    data: Array3<f64>,
}

impl PotentialField {
    pub fn new(width: f64, height: f64) -> Self {
        let width = width.round().max(1.0) as usize;
        let height = height.round().max(1.0) as usize;
        PotentialField {
            width,
            height,
            data: Array3::zeros((height, width, 2)),
        }
    }

    /// Rasterizes `new_obstacles` into a mask, Gaussian-blurs it, and accumulates its
    /// gradient into the persistent field.
    pub fn update(&mut self, new_obstacles: &MultiPolygon<f64>) {
        let mut mask = ndarray::Array2::<f64>::ones((self.height, self.width));

        for polygon in &new_obstacles.0 {
            let Some(rect) = polygon.bounding_rect() else {
                continue;
            };
            let x0 = rect.min().x.floor().max(0.0) as usize;
            let x1 = (rect.max().x.ceil() as usize).min(self.width.saturating_sub(1));
            let y0 = rect.min().y.floor().max(0.0) as usize;
            let y1 = (rect.max().y.ceil() as usize).min(self.height.saturating_sub(1));
            for y in y0..=y1 {
                for x in x0..=x1 {
                    let coord = geo::Coord {
                        x: x as f64,
                        y: y as f64,
                    };
                    if polygon.contains(&coord) {
                        mask[[y, x]] = 0.0;
                    }
                }
            }
        }

        let m = mask.mapv(|v| (1.0 - v) * OBSTACLE_VALUE);
        let blurred = gaussian_blur_f64(&m, BLUR_SIGMA);
        let (dy, dx) = gradient(&blurred);

        for y in 0..self.height {
            for x in 0..self.width {
                self.data[[y, x, 0]] += dx[[y, x]];
                self.data[[y, x, 1]] += dy[[y, x]];
            }
        }
        log::debug!("potential field updated from {} obstacle polygon(s)", new_obstacles.0.len());
    }

    fn force_at(&self, p: Point) -> (f64, f64) {
        let x = (p.x.floor() as isize).clamp(0, self.width as isize - 1) as usize;
        let y = (p.y.floor() as isize).clamp(0, self.height as isize - 1) as usize;
        (self.data[[y, x, 0]], self.data[[y, x, 1]])
    }

    /// Pushes `p` by the field, tree-attraction and goal-attraction forces, clipped to
    /// `[0, width] x [0, height]`.
    #[allow(clippy::too_many_arguments)]
    pub fn apply_field_to_point(
        &self,
        p: Point,
        tree_points: &[Point],
        goal: Point,
        steer_distance: f64,
        explored_area: f64,
        detected_obstacle_area: f64,
        base_field: f64,
        tree_force: f64,
        goal_force: f64,
    ) -> Point {
        let field_force = if detected_obstacle_area > 0.0 {
            base_field * explored_area / detected_obstacle_area
        } else {
            0.0
        };
        let (fx, fy) = self.force_at(p);
        let mut dx = fx * field_force;
        let mut dy = fy * field_force;

        let nearby = geometry::within_radius(tree_points, p, 1.5 * steer_distance);
        if let Some(centroid) = geometry::centroid_of(&nearby) {
            let d = centroid.dist(&p);
            if d > 1e-12 {
                dx += tree_force * (centroid.x - p.x) / d;
                dy += tree_force * (centroid.y - p.y) / d;
            }
        }

        let d_goal = goal.dist(&p);
        if d_goal > 1e-12 {
            dx += goal_force * (goal.x - p.x) / d_goal;
            dy += goal_force * (goal.y - p.y) / d_goal;
        }

        Point::new(
            (p.x + dx).clamp(0.0, self.width as f64),
            (p.y + dy).clamp(0.0, self.height as f64),
        )
    }
}

/// A separable Gaussian kernel truncated at `+-3*sigma`, normalized to sum to 1.
fn gaussian_kernel(sigma: f32) -> Vec<f64> {
    let sigma = sigma as f64;
    let radius = (3.0 * sigma).ceil().max(1.0) as isize;
    let mut kernel: Vec<f64> = (-radius..=radius)
        .map(|i| (-((i * i) as f64) / (2.0 * sigma * sigma)).exp())
        .collect();
    let sum: f64 = kernel.iter().sum();
    for v in &mut kernel {
        *v /= sum;
    }
    kernel
}

/// Gaussian-blurs a `height x width` grid of `f64`s with standard deviation `sigma`, via
/// a hand-written separable convolution (row pass then column pass) with edge-clamped
/// borders. The field is a plain numeric grid rather than pixel data, so this stays on
/// `ndarray` instead of reaching for an image-processing crate for a five-line blur.
fn gaussian_blur_f64(grid: &ndarray::Array2<f64>, sigma: f32) -> ndarray::Array2<f64> {
    let (height, width) = grid.dim();
    let kernel = gaussian_kernel(sigma);
    let radius = (kernel.len() / 2) as isize;

    let mut horizontal = ndarray::Array2::<f64>::zeros((height, width));
    for y in 0..height {
        for x in 0..width {
            let mut acc = 0.0;
            for (i, &w) in kernel.iter().enumerate() {
                let dx = i as isize - radius;
                let sx = (x as isize + dx).clamp(0, width as isize - 1) as usize;
                acc += w * grid[[y, sx]];
            }
            horizontal[[y, x]] = acc;
        }
    }

    let mut blurred = ndarray::Array2::<f64>::zeros((height, width));
    for y in 0..height {
        for x in 0..width {
            let mut acc = 0.0;
            for (i, &w) in kernel.iter().enumerate() {
                let dy = i as isize - radius;
                let sy = (y as isize + dy).clamp(0, height as isize - 1) as usize;
                acc += w * horizontal[[sy, x]];
            }
            blurred[[y, x]] = acc;
        }
    }
    blurred
}

/// Central-difference gradient of a `height x width` grid, returning `(d/dy, d/dx)`.
/// One-sided differences are used at the boundary rows/columns.
fn gradient(grid: &ndarray::Array2<f64>) -> (ndarray::Array2<f64>, ndarray::Array2<f64>) {
    let (height, width) = grid.dim();
    let mut dy = ndarray::Array2::<f64>::zeros((height, width));
    let mut dx = ndarray::Array2::<f64>::zeros((height, width));

    for y in 0..height {
        for x in 0..width {
            let gx = if width == 1 {
                0.0
            } else if x == 0 {
                grid[[y, 1]] - grid[[y, 0]]
            } else if x == width - 1 {
                grid[[y, x]] - grid[[y, x - 1]]
            } else {
                (grid[[y, x + 1]] - grid[[y, x - 1]]) / 2.0
            };
            let gy = if height == 1 {
                0.0
            } else if y == 0 {
                grid[[1, x]] - grid[[0, x]]
            } else if y == height - 1 {
                grid[[y, x]] - grid[[y - 1, x]]
            } else {
                (grid[[y + 1, x]] - grid[[y - 1, x]]) / 2.0
            };
            dx[[y, x]] = gx;
            dy[[y, x]] = gy;
        }
    }
    (dy, dx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::parse_multipolygon_wkt;

    #[test]
    fn test_update_pushes_field_away_from_obstacle() {
        let mut field = PotentialField::new(20.0, 20.0);
        let obstacle = parse_multipolygon_wkt("MULTIPOLYGON (((8 8, 12 8, 12 12, 8 12, 8 8)))").unwrap();
        field.update(&obstacle);
        // some force should have been accumulated near the obstacle
        let (fx, fy) = field.force_at(Point::new(10.0, 10.0));
        assert!(fx != 0.0 || fy != 0.0);
    }

    #[test]
    fn test_apply_field_to_point_stays_in_bounds() {
        let field = PotentialField::new(20.0, 20.0);
        let pushed = field.apply_field_to_point(
            Point::new(0.5, 0.5),
            &[],
            Point::new(19.0, 19.0),
            3.0,
            1.0,
            1.0,
            3.0,
            0.5,
            0.2,
        );
        assert!(pushed.x >= 0.0 && pushed.x <= 20.0);
        assert!(pushed.y >= 0.0 && pushed.y <= 20.0);
    }

    #[test]
    fn test_gradient_flat_field_is_zero() {
        let grid = ndarray::Array2::<f64>::zeros((5, 5));
        let (dy, dx) = gradient(&grid);
        assert!(dy.iter().all(|&v| v == 0.0));
        assert!(dx.iter().all(|&v| v == 0.0));
    }
}
