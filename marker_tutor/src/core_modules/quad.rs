// THEORY:
// `quad` holds the plane geometry behind marker candidates: fitting four corners to
// the outline of a dark region, checking that the result is a usable quadrilateral,
// and mapping the marker's cell grid into the image.
//
// Key architectural principles:
// 1.  **Outline in, corners out**: `fit_quad` receives only the outer extreme points
//     of a region (left/right ends of every row, top/bottom ends of every column).
//     Holes inside the region never influence the fit.
// 2.  **Two-stage corners**: coarse corners come from farthest-point search, then
//     each edge is refined with a total-least-squares line through the outline
//     points that belong to it, and neighbouring lines are intersected.
// 3.  **Explicit validity**: convexity, simplicity, side lengths and fit error are
//     computed here and judged by the detector against its `QualityProfile`.

use nalgebra::{Matrix3, Point2, SMatrix, SVector, Vector3};

pub type Point = Point2<f64>;

/// Four corners in clockwise image order (y grows downward).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quad {
    pub corners: [Point; 4],
}

/// Signed z component of `(b - a) x (c - a)`.
fn cross(a: &Point, b: &Point, c: &Point) -> f64 {
    (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)
}

fn segments_intersect(p1: &Point, p2: &Point, q1: &Point, q2: &Point) -> bool {
    let d1 = cross(q1, q2, p1);
    let d2 = cross(q1, q2, p2);
    let d3 = cross(p1, p2, q1);
    let d4 = cross(p1, p2, q2);
    ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
}

/// Distance from `p` to the segment `a`-`b`.
pub fn distance_to_segment(p: &Point, a: &Point, b: &Point) -> f64 {
    let ab = b - a;
    let length_sq = ab.norm_squared();
    if length_sq < 1e-12 {
        return nalgebra::distance(p, a);
    }
    let t = ((p - a).dot(&ab) / length_sq).clamp(0.0, 1.0);
    nalgebra::distance(p, &(a + ab * t))
}

impl Quad {
    /// Orders four points clockwise around their centroid, starting with the point
    /// closest to the image's top-left direction.
    pub fn from_unordered(points: [Point; 4]) -> Self {
        let cx = points.iter().map(|p| p.x).sum::<f64>() / 4.0;
        let cy = points.iter().map(|p| p.y).sum::<f64>() / 4.0;
        let mut ordered = points;
        // atan2 grows clockwise on screen because y points down.
        ordered.sort_by(|a, b| {
            (a.y - cy)
                .atan2(a.x - cx)
                .total_cmp(&(b.y - cy).atan2(b.x - cx))
        });
        let start = ordered
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| (a.x + a.y).total_cmp(&(b.x + b.y)))
            .map(|(index, _)| index)
            .unwrap_or(0);
        ordered.rotate_left(start);
        Self { corners: ordered }
    }

    /// The same quad with corner `start` moved to position 0, order preserved.
    pub fn rolled(&self, start: usize) -> Self {
        let mut corners = self.corners;
        corners.rotate_left(start % 4);
        Self { corners }
    }

    pub fn side_lengths(&self) -> [f64; 4] {
        let c = &self.corners;
        [
            nalgebra::distance(&c[0], &c[1]),
            nalgebra::distance(&c[1], &c[2]),
            nalgebra::distance(&c[2], &c[3]),
            nalgebra::distance(&c[3], &c[0]),
        ]
    }

    pub fn perimeter(&self) -> f64 {
        self.side_lengths().iter().sum()
    }

    pub fn shortest_side(&self) -> f64 {
        self.side_lengths().iter().copied().fold(f64::MAX, f64::min)
    }

    pub fn longest_side(&self) -> f64 {
        self.side_lengths().iter().copied().fold(0.0, f64::max)
    }

    /// Shoelace area (positive for clockwise-on-screen order).
    pub fn area(&self) -> f64 {
        let c = &self.corners;
        let twice: f64 = (0..4)
            .map(|i| {
                let j = (i + 1) % 4;
                c[i].x * c[j].y - c[j].x * c[i].y
            })
            .sum();
        twice / 2.0
    }

    /// All turns go the same way and none is degenerate.
    pub fn is_convex(&self) -> bool {
        let c = &self.corners;
        let turns: Vec<f64> = (0..4)
            .map(|i| cross(&c[i], &c[(i + 1) % 4], &c[(i + 2) % 4]))
            .collect();
        turns.iter().all(|t| *t > 1e-9) || turns.iter().all(|t| *t < -1e-9)
    }

    /// Opposite edges do not cross each other.
    pub fn is_simple(&self) -> bool {
        let c = &self.corners;
        !segments_intersect(&c[0], &c[1], &c[2], &c[3])
            && !segments_intersect(&c[1], &c[2], &c[3], &c[0])
    }

    /// Distance from `p` to the nearest edge.
    pub fn distance_to_outline(&self, p: &Point) -> f64 {
        let c = &self.corners;
        (0..4)
            .map(|i| distance_to_segment(p, &c[i], &c[(i + 1) % 4]))
            .fold(f64::MAX, f64::min)
    }

    /// Mean outline distance over `points`.
    pub fn fit_error(&self, points: &[Point]) -> f64 {
        if points.is_empty() {
            return f64::MAX;
        }
        points.iter().map(|p| self.distance_to_outline(p)).sum::<f64>() / points.len() as f64
    }

    /// Scales every corner around pixel centers: `full = (p + 0.5) / s - 0.5`.
    pub fn rescaled(&self, scale_x: f64, scale_y: f64) -> Self {
        let corners = self
            .corners
            .map(|p| Point::new((p.x + 0.5) / scale_x - 0.5, (p.y + 0.5) / scale_y - 0.5));
        Self { corners }
    }

    /// Homography mapping the square `[0, size]²` onto this quad, with (0,0) on
    /// corner 0, (size,0) on corner 1, (size,size) on corner 2 and (0,size) on
    /// corner 3.
    pub fn grid_homography(&self, size: f64) -> Option<Matrix3<f64>> {
        let src = [
            Point::new(0.0, 0.0),
            Point::new(size, 0.0),
            Point::new(size, size),
            Point::new(0.0, size),
        ];
        homography_from_four(&src, &self.corners)
    }
}

/// Solves the exact 4-point homography `dst ≈ H * src` with h33 fixed to 1.
pub fn homography_from_four(src: &[Point; 4], dst: &[Point; 4]) -> Option<Matrix3<f64>> {
    let mut a = SMatrix::<f64, 8, 8>::zeros();
    let mut b = SVector::<f64, 8>::zeros();
    for i in 0..4 {
        let (x, y) = (src[i].x, src[i].y);
        let (u, v) = (dst[i].x, dst[i].y);
        let r = 2 * i;
        a[(r, 0)] = x;
        a[(r, 1)] = y;
        a[(r, 2)] = 1.0;
        a[(r, 6)] = -u * x;
        a[(r, 7)] = -u * y;
        b[r] = u;
        a[(r + 1, 3)] = x;
        a[(r + 1, 4)] = y;
        a[(r + 1, 5)] = 1.0;
        a[(r + 1, 6)] = -v * x;
        a[(r + 1, 7)] = -v * y;
        b[r + 1] = v;
    }
    let h = a.lu().solve(&b)?;
    if h.iter().any(|value| !value.is_finite()) {
        return None;
    }
    Some(Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0))
}

/// Projects a point through a homography.
pub fn project(h: &Matrix3<f64>, x: f64, y: f64) -> Option<Point> {
    let p = h * Vector3::new(x, y, 1.0);
    if p[2].abs() < 1e-12 {
        return None;
    }
    Some(Point::new(p[0] / p[2], p[1] / p[2]))
}

/// A total-least-squares line: a point on it and a unit direction.
#[derive(Debug, Clone, Copy)]
struct Line {
    origin: Point,
    direction: nalgebra::Vector2<f64>,
}

fn fit_line(points: &[Point]) -> Option<Line> {
    if points.len() < 2 {
        return None;
    }
    let n = points.len() as f64;
    let mx = points.iter().map(|p| p.x).sum::<f64>() / n;
    let my = points.iter().map(|p| p.y).sum::<f64>() / n;
    let (mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0);
    for p in points {
        let dx = p.x - mx;
        let dy = p.y - my;
        sxx += dx * dx;
        syy += dy * dy;
        sxy += dx * dy;
    }
    if sxx + syy < 1e-9 {
        return None;
    }
    let theta = 0.5 * (2.0 * sxy).atan2(sxx - syy);
    Some(Line {
        origin: Point::new(mx, my),
        direction: nalgebra::Vector2::new(theta.cos(), theta.sin()),
    })
}

fn intersect(a: &Line, b: &Line) -> Option<Point> {
    let denom = a.direction.x * b.direction.y - a.direction.y * b.direction.x;
    if denom.abs() < 1e-9 {
        return None;
    }
    let diff = b.origin - a.origin;
    let t = (diff.x * b.direction.y - diff.y * b.direction.x) / denom;
    Some(a.origin + a.direction * t)
}

/// Fits a quadrilateral to the outer outline points of a region.
///
/// Returns `None` when the outline is degenerate (too few points, collinear).
pub fn fit_quad(outline: &[Point]) -> Option<Quad> {
    if outline.len() < 8 {
        return None;
    }

    // --- 1. Coarse corners by farthest-point search ---
    let n = outline.len() as f64;
    let centroid = Point::new(
        outline.iter().map(|p| p.x).sum::<f64>() / n,
        outline.iter().map(|p| p.y).sum::<f64>() / n,
    );
    let farthest_from = |anchor: &Point| -> Point {
        outline
            .iter()
            .copied()
            .max_by(|a, b| {
                nalgebra::distance_squared(a, anchor).total_cmp(&nalgebra::distance_squared(b, anchor))
            })
            .unwrap_or(*anchor)
    };
    let c0 = farthest_from(&centroid);
    let c2 = farthest_from(&c0);
    let (mut best_pos, mut best_neg) = (0.0, 0.0);
    let (mut c1, mut c3) = (c0, c2);
    for p in outline {
        let side = cross(&c0, &c2, p);
        if side > best_pos {
            best_pos = side;
            c1 = *p;
        }
        if side < best_neg {
            best_neg = side;
            c3 = *p;
        }
    }
    let diagonal = nalgebra::distance(&c0, &c2);
    if diagonal < 1.0 || best_pos / diagonal < 1.0 || -best_neg / diagonal < 1.0 {
        return None;
    }
    let coarse = Quad::from_unordered([c0, c1, c2, c3]);

    // --- 2. Edge refinement ---
    // Each outline point votes for its nearest edge; points close to a corner are
    // left out so that corner rounding does not bend the fitted lines.
    let mut edge_points: [Vec<Point>; 4] = Default::default();
    let c = &coarse.corners;
    for p in outline {
        let (edge, distance) = (0..4)
            .map(|i| (i, distance_to_segment(p, &c[i], &c[(i + 1) % 4])))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .unwrap_or((0, f64::MAX));
        let start = &c[edge];
        let end = &c[(edge + 1) % 4];
        let length = nalgebra::distance(start, end);
        let along = (p - start).dot(&(end - start)) / length.max(1e-9);
        let margin = length * 0.1;
        if distance <= 2.0 + length * 0.05 && along > margin && along < length - margin {
            edge_points[edge].push(*p);
        }
    }
    let lines: Vec<Option<Line>> = edge_points.iter().map(|points| fit_line(points)).collect();
    let mut refined = coarse.corners;
    for i in 0..4 {
        // Corner i sits between edge i-1 (ending at it) and edge i (starting at it).
        let previous = (i + 3) % 4;
        if let (Some(a), Some(b)) = (&lines[previous], &lines[i]) {
            if let Some(p) = intersect(a, b) {
                if nalgebra::distance(&p, &refined[i]) < coarse.longest_side() * 0.25 {
                    refined[i] = p;
                }
            }
        }
    }
    Some(Quad { corners: refined })
}
