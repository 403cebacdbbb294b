//! Pure geometry over flat point arrays.
//!
//! Every shape is stored as `[x0, y0, x1, y1, ...]`; the meaning of the
//! coordinates depends on the [`ShapeType`]:
//! - rectangle: two opposite corners
//! - ellipse: center followed by `(right x, top y)`
//! - cuboid: eight corners
//! - polygon / polyline / points: vertices in order
//! - skeleton: no points of its own

use crate::config::GeometryConfig;
use crate::error::AnnotationError;
use crate::model::ShapeType;

/// An axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    /// Top-left corner X coordinate
    pub x: f64,
    /// Top-left corner Y coordinate
    pub y: f64,
    /// Width of the box
    pub width: f64,
    /// Height of the box
    pub height: f64,
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Get the area of the box.
    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    /// Check if a point is inside the box.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x && x <= self.x + self.width && y >= self.y && y <= self.y + self.height
    }

    /// Get the center point of the box.
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    fn corners(&self) -> Vec<(f64, f64)> {
        vec![
            (self.x, self.y),
            (self.x + self.width, self.y),
            (self.x + self.width, self.y + self.height),
            (self.x, self.y + self.height),
        ]
    }
}

/// Group a flat array into `(x, y)` pairs.
pub fn pairs(points: &[f64]) -> Vec<(f64, f64)> {
    points.chunks_exact(2).map(|c| (c[0], c[1])).collect()
}

/// Required number of coordinates: `(minimum, exact)`.
fn arity(shape_type: ShapeType) -> (usize, Option<usize>) {
    match shape_type {
        ShapeType::Rectangle | ShapeType::Ellipse => (4, Some(4)),
        ShapeType::Cuboid => (16, Some(16)),
        ShapeType::Polygon => (6, None),
        ShapeType::Polyline => (4, None),
        ShapeType::Points => (2, None),
        ShapeType::Skeleton => (0, Some(0)),
    }
}

/// Validate a point array for a shape type.
///
/// Empty arrays are a [`AnnotationError::Data`] error (the geometry is missing);
/// malformed ones are an [`AnnotationError::Argument`] error.
pub fn validate_points(points: &[f64], shape_type: ShapeType) -> Result<(), AnnotationError> {
    if shape_type == ShapeType::Skeleton {
        if points.is_empty() {
            return Ok(());
        }
        return Err(AnnotationError::argument(
            "Skeleton points are defined by its elements",
        ));
    }

    if points.is_empty() {
        return Err(AnnotationError::data(format!(
            "A {} requires points",
            shape_type
        )));
    }

    if let Some(bad) = points.iter().find(|v| !v.is_finite()) {
        return Err(AnnotationError::argument(format!(
            "Points must be finite numbers, got {}",
            bad
        )));
    }

    if points.len() % 2 != 0 {
        return Err(AnnotationError::argument(format!(
            "Points must contain pairs of coordinates, got {} values",
            points.len()
        )));
    }

    let (minimum, exact) = arity(shape_type);
    match exact {
        Some(n) if points.len() != n => Err(AnnotationError::argument(format!(
            "A {} requires exactly {} coordinates, got {}",
            shape_type,
            n,
            points.len()
        ))),
        _ if points.len() < minimum => Err(AnnotationError::argument(format!(
            "A {} requires at least {} coordinates, got {}",
            shape_type,
            minimum,
            points.len()
        ))),
        _ => Ok(()),
    }
}

/// Get the bounding box of a shape. Returns None for empty geometry.
pub fn bounding_box(points: &[f64], shape_type: ShapeType) -> Option<BoundingBox> {
    if points.len() < 2 {
        return None;
    }

    if shape_type == ShapeType::Ellipse && points.len() == 4 {
        let (cx, cy) = (points[0], points[1]);
        let rx = (points[2] - cx).abs();
        let ry = (cy - points[3]).abs();
        return Some(BoundingBox::new(cx - rx, cy - ry, rx * 2.0, ry * 2.0));
    }

    let mut min_x = f64::INFINITY;
    let mut min_y = f64::INFINITY;
    let mut max_x = f64::NEG_INFINITY;
    let mut max_y = f64::NEG_INFINITY;

    for (x, y) in pairs(points) {
        min_x = min_x.min(x);
        min_y = min_y.min(y);
        max_x = max_x.max(x);
        max_y = max_y.max(y);
    }

    Some(BoundingBox::new(min_x, min_y, max_x - min_x, max_y - min_y))
}

/// Area covered by a shape. Open shapes have zero area.
pub fn area(points: &[f64], shape_type: ShapeType) -> f64 {
    match shape_type {
        ShapeType::Rectangle | ShapeType::Cuboid => {
            bounding_box(points, shape_type).map_or(0.0, |b| b.area())
        }
        ShapeType::Ellipse => bounding_box(points, shape_type)
            .map_or(0.0, |b| std::f64::consts::PI * (b.width / 2.0) * (b.height / 2.0)),
        ShapeType::Polygon => shoelace(&pairs(points)).abs(),
        ShapeType::Polyline | ShapeType::Points | ShapeType::Skeleton => 0.0,
    }
}

/// Signed area of a closed vertex ring.
fn shoelace(vertices: &[(f64, f64)]) -> f64 {
    if vertices.len() < 3 {
        return 0.0;
    }
    let mut sum = 0.0;
    for i in 0..vertices.len() {
        let (x1, y1) = vertices[i];
        let (x2, y2) = vertices[(i + 1) % vertices.len()];
        sum += x1 * y2 - x2 * y1;
    }
    sum / 2.0
}

/// Path length of a polyline, perimeter of a polygon, zero otherwise.
pub fn length(points: &[f64], shape_type: ShapeType) -> f64 {
    let vertices = pairs(points);
    match shape_type {
        ShapeType::Polyline => path_length(&vertices, false),
        ShapeType::Polygon => path_length(&vertices, true),
        _ => 0.0,
    }
}

pub(crate) fn path_length(vertices: &[(f64, f64)], closed: bool) -> f64 {
    let open: f64 = vertices
        .windows(2)
        .map(|w| distance(w[0], w[1]))
        .sum();
    match (closed, vertices.first(), vertices.last()) {
        (true, Some(first), Some(last)) if vertices.len() > 2 => open + distance(*last, *first),
        _ => open,
    }
}

/// Whether a shape is too small to keep (near-zero area or length).
pub fn is_degenerate(points: &[f64], shape_type: ShapeType, config: &GeometryConfig) -> bool {
    match shape_type {
        ShapeType::Points | ShapeType::Skeleton => false,
        ShapeType::Polyline => length(points, shape_type) < config.min_shape_length,
        _ => area(points, shape_type) < config.min_shape_area,
    }
}

fn distance(a: (f64, f64), b: (f64, f64)) -> f64 {
    let dx = a.0 - b.0;
    let dy = a.1 - b.1;
    (dx * dx + dy * dy).sqrt()
}

fn distance_to_segment(p: (f64, f64), a: (f64, f64), b: (f64, f64)) -> f64 {
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let len_sq = dx * dx + dy * dy;
    if len_sq == 0.0 {
        return distance(p, a);
    }
    let t = (((p.0 - a.0) * dx + (p.1 - a.1) * dy) / len_sq).clamp(0.0, 1.0);
    distance(p, (a.0 + t * dx, a.1 + t * dy))
}

fn distance_to_ring(p: (f64, f64), vertices: &[(f64, f64)]) -> f64 {
    let n = vertices.len();
    (0..n)
        .map(|i| distance_to_segment(p, vertices[i], vertices[(i + 1) % n]))
        .fold(f64::INFINITY, f64::min)
}

/// Point-in-polygon test using ray casting.
fn ring_contains(vertices: &[(f64, f64)], x: f64, y: f64) -> bool {
    if vertices.len() < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = vertices.len() - 1;
    for i in 0..vertices.len() {
        let (xi, yi) = vertices[i];
        let (xj, yj) = vertices[j];
        if ((yi > y) != (yj > y)) && (x < (xj - xi) * (y - yi) / (yj - yi) + xi) {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Rotate `(x, y)` around `center` by `-degrees`.
fn unrotate(x: f64, y: f64, center: (f64, f64), degrees: f64) -> (f64, f64) {
    if degrees == 0.0 {
        return (x, y);
    }
    let (sin, cos) = (-degrees.to_radians()).sin_cos();
    let (dx, dy) = (x - center.0, y - center.1);
    (center.0 + dx * cos - dy * sin, center.1 + dx * sin + dy * cos)
}

/// Distance from `(x, y)` to a shape, used for hit testing.
///
/// Inside a closed shape this is the distance to its boundary; outside (and
/// for open shapes) the point must be within `tolerance` of the geometry,
/// otherwise None is returned.
pub fn distance_to_point(
    points: &[f64],
    shape_type: ShapeType,
    rotation: f64,
    x: f64,
    y: f64,
    tolerance: f64,
) -> Option<f64> {
    let bbox = bounding_box(points, shape_type)?;
    let within = |d: f64| (d <= tolerance).then_some(d);

    match shape_type {
        ShapeType::Rectangle | ShapeType::Cuboid => {
            let (px, py) = if shape_type == ShapeType::Rectangle {
                unrotate(x, y, bbox.center(), rotation)
            } else {
                (x, y)
            };
            let d = distance_to_ring((px, py), &bbox.corners());
            if bbox.contains(px, py) { Some(d) } else { within(d) }
        }
        ShapeType::Ellipse => {
            let center = bbox.center();
            let (px, py) = unrotate(x, y, center, rotation);
            let (rx, ry) = (bbox.width / 2.0, bbox.height / 2.0);
            if rx == 0.0 || ry == 0.0 {
                return None;
            }
            let (nx, ny) = ((px - center.0) / rx, (py - center.1) / ry);
            let norm = (nx * nx + ny * ny).sqrt();
            let d = (norm - 1.0).abs() * rx.min(ry);
            if norm <= 1.0 { Some(d) } else { within(d) }
        }
        ShapeType::Polygon => {
            let vertices = pairs(points);
            let d = distance_to_ring((x, y), &vertices);
            if ring_contains(&vertices, x, y) { Some(d) } else { within(d) }
        }
        ShapeType::Polyline => {
            let vertices = pairs(points);
            let d = vertices
                .windows(2)
                .map(|w| distance_to_segment((x, y), w[0], w[1]))
                .fold(f64::INFINITY, f64::min);
            within(d)
        }
        ShapeType::Points => {
            let d = pairs(points)
                .into_iter()
                .map(|p| distance((x, y), p))
                .fold(f64::INFINITY, f64::min);
            within(d)
        }
        ShapeType::Skeleton => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_points() {
        assert!(validate_points(&[0.0, 0.0, 10.0, 10.0], ShapeType::Rectangle).is_ok());
        assert!(validate_points(&[], ShapeType::Polygon).is_err_and(|e| e.is_data()));
        assert!(
            validate_points(&[0.0, 0.0, 10.0], ShapeType::Polyline)
                .is_err_and(|e| e.is_argument())
        );
        assert!(
            validate_points(&[0.0, f64::NAN, 10.0, 10.0], ShapeType::Rectangle)
                .is_err_and(|e| e.is_argument())
        );
        assert!(validate_points(&[0.0, 0.0, 10.0, 10.0], ShapeType::Polygon).is_err());
        assert!(validate_points(&[0.0, 0.0, 1.0, 1.0, 2.0, 2.0], ShapeType::Rectangle).is_err());
        assert!(validate_points(&[], ShapeType::Skeleton).is_ok());
        assert!(validate_points(&[1.0, 1.0], ShapeType::Skeleton).is_err());
    }

    #[test]
    fn test_bounding_box() {
        let bbox = bounding_box(&[50.0, 80.0, 10.0, 20.0], ShapeType::Rectangle).expect("bbox");
        assert_eq!(bbox, BoundingBox::new(10.0, 20.0, 40.0, 60.0));

        let ellipse = bounding_box(&[50.0, 50.0, 60.0, 45.0], ShapeType::Ellipse).expect("bbox");
        assert_eq!(ellipse, BoundingBox::new(40.0, 45.0, 20.0, 10.0));

        assert!(bounding_box(&[], ShapeType::Points).is_none());
    }

    #[test]
    fn test_area_and_length() {
        let triangle = [0.0, 0.0, 100.0, 0.0, 100.0, 50.0];
        assert!((area(&triangle, ShapeType::Polygon) - 2500.0).abs() < 1e-9);
        assert_eq!(area(&[0.0, 0.0, 10.0, 5.0], ShapeType::Rectangle), 50.0);
        assert_eq!(area(&triangle, ShapeType::Polyline), 0.0);
        assert_eq!(length(&[0.0, 0.0, 3.0, 4.0, 3.0, 10.0], ShapeType::Polyline), 11.0);
    }

    #[test]
    fn test_degenerate_detection() {
        let config = GeometryConfig::default();
        assert!(is_degenerate(&[0.0, 0.0, 1.0, 1.0], ShapeType::Rectangle, &config));
        assert!(!is_degenerate(&[0.0, 0.0, 10.0, 10.0], ShapeType::Rectangle, &config));
        // Collinear polygon has no area
        assert!(is_degenerate(
            &[0.0, 0.0, 50.0, 50.0, 100.0, 100.0],
            ShapeType::Polygon,
            &config
        ));
        assert!(is_degenerate(&[0.0, 0.0, 1.0, 1.0], ShapeType::Polyline, &config));
        assert!(!is_degenerate(&[0.0, 0.0, 1.0, 1.0], ShapeType::Points, &config));
    }

    #[test]
    fn test_distance_rectangle() {
        let rect = [10.0, 10.0, 110.0, 60.0];
        assert_eq!(
            distance_to_point(&rect, ShapeType::Rectangle, 0.0, 20.0, 30.0, 5.0),
            Some(10.0)
        );
        assert_eq!(
            distance_to_point(&rect, ShapeType::Rectangle, 0.0, 113.0, 30.0, 5.0),
            Some(3.0)
        );
        assert_eq!(
            distance_to_point(&rect, ShapeType::Rectangle, 0.0, 200.0, 30.0, 5.0),
            None
        );
    }

    #[test]
    fn test_distance_rotated_rectangle() {
        // 100x10 box rotated by 90 degrees around (50, 5) stands vertically
        let rect = [0.0, 0.0, 100.0, 10.0];
        assert!(distance_to_point(&rect, ShapeType::Rectangle, 90.0, 50.0, 40.0, 1.0).is_some());
        assert!(distance_to_point(&rect, ShapeType::Rectangle, 0.0, 50.0, 40.0, 1.0).is_none());
    }

    #[test]
    fn test_distance_polygon_and_points() {
        let square = [0.0, 0.0, 100.0, 0.0, 100.0, 100.0, 0.0, 100.0];
        assert_eq!(
            distance_to_point(&square, ShapeType::Polygon, 0.0, 50.0, 40.0, 1.0),
            Some(40.0)
        );
        assert_eq!(
            distance_to_point(&square, ShapeType::Polygon, 0.0, 150.0, 50.0, 1.0),
            None
        );

        let points = [10.0, 10.0, 50.0, 50.0];
        assert_eq!(
            distance_to_point(&points, ShapeType::Points, 0.0, 53.0, 54.0, 10.0),
            Some(5.0)
        );
        assert_eq!(
            distance_to_point(&[0.0, 0.0, 100.0, 0.0], ShapeType::Polyline, 0.0, 50.0, 3.0, 5.0),
            Some(3.0)
        );
    }

    #[test]
    fn test_distance_ellipse() {
        let ellipse = [50.0, 50.0, 70.0, 30.0];
        let d = distance_to_point(&ellipse, ShapeType::Ellipse, 0.0, 50.0, 50.0, 1.0);
        assert_eq!(d, Some(20.0));
        assert!(distance_to_point(&ellipse, ShapeType::Ellipse, 0.0, 100.0, 100.0, 1.0).is_none());
    }
}
