//! Planar and surface primitives shared by every stage of the pipeline.
//!
//! All planar work happens in UTM metres. Point-in-polygon membership is
//! boundary-exclusive: a point lying on an edge or a vertex is outside.

use geo::{Contains, ConvexHull, LineString, MultiPoint, Point, Polygon};

use super::core::{Point2, Point3, Tolerance, Vec3};

/// Surfaces tilted at least this far from horizontal are projected onto XZ.
pub const STEEP_TILT_DEGREES: f64 = 80.0;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GeometryError {
    #[error("{0} requires at least one point")]
    EmptyInput(&'static str),
    #[error("surface has no two non-collinear edges")]
    DegenerateSurface,
}

pub type GeomResult<T> = Result<T, GeometryError>;

// ─────────────────────────────────────────────────────────────────────────────
// PointSet
// ─────────────────────────────────────────────────────────────────────────────

/// Either a single outline or a list of outlines (one per object).
#[derive(Debug, Clone, PartialEq)]
pub enum PointSet {
    Flat(Vec<Point2>),
    Clustered(Vec<Vec<Point2>>),
}

impl PointSet {
    /// Iterate over every point, flattening clusters in order.
    pub fn iter(&self) -> Box<dyn Iterator<Item = Point2> + '_> {
        match self {
            Self::Flat(points) => Box::new(points.iter().copied()),
            Self::Clustered(clusters) => Box::new(clusters.iter().flatten().copied()),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Flat(points) => points.is_empty(),
            Self::Clustered(clusters) => clusters.iter().all(Vec::is_empty),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Planar measures
// ─────────────────────────────────────────────────────────────────────────────

/// Arithmetic mean of the points.
pub fn centroid(points: &[Point2]) -> GeomResult<Point2> {
    if points.is_empty() {
        return Err(GeometryError::EmptyInput("centroid"));
    }
    let n = points.len() as f64;
    let (sx, sy) = points
        .iter()
        .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
    Ok(Point2::new(sx / n, sy / n))
}

/// Distance from `reference` to the farthest point of the set.
pub fn max_distance(points: &PointSet, reference: Point2) -> GeomResult<f64> {
    points
        .iter()
        .map(|p| p.distance_to(reference))
        .reduce(f64::max)
        .ok_or(GeometryError::EmptyInput("max_distance"))
}

/// Shoelace area of a ring; the closing vertex may be present or not.
#[must_use]
pub fn polygon_area(ring: &[Point2]) -> f64 {
    signed_area(ring).abs()
}

pub(crate) fn signed_area(ring: &[Point2]) -> f64 {
    if ring.len() < 3 {
        return 0.0;
    }
    let mut twice = 0.0;
    for (i, a) in ring.iter().enumerate() {
        let b = ring[(i + 1) % ring.len()];
        twice += a.x * b.y - b.x * a.y;
    }
    twice * 0.5
}

// ─────────────────────────────────────────────────────────────────────────────
// Hulls and membership
// ─────────────────────────────────────────────────────────────────────────────

/// Closed counter-clockwise convex hull. Empty input yields an empty ring.
#[must_use]
pub fn convex_hull_2d(points: &[Point2]) -> Vec<Point2> {
    if points.is_empty() {
        return Vec::new();
    }
    let multi: MultiPoint<f64> = points.iter().map(|p| Point::new(p.x, p.y)).collect();
    multi
        .convex_hull()
        .exterior()
        .coords()
        .map(|c| Point2::from(*c))
        .collect()
}

/// One hull per cluster, or a single hull for a flat set.
#[must_use]
pub fn convex_hulls(points: &PointSet) -> Vec<Vec<Point2>> {
    match points {
        PointSet::Flat(flat) => vec![convex_hull_2d(flat)],
        PointSet::Clustered(clusters) => clusters.iter().map(|c| convex_hull_2d(c)).collect(),
    }
}

/// A ring prepared for repeated membership tests.
#[derive(Debug, Clone)]
pub struct PlanarRegion {
    polygon: Polygon<f64>,
}

impl PlanarRegion {
    #[must_use]
    pub fn new(ring: &[Point2]) -> Self {
        let exterior: LineString<f64> = ring.iter().map(|p| geo::Coord::from(*p)).collect();
        Self {
            polygon: Polygon::new(exterior, Vec::new()),
        }
    }

    /// Boundary-exclusive membership.
    #[must_use]
    pub fn contains(&self, point: Point2) -> bool {
        self.polygon.contains(&Point::new(point.x, point.y))
    }

    /// True if every point of `ring` lies inside or on the boundary of this
    /// region and the two share interior.
    #[must_use]
    pub fn contains_ring(&self, ring: &[Point2]) -> bool {
        self.polygon.contains(&PlanarRegion::new(ring).polygon)
    }
}

/// Boundary-exclusive point-in-polygon test.
#[must_use]
pub fn point_in_polygon(point: Point2, polygon: &[Point2]) -> bool {
    if polygon.len() < 3 {
        return false;
    }
    PlanarRegion::new(polygon).contains(point)
}

/// Drop consecutive duplicates and the closing repeat of a ring.
#[must_use]
pub fn distinct_ring(ring: &[Point2]) -> Vec<Point2> {
    let tol = Tolerance::DEFAULT;
    let mut out: Vec<Point2> = Vec::with_capacity(ring.len());
    for &p in ring {
        if out.last().is_none_or(|last| !tol.approx_eq_point2(*last, p)) {
            out.push(p);
        }
    }
    while out.len() > 1 && tol.approx_eq_point2(out[0], out[out.len() - 1]) {
        out.pop();
    }
    out
}

/// A ring is simple when it has at least three distinct vertices, non-zero
/// area and no two non-adjacent edges touch or cross.
#[must_use]
pub fn is_simple_polygon(ring: &[Point2]) -> bool {
    let pts = distinct_ring(ring);
    let n = pts.len();
    if n < 3 || polygon_area(&pts) <= Tolerance::AREA.eps {
        return false;
    }
    for i in 0..n {
        let (a, b) = (pts[i], pts[(i + 1) % n]);
        for j in (i + 1)..n {
            let adjacent = j == i + 1 || (i == 0 && j == n - 1);
            if adjacent {
                continue;
            }
            let (c, d) = (pts[j], pts[(j + 1) % n]);
            if segments_intersect(a, b, c, d) {
                return false;
            }
        }
    }
    // Adjacent edges folding back onto each other also break simplicity.
    for i in 0..n {
        let prev = pts[(i + n - 1) % n];
        let cur = pts[i];
        let next = pts[(i + 1) % n];
        if orientation(prev, cur, next) == 0.0 && dot2(prev, cur, next) > 0.0 {
            return false;
        }
    }
    true
}

fn orientation(a: Point2, b: Point2, c: Point2) -> f64 {
    let v = (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x);
    if v.abs() <= Tolerance::ZERO_LENGTH.eps { 0.0 } else { v }
}

/// Dot product of `(a - b)` and `(c - b)`.
fn dot2(a: Point2, b: Point2, c: Point2) -> f64 {
    (a.x - b.x) * (c.x - b.x) + (a.y - b.y) * (c.y - b.y)
}

fn on_segment(a: Point2, b: Point2, p: Point2) -> bool {
    p.x >= a.x.min(b.x) && p.x <= a.x.max(b.x) && p.y >= a.y.min(b.y) && p.y <= a.y.max(b.y)
}

/// Closed-segment intersection; touching endpoints count.
pub(crate) fn segments_intersect(a: Point2, b: Point2, c: Point2, d: Point2) -> bool {
    let o1 = orientation(a, b, c);
    let o2 = orientation(a, b, d);
    let o3 = orientation(c, d, a);
    let o4 = orientation(c, d, b);

    if o1 * o2 < 0.0 && o3 * o4 < 0.0 {
        return true;
    }
    (o1 == 0.0 && on_segment(a, b, c))
        || (o2 == 0.0 && on_segment(a, b, d))
        || (o3 == 0.0 && on_segment(c, d, a))
        || (o4 == 0.0 && on_segment(c, d, b))
}

// ─────────────────────────────────────────────────────────────────────────────
// Surface orientation and projection
// ─────────────────────────────────────────────────────────────────────────────

/// Unit normal and tilt in degrees (0 = horizontal, 90 = vertical).
///
/// The normal comes from the first two non-collinear edges between
/// consecutive distinct vertices. Tilts outside `[0, 90]` fold to 0.
pub fn surface_normal_and_tilt(polygon: &[Point3]) -> GeomResult<(Vec3, f64)> {
    let tol = Tolerance::ZERO_LENGTH;
    let mut edges = polygon
        .windows(2)
        .map(|w| w[1].sub_point(w[0]))
        .filter(|e| !tol.is_zero_vec3(*e));

    let first = edges.next().ok_or(GeometryError::DegenerateSurface)?;
    let normal = edges
        .find_map(|e| {
            let cross = first.cross(e);
            if tol.is_zero_vec3(cross) {
                None
            } else {
                cross.normalized()
            }
        })
        .ok_or(GeometryError::DegenerateSurface)?;

    let tilt = normal.z.clamp(-1.0, 1.0).acos().to_degrees();
    if !(0.0..=90.0).contains(&tilt) {
        log::debug!("tilt {tilt:.2} outside [0, 90], treating surface as flat");
        return Ok((normal, 0.0));
    }
    Ok((normal, tilt))
}

/// Plane a surface is flattened onto before 2-D processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectionPlane {
    Xy,
    Xz,
}

impl ProjectionPlane {
    #[must_use]
    pub fn for_tilt(tilt_degrees: f64) -> Self {
        if tilt_degrees < STEEP_TILT_DEGREES {
            Self::Xy
        } else {
            Self::Xz
        }
    }

    #[must_use]
    pub const fn project(self, p: Point3) -> Point2 {
        match self {
            Self::Xy => p.xy(),
            Self::Xz => p.xz(),
        }
    }
}

/// Drop Z for shallow surfaces and Y for steep ones.
#[must_use]
pub fn planar_projection(polygon: &[Point3], tilt_degrees: f64) -> Vec<Point2> {
    let plane = ProjectionPlane::for_tilt(tilt_degrees);
    polygon.iter().map(|p| plane.project(*p)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Vec<Point2> {
        vec![
            Point2::new(0.0, 0.0),
            Point2::new(4.0, 0.0),
            Point2::new(4.0, 4.0),
            Point2::new(0.0, 4.0),
            Point2::new(0.0, 0.0),
        ]
    }

    #[test]
    fn centroid_of_empty_set_is_an_error() {
        assert_eq!(centroid(&[]), Err(GeometryError::EmptyInput("centroid")));
    }

    #[test]
    fn max_distance_flattens_clusters() {
        let set = PointSet::Clustered(vec![
            vec![Point2::new(1.0, 0.0)],
            vec![Point2::new(0.0, 5.0), Point2::new(3.0, 4.0)],
        ]);
        let d = max_distance(&set, Point2::new(0.0, 0.0)).expect("non-empty");
        assert!((d - 5.0).abs() < 1e-12);
        assert!(max_distance(&PointSet::Clustered(vec![vec![]]), Point2::default()).is_err());
    }

    #[test]
    fn hull_is_closed_and_counter_clockwise() {
        let mut pts = square();
        pts.push(Point2::new(2.0, 2.0));
        let hull = convex_hull_2d(&pts);
        assert_eq!(hull.first(), hull.last());
        assert_eq!(hull.len(), 5);
        assert!(signed_area(&hull[..4]) > 0.0);
    }

    #[test]
    fn bowtie_is_not_simple() {
        let bowtie = [
            Point2::new(0.0, 0.0),
            Point2::new(2.0, 2.0),
            Point2::new(2.0, 0.0),
            Point2::new(0.0, 2.0),
            Point2::new(0.0, 0.0),
        ];
        assert!(!is_simple_polygon(&bowtie));
        assert!(is_simple_polygon(&square()));
    }

    #[test]
    fn collapsed_ring_is_not_simple() {
        let line = [
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 0.0),
            Point2::new(2.0, 0.0),
            Point2::new(0.0, 0.0),
        ];
        assert!(!is_simple_polygon(&line));
    }

    #[test]
    fn tilt_of_flat_and_vertical_surfaces() {
        let roof = [
            Point3::new(0.0, 0.0, 5.0),
            Point3::new(1.0, 0.0, 5.0),
            Point3::new(1.0, 1.0, 5.0),
            Point3::new(0.0, 0.0, 5.0),
        ];
        let (n, tilt) = surface_normal_and_tilt(&roof).expect("planar");
        assert!((n.z - 1.0).abs() < 1e-12);
        assert!(tilt.abs() < 1e-9);

        let wall = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 3.0),
            Point3::new(0.0, 0.0, 0.0),
        ];
        let (_, tilt) = surface_normal_and_tilt(&wall).expect("planar");
        assert!((tilt - 90.0).abs() < 1e-9);
        assert_eq!(ProjectionPlane::for_tilt(tilt), ProjectionPlane::Xz);
    }

    #[test]
    fn downward_normal_folds_to_flat() {
        let clockwise_roof = [
            Point3::new(0.0, 0.0, 5.0),
            Point3::new(1.0, 1.0, 5.0),
            Point3::new(1.0, 0.0, 5.0),
            Point3::new(0.0, 0.0, 5.0),
        ];
        let (n, tilt) = surface_normal_and_tilt(&clockwise_roof).expect("planar");
        assert!(n.z < 0.0);
        assert_eq!(tilt, 0.0);
    }

    #[test]
    fn collinear_surface_is_degenerate() {
        let line = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 1.0, 1.0),
            Point3::new(2.0, 2.0, 2.0),
        ];
        assert_eq!(
            surface_normal_and_tilt(&line),
            Err(GeometryError::DegenerateSurface)
        );
    }
}
