//! Planar alpha shapes over a Delaunay triangulation.
//!
//! A triangle survives when its circumradius is below `1 / alpha`; with
//! `alpha <= 0` every triangle survives and the shape is the convex hull.
//! Boundary rings are traced from the directed edges of the surviving
//! triangles: counter-clockwise rings are exteriors, clockwise rings holes.

use std::collections::{HashMap, HashSet};

use super::core::Point2;
use super::primitives::{PlanarRegion, distinct_ring, signed_area};

#[derive(Debug, Clone, PartialEq)]
pub struct AlphaPolygon {
    /// Closed, counter-clockwise.
    pub exterior: Vec<Point2>,
    /// Closed, clockwise.
    pub holes: Vec<Vec<Point2>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AlphaShape {
    /// Input is a point, a line or fewer than three distinct points; the raw
    /// coordinates are passed through.
    Degenerate(Vec<Point2>),
    /// No triangle survived the radius filter.
    Empty,
    Polygon(AlphaPolygon),
    MultiPolygon(Vec<AlphaPolygon>),
}

impl AlphaShape {
    /// Closed outer rings, one per polygon. Degenerate shapes yield their raw
    /// coordinates as a single ring.
    #[must_use]
    pub fn exterior_rings(&self) -> Vec<Vec<Point2>> {
        match self {
            Self::Empty => Vec::new(),
            Self::Degenerate(points) => vec![points.clone()],
            Self::Polygon(polygon) => vec![polygon.exterior.clone()],
            Self::MultiPolygon(polygons) => polygons.iter().map(|p| p.exterior.clone()).collect(),
        }
    }
}

/// Compute the alpha shape of a planar point set.
#[must_use]
pub fn alpha_shape(points: &[Point2], alpha: f64) -> AlphaShape {
    let distinct = {
        let mut seen = HashSet::new();
        points
            .iter()
            .filter(|p| seen.insert((p.x.to_bits(), p.y.to_bits())))
            .count()
    };
    if distinct < 3 {
        return AlphaShape::Degenerate(points.to_vec());
    }

    let delaunay_points: Vec<delaunator::Point> = points
        .iter()
        .map(|p| delaunator::Point { x: p.x, y: p.y })
        .collect();
    let triangulation = delaunator::triangulate(&delaunay_points);
    if triangulation.triangles.is_empty() {
        return AlphaShape::Degenerate(points.to_vec());
    }

    let max_radius = if alpha > 0.0 { 1.0 / alpha } else { f64::INFINITY };
    let mut edges: HashSet<(usize, usize)> = HashSet::new();
    for tri in triangulation.triangles.chunks_exact(3) {
        let (a, b, c) = (tri[0], tri[1], tri[2]);
        if circumradius(points[a], points[b], points[c]) >= max_radius {
            continue;
        }
        let ccw = orient(points[a], points[b], points[c]) > 0.0;
        let ordered = if ccw { [a, b, c] } else { [a, c, b] };
        for i in 0..3 {
            edges.insert((ordered[i], ordered[(i + 1) % 3]));
        }
    }
    if edges.is_empty() {
        return AlphaShape::Empty;
    }

    let boundary: Vec<(usize, usize)> = edges
        .iter()
        .copied()
        .filter(|&(a, b)| !edges.contains(&(b, a)))
        .collect();
    let rings = trace_rings(points, &boundary);

    let mut exteriors = Vec::new();
    let mut holes = Vec::new();
    for ring in rings {
        if signed_area(&ring) > 0.0 {
            exteriors.push(ring);
        } else {
            holes.push(ring);
        }
    }
    if exteriors.is_empty() {
        return AlphaShape::Empty;
    }

    let mut polygons: Vec<AlphaPolygon> = exteriors
        .into_iter()
        .map(|exterior| AlphaPolygon {
            exterior: close(exterior),
            holes: Vec::new(),
        })
        .collect();
    for hole in holes {
        let owner = polygons
            .iter()
            .position(|p| {
                let region = PlanarRegion::new(&p.exterior);
                hole.iter().any(|v| region.contains(*v))
            })
            .unwrap_or(0);
        polygons[owner].holes.push(close(hole));
    }

    if polygons.len() == 1 {
        AlphaShape::Polygon(polygons.remove(0))
    } else {
        AlphaShape::MultiPolygon(polygons)
    }
}

fn orient(a: Point2, b: Point2, c: Point2) -> f64 {
    (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)
}

fn circumradius(a: Point2, b: Point2, c: Point2) -> f64 {
    let ab = a.distance_to(b);
    let bc = b.distance_to(c);
    let ca = c.distance_to(a);
    let twice_area = orient(a, b, c).abs();
    if twice_area <= f64::EPSILON * (ab * bc).max(1.0) {
        return f64::INFINITY;
    }
    ab * bc * ca / (2.0 * twice_area)
}

fn close(mut ring: Vec<Point2>) -> Vec<Point2> {
    if let (Some(first), Some(last)) = (ring.first().copied(), ring.last().copied()) {
        if first != last {
            ring.push(first);
        }
    }
    ring
}

/// Chain directed boundary edges into rings. At a pinch vertex the outgoing
/// edge with the smallest clockwise turn from the incoming edge is taken so
/// that faces touching at a single vertex stay separate rings.
fn trace_rings(points: &[Point2], boundary: &[(usize, usize)]) -> Vec<Vec<Point2>> {
    let mut outgoing: HashMap<usize, Vec<usize>> = HashMap::new();
    for &(a, b) in boundary {
        outgoing.entry(a).or_default().push(b);
    }
    let mut used: HashSet<(usize, usize)> = HashSet::new();
    let mut rings = Vec::new();

    let mut starts: Vec<(usize, usize)> = boundary.to_vec();
    starts.sort_unstable();
    for (start, first) in starts {
        if used.contains(&(start, first)) {
            continue;
        }
        let mut ring = vec![start];
        let (mut prev, mut cur) = (start, first);
        used.insert((start, first));
        while cur != start {
            ring.push(cur);
            let Some(candidates) = outgoing.get(&cur) else {
                break;
            };
            let next = candidates
                .iter()
                .copied()
                .filter(|&w| !used.contains(&(cur, w)))
                .min_by(|&w1, &w2| {
                    clockwise_turn(points, prev, cur, w1)
                        .total_cmp(&clockwise_turn(points, prev, cur, w2))
                });
            let Some(next) = next else {
                break;
            };
            used.insert((cur, next));
            prev = cur;
            cur = next;
        }
        let ring: Vec<Point2> = ring.into_iter().map(|i| points[i]).collect();
        if distinct_ring(&ring).len() >= 3 {
            rings.push(ring);
        }
    }
    rings
}

/// Clockwise angle swept from direction `v→u` to direction `v→w`.
fn clockwise_turn(points: &[Point2], u: usize, v: usize, w: usize) -> f64 {
    let (pu, pv, pw) = (points[u], points[v], points[w]);
    let back = (pu.y - pv.y).atan2(pu.x - pv.x);
    let forward = (pw.y - pv.y).atan2(pw.x - pv.x);
    (back - forward).rem_euclid(std::f64::consts::TAU)
}
