//! Planar-surface triangulation for building polygons.
//!
//! A surface ring is flattened onto the plane matching its tilt, repaired
//! with a convex hull when that is safe, and then split by size: the closed
//! quadrilateral (five entries) into two fixed triangles, a triangle as-is,
//! anything larger through Delaunay on the projection with every triangle
//! checked against the projected outline.

use super::core::{Point2, Point3};
use super::mesh::Triangle;
use super::primitives::{
    GeometryError, PlanarRegion, STEEP_TILT_DEGREES, convex_hull_2d, distinct_ring,
    is_simple_polygon, planar_projection, surface_normal_and_tilt,
};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TriangulationError {
    #[error("surface ring has {0} vertices, need at least 3")]
    TooFewVertices(usize),
    #[error(transparent)]
    Degenerate(#[from] GeometryError),
    #[error("projection onto the {plane} plane is not simple (tilt {tilt:.1}°)")]
    UnrepairablePolygon { plane: &'static str, tilt: f64 },
}

pub type TriangulationResult<T> = Result<T, TriangulationError>;

/// How a surface ended up being accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriangulationStrategy {
    AsIs,
    Tetragon,
    Delaunay,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceTriangulation {
    pub triangles: Vec<Triangle>,
    pub strategy: TriangulationStrategy,
    pub hull_repaired: bool,
    /// Delaunay triangles dropped because they left the projected outline.
    pub discarded: usize,
}

/// Split a closed quadrilateral `[p0, p1, p2, p3, p0]` along the fixed
/// diagonal `p0–p2`.
#[must_use]
pub fn triangulate_tetragon(polygon: &[Point3; 5]) -> [Triangle; 2] {
    [
        Triangle::new(polygon[0], polygon[1], polygon[2]),
        Triangle::new(polygon[2], polygon[3], polygon[0]),
    ]
}

/// Delaunay-triangulate the projection of `polygon` and lift each triangle
/// back to the 3-D vertices.
///
/// Triangles whose projection is not contained in `outline` are discarded.
/// Returns the kept triangles and the number discarded.
#[must_use]
pub fn triangulate_projected(
    polygon: &[Point3],
    projection: &[Point2],
    outline: &[Point2],
) -> (Vec<Triangle>, usize) {
    let n = distinct_len(projection);
    let points: Vec<delaunator::Point> = projection[..n]
        .iter()
        .map(|p| delaunator::Point { x: p.x, y: p.y })
        .collect();
    let triangulation = delaunator::triangulate(&points);
    let region = PlanarRegion::new(outline);

    let mut kept = Vec::with_capacity(triangulation.triangles.len() / 3);
    let mut discarded = 0usize;
    for tri in triangulation.triangles.chunks_exact(3) {
        let flat = [projection[tri[0]], projection[tri[1]], projection[tri[2]], projection[tri[0]]];
        if region.contains_ring(&flat) {
            kept.push(Triangle::new(polygon[tri[0]], polygon[tri[1]], polygon[tri[2]]));
        } else {
            discarded += 1;
        }
    }
    (kept, discarded)
}

/// Number of leading entries left once the closing repeat is dropped.
fn distinct_len(ring: &[Point2]) -> usize {
    match (ring.first(), ring.last()) {
        (Some(first), Some(last)) if ring.len() > 1 && first == last => ring.len() - 1,
        _ => ring.len(),
    }
}

/// Triangulate one building surface ring (conventionally closed).
pub fn triangulate_surface(polygon: &[Point3]) -> TriangulationResult<SurfaceTriangulation> {
    if polygon.len() < 3 {
        return Err(TriangulationError::TooFewVertices(polygon.len()));
    }
    let (_, tilt) = surface_normal_and_tilt(polygon)?;
    let projection = planar_projection(polygon, tilt);

    let mut outline = projection.clone();
    let mut hull_repaired = false;
    if !is_simple_polygon(&outline) && tilt < STEEP_TILT_DEGREES {
        outline = convex_hull_2d(&projection);
        hull_repaired = true;
    }
    if !is_simple_polygon(&outline) {
        let plane = if tilt < STEEP_TILT_DEGREES { "XY" } else { "XZ" };
        return Err(TriangulationError::UnrepairablePolygon { plane, tilt });
    }

    let result = match polygon.len() {
        5 => {
            let quad = [polygon[0], polygon[1], polygon[2], polygon[3], polygon[4]];
            SurfaceTriangulation {
                triangles: triangulate_tetragon(&quad).to_vec(),
                strategy: TriangulationStrategy::Tetragon,
                hull_repaired,
                discarded: 0,
            }
        }
        len if len < 5 => SurfaceTriangulation {
            triangles: vec![Triangle::new(polygon[0], polygon[1], polygon[2])],
            strategy: TriangulationStrategy::AsIs,
            hull_repaired,
            discarded: 0,
        },
        _ => {
            let (triangles, discarded) = triangulate_projected(polygon, &projection, &outline);
            if discarded > 0 {
                log::debug!(
                    "discarded {discarded} Delaunay triangles outside a {}-vertex outline",
                    distinct_ring(&outline).len()
                );
            }
            SurfaceTriangulation {
                triangles,
                strategy: TriangulationStrategy::Delaunay,
                hull_repaired,
                discarded,
            }
        }
    };
    Ok(result)
}
