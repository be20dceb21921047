mod alpha_shape;
mod core;
mod mesh;
mod normals;
mod poisson;
mod primitives;
mod triangulation;
pub mod utm;

pub use alpha_shape::{AlphaPolygon, AlphaShape, alpha_shape};
pub use core::{BBox, Point2, Point3, Tolerance, Transform, Vec3, round_to};
pub use mesh::{GeomMesh, Triangle, TriangleSet};
pub use normals::{DEFAULT_NEIGHBOURS, estimate_normals};
pub use poisson::{
    DEFAULT_DEPTH, MAX_DEPTH, PoissonOptions, ReconstructionError, ReconstructionResult,
    reconstruct, reconstruct_with,
};
pub use primitives::{
    GeomResult, GeometryError, PlanarRegion, PointSet, ProjectionPlane, STEEP_TILT_DEGREES,
    centroid, convex_hull_2d, convex_hulls, distinct_ring, is_simple_polygon, max_distance,
    planar_projection, point_in_polygon, polygon_area, surface_normal_and_tilt,
};
pub use triangulation::{
    SurfaceTriangulation, TriangulationError, TriangulationResult, TriangulationStrategy,
    triangulate_projected, triangulate_surface, triangulate_tetragon,
};
pub use utm::{UtmCoord, UtmError};

#[cfg(test)]
mod tests;
