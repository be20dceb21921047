//! Per-point normal estimation by local plane fitting.

use nalgebra::{Matrix3, SymmetricEigen, Vector3};
use rstar::RTree;
use rstar::primitives::GeomWithData;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use super::core::{Point3, Vec3};

/// Neighbourhood size used for the plane fit.
pub const DEFAULT_NEIGHBOURS: usize = 30;

type IndexedPoint = GeomWithData<[f64; 3], usize>;

/// Estimate a unit normal for every point from its `k` nearest neighbours.
///
/// The normal is the eigenvector of the neighbourhood covariance with the
/// smallest eigenvalue, flipped to point towards +Z. Points with fewer than
/// three neighbours get `+Z`.
#[must_use]
pub fn estimate_normals(points: &[Point3], k: usize) -> Vec<Vec3> {
    let tree: RTree<IndexedPoint> = RTree::bulk_load(
        points
            .iter()
            .enumerate()
            .map(|(i, p)| GeomWithData::new(p.to_array(), i))
            .collect(),
    );
    estimate_all(points, &tree, k.max(3))
}

#[cfg(feature = "parallel")]
fn estimate_all(points: &[Point3], tree: &RTree<IndexedPoint>, k: usize) -> Vec<Vec3> {
    points
        .par_iter()
        .map(|p| estimate_one(points, tree, *p, k))
        .collect()
}

#[cfg(not(feature = "parallel"))]
fn estimate_all(points: &[Point3], tree: &RTree<IndexedPoint>, k: usize) -> Vec<Vec3> {
    points
        .iter()
        .map(|p| estimate_one(points, tree, *p, k))
        .collect()
}

fn estimate_one(points: &[Point3], tree: &RTree<IndexedPoint>, query: Point3, k: usize) -> Vec3 {
    let neighbours: Vec<Vector3<f64>> = tree
        .nearest_neighbor_iter(&query.to_array())
        .take(k)
        .map(|n| {
            let p = points[n.data];
            Vector3::new(p.x, p.y, p.z)
        })
        .collect();
    if neighbours.len() < 3 {
        return Vec3::Z;
    }

    let count = neighbours.len() as f64;
    let mean = neighbours.iter().sum::<Vector3<f64>>() / count;
    let covariance = neighbours.iter().fold(Matrix3::zeros(), |acc, p| {
        let d = p - mean;
        acc + d * d.transpose()
    }) / count;

    let eigen = SymmetricEigen::new(covariance);
    let smallest = eigen.eigenvalues.imin();
    let axis = eigen.eigenvectors.column(smallest);
    let normal = Vec3::new(axis[0], axis[1], axis[2])
        .normalized()
        .unwrap_or(Vec3::Z);
    if normal.z < 0.0 { normal.neg() } else { normal }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tilted_plane_normals_point_up_and_match_plane() {
        // z = 0.5 x  ->  normal ∝ (-0.5, 0, 1)
        let mut points = Vec::new();
        for i in 0..10 {
            for j in 0..10 {
                let x = f64::from(i);
                let y = f64::from(j);
                points.push(Point3::new(x, y, 0.5 * x));
            }
        }
        let expected = Vec3::new(-0.5, 0.0, 1.0).normalized().expect("non-zero");
        for n in estimate_normals(&points, DEFAULT_NEIGHBOURS) {
            assert!(n.z > 0.0);
            assert!(n.dot(expected) > 0.999, "{n:?}");
        }
    }

    #[test]
    fn tiny_clouds_default_to_up() {
        let normals = estimate_normals(&[Point3::ORIGIN, Point3::new(1.0, 0.0, 0.0)], 30);
        assert_eq!(normals, vec![Vec3::Z, Vec3::Z]);
    }
}
