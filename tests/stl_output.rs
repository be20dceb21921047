//! STL files written by the exporter read back as the same meshes.

use approx::assert_abs_diff_eq;
use geotwin_engine::export::{ExportTable, Exporter, ObjectType, import_stl};
use geotwin_engine::geom::{Point3, Triangle, TriangleSet};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random_mesh(seed: u64, count: usize) -> TriangleSet {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut point = || {
        Point3::new(
            344_000.0 + rng.random_range(0.0..200.0),
            5_676_000.0 + rng.random_range(0.0..200.0),
            35.0 + rng.random_range(0.0..30.0),
        )
    };
    (0..count)
        .map(|_| Triangle::new(point(), point(), point()))
        .collect()
}

#[test]
fn normalized_meshes_survive_the_stl_round_trip() {
    let reference = Point3::new(344_100.0, 5_676_100.0, 40.0);
    let mesh = random_mesh(42, 64).normalized(reference);

    let dir = tempfile::tempdir().unwrap();
    let exporter = Exporter::new(dir.path().join("STLfiles"), ExportTable::default());
    let path = exporter.export(&mesh, ObjectType::Static).unwrap();
    assert!(path.ends_with("static_objects.stl"));

    let back = import_stl(&path).unwrap();
    assert_eq!(back.len(), mesh.len());
    for (written, read) in mesh.iter().zip(back.iter()) {
        for (a, b) in written.vertices().iter().zip(read.vertices()) {
            assert_abs_diff_eq!(a.x, b.x, epsilon = 1e-4);
            assert_abs_diff_eq!(a.y, b.y, epsilon = 1e-4);
            assert_abs_diff_eq!(a.z, b.z, epsilon = 1e-4);
        }
    }
}

#[test]
fn normalizing_twice_against_the_origin_changes_nothing() {
    let once = random_mesh(7, 16).normalized(Point3::new(344_050.0, 5_676_050.0, 30.0));
    let twice = once.clone().normalized(Point3::ORIGIN);
    assert_eq!(once, twice);
}
