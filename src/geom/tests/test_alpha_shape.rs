use approx::assert_relative_eq;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::geom::{AlphaShape, Point2, alpha_shape, convex_hull_2d, polygon_area};

fn grid(origin: Point2, keep: impl Fn(i32, i32) -> bool) -> Vec<Point2> {
    let mut points = Vec::new();
    for i in 0..=4 {
        for j in 0..=4 {
            if keep(i, j) {
                points.push(Point2::new(origin.x + f64::from(i), origin.y + f64::from(j)));
            }
        }
    }
    points
}

#[test]
fn separated_clusters_become_a_multipolygon() {
    let mut points = grid(Point2::new(0.0, 0.0), |_, _| true);
    points.extend(grid(Point2::new(100.0, 0.0), |_, _| true));

    match alpha_shape(&points, 0.2) {
        AlphaShape::MultiPolygon(polygons) => {
            assert_eq!(polygons.len(), 2);
            for polygon in &polygons {
                assert_relative_eq!(polygon_area(&polygon.exterior), 16.0, epsilon = 1e-9);
                assert!(polygon.holes.is_empty());
                assert_eq!(polygon.exterior.first(), polygon.exterior.last());
            }
        }
        other => panic!("expected two polygons, got {other:?}"),
    }
}

#[test]
fn non_positive_alpha_yields_the_convex_hull() {
    let mut rng = StdRng::seed_from_u64(42);
    let points: Vec<Point2> = (0..200)
        .map(|_| Point2::new(rng.random_range(0.0..50.0), rng.random_range(0.0..30.0)))
        .collect();

    let AlphaShape::Polygon(polygon) = alpha_shape(&points, 0.0) else {
        panic!("expected a single polygon");
    };
    let hull = convex_hull_2d(&points);
    assert_relative_eq!(
        polygon_area(&polygon.exterior),
        polygon_area(&hull),
        max_relative = 1e-9
    );
}

#[test]
fn notch_is_carved_out_with_a_tight_alpha() {
    let points = grid(Point2::new(0.0, 0.0), |i, j| i <= 2 || j <= 2);
    let AlphaShape::Polygon(polygon) = alpha_shape(&points, 1.0) else {
        panic!("expected a single polygon");
    };
    let area = polygon_area(&polygon.exterior);
    assert!((12.0..=13.0).contains(&area), "{area}");
}

#[test]
fn degenerate_inputs_pass_through() {
    let two = vec![Point2::new(0.0, 0.0), Point2::new(1.0, 1.0)];
    assert_eq!(alpha_shape(&two, 1.0), AlphaShape::Degenerate(two.clone()));

    let line: Vec<Point2> = (0..5).map(|i| Point2::new(f64::from(i), 0.0)).collect();
    assert_eq!(alpha_shape(&line, 1.0), AlphaShape::Degenerate(line.clone()));
    assert_eq!(
        alpha_shape(&line, 1.0).exterior_rings(),
        vec![line]
    );
}

#[test]
fn oversized_triangles_leave_an_empty_shape() {
    let points = [Point2::new(0.0, 0.0), Point2::new(10.0, 0.0), Point2::new(0.0, 10.0)];
    let shape = alpha_shape(&points, 1.0);
    assert_eq!(shape, AlphaShape::Empty);
    assert!(shape.exterior_rings().is_empty());
}
