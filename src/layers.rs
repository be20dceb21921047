//! Groups extracted KML polygons into the semantic layers of a project.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::geom::{GeometryError, Point2, PointSet, convex_hull_2d, max_distance, round_to};
use crate::parse::kml::{ObjectKind, PolygonObject};

pub type LayerResult<T> = Result<T, LayerError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LayerError {
    #[error("no TargetBuilding polygon in the KML layers")]
    MissingTarget,
    #[error("no {0} polygon in the KML layers")]
    MissingLayer(&'static str),
    #[error(transparent)]
    Geometry(#[from] GeometryError),
}

/// Per-project view of the KML layers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LayerSet {
    /// Centroid of the first target building.
    pub target_building_centroid: Option<Point2>,
    /// Target and surrounding building outlines in file order.
    pub points_buildings: Vec<Vec<Point2>>,
    pub target_building_shapes: Vec<Vec<Point2>>,
    pub points_vegetation: Vec<Vec<Point2>>,
    /// The terrain outline; a later Topography/Terrain polygon replaces it.
    pub points_topography: Vec<Point2>,
    pub vegetation_objects: BTreeMap<String, PolygonObject>,
    pub target_area_shape: Vec<Vec<Point2>>,
    pub target_area_center: Option<Point2>,
}

impl LayerSet {
    #[must_use]
    pub fn classify(objects: &[PolygonObject]) -> Self {
        let mut layers = Self::default();
        for (index, object) in objects.iter().enumerate() {
            match &object.kind {
                ObjectKind::TargetBuilding => {
                    if layers.target_building_centroid.is_some() {
                        log::warn!(
                            "more than one target building; keeping the first centroid, \
                             later outlines only extend the building layer"
                        );
                    } else {
                        layers.target_building_centroid = Some(object.centroid);
                    }
                    layers.points_buildings.push(object.shape.clone());
                    layers.target_building_shapes.push(object.shape.clone());
                }
                ObjectKind::SurroundingBuildings => {
                    layers.points_buildings.push(object.shape.clone());
                }
                ObjectKind::TargetArea => {
                    layers.target_area_center.get_or_insert(object.centroid);
                    layers.target_area_shape.push(object.shape.clone());
                }
                ObjectKind::Vegetation => {
                    let id = object
                        .id
                        .clone()
                        .unwrap_or_else(|| format!("vegetation_{index}"));
                    layers.points_vegetation.push(object.shape.clone());
                    layers.vegetation_objects.insert(id, object.clone());
                }
                ObjectKind::Topography | ObjectKind::Terrain => {
                    layers.points_topography.clone_from(&object.shape);
                }
                ObjectKind::Other(name) => {
                    log::debug!("ignoring polygon in unrecognised layer `{name}`");
                }
            }
        }
        log::debug!(
            "{} building, {} vegetation and {} terrain vertices classified",
            layers.points_buildings.len(),
            layers.vegetation_objects.len(),
            layers.points_topography.len()
        );
        layers
    }

    pub fn target_centroid(&self) -> LayerResult<Point2> {
        self.target_building_centroid.ok_or(LayerError::MissingTarget)
    }

    /// One hull per target building outline.
    #[must_use]
    pub fn target_hulls(&self) -> Vec<Vec<Point2>> {
        self.target_building_shapes
            .iter()
            .map(|shape| convex_hull_2d(shape))
            .collect()
    }

    /// One hull per building outline, target included.
    #[must_use]
    pub fn surrounding_hulls(&self) -> Vec<Vec<Point2>> {
        self.points_buildings
            .iter()
            .map(|shape| convex_hull_2d(shape))
            .collect()
    }

    /// Farthest building vertex from the target centroid, in centimetres.
    pub fn building_search_radius(&self) -> LayerResult<f64> {
        let center = self.target_centroid()?;
        let set = PointSet::Clustered(self.points_buildings.clone());
        Ok(round_to(max_distance(&set, center)?, 2))
    }

    /// Farthest terrain-outline vertex from the target centroid.
    pub fn terrain_search_radius(&self) -> LayerResult<f64> {
        let center = self.target_centroid()?;
        if self.points_topography.is_empty() {
            return Err(LayerError::MissingLayer("Topography"));
        }
        let set = PointSet::Flat(self.points_topography.clone());
        Ok(round_to(max_distance(&set, center)?, 2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(kind: ObjectKind, id: Option<&str>, shape: &[(f64, f64)]) -> PolygonObject {
        let shape: Vec<Point2> = shape.iter().map(|&(x, y)| Point2::new(x, y)).collect();
        let n = shape.len() as f64;
        PolygonObject {
            centroid: Point2::new(
                shape.iter().map(|p| p.x).sum::<f64>() / n,
                shape.iter().map(|p| p.y).sum::<f64>() / n,
            ),
            kind,
            id: id.map(str::to_owned),
            shape,
        }
    }

    fn square(x: f64, y: f64, size: f64) -> Vec<(f64, f64)> {
        vec![(x, y), (x + size, y), (x + size, y + size), (x, y + size), (x, y)]
    }

    #[test]
    fn first_target_wins_and_terrain_is_replaced() {
        let objects = vec![
            object(ObjectKind::TargetBuilding, None, &square(0.0, 0.0, 10.0)),
            object(ObjectKind::TargetBuilding, None, &square(100.0, 0.0, 10.0)),
            object(ObjectKind::SurroundingBuildings, None, &square(30.0, 0.0, 10.0)),
            object(ObjectKind::Terrain, None, &square(-50.0, -50.0, 10.0)),
            object(ObjectKind::Topography, None, &square(-500.0, -500.0, 1000.0)),
            object(ObjectKind::Vegetation, Some("tree_1"), &square(20.0, 20.0, 2.0)),
            object(ObjectKind::Other("Annotations".into()), None, &square(0.0, 0.0, 1.0)),
        ];
        let layers = LayerSet::classify(&objects);

        assert_eq!(layers.target_centroid(), Ok(Point2::new(4.0, 4.0)));
        assert_eq!(layers.points_buildings.len(), 3);
        assert_eq!(layers.target_hulls().len(), 2);
        assert_eq!(layers.surrounding_hulls().len(), 3);
        assert_eq!(layers.points_topography[0], Point2::new(-500.0, -500.0));
        assert!(layers.vegetation_objects.contains_key("tree_1"));

        // (110, 10) is the farthest building vertex from (4, 4).
        let expected = round_to(Point2::new(110.0, 10.0).distance_to(Point2::new(4.0, 4.0)), 2);
        assert_eq!(layers.building_search_radius(), Ok(expected));
    }

    #[test]
    fn radii_need_a_target() {
        let layers = LayerSet::classify(&[object(
            ObjectKind::Terrain,
            None,
            &square(0.0, 0.0, 5.0),
        )]);
        assert_eq!(layers.terrain_search_radius(), Err(LayerError::MissingTarget));
    }
}
