//! Building classification, upload and surface triangulation.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

#[cfg(feature = "parallel")]
use rayon::prelude::*;
use serde::Serialize;

use crate::geom::{Point2, TriangleSet, TriangulationError, point_in_polygon, round_to, triangulate_surface};
use crate::layers::LayerSet;
use crate::parse::citygml::BuildingRecord;
use crate::parse::point_cloud::leading_digits;
use crate::store::{
    StoreResult, StoredBuilding, SurfaceRecord, SurfaceType, SurroundingsStore, SURROUNDING_PREFIX,
    TARGET_PREFIX, strip_prefix,
};

// ─────────────────────────────────────────────────────────────────────────────
// Upload
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadReport {
    pub targets: Vec<String>,
    pub surroundings: Vec<String>,
    /// Names that matched a hull but were already stored.
    pub already_stored: Vec<String>,
}

/// Kilometre tile label of a UTM position, e.g. `344-5676`.
#[must_use]
pub fn quadrant(center: Point2) -> String {
    match (leading_digits(center.x, 3), leading_digits(center.y, 4)) {
        (Some(e), Some(n)) => format!("{e}-{n}"),
        _ => String::new(),
    }
}

fn check_points(record: &BuildingRecord) -> Vec<Point2> {
    let mut points = vec![record.utm_center];
    points.extend(
        record
            .surfaces
            .iter()
            .filter(|s| s.surface_type == SurfaceType::Ground)
            .flat_map(|s| s.polygon.iter().map(|p| p.xy())),
    );
    points
}

fn inside_any(points: &[Point2], hulls: &[Vec<Point2>]) -> bool {
    hulls
        .iter()
        .any(|hull| points.iter().any(|p| point_in_polygon(*p, hull)))
}

fn payload(project_id: u64, name: String, record: &BuildingRecord, target: bool) -> StoredBuilding {
    StoredBuilding {
        id: None,
        project_id,
        name,
        quadrant: quadrant(record.utm_center),
        latitude: round_to(record.lat_lon.0, 4),
        longitude: round_to(record.lat_lon.1, 4),
        utm_x: record.utm_center.x,
        utm_y: record.utm_center.y,
        distance: record.distance_to_target,
        target,
        data: record.surfaces.clone(),
    }
}

/// Store every parsed building lying inside a building outline.
///
/// A building inside any outline is stored as surrounding (`SB_`) unless it
/// is already a stored target; inside a target outline it is also stored as
/// target (`TB_`). [`remove_overlapping_surroundings`] drops the duplicate.
pub fn upload_buildings(
    store: &dyn SurroundingsStore,
    project_id: u64,
    records: &[BuildingRecord],
    layers: &LayerSet,
) -> StoreResult<UploadReport> {
    let target_hulls = layers.target_hulls();
    let surrounding_hulls = layers.surrounding_hulls();

    let mut stored: HashSet<String> = store
        .list_buildings(project_id, None)?
        .into_iter()
        .map(|b| b.name)
        .collect();
    let stored_targets: HashSet<String> = stored
        .iter()
        .filter_map(|name| name.strip_prefix(TARGET_PREFIX))
        .map(str::to_owned)
        .collect();

    let mut report = UploadReport::default();
    for record in records {
        let points = check_points(record);

        if inside_any(&points, &surrounding_hulls) {
            let name = format!("{SURROUNDING_PREFIX}{}", record.id);
            if stored.contains(&name) || stored_targets.contains(&record.id) {
                report.already_stored.push(name);
            } else {
                store.create_building(&payload(project_id, name.clone(), record, false))?;
                stored.insert(name.clone());
                report.surroundings.push(name);
            }
        }

        if inside_any(&points, &target_hulls) {
            let name = format!("{TARGET_PREFIX}{}", record.id);
            if stored.contains(&name) {
                report.already_stored.push(name);
            } else {
                store.create_building(&payload(project_id, name.clone(), record, true))?;
                stored.insert(name.clone());
                report.targets.push(name);
            }
        }
    }
    log::info!(
        "uploaded {} target and {} surrounding buildings ({} already stored)",
        report.targets.len(),
        report.surroundings.len(),
        report.already_stored.len()
    );
    Ok(report)
}

/// Delete every surrounding building that is also stored as a target.
/// Returns the deleted names.
pub fn remove_overlapping_surroundings(
    store: &dyn SurroundingsStore,
    project_id: u64,
) -> StoreResult<Vec<String>> {
    let targets: HashSet<String> = store
        .list_buildings(project_id, Some(true))?
        .iter()
        .map(|b| strip_prefix(&b.name).to_owned())
        .collect();

    let mut removed = Vec::new();
    for building in store.list_buildings(project_id, Some(false))? {
        if !targets.contains(strip_prefix(&building.name)) {
            continue;
        }
        if let Some(id) = building.id {
            store.delete_building(id)?;
            log::debug!("removed {} in favour of its target record", building.name);
            removed.push(building.name);
        }
    }
    Ok(removed)
}

// ─────────────────────────────────────────────────────────────────────────────
// Triangulation
// ─────────────────────────────────────────────────────────────────────────────

/// Surfaces that could not be triangulated, keyed by building name.
/// Buildings without such surfaces are absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FaultyReport(BTreeMap<String, Vec<SurfaceRecord>>);

impl FaultyReport {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn get(&self, building: &str) -> Option<&[SurfaceRecord]> {
        self.0.get(building).map(Vec::as_slice)
    }

    pub fn buildings(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn merge(&mut self, other: Self) {
        for (building, surfaces) in other.0 {
            self.insert(building, surfaces);
        }
    }

    fn insert(&mut self, building: String, surfaces: Vec<SurfaceRecord>) {
        if !surfaces.is_empty() {
            self.0.entry(building).or_default().extend(surfaces);
        }
    }

    pub fn write(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.0)?;
        fs::write(path, json)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildingTriangulation {
    pub triangles: TriangleSet,
    pub faulty: FaultyReport,
}

struct BuildingOutcome {
    name: String,
    triangles: TriangleSet,
    faulty: Vec<SurfaceRecord>,
}

fn triangulate_building(building: &StoredBuilding) -> BuildingOutcome {
    let mut triangles = TriangleSet::new();
    let mut faulty = Vec::new();
    for surface in &building.data {
        match triangulate_surface(&surface.polygon) {
            Ok(result) => triangles.extend(result.triangles),
            Err(err) => {
                log_faulty(&building.name, surface, &err);
                faulty.push(surface.clone());
            }
        }
    }
    BuildingOutcome {
        name: building.name.clone(),
        triangles,
        faulty,
    }
}

fn log_faulty(building: &str, surface: &SurfaceRecord, err: &TriangulationError) {
    log::debug!("{building}/{}: {err}", surface.id);
}

#[cfg(feature = "parallel")]
fn triangulate_all(buildings: &[StoredBuilding]) -> Vec<BuildingOutcome> {
    buildings.par_iter().map(triangulate_building).collect()
}

#[cfg(not(feature = "parallel"))]
fn triangulate_all(buildings: &[StoredBuilding]) -> Vec<BuildingOutcome> {
    buildings.iter().map(triangulate_building).collect()
}

/// Triangulate every stored target or surrounding building of a project.
///
/// Triangles are merged in store order. Surfaces that fail are collected in
/// the faulty report and skipped.
pub fn triangulate_buildings(
    store: &dyn SurroundingsStore,
    project_id: u64,
    target: bool,
) -> StoreResult<BuildingTriangulation> {
    let buildings = store.list_buildings(project_id, Some(target))?;
    let mut result = BuildingTriangulation::default();
    let mut faulty_surfaces = 0usize;
    for outcome in triangulate_all(&buildings) {
        result.triangles.append(outcome.triangles);
        faulty_surfaces += outcome.faulty.len();
        result.faulty.insert(outcome.name, outcome.faulty);
    }
    log::info!(
        "triangulated {} {} buildings into {} triangles, {} faulty surfaces in {} buildings",
        buildings.len(),
        if target { "target" } else { "surrounding" },
        result.triangles.len(),
        faulty_surfaces,
        result.faulty.len()
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::geom::Point3;
    use crate::parse::kml::{ObjectKind, PolygonObject};
    use crate::store::MemoryStore;

    fn square(x: f64, y: f64, size: f64) -> Vec<Point2> {
        vec![
            Point2::new(x, y),
            Point2::new(x + size, y),
            Point2::new(x + size, y + size),
            Point2::new(x, y + size),
            Point2::new(x, y),
        ]
    }

    fn layers() -> LayerSet {
        let object = |kind, shape: Vec<Point2>| PolygonObject {
            centroid: shape[0],
            kind,
            id: None,
            shape,
        };
        LayerSet::classify(&[
            object(ObjectKind::TargetBuilding, square(0.0, 0.0, 10.0)),
            object(ObjectKind::SurroundingBuildings, square(20.0, 0.0, 10.0)),
        ])
    }

    fn record(id: &str, x: f64, y: f64) -> BuildingRecord {
        let ground: Vec<Point3> = square(x - 1.0, y - 1.0, 2.0)
            .into_iter()
            .map(|p| p.with_z(0.0))
            .collect();
        BuildingRecord {
            id: id.to_owned(),
            utm_center: Point2::new(x, y),
            lat_lon: (51.234_567_8, 6.789_012_3),
            distance_to_target: 0.0,
            surfaces: vec![SurfaceRecord {
                id: "GROUND_1".into(),
                surface_type: SurfaceType::Ground,
                polygon: ground,
            }],
        }
    }

    #[test]
    fn targets_win_over_their_surrounding_duplicates() {
        let store = MemoryStore::new();
        let records = [record("a", 5.0, 5.0), record("b", 25.0, 5.0), record("c", 50.0, 50.0)];

        let report = upload_buildings(&store, 1, &records, &layers()).unwrap();
        assert_eq!(report.targets, vec!["TB_a"]);
        assert_eq!(report.surroundings, vec!["SB_a", "SB_b"]);

        let removed = remove_overlapping_surroundings(&store, 1).unwrap();
        assert_eq!(removed, vec!["SB_a"]);
        assert_eq!(store.building_names(1).unwrap(), vec!["TB_a", "SB_b"]);

        let again = upload_buildings(&store, 1, &records, &layers()).unwrap();
        assert!(again.targets.is_empty() && again.surroundings.is_empty());
        assert_eq!(again.already_stored, vec!["SB_a", "TB_a", "SB_b"]);
    }

    #[test]
    fn payload_rounds_position_and_labels_the_tile() {
        let building = payload(3, "SB_x".into(), &record("x", 344_005.0, 5_676_003.0), false);
        assert_eq!(building.quadrant, "344-5676");
        assert_relative_eq!(building.latitude, 51.2346);
        assert_relative_eq!(building.longitude, 6.789);
    }

    #[test]
    fn faulty_report_omits_clean_buildings() {
        let store = MemoryStore::new();
        let mut clean = payload(1, "TB_clean".into(), &record("clean", 5.0, 5.0), true);
        clean.data[0].polygon = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(4.0, 0.0, 0.0),
            Point3::new(4.0, 4.0, 0.0),
            Point3::new(0.0, 4.0, 0.0),
            Point3::new(0.0, 0.0, 0.0),
        ];
        let mut broken = clean.clone();
        broken.name = "TB_broken".into();
        broken.data[0].polygon.truncate(2);
        store.create_building(&clean).unwrap();
        store.create_building(&broken).unwrap();

        let result = triangulate_buildings(&store, 1, true).unwrap();
        assert_eq!(result.triangles.len(), 2);
        assert_eq!(result.faulty.buildings().collect::<Vec<_>>(), vec!["TB_broken"]);
        assert_eq!(result.faulty.get("TB_broken").map(<[_]>::len), Some(1));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("FaultyPolygons").join("faulty_polygons.json");
        result.faulty.write(&path).unwrap();
        let written: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["TB_broken"][0]["ID"], "GROUND_1");
    }
}
