//! Per-project stages: buildings, terrain and trees.
//!
//! A [`Pipeline`] owns nothing global. The project folder, the configuration
//! and the store are passed in, and every stage reads its inputs from the
//! project's `GeospatialData` folder and writes into `DigitalTwin`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rand::Rng;

use crate::buildings::{
    FaultyReport, UploadReport, remove_overlapping_surroundings, triangulate_buildings,
    upload_buildings,
};
use crate::config::PipelineConfig;
use crate::error::{Error, Result};
use crate::export::{Exporter, ObjectType, reference_point_from_ground, write_stl};
use crate::geom::Point3;
use crate::layers::LayerSet;
use crate::parse::citygml::parse_buildings_file;
use crate::parse::kml::parse_kml_file;
use crate::parse::point_cloud::{PointCloudFilter, bucket_by_height};
use crate::store::SurroundingsStore;
use crate::terrain::{TerrainReport, post_terrain_objects, reconstruct_terrain};
use crate::trees::{PlantingReport, TreeSurvey, TreeTemplate, merge_remodeled, plant_trees};

// ─────────────────────────────────────────────────────────────────────────────
// Project layout
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectContext {
    pub root: PathBuf,
    pub project_id: u64,
}

impl ProjectContext {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, project_id: u64) -> Self {
        Self {
            root: root.into(),
            project_id,
        }
    }

    fn geospatial(&self, folder: &str) -> PathBuf {
        self.root.join("GeospatialData").join(folder)
    }

    #[must_use]
    pub fn kml_dir(&self) -> PathBuf {
        self.geospatial("KML")
    }

    #[must_use]
    pub fn dtm_dir(&self) -> PathBuf {
        self.geospatial("DTM")
    }

    #[must_use]
    pub fn dsm_dir(&self) -> PathBuf {
        self.geospatial("DSM")
    }

    #[must_use]
    pub fn gml_dir(&self) -> PathBuf {
        self.geospatial("GML")
    }

    #[must_use]
    pub fn digital_twin_dir(&self) -> PathBuf {
        self.root.join("DigitalTwin")
    }

    #[must_use]
    pub fn stl_dir(&self) -> PathBuf {
        self.digital_twin_dir().join("STLfiles")
    }

    #[must_use]
    pub fn remodeled_trees_dir(&self) -> PathBuf {
        self.stl_dir().join("remodeled_trees")
    }

    #[must_use]
    pub fn faulty_polygons_path(&self) -> PathBuf {
        self.digital_twin_dir()
            .join("FaultyPolygons")
            .join("faulty_polygons.json")
    }

    #[must_use]
    pub fn visualization_dir(&self) -> PathBuf {
        self.digital_twin_dir().join("Visualization").join("output")
    }

    pub fn ensure_output_dirs(&self) -> Result<()> {
        let faulty_dir = self.digital_twin_dir().join("FaultyPolygons");
        for dir in [
            self.stl_dir(),
            self.remodeled_trees_dir(),
            faulty_dir,
            self.visualization_dir(),
        ] {
            fs::create_dir_all(&dir).map_err(|source| Error::Io { path: dir, source })?;
        }
        Ok(())
    }

    /// The KML file of the project; the first by name when several exist.
    pub fn kml_file(&self) -> Result<PathBuf> {
        let dir = self.kml_dir();
        list_files(&dir)?
            .into_iter()
            .find(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("kml"))
            })
            .ok_or(Error::MissingInput { path: dir })
    }
}

/// Regular files of a folder, sorted by name.
fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|source| Error::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(std::result::Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    files.sort();
    Ok(files)
}

// ─────────────────────────────────────────────────────────────────────────────
// Stage summaries
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct BuildingsSummary {
    pub upload: UploadReport,
    pub removed: Vec<String>,
    pub faulty: FaultyReport,
    pub target_triangles: usize,
    pub surrounding_triangles: usize,
}

#[derive(Debug)]
pub struct TerrainSummary {
    pub report: TerrainReport,
    pub points: usize,
    pub triangles: usize,
}

#[derive(Debug)]
pub struct TreesSummary {
    pub report: PlantingReport,
    pub triangles: usize,
}

// ─────────────────────────────────────────────────────────────────────────────
// Pipeline
// ─────────────────────────────────────────────────────────────────────────────

pub struct Pipeline {
    ctx: ProjectContext,
    config: PipelineConfig,
    store: Arc<dyn SurroundingsStore>,
}

impl Pipeline {
    #[must_use]
    pub fn new(ctx: ProjectContext, config: PipelineConfig, store: Arc<dyn SurroundingsStore>) -> Self {
        Self { ctx, config, store }
    }

    #[must_use]
    pub fn context(&self) -> &ProjectContext {
        &self.ctx
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn project_id(&self) -> u64 {
        self.ctx.project_id
    }

    fn exporter(&self) -> Result<Exporter> {
        Ok(Exporter::new(self.ctx.stl_dir(), self.config.export_table()?))
    }

    /// Classified KML layers of the project.
    pub fn layers(&self) -> Result<LayerSet> {
        let markers = self.config.markers()?;
        let objects = parse_kml_file(&self.ctx.kml_file()?, &markers)?;
        log::info!("{} polygons in the project KML", objects.len());
        Ok(LayerSet::classify(&objects))
    }

    /// Origin shared by every exported mesh, from the stored target buildings.
    pub fn reference_point(&self) -> Result<Point3> {
        let targets = self.store.list_buildings(self.project_id(), Some(true))?;
        Ok(reference_point_from_ground(&targets)?)
    }

    /// Parse the CityGML files, store the buildings near the target and
    /// export their triangulated surfaces.
    pub fn buildings(&self) -> Result<BuildingsSummary> {
        self.ctx.ensure_output_dirs()?;
        let layers = self.layers()?;
        let target = layers.target_centroid()?;
        let perimeter = layers.building_search_radius()?;
        let county = self.config.county_config()?;

        let mut records = Vec::new();
        for path in list_files(&self.ctx.gml_dir())? {
            log::info!("parsing buildings from {}", path.display());
            records.extend(parse_buildings_file(&path, &county, target, perimeter)?);
        }
        let store = self.store.as_ref();
        let upload = upload_buildings(store, self.project_id(), &records, &layers)?;
        let removed = remove_overlapping_surroundings(store, self.project_id())?;

        let reference = self.reference_point()?;
        let targets = triangulate_buildings(store, self.project_id(), true)?;
        let surroundings = triangulate_buildings(store, self.project_id(), false)?;

        let mut faulty = targets.faulty;
        faulty.merge(surroundings.faulty);
        let faulty_path = self.ctx.faulty_polygons_path();
        faulty.write(&faulty_path).map_err(|source| Error::Io {
            path: faulty_path,
            source,
        })?;

        let target_mesh = targets.triangles.normalized(reference);
        let surrounding_mesh = surroundings.triangles.normalized(reference);
        let exporter = self.exporter()?;
        exporter.export(&target_mesh, ObjectType::TargetBuildings)?;
        exporter.export(&surrounding_mesh, ObjectType::SurroundingBuildings)?;
        let mut all = target_mesh.clone();
        all.append(surrounding_mesh.clone());
        exporter.export(&all, ObjectType::Buildings)?;

        Ok(BuildingsSummary {
            upload,
            removed,
            faulty,
            target_triangles: target_mesh.len(),
            surrounding_triangles: surrounding_mesh.len(),
        })
    }

    /// Post the height-sliced terrain outlines and export the Poisson surface.
    pub fn terrain(&self) -> Result<TerrainSummary> {
        self.ctx.ensure_output_dirs()?;
        let layers = self.layers()?;
        let filter = PointCloudFilter::new(layers.target_centroid()?, layers.terrain_search_radius()?);
        let tiles = list_files(&self.ctx.dtm_dir())?;
        let points = filter.filter_files(tiles.as_slice())?;
        log::info!("{} terrain points within {:.2} m", points.len(), filter.radius);

        let buckets = bucket_by_height(&points);
        let report = post_terrain_objects(
            self.store.as_ref(),
            self.project_id(),
            &buckets,
            self.config.alpha,
        )?;

        let depth = self.config.poisson_depth;
        let surface = reconstruct_terrain(&points, depth)?;
        // STL stores f32; raw UTM northings would lose sub-metre detail.
        let reference = self.reference_point()?;
        let normalized = surface.normalized(reference);
        let preview = self
            .ctx
            .visualization_dir()
            .join(format!("poisson_mesh_terrain_depth_{depth}.stl"));
        write_stl(&preview, &normalized)?;
        self.exporter()?.export(&normalized, ObjectType::Terrain)?;

        Ok(TerrainSummary {
            report,
            points: points.len(),
            triangles: normalized.len(),
        })
    }

    /// Remodel the project's trees from `template` and export them as the
    /// vegetation mesh.
    pub fn trees<R: Rng + ?Sized>(&self, template: &TreeTemplate, rng: &mut R) -> Result<TreesSummary> {
        self.ctx.ensure_output_dirs()?;
        let layers = self.layers()?;
        let reference = self.reference_point()?;
        let survey = TreeSurvey::scan(
            &self.ctx.dtm_dir(),
            &self.ctx.dsm_dir(),
            self.config.tile_convention(),
        )?
        .with_shrink_factor(self.config.tree_shrink_factor);

        let out_dir = self.ctx.remodeled_trees_dir();
        let report = plant_trees(
            &layers.vegetation_objects,
            &survey,
            template,
            rng,
            reference,
            &out_dir,
        )?;
        let merged = merge_remodeled(&out_dir)?;
        self.exporter()?.export(&merged, ObjectType::Vegetation)?;

        Ok(TreesSummary {
            report,
            triangles: merged.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_follows_the_project_folder() {
        let ctx = ProjectContext::new("/projects/demo", 4);
        assert_eq!(ctx.dtm_dir(), PathBuf::from("/projects/demo/GeospatialData/DTM"));
        assert_eq!(
            ctx.remodeled_trees_dir(),
            PathBuf::from("/projects/demo/DigitalTwin/STLfiles/remodeled_trees")
        );
        assert_eq!(
            ctx.faulty_polygons_path(),
            PathBuf::from("/projects/demo/DigitalTwin/FaultyPolygons/faulty_polygons.json")
        );
    }

    #[test]
    fn missing_kml_is_reported_with_its_folder() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ProjectContext::new(dir.path(), 1);
        fs::create_dir_all(ctx.kml_dir()).unwrap();
        fs::write(ctx.kml_dir().join("readme.txt"), "").unwrap();
        assert!(matches!(
            ctx.kml_file(),
            Err(Error::MissingInput { path }) if path == ctx.kml_dir()
        ));
    }
}
