//! Tree remodeling: measure each vegetation footprint against the DTM/DSM
//! tiles, then scale and place a template tree mesh to match it.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use rand::Rng;
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::export::{ExportError, import_stl, write_stl};
use crate::geom::{
    GeometryError, Point2, Point3, PointSet, Transform, TriangleSet, Vec3, centroid,
    convex_hull_2d, max_distance, round_to,
};
use crate::parse::kml::PolygonObject;
use crate::parse::point_cloud::{
    PointCloudError, TileIndex, TileKey, filter_in_hull, leading_digits, read_points,
};

/// Footprints are shrunk so neighbouring crowns do not intersect.
pub const DEFAULT_SHRINK_FACTOR: f64 = 0.8;

pub type TreeResult<T> = Result<T, TreeError>;

#[derive(Debug, Error)]
pub enum TreeError {
    #[error("no {layer} points cover the footprint (tiles {keys:?})")]
    MissingTileData {
        layer: &'static str,
        keys: Vec<TileKey>,
    },
    #[error("degenerate tree: {0}")]
    DegenerateTree(String),
    #[error("no STL templates in {0}")]
    EmptyLibrary(PathBuf),
    #[error("could not read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    PointCloud(#[from] PointCloudError),
    #[error(transparent)]
    Export(#[from] ExportError),
    #[error(transparent)]
    Geometry(#[from] GeometryError),
}

// ─────────────────────────────────────────────────────────────────────────────
// Tile keys
// ─────────────────────────────────────────────────────────────────────────────

/// Which kilometre values a county publishes tiles for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Parity {
    All,
    /// Two-kilometre tiles named after their even corner.
    Even,
}

impl Parity {
    #[must_use]
    pub const fn apply(self, value: u32) -> u32 {
        match self {
            Self::Even if value % 2 == 1 => value - 1,
            _ => value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileConvention {
    pub easting_parity: Parity,
    pub northing_parity: Parity,
}

impl Default for TileConvention {
    fn default() -> Self {
        Self {
            easting_parity: Parity::All,
            northing_parity: Parity::Even,
        }
    }
}

impl TileConvention {
    #[must_use]
    pub fn for_county(county: &str) -> Self {
        match county {
            "NRW" => Self {
                easting_parity: Parity::All,
                northing_parity: Parity::All,
            },
            "Hamburg" | "Berlin" => Self {
                easting_parity: Parity::Even,
                northing_parity: Parity::Even,
            },
            _ => Self::default(),
        }
    }
}

/// Every tile a footprint may touch: the product of its distinct easting
/// and northing keys.
#[must_use]
pub fn tile_keys(footprint: &[Point2], convention: TileConvention) -> Vec<TileKey> {
    let eastings: BTreeSet<u32> = footprint
        .iter()
        .filter_map(|p| leading_digits(p.x, 3))
        .map(|e| convention.easting_parity.apply(e))
        .collect();
    let northings: BTreeSet<u32> = footprint
        .iter()
        .filter_map(|p| leading_digits(p.y, 4))
        .map(|n| convention.northing_parity.apply(n))
        .collect();
    eastings
        .iter()
        .flat_map(|&e| northings.iter().map(move |&n| (e, n)))
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Measurement
// ─────────────────────────────────────────────────────────────────────────────

/// Where and how large one tree should be.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreeSite {
    pub centroid: Point2,
    /// Lowest terrain height under the footprint.
    pub ground: f64,
    pub height: f64,
    pub diameter: f64,
}

/// DTM and DSM tiles of a project plus the county's naming convention.
#[derive(Debug, Clone)]
pub struct TreeSurvey {
    pub dtm: TileIndex,
    pub dsm: TileIndex,
    pub convention: TileConvention,
    pub shrink_factor: f64,
}

impl TreeSurvey {
    pub fn scan(dtm_dir: &Path, dsm_dir: &Path, convention: TileConvention) -> TreeResult<Self> {
        Ok(Self {
            dtm: TileIndex::scan(dtm_dir)?,
            dsm: TileIndex::scan(dsm_dir)?,
            convention,
            shrink_factor: DEFAULT_SHRINK_FACTOR,
        })
    }

    #[must_use]
    pub fn with_shrink_factor(mut self, shrink_factor: f64) -> Self {
        self.shrink_factor = shrink_factor;
        self
    }

    /// Height from the lowest terrain point to the highest surface point
    /// strictly inside the footprint hull.
    pub fn measure_tree(&self, footprint: &[Point2]) -> TreeResult<TreeSite> {
        let center = centroid(footprint)?.rounded(2);
        let hull = convex_hull_2d(footprint);
        let keys = tile_keys(footprint, self.convention);

        let ground = covered_heights(&self.dtm, &keys, &hull)?
            .into_iter()
            .reduce(f64::min)
            .ok_or_else(|| TreeError::MissingTileData {
                layer: "DTM",
                keys: keys.clone(),
            })?;
        let top = covered_heights(&self.dsm, &keys, &hull)?
            .into_iter()
            .reduce(f64::max)
            .ok_or_else(|| TreeError::MissingTileData {
                layer: "DSM",
                keys: keys.clone(),
            })?;

        let radius = max_distance(&PointSet::Flat(footprint.to_vec()), center)?;
        Ok(TreeSite {
            centroid: center,
            ground,
            height: round_to(top - ground, 2),
            diameter: self.shrink_factor * 2.0 * radius,
        })
    }
}

fn covered_heights(index: &TileIndex, keys: &[TileKey], hull: &[Point2]) -> TreeResult<Vec<f64>> {
    let mut heights = Vec::new();
    for key in keys {
        let Some(path) = index.path_for(*key) else {
            continue;
        };
        let points = read_points(path)?;
        heights.extend(filter_in_hull(&points, hull).iter().map(|p| p.z));
    }
    Ok(heights)
}

/// Extent of a template tree mesh.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreeDimensions {
    /// XY mean of the distinct vertices.
    pub center: Point2,
    pub base: f64,
    pub diameter: f64,
    pub height: f64,
}

impl TreeDimensions {
    pub fn measure(mesh: &TriangleSet) -> TreeResult<Self> {
        let mut seen = HashSet::new();
        let unique: Vec<Point3> = mesh
            .vertices()
            .filter(|p| seen.insert([p.x.to_bits(), p.y.to_bits(), p.z.to_bits()]))
            .collect();
        if unique.is_empty() {
            return Err(TreeError::DegenerateTree("template mesh is empty".into()));
        }
        let flat: Vec<Point2> = unique.iter().map(|p| p.xy()).collect();
        let center = centroid(&flat)?;
        let base = unique.iter().map(|p| p.z).fold(f64::INFINITY, f64::min);
        let top = unique.iter().map(|p| p.z).fold(f64::NEG_INFINITY, f64::max);
        let radius = max_distance(&PointSet::Flat(flat), center)?;
        Ok(Self {
            center,
            base,
            diameter: 2.0 * radius,
            height: top - base,
        })
    }
}

/// `(xy, z)` factors turning `source` into a tree of `target`'s size.
pub fn scale_factors(source: &TreeDimensions, target: &TreeSite) -> TreeResult<(f64, f64)> {
    if target.diameter <= 0.0 || target.height <= 0.0 {
        return Err(TreeError::DegenerateTree(format!(
            "target diameter {:.2} and height {:.2} must be positive",
            target.diameter, target.height
        )));
    }
    if source.diameter <= 0.0 || source.height <= 0.0 {
        return Err(TreeError::DegenerateTree(format!(
            "template diameter {:.2} and height {:.2} must be positive",
            source.diameter, source.height
        )));
    }
    Ok((
        target.diameter / source.diameter,
        target.height / source.height,
    ))
}

/// Scale the template about its own base centre, stand that centre on the
/// site and express the result relative to `reference`.
pub fn place_tree(
    template: TriangleSet,
    source: &TreeDimensions,
    site: &TreeSite,
    reference: Point3,
) -> TreeResult<TriangleSet> {
    let (width, height) = scale_factors(source, site)?;
    let transform = Transform::translate(Vec3::new(site.centroid.x, site.centroid.y, site.ground))
        * Transform::scale(width, width, height)
        * Transform::translate(Vec3::new(-source.center.x, -source.center.y, -source.base));
    Ok(template.transformed(transform).normalized(reference))
}

// ─────────────────────────────────────────────────────────────────────────────
// Templates
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeTemplate {
    /// One STL file used for every tree.
    Named(PathBuf),
    /// A folder of STL files; each tree draws one at random.
    Random(PathBuf),
}

impl TreeTemplate {
    pub fn resolve<R: Rng + ?Sized>(&self, rng: &mut R) -> TreeResult<PathBuf> {
        match self {
            Self::Named(path) => Ok(path.clone()),
            Self::Random(dir) => {
                let library = stl_library(dir)?;
                library
                    .choose(rng)
                    .cloned()
                    .ok_or_else(|| TreeError::EmptyLibrary(dir.clone()))
            }
        }
    }
}

fn stl_library(dir: &Path) -> TreeResult<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|source| TreeError::Io {
            path: dir.to_path_buf(),
            source,
        })?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("stl"))
        })
        .collect();
    files.sort();
    Ok(files)
}

// ─────────────────────────────────────────────────────────────────────────────
// Planting
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct PlantingReport {
    pub planted: Vec<PathBuf>,
    pub skipped_existing: Vec<String>,
    /// Trees without tile coverage or with a degenerate size, with the reason.
    pub failed: Vec<(String, String)>,
}

/// Output file of one remodeled tree.
#[must_use]
pub fn remodeled_path(dir: &Path, id: &str) -> PathBuf {
    dir.join(format!("{id}_remodeled.stl"))
}

/// Remodel every vegetation object whose id names a tree.
pub fn plant_trees<R: Rng + ?Sized>(
    vegetation: &BTreeMap<String, PolygonObject>,
    survey: &TreeSurvey,
    template: &TreeTemplate,
    rng: &mut R,
    reference: Point3,
    out_dir: &Path,
) -> TreeResult<PlantingReport> {
    fs::create_dir_all(out_dir).map_err(|source| TreeError::Io {
        path: out_dir.to_path_buf(),
        source,
    })?;
    let mut templates: HashMap<PathBuf, (TriangleSet, TreeDimensions)> = HashMap::new();
    let mut report = PlantingReport::default();

    for (id, object) in vegetation.iter().filter(|(id, _)| id.contains("tree")) {
        let output = remodeled_path(out_dir, id);
        if output.exists() {
            log::debug!("{} exists, skipping {id}", output.display());
            report.skipped_existing.push(id.clone());
            continue;
        }

        let site = match survey.measure_tree(&object.shape) {
            Ok(site) => site,
            Err(err @ (TreeError::MissingTileData { .. } | TreeError::DegenerateTree(_))) => {
                log::warn!("skipping tree {id}: {err}");
                report.failed.push((id.clone(), err.to_string()));
                continue;
            }
            Err(err) => return Err(err),
        };

        let path = template.resolve(rng)?;
        if !templates.contains_key(&path) {
            let mesh = import_stl(&path)?;
            let dims = TreeDimensions::measure(&mesh)?;
            templates.insert(path.clone(), (mesh, dims));
        }
        let Some((mesh, dims)) = templates.get(&path) else {
            continue;
        };

        match place_tree(mesh.clone(), dims, &site, reference) {
            Ok(placed) => {
                write_stl(&output, &placed)?;
                log::info!(
                    "planted {id}: height {:.2} m, diameter {:.2} m",
                    site.height,
                    site.diameter
                );
                report.planted.push(output);
            }
            Err(err) => {
                log::warn!("skipping tree {id}: {err}");
                report.failed.push((id.clone(), err.to_string()));
            }
        }
    }
    Ok(report)
}

/// All remodeled trees of a folder as one mesh, in file-name order.
pub fn merge_remodeled(dir: &Path) -> TreeResult<TriangleSet> {
    let mut merged = TriangleSet::new();
    if !dir.is_dir() {
        return Ok(merged);
    }
    for path in stl_library(dir)? {
        let is_remodeled = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .is_some_and(|stem| stem.ends_with("_remodeled"));
        if is_remodeled {
            merged.append(import_stl(&path)?);
        }
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;
    use crate::geom::Triangle;

    #[test]
    fn even_parity_rounds_odd_keys_down() {
        let footprint = [
            Point2::new(345_900.0, 5_677_950.0),
            Point2::new(346_100.0, 5_678_050.0),
        ];
        let nrw = tile_keys(&footprint, TileConvention::for_county("NRW"));
        assert_eq!(nrw, vec![(345, 5677), (345, 5678), (346, 5677), (346, 5678)]);

        let hamburg = tile_keys(&footprint, TileConvention::for_county("Hamburg"));
        assert_eq!(hamburg, vec![(344, 5676), (344, 5678), (346, 5676), (346, 5678)]);

        let default = tile_keys(&footprint, TileConvention::for_county("Bavaria"));
        assert_eq!(default, vec![(345, 5676), (345, 5678), (346, 5676), (346, 5678)]);
    }

    /// Pyramid of base width 4 and height 10 standing on the origin.
    fn pyramid() -> TriangleSet {
        let apex = Point3::new(0.0, 0.0, 10.0);
        let corners = [
            Point3::new(2.0, 0.0, 0.0),
            Point3::new(0.0, 2.0, 0.0),
            Point3::new(-2.0, 0.0, 0.0),
            Point3::new(0.0, -2.0, 0.0),
        ];
        (0..4)
            .map(|i| Triangle::new(corners[i], corners[(i + 1) % 4], apex))
            .collect()
    }

    #[test]
    fn template_is_scaled_to_the_measured_site() {
        let mesh = pyramid();
        let dims = TreeDimensions::measure(&mesh).unwrap();
        assert_relative_eq!(dims.diameter, 4.0);
        assert_relative_eq!(dims.height, 10.0);

        let site = TreeSite {
            centroid: Point2::new(100.0, 200.0),
            ground: 50.0,
            height: 5.0,
            diameter: 8.0,
        };
        assert_eq!(scale_factors(&dims, &site).unwrap(), (2.0, 0.5));

        let placed = place_tree(mesh, &dims, &site, Point3::new(100.0, 200.0, 50.0)).unwrap();
        let placed_dims = TreeDimensions::measure(&placed).unwrap();
        assert_relative_eq!(placed_dims.diameter, 8.0);
        assert_relative_eq!(placed_dims.height, 5.0);
        assert_relative_eq!(placed_dims.base, 0.0);
    }

    #[test]
    fn offset_template_lands_centred_on_the_ground() {
        let shift = Transform::translate(Vec3::new(5.0, 5.0, 2.0));
        let mesh = pyramid().transformed(shift);
        let dims = TreeDimensions::measure(&mesh).unwrap();
        assert_relative_eq!(dims.center.x, 5.0);
        assert_relative_eq!(dims.base, 2.0);

        let site = TreeSite {
            centroid: Point2::new(100.0, 200.0),
            ground: 50.0,
            height: 5.0,
            diameter: 8.0,
        };
        let placed = place_tree(mesh, &dims, &site, Point3::ORIGIN).unwrap();
        let placed_dims = TreeDimensions::measure(&placed).unwrap();
        assert_relative_eq!(placed_dims.center.x, 100.0, epsilon = 1e-9);
        assert_relative_eq!(placed_dims.center.y, 200.0, epsilon = 1e-9);
        assert_relative_eq!(placed_dims.base, 50.0);
        assert_relative_eq!(placed_dims.diameter, 8.0, epsilon = 1e-9);
        assert_relative_eq!(placed_dims.height, 5.0);
    }

    #[test]
    fn zero_height_site_is_degenerate() {
        let dims = TreeDimensions::measure(&pyramid()).unwrap();
        let site = TreeSite {
            centroid: Point2::default(),
            ground: 0.0,
            height: 0.0,
            diameter: 3.0,
        };
        assert!(matches!(
            scale_factors(&dims, &site),
            Err(TreeError::DegenerateTree(_))
        ));
    }

    #[test]
    fn random_template_is_reproducible_per_seed() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["oak.stl", "birch.STL", "pine.stl", "notes.txt"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        let template = TreeTemplate::Random(dir.path().to_path_buf());
        let first = template.resolve(&mut StdRng::seed_from_u64(3)).unwrap();
        let second = template.resolve(&mut StdRng::seed_from_u64(3)).unwrap();
        assert_eq!(first, second);
        assert_ne!(first.extension().unwrap(), "txt");

        let empty = tempfile::tempdir().unwrap();
        assert!(matches!(
            TreeTemplate::Random(empty.path().to_path_buf()).resolve(&mut StdRng::seed_from_u64(3)),
            Err(TreeError::EmptyLibrary(_))
        ));
    }

    #[test]
    fn footprint_without_tiles_reports_missing_data() {
        let dir = tempfile::tempdir().unwrap();
        let survey = TreeSurvey::scan(dir.path(), dir.path(), TileConvention::default()).unwrap();
        let footprint = [
            Point2::new(345_000.0, 5_676_000.0),
            Point2::new(345_004.0, 5_676_000.0),
            Point2::new(345_004.0, 5_676_004.0),
            Point2::new(345_000.0, 5_676_000.0),
        ];
        assert!(matches!(
            survey.measure_tree(&footprint),
            Err(TreeError::MissingTileData { layer: "DTM", .. })
        ));
    }
}
