//! Terrain from DTM points: height-sliced outlines posted to the store and a
//! Poisson surface for the STL export.

use std::collections::HashSet;

#[cfg(feature = "parallel")]
use rayon::prelude::*;
use thiserror::Error;

use crate::geom::{AlphaShape, Point2, ReconstructionError, TriangleSet, alpha_shape, reconstruct};
use crate::parse::point_cloud::{CloudPoint, HeightBuckets};
use crate::store::{StoreError, StoredTerrain, SurroundingsStore, TERRAIN_PREFIX, TerrainSurface};

/// Default alpha for height-slice outlines; triangles with a circumradius of
/// 25 m or more are dropped.
pub const DEFAULT_ALPHA: f64 = 0.04;

pub type TerrainResult<T> = Result<T, TerrainError>;

#[derive(Debug, Error)]
pub enum TerrainError {
    #[error("alpha shape of height {height} is empty")]
    EmptyShape { height: i64 },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Reconstruction(#[from] ReconstructionError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketFailure {
    pub height: i64,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TerrainReport {
    /// Names of the records created, ascending by height.
    pub posted: Vec<String>,
    pub skipped_existing: Vec<String>,
    pub failed_buckets: Vec<BucketFailure>,
}

#[must_use]
pub fn terrain_name(height: i64) -> String {
    format!("{TERRAIN_PREFIX}{height}")
}

/// Outline surfaces of one height slice.
///
/// Every exterior ring becomes one surface `<height>_<n>` (from 1), closed,
/// at Z = `height`, with coordinates truncated to whole metres. Inputs too
/// small or collinear for a polygon pass through as one raw ring.
#[allow(clippy::cast_possible_truncation)]
pub fn terrain_surfaces(
    height: i64,
    points: &[CloudPoint],
    alpha: f64,
) -> TerrainResult<Vec<TerrainSurface>> {
    let flat: Vec<Point2> = points.iter().map(|p| p.xy()).collect();
    let shape = alpha_shape(&flat, alpha);
    if shape == AlphaShape::Empty {
        return Err(TerrainError::EmptyShape { height });
    }
    Ok(shape
        .exterior_rings()
        .into_iter()
        .enumerate()
        .map(|(index, mut ring)| {
            if let (Some(&first), Some(&last)) = (ring.first(), ring.last()) {
                if first != last {
                    ring.push(first);
                }
            }
            TerrainSurface {
                id: format!("{height}_{}", index + 1),
                kind: "Terrain".to_owned(),
                polygon: ring
                    .iter()
                    .map(|p| [p.x.trunc() as i64, p.y.trunc() as i64, height])
                    .collect(),
            }
        })
        .collect())
}

enum BucketOutcome {
    Posted(String),
    Skipped(String),
    Failed(BucketFailure),
}

fn post_bucket(
    store: &dyn SurroundingsStore,
    project_id: u64,
    existing: &HashSet<String>,
    height: i64,
    points: &[CloudPoint],
    alpha: f64,
) -> Option<BucketOutcome> {
    if height <= 0 {
        return None;
    }
    let name = terrain_name(height);
    if existing.contains(&name) {
        return Some(BucketOutcome::Skipped(name));
    }
    let record = terrain_surfaces(height, points, alpha).and_then(|data| {
        store
            .create_terrain(&StoredTerrain {
                id: None,
                project_id,
                name: name.clone(),
                data,
            })
            .map_err(TerrainError::from)
    });
    Some(match record {
        Ok(_) => {
            log::debug!("posted {name} from {} points", points.len());
            BucketOutcome::Posted(name)
        }
        Err(err) => {
            log::warn!("terrain bucket {height} failed: {err}");
            BucketOutcome::Failed(BucketFailure {
                height,
                reason: err.to_string(),
            })
        }
    })
}

#[cfg(feature = "parallel")]
fn post_all(
    store: &dyn SurroundingsStore,
    project_id: u64,
    existing: &HashSet<String>,
    buckets: &HeightBuckets,
    alpha: f64,
) -> Vec<BucketOutcome> {
    let buckets: Vec<(&i64, &Vec<CloudPoint>)> = buckets.iter().collect();
    buckets
        .par_iter()
        .filter_map(|(height, points)| post_bucket(store, project_id, existing, **height, points, alpha))
        .collect()
}

#[cfg(not(feature = "parallel"))]
fn post_all(
    store: &dyn SurroundingsStore,
    project_id: u64,
    existing: &HashSet<String>,
    buckets: &HeightBuckets,
    alpha: f64,
) -> Vec<BucketOutcome> {
    buckets
        .iter()
        .filter_map(|(height, points)| post_bucket(store, project_id, existing, *height, points, alpha))
        .collect()
}

/// Post one `TR_<height>` record per positive height slice not yet stored.
///
/// A failing slice is logged and reported; the remaining slices still run.
pub fn post_terrain_objects(
    store: &dyn SurroundingsStore,
    project_id: u64,
    buckets: &HeightBuckets,
    alpha: f64,
) -> TerrainResult<TerrainReport> {
    let existing: HashSet<String> = store
        .list_terrain(project_id)?
        .into_iter()
        .map(|terrain| terrain.name)
        .collect();

    let mut report = TerrainReport::default();
    for outcome in post_all(store, project_id, &existing, buckets, alpha) {
        match outcome {
            BucketOutcome::Posted(name) => report.posted.push(name),
            BucketOutcome::Skipped(name) => report.skipped_existing.push(name),
            BucketOutcome::Failed(failure) => report.failed_buckets.push(failure),
        }
    }
    log::info!(
        "terrain: {} posted, {} already stored, {} failed",
        report.posted.len(),
        report.skipped_existing.len(),
        report.failed_buckets.len()
    );
    Ok(report)
}

/// Poisson surface through every filtered DTM point.
pub fn reconstruct_terrain(points: &[CloudPoint], depth: u32) -> TerrainResult<TriangleSet> {
    let samples: Vec<_> = points.iter().map(|p| p.to_point3()).collect();
    let mesh = reconstruct(&samples, depth)?;
    log::info!(
        "terrain surface: {} vertices, {} triangles",
        mesh.vertex_count(),
        mesh.triangle_count()
    );
    Ok(mesh.to_triangle_set())
}
