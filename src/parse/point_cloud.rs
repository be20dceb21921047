//! Plain-text point-cloud tiles: one `easting northing height` triple per line.
//!
//! Some county exports prefix the easting with the two-digit UTM zone; those
//! eight-digit eastings are repaired on read.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

use crate::geom::{PlanarRegion, Point2, Point3};

pub type PointCloudResult<T> = Result<T, PointCloudError>;

#[derive(Debug, Error)]
pub enum PointCloudError {
    #[error("could not read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Fewer than three fields or a non-numeric field.
    #[error("malformed point-cloud line {line} in {path}")]
    MalformedPointCloud { path: PathBuf, line: usize },
}

/// A filtered point with integer coordinates and an even height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CloudPoint {
    pub easting: i64,
    pub northing: i64,
    pub height: i64,
}

impl CloudPoint {
    #[must_use]
    pub fn xy(self) -> Point2 {
        Point2::new(self.easting as f64, self.northing as f64)
    }

    #[must_use]
    pub fn to_point3(self) -> Point3 {
        Point3::new(self.easting as f64, self.northing as f64, self.height as f64)
    }
}

/// Points grouped by quantized height, ascending.
pub type HeightBuckets = BTreeMap<i64, Vec<CloudPoint>>;

/// Strip a concatenated zone prefix from an eight-digit easting.
#[must_use]
pub fn fix_easting(easting: f64) -> f64 {
    if (10_000_000.0..100_000_000.0).contains(&easting) {
        easting % 1_000_000.0
    } else {
        easting
    }
}

/// Nearest even integer; odd integers fall to the multiple of four.
#[must_use]
pub fn quantize_height(height: f64) -> i64 {
    (height / 2.0).round_ties_even() as i64 * 2
}

/// The first `count` digits of the integer part of `value`.
#[must_use]
pub fn leading_digits(value: f64, count: usize) -> Option<u32> {
    let digits = (value.abs().trunc() as u64).to_string();
    digits.get(..count)?.parse().ok()
}

fn open(path: &Path) -> PointCloudResult<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| PointCloudError::Io {
            path: path.to_path_buf(),
            source,
        })
}

/// Visit every non-blank line as a raw triple, easting already repaired.
fn for_each_triple<R: BufRead>(
    reader: R,
    path: &Path,
    mut visit: impl FnMut([f64; 3]),
) -> PointCloudResult<()> {
    for (index, line) in reader.lines().enumerate() {
        let line = line.map_err(|source| PointCloudError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let malformed = || PointCloudError::MalformedPointCloud {
            path: path.to_path_buf(),
            line: index + 1,
        };
        let mut fields = line.split_whitespace().map(str::parse::<f64>);
        let mut triple = [0.0; 3];
        for slot in &mut triple {
            *slot = fields.next().ok_or_else(malformed)?.map_err(|_| malformed())?;
        }
        triple[0] = fix_easting(triple[0]);
        visit(triple);
    }
    Ok(())
}

/// Raw points of one tile.
pub fn read_points(path: &Path) -> PointCloudResult<Vec<Point3>> {
    parse_points(open(path)?, path)
}

pub fn parse_points<R: BufRead>(reader: R, path: &Path) -> PointCloudResult<Vec<Point3>> {
    let mut points = Vec::new();
    for_each_triple(reader, path, |t| points.push(Point3::from_array(t)))?;
    Ok(points)
}

/// Points whose XY lies strictly inside `hull`.
#[must_use]
pub fn filter_in_hull(points: &[Point3], hull: &[Point2]) -> Vec<Point3> {
    if hull.len() < 3 {
        return Vec::new();
    }
    let region = PlanarRegion::new(hull);
    points
        .iter()
        .copied()
        .filter(|p| region.contains(p.xy()))
        .collect()
}

#[must_use]
pub fn bucket_by_height(points: &[CloudPoint]) -> HeightBuckets {
    let mut buckets = HeightBuckets::new();
    for point in points {
        buckets.entry(point.height).or_default().push(*point);
    }
    buckets
}

// ─────────────────────────────────────────────────────────────────────────────
// Radius filter
// ─────────────────────────────────────────────────────────────────────────────

/// Keeps points within `radius` of `center`, quantized to integers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointCloudFilter {
    pub center: Point2,
    pub radius: f64,
}

impl PointCloudFilter {
    #[must_use]
    pub const fn new(center: Point2, radius: f64) -> Self {
        Self { center, radius }
    }

    pub fn filter_reader<R: BufRead>(
        &self,
        reader: R,
        path: &Path,
    ) -> PointCloudResult<Vec<CloudPoint>> {
        let mut kept = Vec::new();
        for_each_triple(reader, path, |[e, n, h]| {
            let point = CloudPoint {
                easting: e as i64,
                northing: n as i64,
                height: quantize_height(h),
            };
            if point.xy().distance_to(self.center) <= self.radius {
                kept.push(point);
            }
        })?;
        Ok(kept)
    }

    /// Stream every file once and keep the points inside the radius.
    pub fn filter_files<P: AsRef<Path>>(&self, paths: &[P]) -> PointCloudResult<Vec<CloudPoint>> {
        let mut kept = Vec::new();
        for path in paths {
            let path = path.as_ref();
            log::info!("filtering point cloud {}", path.display());
            let before = kept.len();
            kept.extend(self.filter_reader(open(path)?, path)?);
            log::debug!("{} points within {:.2} m", kept.len() - before, self.radius);
        }
        Ok(kept)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tile index
// ─────────────────────────────────────────────────────────────────────────────

/// Tile key: leading easting digits and leading northing digits.
pub type TileKey = (u32, u32);

fn tile_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(\d+)_(\d+)\.\w+$").expect("tile name pattern is valid"))
}

/// Tiles of one folder named `<easting>_<northing>.<ext>`.
#[derive(Debug, Clone, Default)]
pub struct TileIndex {
    tiles: BTreeMap<TileKey, PathBuf>,
}

impl TileIndex {
    /// Index every matching file; other names are ignored. When several
    /// extensions exist for one key the first in name order wins.
    pub fn scan(dir: &Path) -> PointCloudResult<Self> {
        let io_error = |source| PointCloudError::Io {
            path: dir.to_path_buf(),
            source,
        };
        let mut names: Vec<(String, PathBuf)> = fs::read_dir(dir)
            .map_err(io_error)?
            .filter_map(Result::ok)
            .filter_map(|entry| {
                let name = entry.file_name().to_str()?.to_owned();
                Some((name, entry.path()))
            })
            .collect();
        names.sort();

        let mut tiles = BTreeMap::new();
        for (name, path) in names {
            let Some(caps) = tile_name_pattern().captures(&name) else {
                continue;
            };
            let (Ok(easting), Ok(northing)) = (caps[1].parse(), caps[2].parse()) else {
                continue;
            };
            tiles.entry((easting, northing)).or_insert(path);
        }
        log::debug!("indexed {} tiles in {}", tiles.len(), dir.display());
        Ok(Self { tiles })
    }

    #[must_use]
    pub fn path_for(&self, key: TileKey) -> Option<&Path> {
        self.tiles.get(&key).map(PathBuf::as_path)
    }

    pub fn keys(&self) -> impl Iterator<Item = TileKey> + '_ {
        self.tiles.keys().copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }
}
