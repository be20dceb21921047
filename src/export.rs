//! Binary STL output keyed by object type.
//!
//! Every exported object lands in the project's STL folder under the name
//! the [`ExportTable`] assigns to its [`ObjectType`]. Files are written with
//! `stl_io`, normals recomputed from the vertex winding.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;

use crate::geom::{Point3, Triangle, TriangleSet, Vec3, round_to};
use crate::store::StoredBuilding;

pub type ExportResult<T> = Result<T, ExportError>;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("STL I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unknown object type `{0}` in export table")]
    UnknownObjectType(String),
    #[error("export table maps {0} to an empty file name")]
    EmptyFilename(ObjectType),
    #[error("no GROUND surface among the target buildings")]
    NoGroundSurface,
}

// ─────────────────────────────────────────────────────────────────────────────
// Object types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectType {
    Terrain,
    Vegetation,
    TargetBuildings,
    SurroundingBuildings,
    Static,
    Buildings,
    Windows,
    WindowsWithTarget,
}

impl ObjectType {
    pub const ALL: [Self; 8] = [
        Self::Terrain,
        Self::Vegetation,
        Self::TargetBuildings,
        Self::SurroundingBuildings,
        Self::Static,
        Self::Buildings,
        Self::Windows,
        Self::WindowsWithTarget,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Terrain => "Terrain",
            Self::Vegetation => "Vegetation",
            Self::TargetBuildings => "Target_Buildings",
            Self::SurroundingBuildings => "Surrounding_Buildings",
            Self::Static => "Static",
            Self::Buildings => "Buildings",
            Self::Windows => "Windows",
            Self::WindowsWithTarget => "Windows+TB",
        }
    }

    const fn default_filename(self) -> &'static str {
        match self {
            Self::Terrain => "terrain.stl",
            Self::Vegetation => "vegetation.stl",
            Self::TargetBuildings => "target_buildings.stl",
            Self::SurroundingBuildings => "surrounding_buildings.stl",
            Self::Static => "static_objects.stl",
            Self::Buildings => "all_buildings.stl",
            Self::Windows => "windows.stl",
            Self::WindowsWithTarget => "windows+tb.stl",
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectType {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ExportError::UnknownObjectType(s.to_owned()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Export table
// ─────────────────────────────────────────────────────────────────────────────

/// Output file name per object type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportTable {
    files: BTreeMap<ObjectType, String>,
}

impl Default for ExportTable {
    fn default() -> Self {
        Self {
            files: ObjectType::ALL
                .into_iter()
                .map(|kind| (kind, kind.default_filename().to_owned()))
                .collect(),
        }
    }
}

impl ExportTable {
    /// Overlay configured names on the default table. Keys must name an
    /// [`ObjectType`].
    pub fn from_map(overrides: &BTreeMap<String, String>) -> ExportResult<Self> {
        let mut table = Self::default();
        for (key, file) in overrides {
            let kind: ObjectType = key.parse()?;
            if file.trim().is_empty() {
                return Err(ExportError::EmptyFilename(kind));
            }
            table.files.insert(kind, file.clone());
        }
        Ok(table)
    }

    #[must_use]
    pub fn filename(&self, kind: ObjectType) -> &str {
        self.files
            .get(&kind)
            .map_or_else(|| kind.default_filename(), String::as_str)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Exporter
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Exporter {
    dir: PathBuf,
    table: ExportTable,
}

impl Exporter {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, table: ExportTable) -> Self {
        Self {
            dir: dir.into(),
            table,
        }
    }

    #[must_use]
    pub fn path_for(&self, kind: ObjectType) -> PathBuf {
        self.dir.join(self.table.filename(kind))
    }

    /// Write `triangles` as the STL file of `kind`, creating the folder.
    pub fn export(&self, triangles: &TriangleSet, kind: ObjectType) -> ExportResult<PathBuf> {
        fs::create_dir_all(&self.dir).map_err(|source| ExportError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let path = self.path_for(kind);
        write_stl(&path, triangles)?;
        log::info!("exported {} triangles of {kind} to {}", triangles.len(), path.display());
        Ok(path)
    }
}

#[allow(clippy::cast_possible_truncation)]
fn to_f32(p: Point3) -> [f32; 3] {
    [p.x as f32, p.y as f32, p.z as f32]
}

/// Write a binary STL file. Vertices are stored as `f32`, so UTM meshes
/// should be normalized first.
pub fn write_stl(path: &Path, triangles: &TriangleSet) -> ExportResult<()> {
    let io_err = |source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mesh: Vec<stl_io::Triangle> = triangles
        .iter()
        .map(|t| {
            let normal = t.normal().unwrap_or(Vec3::ZERO);
            let [a, b, c] = *t.vertices();
            stl_io::Triangle {
                normal: stl_io::Normal::new(to_f32(Point3::new(normal.x, normal.y, normal.z))),
                vertices: [
                    stl_io::Vertex::new(to_f32(a)),
                    stl_io::Vertex::new(to_f32(b)),
                    stl_io::Vertex::new(to_f32(c)),
                ],
            }
        })
        .collect();
    let mut writer = BufWriter::new(File::create(path).map_err(io_err)?);
    stl_io::write_stl(&mut writer, mesh.iter()).map_err(io_err)
}

/// Read an ASCII or binary STL file.
pub fn import_stl(path: &Path) -> ExportResult<TriangleSet> {
    let io_err = |source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = BufReader::new(File::open(path).map_err(io_err)?);
    let stl = stl_io::create_stl_reader(&mut reader).map_err(io_err)?;
    let mut set = TriangleSet::new();
    for triangle in stl {
        let triangle = triangle.map_err(io_err)?;
        let vertex = |i: usize| {
            let v = triangle.vertices[i];
            Point3::new(f64::from(v[0]), f64::from(v[1]), f64::from(v[2]))
        };
        set.push(Triangle::new(vertex(0), vertex(1), vertex(2)));
    }
    log::debug!("imported {} triangles from {}", set.len(), path.display());
    Ok(set)
}

/// Shared origin of every output mesh: mean of all GROUND vertices of the
/// target buildings, in millimetres.
#[allow(clippy::cast_precision_loss)]
pub fn reference_point_from_ground(targets: &[StoredBuilding]) -> ExportResult<Point3> {
    let vertices: Vec<Point3> = targets
        .iter()
        .flat_map(StoredBuilding::ground_surfaces)
        .flat_map(|surface| surface.polygon.iter().copied())
        .collect();
    if vertices.is_empty() {
        return Err(ExportError::NoGroundSurface);
    }
    let n = vertices.len() as f64;
    let sum = vertices
        .iter()
        .fold(Point3::ORIGIN, |acc, p| Point3::new(acc.x + p.x, acc.y + p.y, acc.z + p.z));
    Ok(Point3::new(
        round_to(sum.x / n, 3),
        round_to(sum.y / n, 3),
        round_to(sum.z / n, 3),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{SurfaceRecord, SurfaceType};

    #[test]
    fn table_overrides_validate_keys() {
        let mut overrides = BTreeMap::new();
        overrides.insert("Windows+TB".to_owned(), "glass.stl".to_owned());
        let table = ExportTable::from_map(&overrides).unwrap();
        assert_eq!(table.filename(ObjectType::WindowsWithTarget), "glass.stl");
        assert_eq!(table.filename(ObjectType::Terrain), "terrain.stl");

        overrides.insert("Roads".to_owned(), "roads.stl".to_owned());
        assert!(matches!(
            ExportTable::from_map(&overrides),
            Err(ExportError::UnknownObjectType(name)) if name == "Roads"
        ));
    }

    #[test]
    fn object_type_names_parse_back() {
        for kind in ObjectType::ALL {
            assert_eq!(kind.as_str().parse::<ObjectType>().unwrap(), kind);
        }
    }

    fn building(target: bool, grounds: &[Vec<[f64; 3]>]) -> StoredBuilding {
        StoredBuilding {
            id: None,
            project_id: 1,
            name: "TB_a".into(),
            quadrant: String::new(),
            latitude: 0.0,
            longitude: 0.0,
            utm_x: 0.0,
            utm_y: 0.0,
            distance: 0.0,
            target,
            data: grounds
                .iter()
                .enumerate()
                .map(|(i, ring)| SurfaceRecord {
                    id: format!("GROUND_{i}"),
                    surface_type: SurfaceType::Ground,
                    polygon: ring.iter().copied().map(Point3::from_array).collect(),
                })
                .collect(),
        }
    }

    #[test]
    fn reference_point_averages_every_ground_vertex() {
        let a = building(true, &[vec![[0.0, 0.0, 1.0], [2.0, 0.0, 1.0]]]);
        let b = building(true, &[vec![[4.0, 6.0, 4.0]], vec![[2.0, 2.0, 2.0]]]);
        let reference = reference_point_from_ground(&[a, b]).unwrap();
        assert_eq!(reference, Point3::new(2.0, 2.0, 2.0));

        assert!(matches!(
            reference_point_from_ground(&[building(true, &[])]),
            Err(ExportError::NoGroundSurface)
        ));
    }
}
