//! Marker-driven extraction of polygon outlines from KML exports.
//!
//! The file is read line by line. Layer, object and polygon boundaries are
//! recognised by literal marker substrings from [`CategoryMarkers`], so each
//! deployment can describe its own export layout. Coordinates are converted
//! from WGS84 to UTM and rounded to centimetres.

use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use thiserror::Error;

use crate::geom::{GeometryError, Point2, centroid, distinct_ring, round_to, utm};

pub type KmlResult<T> = Result<T, KmlError>;

#[derive(Debug, Error)]
pub enum KmlError {
    #[error("could not read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("marker configuration is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("marker configuration lacks `{0}`")]
    MissingMarker(&'static str),
    /// Unparseable coordinate, or the file ended inside a polygon.
    #[error("malformed KML at line {line} of {path}")]
    MalformedKml { path: PathBuf, line: usize },
    #[error(transparent)]
    Geometry(#[from] GeometryError),
    #[error(transparent)]
    Utm(#[from] utm::UtmError),
}

// ─────────────────────────────────────────────────────────────────────────────
// Markers
// ─────────────────────────────────────────────────────────────────────────────

/// Literal substrings delimiting layers, single objects and polygons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryMarkers {
    pub category_start: String,
    pub category_end: String,
    pub single_object_start: String,
    pub single_object_end: String,
    pub id_start: String,
    pub polygon_start: String,
    pub polygon_end: String,
}

impl CategoryMarkers {
    pub fn from_json_map(map: &Map<String, Value>) -> KmlResult<Self> {
        let get = |key: &'static str| {
            map.get(key)
                .and_then(Value::as_str)
                .map(str::to_owned)
                .ok_or(KmlError::MissingMarker(key))
        };
        Ok(Self {
            category_start: get("category_start")?,
            category_end: get("category_end")?,
            single_object_start: get("singleObject_start")?,
            single_object_end: get("singleObject_end")?,
            id_start: get("ID_start")?,
            polygon_start: get("polygon_start")?,
            polygon_end: get("polygon_end")?,
        })
    }

    pub fn from_json_str(input: &str) -> KmlResult<Self> {
        let map: Map<String, Value> = serde_json::from_str(input)?;
        Self::from_json_map(&map)
    }

    pub fn from_path(path: &Path) -> KmlResult<Self> {
        let input = std::fs::read_to_string(path).map_err(|source| KmlError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&input)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Polygon objects
// ─────────────────────────────────────────────────────────────────────────────

/// Semantic layer a polygon was drawn in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    TargetBuilding,
    SurroundingBuildings,
    TargetArea,
    Vegetation,
    Topography,
    Terrain,
    /// A layer name this deployment does not use.
    Other(String),
}

impl ObjectKind {
    #[must_use]
    pub fn from_layer_name(name: &str) -> Self {
        match name {
            "TargetBuilding" => Self::TargetBuilding,
            "SurroundingBuildings" => Self::SurroundingBuildings,
            "TargetArea" => Self::TargetArea,
            "Vegetation" => Self::Vegetation,
            "Topography" => Self::Topography,
            "Terrain" => Self::Terrain,
            other => Self::Other(other.to_owned()),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::TargetBuilding => "TargetBuilding",
            Self::SurroundingBuildings => "SurroundingBuildings",
            Self::TargetArea => "TargetArea",
            Self::Vegetation => "Vegetation",
            Self::Topography => "Topography",
            Self::Terrain => "Terrain",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One closed outline with UTM vertices.
#[derive(Debug, Clone, PartialEq)]
pub struct PolygonObject {
    pub shape: Vec<Point2>,
    pub kind: ObjectKind,
    /// Set for outlines inside a single-object block (trees and the like).
    pub id: Option<String>,
    /// Mean of `shape`, rounded to centimetres.
    pub centroid: Point2,
}

// ─────────────────────────────────────────────────────────────────────────────
// Extractor
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct ExtractorState {
    in_layer: bool,
    in_single_object: bool,
    layer_type: String,
    object_id: Option<String>,
    polygon: Option<Vec<Point2>>,
}

/// Text between the first `>` and the following `<`, XML-unescaped.
fn tag_text(line: &str) -> String {
    let after = line.split_once('>').map_or(line, |(_, rest)| rest);
    let raw = after.split('<').next().unwrap_or_default().trim();
    quick_xml::escape::unescape(raw).map_or_else(|_| raw.to_owned(), |text| text.into_owned())
}

struct Extractor<'a> {
    markers: &'a CategoryMarkers,
    path: &'a Path,
    state: ExtractorState,
    objects: Vec<PolygonObject>,
}

impl<'a> Extractor<'a> {
    fn new(markers: &'a CategoryMarkers, path: &'a Path) -> Self {
        Self {
            markers,
            path,
            state: ExtractorState::default(),
            objects: Vec::new(),
        }
    }

    fn malformed(&self, line: usize) -> KmlError {
        KmlError::MalformedKml {
            path: self.path.to_path_buf(),
            line,
        }
    }

    fn line(&mut self, raw: &str, number: usize) -> KmlResult<()> {
        let line = raw.trim();
        let m = self.markers;

        if line.contains(&m.single_object_end) {
            self.state.in_single_object = false;
        }
        if self.state.in_single_object && line.contains(&m.id_start) {
            self.state.object_id = Some(tag_text(line));
        }
        if line.contains(&m.single_object_start) {
            self.state.in_single_object = true;
            self.state.object_id = None;
        }
        if line.contains(&m.category_end) {
            self.state.in_layer = false;
        }
        if self.state.in_layer && !self.state.in_single_object && line.contains(&m.id_start) {
            self.state.layer_type = tag_text(line);
        }
        if line.contains(&m.category_start) {
            self.state.in_layer = true;
        }

        if self.state.polygon.is_some() {
            match line.find(m.polygon_end.as_str()) {
                Some(end) => {
                    self.coordinates(&line[..end], number)?;
                    self.close_polygon(number)?;
                }
                None => self.coordinates(line, number)?,
            }
        }

        if let Some(start) = line.find(m.polygon_start.as_str()) {
            self.state.polygon = Some(Vec::new());
            let rest = &line[start + m.polygon_start.len()..];
            // Coordinates may share the line with both markers.
            match rest.find(m.polygon_end.as_str()) {
                Some(end) => {
                    self.coordinates(&rest[..end], number)?;
                    self.close_polygon(number)?;
                }
                None => self.coordinates(rest, number)?,
            }
        }
        Ok(())
    }

    /// Append every `lon,lat[,alt]` tuple of `text` to the open polygon.
    fn coordinates(&mut self, text: &str, number: usize) -> KmlResult<()> {
        for tuple in text.split_whitespace() {
            let fields: Vec<&str> = tuple.split(',').filter(|f| !f.is_empty()).collect();
            if !(2..=3).contains(&fields.len()) {
                return Err(self.malformed(number));
            }
            let lon: f64 = fields[0].parse().map_err(|_| self.malformed(number))?;
            let lat: f64 = fields[1].parse().map_err(|_| self.malformed(number))?;
            let projected = utm::from_latlon(lat, lon)?;
            let point = Point2::new(projected.easting, projected.northing).rounded(2);
            if let Some(polygon) = self.state.polygon.as_mut() {
                polygon.push(point);
            }
        }
        Ok(())
    }

    /// Emit the open polygon; it needs three distinct vertices.
    fn close_polygon(&mut self, number: usize) -> KmlResult<()> {
        let Some(shape) = self.state.polygon.take() else {
            return Ok(());
        };
        if distinct_ring(&shape).len() < 3 {
            return Err(self.malformed(number));
        }
        let center = centroid(&shape)?;
        let object = PolygonObject {
            centroid: Point2::new(round_to(center.x, 2), round_to(center.y, 2)),
            kind: ObjectKind::from_layer_name(&self.state.layer_type),
            id: if self.state.in_single_object {
                self.state.object_id.clone()
            } else {
                None
            },
            shape,
        };
        log::debug!(
            "polygon {} ({}) with {} vertices",
            object.id.as_deref().unwrap_or("-"),
            object.kind,
            object.shape.len()
        );
        self.objects.push(object);
        Ok(())
    }

    fn finish(self, last_line: usize) -> KmlResult<Vec<PolygonObject>> {
        if self.state.polygon.is_some() {
            return Err(self.malformed(last_line));
        }
        Ok(self.objects)
    }
}

/// Extract every polygon from a KML stream. `path` is only used in errors.
pub fn parse_kml<R: BufRead>(
    reader: R,
    markers: &CategoryMarkers,
    path: &Path,
) -> KmlResult<Vec<PolygonObject>> {
    let mut extractor = Extractor::new(markers, path);
    let mut last_line = 0;
    for (index, line) in reader.lines().enumerate() {
        let line = line.map_err(|source| KmlError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        last_line = index + 1;
        extractor.line(&line, last_line)?;
    }
    extractor.finish(last_line)
}

pub fn parse_kml_file(path: &Path, markers: &CategoryMarkers) -> KmlResult<Vec<PolygonObject>> {
    let file = File::open(path).map_err(|source| KmlError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    log::info!("parsing KML {}", path.display());
    parse_kml(BufReader::new(file), markers, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::io::Cursor;

    fn markers() -> CategoryMarkers {
        CategoryMarkers::from_json_str(
            r#"{
                "category_start": "<Folder>",
                "category_end": "</Folder>",
                "singleObject_start": "<Placemark>",
                "singleObject_end": "</Placemark>",
                "ID_start": "<name>",
                "polygon_start": "<coordinates>",
                "polygon_end": "</coordinates>"
            }"#,
        )
        .expect("markers")
    }

    #[test]
    fn target_building_outline_is_projected_to_utm() {
        let kml = "<Folder>\n<name>TargetBuilding</name>\n<Placemark>\n<name>office</name>\n\
                   <coordinates>\n6.7700,51.2200,0\n6.7702,51.2200,0\n\
                   6.7702,51.2202,0\n6.7700,51.2202,0\n</coordinates>\n</Placemark>\n</Folder>\n";
        let objects = parse_kml(Cursor::new(kml), &markers(), Path::new("a.kml")).expect("parse");
        assert_eq!(objects.len(), 1);
        let object = &objects[0];
        assert_eq!(object.kind, ObjectKind::TargetBuilding);
        assert_eq!(object.id.as_deref(), Some("office"));
        assert_eq!(object.shape.len(), 4);

        // Zone 32U reference values.
        let expected = [
            (344_271.389, 5_676_653.198),
            (344_285.354, 5_676_652.774),
            (344_286.029, 5_676_675.012),
            (344_272.064, 5_676_675.436),
        ];
        for (vertex, (easting, northing)) in object.shape.iter().zip(expected) {
            assert_abs_diff_eq!(vertex.x, easting, epsilon = 0.011);
            assert_abs_diff_eq!(vertex.y, northing, epsilon = 0.011);
        }
        assert_abs_diff_eq!(object.centroid.x, 344_278.709, epsilon = 0.011);
        assert_abs_diff_eq!(object.centroid.y, 5_676_664.105, epsilon = 0.011);
    }

    #[test]
    fn missing_marker_is_named() {
        let err = CategoryMarkers::from_json_str(r#"{"category_start": "<Folder>"}"#).unwrap_err();
        assert!(matches!(err, KmlError::MissingMarker("category_end")));
    }

    #[test]
    fn single_line_coordinates_and_escaped_names() {
        let kml = "<Folder>\n<name>Vegetation</name>\n<Placemark>\n<name>tree &amp; 1</name>\n\
                   <coordinates>6.77,51.22,0 6.7701,51.22,0 6.7701,51.2201,0</coordinates>\n\
                   </Placemark>\n</Folder>\n";
        let objects = parse_kml(Cursor::new(kml), &markers(), Path::new("a.kml")).expect("parse");
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].kind, ObjectKind::Vegetation);
        assert_eq!(objects[0].id.as_deref(), Some("tree & 1"));
        assert_eq!(objects[0].shape.len(), 3);
    }

    #[test]
    fn unclosed_polygon_is_malformed() {
        let kml = "<Folder>\n<name>Terrain</name>\n<coordinates>\n6.77,51.22,0\n";
        let err = parse_kml(Cursor::new(kml), &markers(), Path::new("a.kml")).unwrap_err();
        assert!(matches!(err, KmlError::MalformedKml { line: 4, .. }));
    }

    #[test]
    fn non_numeric_coordinate_is_malformed() {
        let kml = "<coordinates>\nsix,51.22,0\n</coordinates>\n";
        let err = parse_kml(Cursor::new(kml), &markers(), Path::new("a.kml")).unwrap_err();
        assert!(matches!(err, KmlError::MalformedKml { line: 2, .. }));
    }

    #[test]
    fn empty_polygon_is_rejected() {
        let kml = "<coordinates>\n</coordinates>\n";
        let err = parse_kml(Cursor::new(kml), &markers(), Path::new("a.kml")).unwrap_err();
        assert!(matches!(err, KmlError::MalformedKml { line: 2, .. }));
    }

    #[test]
    fn polygons_need_three_distinct_vertices() {
        let kml = "<Folder>\n<name>TargetBuilding</name>\n\
                   <coordinates>6.77,51.22,0 6.77,51.22,0</coordinates>\n</Folder>\n";
        let err = parse_kml(Cursor::new(kml), &markers(), Path::new("a.kml")).unwrap_err();
        assert!(matches!(err, KmlError::MalformedKml { line: 3, .. }));

        let kml = "<coordinates>\n6.77,51.22,0\n6.7701,51.22,0\n6.77,51.22,0\n</coordinates>\n";
        let err = parse_kml(Cursor::new(kml), &markers(), Path::new("a.kml")).unwrap_err();
        assert!(matches!(err, KmlError::MalformedKml { line: 5, .. }));
    }
}
