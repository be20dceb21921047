//! Line-oriented CityGML building extraction.
//!
//! County exports differ in tag names and in how polygons are grouped, so
//! the parser is driven by a [`CountyConfig`]. A building is the block
//! between `BuildingStart` and `BuildingEnd`; inside it every configured
//! element (ground, wall, roof) contributes one surface per polygon, or one
//! surface per element block when `PolygonPerElement` is set.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::geom::{Point2, Point3, round_to, utm};
use crate::store::{SurfaceRecord, SurfaceType};

pub type CityGmlResult<T> = Result<T, CityGmlError>;

#[derive(Debug, Error)]
pub enum CityGmlError {
    #[error("could not read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid county configuration {path}: {source}")]
    Config {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("building {building}: `{value}` is not a coordinate")]
    MalformedCoordinate { building: String, value: String },
    #[error("building {building}: {count} coordinates do not form XYZ triples")]
    IncompleteTriple { building: String, count: usize },
    #[error(transparent)]
    Utm(#[from] utm::UtmError),
}

// ─────────────────────────────────────────────────────────────────────────────
// County configuration
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ElementMarkers {
    #[serde(rename = "ELEMENT")]
    pub element: SurfaceType,
    #[serde(rename = "ELEMENTSTART")]
    pub start: String,
    #[serde(rename = "ELEMENTEND")]
    pub end: String,
}

/// Parsing markers and UTM zone of one county's CityGML export.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CountyConfig {
    #[serde(rename = "BuildingStart")]
    pub building_start: String,
    #[serde(rename = "BuildingEnd")]
    pub building_end: String,
    #[serde(rename = "PolygonStart")]
    pub polygon_start: String,
    #[serde(rename = "PolygonEnd")]
    pub polygon_end: String,
    #[serde(rename = "UTMZone")]
    pub utm_zone: u8,
    #[serde(rename = "ZoneLetter")]
    pub zone_letter: char,
    #[serde(rename = "Elements")]
    pub elements: Vec<ElementMarkers>,
    /// Collect every polygon of an element block into a single surface.
    #[serde(rename = "PolygonPerElement", default)]
    pub polygon_per_element: bool,
}

impl CountyConfig {
    pub fn from_path(path: &Path) -> CityGmlResult<Self> {
        let input = std::fs::read_to_string(path).map_err(|source| CityGmlError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&input).map_err(|source| CityGmlError::Config {
            path: path.to_path_buf(),
            source,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Building records
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct BuildingRecord {
    pub id: String,
    /// Mean of the ground polygon, rounded to whole metres.
    pub utm_center: Point2,
    /// Latitude and longitude of `utm_center`, 7 decimals.
    pub lat_lon: (f64, f64),
    pub distance_to_target: f64,
    pub surfaces: Vec<SurfaceRecord>,
}

struct BuildingBuilder<'a> {
    county: &'a CountyConfig,
    id: String,
    target: Point2,
    ground: Option<(Point2, (f64, f64))>,
    surfaces: Vec<SurfaceRecord>,
}

impl BuildingBuilder<'_> {
    fn coordinates(&self, line: &str, into: &mut Vec<f64>) -> CityGmlResult<()> {
        let text = line
            .trim()
            .replace(&self.county.polygon_start, "")
            .replace(&self.county.polygon_end, "");
        for value in text.split_whitespace() {
            let parsed = value
                .parse()
                .map_err(|_| CityGmlError::MalformedCoordinate {
                    building: self.id.clone(),
                    value: value.to_owned(),
                })?;
            into.push(parsed);
        }
        Ok(())
    }

    fn add_surface(&mut self, element: SurfaceType, counter: usize, coords: &[f64]) -> CityGmlResult<()> {
        if coords.is_empty() {
            return Ok(());
        }
        if coords.len() % 3 != 0 {
            return Err(CityGmlError::IncompleteTriple {
                building: self.id.clone(),
                count: coords.len(),
            });
        }
        let polygon: Vec<Point3> = coords
            .chunks_exact(3)
            .map(|c| Point3::new(c[0], c[1], c[2]))
            .collect();

        if element == SurfaceType::Ground {
            let n = polygon.len() as f64;
            let center = Point2::new(
                (polygon.iter().map(|p| p.x).sum::<f64>() / n).round_ties_even(),
                (polygon.iter().map(|p| p.y).sum::<f64>() / n).round_ties_even(),
            );
            let (lat, lon) = utm::to_latlon(
                center.x,
                center.y,
                self.county.utm_zone,
                self.county.zone_letter,
            )?;
            self.ground = Some((center, (round_to(lat, 7), round_to(lon, 7))));
        }
        self.surfaces.push(SurfaceRecord {
            id: format!("{element}_{counter}"),
            surface_type: element,
            polygon,
        });
        Ok(())
    }

    fn element(&mut self, lines: &[String], markers: &ElementMarkers) -> CityGmlResult<()> {
        let per_element = self.county.polygon_per_element;
        let mut counter = 0;
        let mut inside = false;
        let mut coords = Vec::new();

        for line in lines {
            if line.contains(&markers.start) {
                inside = true;
                counter += 1;
                if per_element {
                    coords.clear();
                }
            }
            if inside && line.contains(&self.county.polygon_start) {
                if !per_element {
                    coords.clear();
                }
                self.coordinates(line, &mut coords)?;
                if !per_element {
                    self.add_surface(markers.element, counter, &coords)?;
                }
            }
            if line.contains(&markers.end) {
                if inside && per_element {
                    self.add_surface(markers.element, counter, &coords)?;
                    coords.clear();
                }
                inside = false;
            }
        }
        Ok(())
    }

    fn finish(self, perimeter: f64) -> Option<BuildingRecord> {
        let Some((utm_center, lat_lon)) = self.ground else {
            log::debug!("building {} has no ground surface, skipped", self.id);
            return None;
        };
        let distance = utm_center.distance_to(self.target);
        if distance >= perimeter || self.surfaces.len() <= 1 {
            return None;
        }
        Some(BuildingRecord {
            id: self.id,
            utm_center,
            lat_lon,
            distance_to_target: distance,
            surfaces: self.surfaces,
        })
    }
}

fn building_id(line: &str, marker: &str) -> String {
    line.trim()
        .replace(marker, "")
        .replace(['"', '>'], "")
        .trim()
        .to_owned()
}

/// Parse every building of a CityGML stream lying within `perimeter` of
/// `target_centroid`. Buildings without a ground surface or with a single
/// surface are skipped.
pub fn parse_buildings<R: BufRead>(
    reader: R,
    county: &CountyConfig,
    target_centroid: Point2,
    perimeter: f64,
) -> CityGmlResult<Vec<BuildingRecord>> {
    let mut records = Vec::new();
    let mut current: Option<(String, Vec<String>)> = None;
    let mut seen = 0usize;

    for line in reader.lines() {
        let line = line.map_err(|source| CityGmlError::Io {
            path: PathBuf::new(),
            source,
        })?;
        if line.contains(&county.building_start) {
            current = Some((building_id(&line, &county.building_start), Vec::new()));
            seen += 1;
        }
        if line.contains(&county.building_end) {
            if let Some((id, lines)) = current.take() {
                let mut builder = BuildingBuilder {
                    county,
                    id,
                    target: target_centroid,
                    ground: None,
                    surfaces: Vec::new(),
                };
                for markers in &county.elements {
                    builder.element(&lines, markers)?;
                }
                records.extend(builder.finish(perimeter));
            }
        }
        if let Some((_, lines)) = current.as_mut() {
            lines.push(line);
        }
    }
    log::debug!("{} of {seen} buildings within {perimeter:.2} m", records.len());
    Ok(records)
}

pub fn parse_buildings_file(
    path: &Path,
    county: &CountyConfig,
    target_centroid: Point2,
    perimeter: f64,
) -> CityGmlResult<Vec<BuildingRecord>> {
    let file = File::open(path).map_err(|source| CityGmlError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    log::info!("parsing CityGML {}", path.display());
    parse_buildings(BufReader::new(file), county, target_centroid, perimeter).map_err(|err| match err {
        CityGmlError::Io { source, .. } => CityGmlError::Io {
            path: path.to_path_buf(),
            source,
        },
        other => other,
    })
}
