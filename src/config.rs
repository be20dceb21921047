//! Pipeline configuration loaded from JSON.
//!
//! Every field has a default, so an empty object is a valid configuration.
//! Relative paths are resolved against the folder holding the file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::export::{ExportError, ExportTable};
use crate::geom::{DEFAULT_DEPTH, MAX_DEPTH};
use crate::parse::citygml::{CityGmlError, CountyConfig};
use crate::parse::kml::{CategoryMarkers, KmlError};
use crate::terrain::DEFAULT_ALPHA;
use crate::trees::{DEFAULT_SHRINK_FACTOR, TileConvention};

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read configuration {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error(transparent)]
    Markers(#[from] KmlError),
    #[error(transparent)]
    County(#[from] CityGmlError),
    #[error(transparent)]
    Export(#[from] ExportError),
}

/// Where the KML category markers come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MarkerSource {
    Path(PathBuf),
    Inline(Map<String, Value>),
}

impl Default for MarkerSource {
    fn default() -> Self {
        Self::Path(PathBuf::from("category_d.json"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub base_url: String,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub category_markers: MarkerSource,
    pub county: String,
    /// Folder of `<county>.json` CityGML parsing configurations.
    pub county_specs_dir: PathBuf,
    /// Overrides the county's DTM/DSM tile naming.
    pub tile_convention: Option<TileConvention>,
    pub alpha: f64,
    pub poisson_depth: u32,
    pub tree_shrink_factor: f64,
    /// Object type name to STL file name, layered over the defaults.
    pub export_table: BTreeMap<String, String>,
    pub store: Option<StoreConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            category_markers: MarkerSource::default(),
            county: "NRW".to_owned(),
            county_specs_dir: PathBuf::from("CountySpecs"),
            tile_convention: None,
            alpha: DEFAULT_ALPHA,
            poisson_depth: DEFAULT_DEPTH,
            tree_shrink_factor: DEFAULT_SHRINK_FACTOR,
            export_table: BTreeMap::new(),
            store: None,
        }
    }
}

impl PipelineConfig {
    pub fn from_path(path: &Path) -> ConfigResult<Self> {
        let input = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self = serde_json::from_str(&input).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        config.validate()?;
        log::debug!("loaded configuration for county {} from {}", config.county, path.display());
        Ok(config)
    }

    fn resolve_paths(&mut self, base: &Path) {
        if let MarkerSource::Path(markers) = &mut self.category_markers {
            if markers.is_relative() {
                *markers = base.join(&*markers);
            }
        }
        if self.county_specs_dir.is_relative() {
            self.county_specs_dir = base.join(&self.county_specs_dir);
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.county.trim().is_empty() {
            return Err(ConfigError::Invalid("county must not be empty".into()));
        }
        if !self.alpha.is_finite() || self.alpha < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "alpha must be a non-negative number, got {}",
                self.alpha
            )));
        }
        if !(1..=MAX_DEPTH).contains(&self.poisson_depth) {
            return Err(ConfigError::Invalid(format!(
                "poisson_depth must be within 1..={MAX_DEPTH}, got {}",
                self.poisson_depth
            )));
        }
        if !(self.tree_shrink_factor > 0.0 && self.tree_shrink_factor <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "tree_shrink_factor must be within (0, 1], got {}",
                self.tree_shrink_factor
            )));
        }
        ExportTable::from_map(&self.export_table)?;
        Ok(())
    }

    pub fn markers(&self) -> ConfigResult<CategoryMarkers> {
        Ok(match &self.category_markers {
            MarkerSource::Path(path) => CategoryMarkers::from_path(path)?,
            MarkerSource::Inline(map) => CategoryMarkers::from_json_map(map)?,
        })
    }

    pub fn county_config(&self) -> ConfigResult<CountyConfig> {
        let path = self.county_specs_dir.join(format!("{}.json", self.county));
        Ok(CountyConfig::from_path(&path)?)
    }

    #[must_use]
    pub fn tile_convention(&self) -> TileConvention {
        self.tile_convention
            .unwrap_or_else(|| TileConvention::for_county(&self.county))
    }

    pub fn export_table(&self) -> ConfigResult<ExportTable> {
        Ok(ExportTable::from_map(&self.export_table)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::ObjectType;
    use crate::trees::Parity;

    #[test]
    fn empty_object_takes_every_default() {
        let config: PipelineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert!(config.validate().is_ok());
        assert_eq!(config.tile_convention(), TileConvention::for_county("NRW"));
    }

    #[test]
    fn relative_paths_follow_the_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        std::fs::write(
            &path,
            r#"{
                "category_markers": "markers/category_d.json",
                "county": "Hamburg",
                "export_table": {"Terrain": "ground.stl"},
                "tile_convention": {"easting_parity": "All", "northing_parity": "All"}
            }"#,
        )
        .unwrap();

        let config = PipelineConfig::from_path(&path).unwrap();
        assert_eq!(
            config.category_markers,
            MarkerSource::Path(dir.path().join("markers/category_d.json"))
        );
        assert_eq!(config.county_specs_dir, dir.path().join("CountySpecs"));
        assert_eq!(config.tile_convention().northing_parity, Parity::All);
        assert_eq!(
            config.export_table().unwrap().filename(ObjectType::Terrain),
            "ground.stl"
        );
    }

    #[test]
    fn inline_markers_are_checked_for_every_key() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"category_markers": {"category_start": "<Folder>"}}"#).unwrap();
        assert!(matches!(
            config.markers(),
            Err(ConfigError::Markers(KmlError::MissingMarker("category_end")))
        ));
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let config = PipelineConfig {
            poisson_depth: 11,
            ..PipelineConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = PipelineConfig {
            export_table: BTreeMap::from([("Roads".to_owned(), "roads.stl".to_owned())]),
            ..PipelineConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Export(_))));
    }
}
