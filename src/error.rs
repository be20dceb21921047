use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;
use crate::export::ExportError;
use crate::geom::{GeometryError, ReconstructionError, TriangulationError, UtmError};
use crate::layers::LayerError;
use crate::parse::citygml::CityGmlError;
use crate::parse::kml::KmlError;
use crate::parse::point_cloud::PointCloudError;
use crate::store::StoreError;
use crate::terrain::TerrainError;
use crate::trees::TreeError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Every failure a pipeline stage can end with.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Geometry(#[from] GeometryError),
    #[error(transparent)]
    Kml(#[from] KmlError),
    #[error(transparent)]
    PointCloud(#[from] PointCloudError),
    #[error(transparent)]
    Reconstruction(#[from] ReconstructionError),
    #[error(transparent)]
    Triangulation(#[from] TriangulationError),
    #[error(transparent)]
    CityGml(#[from] CityGmlError),
    #[error(transparent)]
    Layer(#[from] LayerError),
    #[error(transparent)]
    Terrain(#[from] TerrainError),
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Export(#[from] ExportError),
    #[error(transparent)]
    Utm(#[from] UtmError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("missing input: {path}")]
    MissingInput { path: PathBuf },
}
