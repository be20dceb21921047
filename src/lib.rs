#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Geometry reconstruction for digital twins.
//!
//! KML outlines, DTM/DSM point clouds and CityGML buildings of a project go
//! in; normalized binary STL meshes of the buildings, the terrain and the
//! trees come out, all expressed relative to the ground of the target
//! building. The surroundings service is reached through
//! [`store::SurroundingsStore`].

pub mod buildings;
pub mod config;
mod error;
pub mod export;
pub mod geom;
pub mod layers;
pub mod parse;
pub mod pipeline;
pub mod store;
pub mod terrain;
pub mod trees;

pub use error::{Error, Result};
pub use pipeline::{Pipeline, ProjectContext};
