//! Readers for the survey inputs: KML outlines, point-cloud tiles and CityGML.

pub mod citygml;
pub mod kml;
pub mod point_cloud;
