//! Spatial index contract and the map-backed emulation.

mod bounding_box;
mod map_rtree;
mod nitrite_rtree;

pub use bounding_box::*;
pub use map_rtree::*;
pub use nitrite_rtree::*;
