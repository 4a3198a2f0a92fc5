//! # Nitrite Spatial
//!
//! Geometry support and spatial filters on top of the [NitriteRTree]
//! contract of the storage core.
//!
//! - [Geometry] and [GeoPoint]: the geometry model, WKT text form and
//!   reduction to a [BoundingBox]
//! - [geodesic]: meters on the WGS84 ellipsoid to planar degrees
//! - [SpatialFilter]: intersects, within, near and geoNear, evaluated in two
//!   phases (R-tree candidates, then exact geometry checks)
//! - [SpatialIndex]: keeps one field's geometries in a store's R-tree
//!
//! ```rust,ignore
//! use nitrite_spatial::{spatial_field, GeoPoint, SpatialIndex};
//!
//! let index = SpatialIndex::open(&store, "places", "location")?;
//! index.write(&id, &Value::from("POINT (-93.2650 45.0)"))?;
//!
//! let filter = spatial_field("location").geo_near(GeoPoint::new(45.0, -93.265)?, 2000.0)?;
//! let ids = index.find(&filter, |id| lookup_location(id))?;
//! ```
//!
//! [NitriteRTree]: nitrite::store::rtree::NitriteRTree
//! [BoundingBox]: nitrite::store::rtree::BoundingBox

mod error;
mod filter;
mod fluent;
pub mod geodesic;
mod geometry;
mod index;

pub use error::{SpatialError, SpatialResult};
pub use filter::*;
pub use fluent::{spatial_field, SpatialFluentFilter};
pub use geometry::{GeoPoint, Geometry, CIRCLE_VERTICES};
pub use index::{SpatialIndex, SPATIAL_INDEX};
