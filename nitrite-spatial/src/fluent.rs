//! Builder-style entry point for spatial filters.
//!
//! ```rust
//! use nitrite_spatial::{spatial_field, GeoPoint, Geometry};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let in_box = spatial_field("location").within(Geometry::envelope(0.0, 10.0, 0.0, 10.0));
//!
//! let minneapolis = GeoPoint::new(45.0, -93.265)?;
//! let close_by = spatial_field("location").geo_near(minneapolis, 5000.0)?;
//! # Ok(())
//! # }
//! ```

use nitrite::errors::NitriteResult;

use crate::error::SpatialError;
use crate::filter::{GeoNearFilter, IntersectsFilter, NearFilter, SpatialFilter, WithinFilter};
use crate::geometry::{GeoPoint, Geometry};

/// A spatial filter under construction for one field.
#[derive(Debug, Clone)]
pub struct SpatialFluentFilter {
    field: String,
}

/// Starts a spatial filter on `field`.
pub fn spatial_field(field: impl Into<String>) -> SpatialFluentFilter {
    SpatialFluentFilter {
        field: field.into(),
    }
}

impl SpatialFluentFilter {
    pub fn intersects(self, geometry: Geometry) -> SpatialFilter {
        SpatialFilter::new(IntersectsFilter::new(self.field, geometry))
    }

    pub fn within(self, geometry: Geometry) -> SpatialFilter {
        SpatialFilter::new(WithinFilter::new(self.field, geometry))
    }

    /// Geometries within `distance` of `(x, y)`. A center that could be a
    /// `(longitude, latitude)` pair takes the distance in meters.
    pub fn near(self, x: f64, y: f64, distance: f64) -> NitriteResult<SpatialFilter> {
        Ok(SpatialFilter::new(NearFilter::new(self.field, x, y, distance)?))
    }

    /// Like [SpatialFluentFilter::near] with a point geometry as the
    /// center.
    pub fn near_point(self, point: &Geometry, distance: f64) -> NitriteResult<SpatialFilter> {
        match point.as_point() {
            Some(p) => self.near(p.x(), p.y(), distance),
            None => Err(SpatialError::InvalidGeometry(format!(
                "center of a near filter must be a point, got {}",
                point
            ))
            .into()),
        }
    }

    /// Geometries within `meters` of `center` on the WGS84 ellipsoid.
    pub fn geo_near(self, center: GeoPoint, meters: f64) -> NitriteResult<SpatialFilter> {
        Ok(SpatialFilter::new(GeoNearFilter::new(self.field, center, meters)?))
    }

    /// Validates the coordinates before building a geoNear filter.
    pub fn geo_near_coords(
        self,
        latitude: f64,
        longitude: f64,
        meters: f64,
    ) -> NitriteResult<SpatialFilter> {
        Ok(SpatialFilter::new(GeoNearFilter::from_coords(
            self.field, latitude, longitude, meters,
        )?))
    }
}
