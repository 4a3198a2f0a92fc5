//! Conversions between meters on the WGS84 ellipsoid and planar degrees.

use geo::{GeodesicDestination, GeodesicDistance};

use crate::error::{SpatialError, SpatialResult};
use crate::geometry::GeoPoint;

const BEARING_NORTH: f64 = 0.0;
const BEARING_EAST: f64 = 90.0;

/// Whether `(x, y)` can be read as `(longitude, latitude)`.
pub fn looks_geographic(x: f64, y: f64) -> bool {
    (-180.0..=180.0).contains(&x) && (-90.0..=90.0).contains(&y)
}

/// Radius in degrees of a square search window that covers every point
/// within `meters` of `center`.
///
/// Solves the direct geodesic problem due east and due north and returns
/// the larger coordinate delta. The result over-covers; callers filter the
/// candidates by true distance.
pub fn radius_in_degrees(center: &GeoPoint, meters: f64) -> SpatialResult<f64> {
    validate_distance(meters)?;
    let origin = center.to_point();
    let east = origin.geodesic_destination(BEARING_EAST, meters);
    let north = origin.geodesic_destination(BEARING_NORTH, meters);

    let dx = longitude_delta(origin.x(), east.x());
    let dy = if longitude_delta(origin.x(), north.x()) > 90.0 {
        // went over the pole
        180.0 - origin.y() - north.y()
    } else {
        (north.y() - origin.y()).abs()
    };
    Ok(dx.max(dy))
}

/// Ellipsoidal distance in meters.
pub fn distance_meters(a: &GeoPoint, b: &GeoPoint) -> f64 {
    a.to_point().geodesic_distance(&b.to_point())
}

pub(crate) fn validate_distance(distance: f64) -> SpatialResult<()> {
    if distance.is_finite() && distance >= 0.0 {
        Ok(())
    } else {
        Err(SpatialError::InvalidDistance(distance))
    }
}

fn longitude_delta(from: f64, to: f64) -> f64 {
    let delta = (to - from).abs();
    if delta > 180.0 {
        360.0 - delta
    } else {
        delta
    }
}
