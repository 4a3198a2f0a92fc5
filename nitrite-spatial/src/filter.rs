//! Spatial filters: intersects, within, near and geoNear.
//!
//! ## Two-phase evaluation
//!
//! 1. **Candidates**: one bounding-box query against the field's
//!    [NitriteRTree]. Cheap, but a box is only an approximation of the
//!    geometry, so the result may hold false positives.
//! 2. **Refinement**: [SpatialFilter::apply] re-checks each candidate's
//!    stored geometry exactly.
//!
//! [SpatialFilter::find] runs both phases.

use std::collections::BTreeSet;
use std::fmt::{self, Display};
use std::ops::Deref;
use std::sync::Arc;

use geo::EuclideanDistance;
use nitrite::common::{NitriteId, Value};
use nitrite::errors::NitriteResult;
use nitrite::store::rtree::NitriteRTree;

use crate::error::SpatialResult;
use crate::geodesic::{distance_meters, looks_geographic, radius_in_degrees, validate_distance};
use crate::geometry::{GeoPoint, Geometry};

/// Behavior shared by every spatial filter.
pub trait SpatialFilterProvider: Display + Send + Sync {
    /// Name of the document field holding the geometry.
    fn field_name(&self) -> &str;

    /// The geometry the index is searched with.
    fn search_geometry(&self) -> &Geometry;

    /// First pass: ids whose indexed box may satisfy the filter.
    fn candidates(&self, rtree: &NitriteRTree) -> NitriteResult<Vec<NitriteId>>;

    /// Second pass: exact test against a stored geometry.
    fn matches_geometry(&self, stored: &Geometry) -> bool;
}

#[derive(Clone)]
pub struct SpatialFilter {
    inner: Arc<dyn SpatialFilterProvider>,
}

impl SpatialFilter {
    pub fn new<T: SpatialFilterProvider + 'static>(inner: T) -> Self {
        SpatialFilter {
            inner: Arc::new(inner),
        }
    }

    /// Exact test against a stored field value. A missing geometry never
    /// matches; a value that is not a geometry is an error.
    pub fn apply(&self, value: &Value) -> NitriteResult<bool> {
        match Geometry::from_value(value)? {
            Some(stored) => Ok(self.inner.matches_geometry(&stored)),
            None => Ok(false),
        }
    }

    /// Runs both phases. `lookup` resolves a candidate id to its stored
    /// field value; ids it cannot resolve are skipped.
    pub fn find<F>(&self, rtree: &NitriteRTree, mut lookup: F) -> NitriteResult<Vec<NitriteId>>
    where
        F: FnMut(&NitriteId) -> NitriteResult<Option<Value>>,
    {
        let candidates: BTreeSet<NitriteId> = self.inner.candidates(rtree)?.into_iter().collect();
        let mut result = Vec::new();
        for id in candidates {
            if let Some(value) = lookup(&id)? {
                if self.apply(&value)? {
                    result.push(id);
                }
            }
        }
        log::debug!("{} matched {} documents", self, result.len());
        Ok(result)
    }
}

impl Deref for SpatialFilter {
    type Target = Arc<dyn SpatialFilterProvider>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl Display for SpatialFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&*self.inner, f)
    }
}

/// Matches geometries sharing any point with the search geometry.
pub struct IntersectsFilter {
    field: String,
    geometry: Geometry,
}

impl IntersectsFilter {
    pub fn new(field: impl Into<String>, geometry: Geometry) -> Self {
        IntersectsFilter {
            field: field.into(),
            geometry,
        }
    }
}

impl SpatialFilterProvider for IntersectsFilter {
    fn field_name(&self) -> &str {
        &self.field
    }

    fn search_geometry(&self) -> &Geometry {
        &self.geometry
    }

    fn candidates(&self, rtree: &NitriteRTree) -> NitriteResult<Vec<NitriteId>> {
        rtree.find_intersecting_keys(&self.geometry.bounding_box())
    }

    fn matches_geometry(&self, stored: &Geometry) -> bool {
        self.geometry.intersects(stored)
    }
}

impl Display for IntersectsFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({} intersects {})", self.field, self.geometry)
    }
}

/// Matches geometries lying inside the search geometry, its boundary
/// included.
pub struct WithinFilter {
    field: String,
    geometry: Geometry,
}

impl WithinFilter {
    pub fn new(field: impl Into<String>, geometry: Geometry) -> Self {
        WithinFilter {
            field: field.into(),
            geometry,
        }
    }
}

impl SpatialFilterProvider for WithinFilter {
    fn field_name(&self) -> &str {
        &self.field
    }

    fn search_geometry(&self) -> &Geometry {
        &self.geometry
    }

    fn candidates(&self, rtree: &NitriteRTree) -> NitriteResult<Vec<NitriteId>> {
        rtree.find_contained_keys(&self.geometry.bounding_box())
    }

    fn matches_geometry(&self, stored: &Geometry) -> bool {
        self.geometry.covers(stored)
    }
}

impl Display for WithinFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({} within {})", self.field, self.geometry)
    }
}

/// Matches geometries within a distance of a center point.
///
/// Stored points are compared by distance; any other stored geometry
/// matches when it intersects the search circle. When the center could be
/// a `(longitude, latitude)` pair the distance is taken in meters on the
/// WGS84 ellipsoid, otherwise in coordinate units. Use [GeoNearFilter] to
/// ask for meters explicitly.
pub struct NearFilter {
    field: String,
    center: geo::Point<f64>,
    distance: f64,
    // set when the distance is measured in meters
    geodesic: Option<GeoPoint>,
    circle: Geometry,
}

impl NearFilter {
    pub fn new(field: impl Into<String>, x: f64, y: f64, distance: f64) -> SpatialResult<Self> {
        validate_distance(distance)?;
        if looks_geographic(x, y) {
            let center = GeoPoint::new(y, x)?;
            let radius = radius_in_degrees(&center, distance)?;
            return Ok(NearFilter {
                field: field.into(),
                center: center.to_point(),
                distance,
                geodesic: Some(center),
                circle: Geometry::circle(x, y, radius)?,
            });
        }
        Ok(NearFilter {
            field: field.into(),
            center: geo::Point::new(x, y),
            distance,
            geodesic: None,
            circle: Geometry::circle(x, y, distance)?,
        })
    }

    pub fn is_geodesic(&self) -> bool {
        self.geodesic.is_some()
    }
}

impl SpatialFilterProvider for NearFilter {
    fn field_name(&self) -> &str {
        &self.field
    }

    fn search_geometry(&self) -> &Geometry {
        &self.circle
    }

    fn candidates(&self, rtree: &NitriteRTree) -> NitriteResult<Vec<NitriteId>> {
        rtree.find_intersecting_keys(&self.circle.bounding_box())
    }

    fn matches_geometry(&self, stored: &Geometry) -> bool {
        let Some(point) = stored.as_point() else {
            return self.circle.intersects(stored);
        };
        match &self.geodesic {
            Some(center) => GeoPoint::new(point.y(), point.x())
                .is_ok_and(|p| distance_meters(center, &p) <= self.distance),
            None => self.center.euclidean_distance(&point) <= self.distance,
        }
    }
}

impl Display for NearFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({} near POINT ({} {}) within {})",
            self.field,
            self.center.x(),
            self.center.y(),
            self.distance
        )
    }
}

/// Matches geometries within `distance` meters of a geographic point.
pub struct GeoNearFilter {
    field: String,
    center: GeoPoint,
    distance: f64,
    circle: Geometry,
}

impl GeoNearFilter {
    pub fn new(field: impl Into<String>, center: GeoPoint, distance: f64) -> SpatialResult<Self> {
        let radius = radius_in_degrees(&center, distance)?;
        Ok(GeoNearFilter {
            field: field.into(),
            center,
            distance,
            circle: Geometry::circle(center.longitude(), center.latitude(), radius)?,
        })
    }

    /// Validates `latitude`/`longitude` before building the filter.
    pub fn from_coords(
        field: impl Into<String>,
        latitude: f64,
        longitude: f64,
        distance: f64,
    ) -> SpatialResult<Self> {
        Self::new(field, GeoPoint::new(latitude, longitude)?, distance)
    }

    pub fn center(&self) -> &GeoPoint {
        &self.center
    }
}

impl SpatialFilterProvider for GeoNearFilter {
    fn field_name(&self) -> &str {
        &self.field
    }

    fn search_geometry(&self) -> &Geometry {
        &self.circle
    }

    fn candidates(&self, rtree: &NitriteRTree) -> NitriteResult<Vec<NitriteId>> {
        rtree.find_intersecting_keys(&self.circle.bounding_box())
    }

    fn matches_geometry(&self, stored: &Geometry) -> bool {
        match stored.as_point() {
            Some(point) => GeoPoint::new(point.y(), point.x())
                .is_ok_and(|p| distance_meters(&self.center, &p) <= self.distance),
            None => self.circle.intersects(stored),
        }
    }
}

impl Display for GeoNearFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({} geoNear {} within {}m)",
            self.field, self.center, self.distance
        )
    }
}
