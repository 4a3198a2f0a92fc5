//! Geometry model for spatial filters.
//!
//! [Geometry] wraps a `geo` geometry and adds what the index needs on top of
//! it: reduction to a [BoundingBox], WKT text form, and conversion from the
//! document [Value]s a spatial field may hold. [GeoPoint] is a validated
//! latitude/longitude pair; as a geometry it is the point `(longitude,
//! latitude)`.

use std::collections::BTreeMap;
use std::fmt::{self, Display};

use geo::{BoundingRect, Contains, CoordsIter, Intersects};
use nitrite::common::Value;
use nitrite::store::rtree::BoundingBox;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{SpatialError, SpatialResult};

/// Number of vertices used to approximate a circle.
pub const CIRCLE_VERTICES: usize = 64;

/// A geographic coordinate in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    latitude: f64,
    longitude: f64,
}

impl GeoPoint {
    /// Creates a point, failing when latitude is outside `[-90, 90]` or
    /// longitude outside `[-180, 180]`.
    pub fn new(latitude: f64, longitude: f64) -> SpatialResult<Self> {
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(SpatialError::InvalidLatitude(latitude));
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(SpatialError::InvalidLongitude(longitude));
        }
        Ok(GeoPoint {
            latitude,
            longitude,
        })
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    /// The planar point with x = longitude and y = latitude.
    pub fn to_point(&self) -> geo::Point<f64> {
        geo::Point::new(self.longitude, self.latitude)
    }

    pub fn to_value(&self) -> Value {
        let mut map = BTreeMap::new();
        map.insert("latitude".to_string(), Value::from(self.latitude));
        map.insert("longitude".to_string(), Value::from(self.longitude));
        Value::Map(map)
    }
}

impl Display for GeoPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GeoPoint(lat={}, lon={})", self.latitude, self.longitude)
    }
}

/// A planar geometry: point, line string, polygon or envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    inner: geo::Geometry<f64>,
}

impl Geometry {
    pub fn point(x: f64, y: f64) -> Self {
        geo::Point::new(x, y).into()
    }

    pub fn line_string(coords: Vec<(f64, f64)>) -> SpatialResult<Self> {
        if coords.len() < 2 {
            return Err(SpatialError::InvalidGeometry(
                "LineString needs at least 2 coordinates".to_string(),
            ));
        }
        Ok(geo::LineString::from(coords).into())
    }

    /// Polygon with the given exterior ring, closed automatically.
    pub fn polygon(exterior: Vec<(f64, f64)>) -> SpatialResult<Self> {
        Self::polygon_with_holes(exterior, Vec::new())
    }

    pub fn polygon_with_holes(
        exterior: Vec<(f64, f64)>,
        holes: Vec<Vec<(f64, f64)>>,
    ) -> SpatialResult<Self> {
        if exterior.len() < 3 || holes.iter().any(|h| h.len() < 3) {
            return Err(SpatialError::InvalidGeometry(
                "Polygon rings need at least 3 coordinates".to_string(),
            ));
        }
        let holes = holes.into_iter().map(geo::LineString::from).collect();
        Ok(geo::Polygon::new(geo::LineString::from(exterior), holes).into())
    }

    pub fn envelope(min_x: f64, max_x: f64, min_y: f64, max_y: f64) -> Self {
        geo::Rect::new(
            geo::Coord { x: min_x, y: min_y },
            geo::Coord { x: max_x, y: max_y },
        )
        .into()
    }

    /// A [CIRCLE_VERTICES]-sided polygon approximating the circle around
    /// `(x, y)`.
    pub fn circle(x: f64, y: f64, radius: f64) -> SpatialResult<Self> {
        if !radius.is_finite() || radius < 0.0 {
            return Err(SpatialError::InvalidDistance(radius));
        }
        let step = std::f64::consts::TAU / CIRCLE_VERTICES as f64;
        let ring: Vec<(f64, f64)> = (0..CIRCLE_VERTICES)
            .map(|i| {
                let angle = step * i as f64;
                (x + radius * angle.cos(), y + radius * angle.sin())
            })
            .collect();
        Ok(geo::Polygon::new(geo::LineString::from(ring), Vec::new()).into())
    }

    pub fn as_geo(&self) -> &geo::Geometry<f64> {
        &self.inner
    }

    pub fn as_point(&self) -> Option<geo::Point<f64>> {
        match &self.inner {
            geo::Geometry::Point(p) => Some(*p),
            _ => None,
        }
    }

    /// The box enclosing this geometry, or [BoundingBox::EMPTY] for a
    /// geometry without coordinates.
    pub fn bounding_box(&self) -> BoundingBox {
        match self.inner.bounding_rect() {
            Some(rect) => BoundingBox::new(rect.min().x, rect.max().x, rect.min().y, rect.max().y),
            None => BoundingBox::EMPTY,
        }
    }

    pub fn intersects(&self, other: &Geometry) -> bool {
        self.inner.intersects(&other.inner)
    }

    /// `other` lies in the interior of this geometry.
    pub fn contains(&self, other: &Geometry) -> bool {
        self.inner.contains(&other.inner)
    }

    /// Like [Geometry::contains] but a geometry on the boundary also counts.
    /// Exact when this geometry is convex.
    pub fn covers(&self, other: &Geometry) -> bool {
        if self.contains(other) {
            return true;
        }
        let mut coords = other.inner.coords_iter().peekable();
        coords.peek().is_some() && coords.all(|c| self.inner.intersects(&geo::Point::from(c)))
    }

    /// Parses `POINT`, `LINESTRING`, `POLYGON` or `MULTIPOINT` text.
    pub fn from_wkt(text: &str) -> SpatialResult<Self> {
        wkt::parse(text)
    }

    pub fn to_wkt(&self) -> String {
        wkt::write(&self.inner)
    }

    pub fn to_value(&self) -> Value {
        Value::String(self.to_wkt())
    }

    /// Reads a geometry from a stored field value.
    ///
    /// Accepts WKT text, a map with a `geometry` WKT entry, a map with
    /// `latitude`/`longitude`, a map with `x`/`y`, or a map with
    /// `min_x`/`max_x`/`min_y`/`max_y`. `Null` has no geometry.
    pub fn from_value(value: &Value) -> SpatialResult<Option<Self>> {
        match value {
            Value::Null => Ok(None),
            Value::String(text) => Self::from_wkt(text).map(Some),
            Value::Map(map) => Self::from_map(map).map(Some),
            other => Err(SpatialError::InvalidGeometry(format!(
                "{:?} is not a geometry",
                other
            ))),
        }
    }

    fn from_map(map: &BTreeMap<String, Value>) -> SpatialResult<Self> {
        let number = |key: &str| map.get(key).and_then(Value::as_f64);

        if let Some(text) = map.get("geometry").and_then(Value::as_string) {
            return Self::from_wkt(text);
        }
        if let (Some(lat), Some(lon)) = (number("latitude"), number("longitude")) {
            return Ok(GeoPoint::new(lat, lon)?.into());
        }
        if let (Some(x), Some(y)) = (number("x"), number("y")) {
            return Ok(Self::point(x, y));
        }
        if let (Some(min_x), Some(max_x), Some(min_y), Some(max_y)) = (
            number("min_x"),
            number("max_x"),
            number("min_y"),
            number("max_y"),
        ) {
            return Ok(Self::envelope(min_x, max_x, min_y, max_y));
        }
        Err(SpatialError::InvalidGeometry(
            "map does not describe a geometry".to_string(),
        ))
    }
}

macro_rules! impl_from_geo {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Geometry {
                fn from(geometry: $t) -> Self {
                    Geometry {
                        inner: geometry.into(),
                    }
                }
            }
        )*
    };
}

impl_from_geo!(
    geo::Geometry<f64>,
    geo::Point<f64>,
    geo::LineString<f64>,
    geo::Polygon<f64>,
    geo::Rect<f64>,
    geo::MultiPoint<f64>
);

impl From<GeoPoint> for Geometry {
    fn from(point: GeoPoint) -> Self {
        point.to_point().into()
    }
}

impl Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_wkt())
    }
}

impl Serialize for Geometry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_wkt())
    }
}

impl<'de> Deserialize<'de> for Geometry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Geometry::from_wkt(&text).map_err(serde::de::Error::custom)
    }
}

mod wkt {
    use super::Geometry;
    use crate::error::{SpatialError, SpatialResult};

    type Ring = Vec<(f64, f64)>;

    pub(super) fn parse(text: &str) -> SpatialResult<Geometry> {
        let text = text.trim();
        let upper = text.to_ascii_uppercase();
        // longer tags first: MULTIPOINT before POINT
        for tag in ["MULTIPOINT", "LINESTRING", "POLYGON", "POINT"] {
            if upper.starts_with(tag) {
                let body = &text[tag.len()..];
                return match tag {
                    "POINT" => point(body),
                    "LINESTRING" => Geometry::line_string(ring(body)?),
                    "POLYGON" => polygon(body),
                    _ => multi_point(body),
                };
            }
        }
        Err(SpatialError::InvalidWkt(text.to_string()))
    }

    fn point(body: &str) -> SpatialResult<Geometry> {
        match ring(body)?.as_slice() {
            [(x, y)] => Ok(Geometry::point(*x, *y)),
            _ => Err(SpatialError::InvalidWkt(format!(
                "POINT needs exactly one coordinate: {}",
                body.trim()
            ))),
        }
    }

    fn polygon(body: &str) -> SpatialResult<Geometry> {
        let mut rings = groups(body)?
            .into_iter()
            .map(coordinates)
            .collect::<SpatialResult<Vec<Ring>>>()?;
        if rings.is_empty() {
            return Err(SpatialError::InvalidWkt("POLYGON without rings".to_string()));
        }
        let exterior = rings.remove(0);
        Geometry::polygon_with_holes(exterior, rings)
    }

    fn multi_point(body: &str) -> SpatialResult<Geometry> {
        let inner = unwrap_parens(body)?;
        // both MULTIPOINT ((1 2), (3 4)) and MULTIPOINT (1 2, 3 4)
        let points: Ring = if inner.contains('(') {
            let mut points = Vec::new();
            for group in groups(body)? {
                points.extend(coordinates(group)?);
            }
            points
        } else {
            coordinates(inner)?
        };
        if points.is_empty() {
            return Err(SpatialError::InvalidWkt("MULTIPOINT without points".to_string()));
        }
        Ok(geo::MultiPoint::from(points).into())
    }

    fn ring(body: &str) -> SpatialResult<Ring> {
        coordinates(unwrap_parens(body)?)
    }

    fn unwrap_parens(body: &str) -> SpatialResult<&str> {
        let body = body.trim();
        body.strip_prefix('(')
            .and_then(|b| b.strip_suffix(')'))
            .ok_or_else(|| SpatialError::InvalidWkt(format!("unbalanced parentheses: {}", body)))
    }

    /// Splits `((a), (b))` into `["a", "b"]`.
    fn groups(body: &str) -> SpatialResult<Vec<&str>> {
        let inner = unwrap_parens(body)?;
        let mut result = Vec::new();
        let mut depth = 0usize;
        let mut start = 0usize;
        for (i, c) in inner.char_indices() {
            match c {
                '(' => {
                    if depth == 0 {
                        start = i + 1;
                    }
                    depth += 1;
                }
                ')' => {
                    depth = depth.checked_sub(1).ok_or_else(|| {
                        SpatialError::InvalidWkt(format!("unbalanced parentheses: {}", body))
                    })?;
                    if depth == 0 {
                        result.push(&inner[start..i]);
                    }
                }
                _ => {}
            }
        }
        if depth != 0 {
            return Err(SpatialError::InvalidWkt(format!(
                "unbalanced parentheses: {}",
                body
            )));
        }
        Ok(result)
    }

    fn coordinates(list: &str) -> SpatialResult<Ring> {
        list.split(',')
            .map(|pair| {
                let numbers = pair
                    .split_whitespace()
                    .map(|n| n.parse::<f64>())
                    .collect::<Result<Vec<f64>, _>>()
                    .map_err(|_| SpatialError::InvalidWkt(format!("bad coordinate: {}", pair.trim())))?;
                match numbers.as_slice() {
                    [x, y] => Ok((*x, *y)),
                    _ => Err(SpatialError::InvalidWkt(format!(
                        "bad coordinate: {}",
                        pair.trim()
                    ))),
                }
            })
            .collect()
    }

    pub(super) fn write(geometry: &geo::Geometry<f64>) -> String {
        match geometry {
            geo::Geometry::Point(p) => format!("POINT ({} {})", p.x(), p.y()),
            geo::Geometry::LineString(line) => format!("LINESTRING ({})", join(line)),
            geo::Geometry::Polygon(polygon) => polygon_text(polygon),
            geo::Geometry::Rect(rect) => polygon_text(&rect.to_polygon()),
            geo::Geometry::MultiPoint(points) => {
                let parts: Vec<String> = points
                    .iter()
                    .map(|p| format!("({} {})", p.x(), p.y()))
                    .collect();
                format!("MULTIPOINT ({})", parts.join(", "))
            }
            other => format!("{:?}", other),
        }
    }

    fn polygon_text(polygon: &geo::Polygon<f64>) -> String {
        let rings: Vec<String> = std::iter::once(polygon.exterior())
            .chain(polygon.interiors())
            .map(|ring| format!("({})", join(ring)))
            .collect();
        format!("POLYGON ({})", rings.join(", "))
    }

    fn join(line: &geo::LineString<f64>) -> String {
        line.coords()
            .map(|c| format!("{} {}", c.x, c.y))
            .collect::<Vec<_>>()
            .join(", ")
    }
}
