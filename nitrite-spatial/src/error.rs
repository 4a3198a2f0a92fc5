use nitrite::errors::{ErrorKind, NitriteError};
use thiserror::Error;

/// Errors raised while building geometries or spatial filters.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SpatialError {
    #[error("Latitude must be between -90 and 90 degrees, got: {0}")]
    InvalidLatitude(f64),
    #[error("Longitude must be between -180 and 180 degrees, got: {0}")]
    InvalidLongitude(f64),
    #[error("Distance must be a non-negative finite number, got: {0}")]
    InvalidDistance(f64),
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),
    #[error("Invalid WKT: {0}")]
    InvalidWkt(String),
}

impl From<SpatialError> for NitriteError {
    fn from(err: SpatialError) -> Self {
        log::error!("{}", err);
        NitriteError::new(&err.to_string(), ErrorKind::ValidationError)
    }
}

pub type SpatialResult<T> = Result<T, SpatialError>;
