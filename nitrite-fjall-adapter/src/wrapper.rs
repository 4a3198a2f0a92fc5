use nitrite::common::Value;
use nitrite::errors::{ErrorKind, NitriteError};
use std::error::Error;
use thiserror::Error;

/// Failure to encode or decode a record for fjall.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FjallValueError {
    #[error("Deserialization failed: {0}")]
    DeserializationError(String),
    #[error("Serialization failed: {0}")]
    SerializationError(String),
    #[error("Invalid UTF-8 in serialized data: {0}")]
    InvalidUtf8(String),
}

impl From<FjallValueError> for NitriteError {
    fn from(err: FjallValueError) -> Self {
        log::error!("{}", err);
        NitriteError::new(&err.to_string(), ErrorKind::ObjectMappingError)
    }
}

pub type FjallValueResult<T> = Result<T, FjallValueError>;

/// A record value serialized for storage in a partition.
#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) struct FjallValue(Vec<u8>);

impl FjallValue {
    pub(crate) fn try_from_value(value: &Value) -> FjallValueResult<FjallValue> {
        bincode::serde::encode_to_vec(value, bincode::config::standard())
            .map(FjallValue)
            .map_err(|e| FjallValueError::SerializationError(e.to_string()))
    }

    pub(crate) fn try_into_value(self) -> FjallValueResult<Value> {
        Self::decode(&self.0)
    }

    pub(crate) fn decode(bytes: &[u8]) -> FjallValueResult<Value> {
        bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map(|(value, _)| value)
            .map_err(|e| FjallValueError::DeserializationError(e.to_string()))
    }

    pub(crate) fn len(&self) -> usize {
        self.0.len()
    }

    pub(crate) fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

/// Wraps a fjall error as a storage I/O failure, keeping the original
/// message as the cause.
pub(crate) fn to_nitrite_error(error: impl Error) -> NitriteError {
    let message = error.to_string();
    log::error!("Fjall error: {}", message);
    NitriteError::new_with_cause(
        &format!("Fjall error: {}", message),
        ErrorKind::IOError,
        NitriteError::new(&message, ErrorKind::BackendError),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_value_survives_encoding() {
        let mut doc = BTreeMap::new();
        doc.insert("name".to_string(), Value::from("ann"));
        doc.insert("tags".to_string(), Value::Array(vec![Value::from(1), Value::from(2.5)]));
        let value = Value::Map(doc);

        let encoded = FjallValue::try_from_value(&value).unwrap();
        assert!(encoded.len() > 0);
        assert_eq!(encoded.try_into_value().unwrap(), value);
    }

    #[test]
    fn test_corrupted_bytes_rejected() {
        let err = FjallValue::decode(&[0xff, 0xff, 0xff]).unwrap_err();
        assert!(matches!(err, FjallValueError::DeserializationError(_)));

        let nitrite_error = NitriteError::from(err);
        assert_eq!(nitrite_error.kind(), &ErrorKind::ObjectMappingError);
    }

    #[test]
    fn test_engine_errors_become_io_errors() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err = to_nitrite_error(io);
        assert_eq!(err.kind(), &ErrorKind::IOError);
        assert!(err.message().contains("disk gone"));
        assert!(err.cause().is_some());
    }
}
