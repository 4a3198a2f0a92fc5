use crate::errors::{ErrorKind, NitriteError, NitriteResult};
use std::fmt::{Debug, Display};
use std::str::FromStr;

/// Opaque record identifier that ties a spatial index entry back to the
/// document owning it.
///
/// Ids are totally ordered by their numeric value and travel through the
/// storage layer as decimal strings.
#[derive(PartialEq, Eq, Ord, PartialOrd, Hash, Clone, Copy, serde::Deserialize, serde::Serialize)]
pub struct NitriteId {
    id_value: u64,
}

impl NitriteId {
    pub fn create_id(id_value: u64) -> NitriteId {
        NitriteId { id_value }
    }

    pub fn id_value(&self) -> u64 {
        self.id_value
    }
}

impl FromStr for NitriteId {
    type Err = NitriteError;

    fn from_str(s: &str) -> NitriteResult<Self> {
        match s.trim().parse::<u64>() {
            Ok(id_value) => Ok(NitriteId { id_value }),
            Err(e) => {
                log::error!("Invalid record id {}: {}", s, e);
                Err(NitriteError::new(
                    &format!("Invalid record id {}", s),
                    ErrorKind::ValidationError,
                ))
            }
        }
    }
}

impl Debug for NitriteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NitriteId({})", self.id_value)
    }
}

impl Display for NitriteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id_value)
    }
}
