use crate::common::util::get_current_time_or_zero;
use crate::common::{Value, CREATED_TIME, OWNER, UNIQUE_ID};
use crate::errors::{ErrorKind, NitriteError, NitriteResult};
use indexmap::IndexMap;
use std::collections::BTreeMap;
use std::fmt::Display;
use uuid::Uuid;

/// Implemented by storage objects that carry [Attributes].
pub trait AttributeAware {
    fn attributes(&self) -> NitriteResult<Option<Attributes>>;

    fn set_attributes(&self, attributes: Attributes) -> NitriteResult<()>;
}

/// Bookkeeping attributes of a map: creation time, a unique id and the
/// last modification time.
///
/// Attributes are persisted as a [Value::Map] in the store's meta map,
/// keyed by the owning map's name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes {
    attributes: IndexMap<String, Value>,
}

impl Attributes {
    pub fn new() -> Self {
        let mut attributes = IndexMap::with_capacity(2);
        attributes.insert(
            CREATED_TIME.to_string(),
            Value::String(get_current_time_or_zero().to_string()),
        );
        attributes.insert(
            UNIQUE_ID.to_string(),
            Value::String(Uuid::new_v4().to_string()),
        );

        Attributes { attributes }
    }

    pub fn new_for_map(map_name: &str) -> Self {
        let mut attributes = Attributes::new();
        attributes.put(OWNER, Value::String(map_name.to_string()));
        attributes
    }

    /// Rebuilds attributes from their stored form.
    pub fn from_value(value: &Value) -> NitriteResult<Self> {
        match value {
            Value::Map(entries) => {
                let mut attributes = IndexMap::with_capacity(entries.len());
                for (key, value) in entries {
                    attributes.insert(key.clone(), value.clone());
                }
                Ok(Attributes { attributes })
            }
            _ => {
                log::error!("Stored attributes are not a map: {}", value);
                Err(NitriteError::new(
                    "Stored attributes are not a map",
                    ErrorKind::ObjectMappingError,
                ))
            }
        }
    }

    pub fn to_value(&self) -> Value {
        let entries: BTreeMap<String, Value> = self
            .attributes
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Value::Map(entries)
    }

    #[inline]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    #[inline]
    pub fn put(&mut self, key: &str, value: Value) {
        self.attributes.insert(key.to_string(), value);
    }

    #[inline]
    pub fn has_key(&self, key: &str) -> bool {
        self.attributes.contains_key(key)
    }
}

impl Display for Attributes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut result = String::new();
        for (key, value) in self.attributes.iter() {
            result.push_str(&format!("{}: {}, ", key, value));
        }
        write!(f, "{}", result)
    }
}
