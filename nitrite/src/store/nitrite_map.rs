use crate::common::{
    current_time_value, is_reserved_name, AttributeAware, Attributes, Key, Value,
    LAST_MODIFIED_TIME, META_MAP_NAME,
};
use crate::errors::{ErrorKind, NitriteError, NitriteResult};
use crate::store::iters::{EntryIterator, KeyIterator, ValueIterator};
use crate::store::NitriteStore;
use std::iter::Rev;
use std::ops::Deref;
use std::sync::Arc;

/// An ordered map of records backed by a storage engine.
///
/// Every backend honors the same contract:
///
/// * keys are ordered by [Value]'s total order,
/// * values are never null,
/// * `put`, `remove` and `clear` refresh the map's last modified time,
/// * navigation (`higher_key`, `ceiling_key`, `lower_key`, `floor_key`)
///   returns `None` past either boundary,
/// * `keys`, `values` and `entries` are lazy and restartable,
/// * engine failures surface as [NitriteError]; no backend error type
///   crosses this trait.
pub trait NitriteMapProvider: AttributeAware + Send + Sync {
    fn contains_key(&self, key: &Key) -> NitriteResult<bool>;

    fn get(&self, key: &Key) -> NitriteResult<Option<Value>>;

    /// Removes all records, keeping the map registered.
    fn clear(&self) -> NitriteResult<()>;

    fn is_closed(&self) -> NitriteResult<bool>;

    fn close(&self) -> NitriteResult<()>;

    fn values(&self) -> NitriteResult<ValueIterator>;

    fn keys(&self) -> NitriteResult<KeyIterator>;

    /// Removes a record and returns its previous value.
    fn remove(&self, key: &Key) -> NitriteResult<Option<Value>>;

    /// Inserts or replaces a record.
    ///
    /// # Errors
    ///
    /// `ValidationError` if `value` is [Value::Null].
    fn put(&self, key: Key, value: Value) -> NitriteResult<()>;

    fn put_all(&self, entries: Vec<(Key, Value)>) -> NitriteResult<()> {
        for (key, value) in entries {
            self.put(key, value)?;
        }
        Ok(())
    }

    /// Exact count of live records.
    fn size(&self) -> NitriteResult<u64>;

    /// Inserts only if `key` is absent.
    ///
    /// # Returns
    ///
    /// The existing value, in which case nothing was written, or `None`
    /// when the new value was inserted. Concurrent callers racing on the
    /// same key see exactly one `None`.
    fn put_if_absent(&self, key: Key, value: Value) -> NitriteResult<Option<Value>>;

    fn first_key(&self) -> NitriteResult<Option<Key>>;

    fn last_key(&self) -> NitriteResult<Option<Key>>;

    /// Smallest key strictly greater than `key`.
    fn higher_key(&self, key: &Key) -> NitriteResult<Option<Key>>;

    /// Smallest key greater than or equal to `key`.
    fn ceiling_key(&self, key: &Key) -> NitriteResult<Option<Key>>;

    /// Largest key strictly less than `key`.
    fn lower_key(&self, key: &Key) -> NitriteResult<Option<Key>>;

    /// Largest key less than or equal to `key`.
    fn floor_key(&self, key: &Key) -> NitriteResult<Option<Key>>;

    fn is_empty(&self) -> NitriteResult<bool>;

    fn get_store(&self) -> NitriteResult<NitriteStore>;

    fn get_name(&self) -> NitriteResult<String>;

    fn entries(&self) -> NitriteResult<EntryIterator>;

    /// Entries in descending key order.
    fn reverse_entries(&self) -> NitriteResult<Rev<EntryIterator>>;

    /// Clears the map and removes its name from the store.
    fn dispose(&self) -> NitriteResult<()>;

    fn is_dropped(&self) -> NitriteResult<bool>;
}

#[derive(Clone)]
pub struct NitriteMap {
    inner: Arc<dyn NitriteMapProvider>,
}

impl Deref for NitriteMap {
    type Target = Arc<dyn NitriteMapProvider>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl NitriteMap {
    pub fn new<T: NitriteMapProvider + 'static>(inner: T) -> Self {
        NitriteMap {
            inner: Arc::new(inner),
        }
    }
}

/// Rejects null values before they reach a storage engine.
#[inline]
pub fn validate_value(value: &Value) -> NitriteResult<()> {
    if value.is_null() {
        log::error!("value cannot be null");
        return Err(NitriteError::new(
            "value cannot be null",
            ErrorKind::ValidationError,
        ));
    }
    Ok(())
}

/// Reads the attributes of map `name` from the store's meta map.
pub fn read_map_attributes(store: &NitriteStore, name: &str) -> NitriteResult<Option<Attributes>> {
    let meta_map = store.open_map(META_MAP_NAME)?;
    match meta_map.get(&Key::from(name))? {
        Some(value) => Ok(Some(Attributes::from_value(&value)?)),
        None => Ok(None),
    }
}

/// Writes the attributes of map `name` into the store's meta map.
pub fn write_map_attributes(
    store: &NitriteStore,
    name: &str,
    attributes: &Attributes,
) -> NitriteResult<()> {
    let meta_map = store.open_map(META_MAP_NAME)?;
    meta_map.put(Key::from(name), attributes.to_value())
}

/// Refreshes the last modified time of map `name`.
///
/// Internal maps (the meta map itself, the user map, store info) are not
/// tracked.
pub fn touch_last_modified(store: &NitriteStore, name: &str) -> NitriteResult<()> {
    if name.is_empty() || is_reserved_name(name) {
        return Ok(());
    }

    let mut attributes =
        read_map_attributes(store, name)?.unwrap_or_else(|| Attributes::new_for_map(name));
    attributes.put(LAST_MODIFIED_TIME, current_time_value());
    write_map_attributes(store, name, &attributes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_util::{test_map, test_store};

    #[test]
    fn validate_value_rejects_null() {
        let err = validate_value(&Value::Null).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::ValidationError);
        assert!(validate_value(&Value::from(1)).is_ok());
    }

    #[test]
    fn touch_last_modified_creates_attributes() {
        let store = test_store();
        assert!(read_map_attributes(&store, "places").unwrap().is_none());

        touch_last_modified(&store, "places").unwrap();
        let attributes = read_map_attributes(&store, "places").unwrap().unwrap();
        assert!(attributes.has_key(LAST_MODIFIED_TIME));
        assert_eq!(attributes.get(crate::common::OWNER), Some(&Value::from("places")));
    }

    #[test]
    fn touch_last_modified_skips_reserved_maps() {
        let store = test_store();
        touch_last_modified(&store, META_MAP_NAME).unwrap();
        touch_last_modified(&store, crate::common::USER_MAP).unwrap();
        let meta = store.open_map(META_MAP_NAME).unwrap();
        assert_eq!(meta.size().unwrap(), 0);
    }

    #[test]
    fn touch_last_modified_keeps_existing_attributes() {
        let store = test_store();
        let mut attributes = Attributes::new_for_map("places");
        attributes.put("custom", Value::from("kept"));
        write_map_attributes(&store, "places", &attributes).unwrap();

        touch_last_modified(&store, "places").unwrap();
        let stored = read_map_attributes(&store, "places").unwrap().unwrap();
        assert_eq!(stored.get("custom"), Some(&Value::from("kept")));
        assert!(stored.has_key(LAST_MODIFIED_TIME));
    }

    #[test]
    fn map_handle_derefs_to_provider() {
        let map = test_map("deref");
        map.put(Key::from("a"), Value::from(1)).unwrap();
        let clone = map.clone();
        assert_eq!(clone.get(&Key::from("a")).unwrap(), Some(Value::from(1)));
        assert_eq!(clone.get_name().unwrap(), "deref");
    }
}
