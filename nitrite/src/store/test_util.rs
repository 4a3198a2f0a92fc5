//! Volatile store used by the unit tests of this crate.

use crate::common::{AttributeAware, Attributes, Key, NitritePlugin, NitritePluginProvider, SubscriberRef, Value};
use crate::errors::{ErrorKind, NitriteError, NitriteResult};
use crate::nitrite_config::NitriteConfig;
use crate::store::rtree::{MapBackedRTree, NitriteRTree};
use crate::store::{
    read_map_attributes, touch_last_modified, validate_value, write_map_attributes,
    EntryIterator, KeyIterator, NitriteMap, NitriteMapProvider, NitriteStore,
    NitriteStoreProvider, SingleMapEntryProvider, SingleMapKeyProvider, SingleMapValueProvider,
    StoreConfig, StoreConfigProvider, StoreEventListener, ValueIterator,
};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::iter::Rev;
use std::ops::Bound::{Excluded, Included, Unbounded};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub(crate) fn test_store() -> NitriteStore {
    NitriteStore::new(TestStore::default())
}

pub(crate) fn test_map(name: &str) -> NitriteMap {
    test_store().open_map(name).expect("open test map")
}

#[derive(Clone, Default)]
pub(crate) struct TestStore {
    inner: Arc<TestStoreInner>,
}

#[derive(Default)]
struct TestStoreInner {
    maps: DashMap<String, NitriteMap>,
    rtrees: DashMap<String, NitriteRTree>,
    closed: AtomicBool,
}

struct TestConfig;

impl StoreConfigProvider for TestConfig {
    fn file_path(&self) -> String {
        String::new()
    }

    fn is_read_only(&self) -> bool {
        false
    }

    fn add_store_listener(&self, _listener: StoreEventListener) {}

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl NitritePluginProvider for TestStore {
    fn initialize(&self, _config: NitriteConfig) -> NitriteResult<()> {
        Ok(())
    }

    fn close(&self) -> NitriteResult<()> {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.maps.clear();
        self.inner.rtrees.clear();
        Ok(())
    }

    fn as_plugin(&self) -> NitritePlugin {
        NitritePlugin::new(self.clone())
    }
}

impl NitriteStoreProvider for TestStore {
    fn open_or_create(&self) -> NitriteResult<()> {
        Ok(())
    }

    fn is_closed(&self) -> NitriteResult<bool> {
        Ok(self.inner.closed.load(Ordering::SeqCst))
    }

    fn has_unsaved_changes(&self) -> NitriteResult<bool> {
        Ok(false)
    }

    fn is_read_only(&self) -> NitriteResult<bool> {
        Ok(false)
    }

    fn is_map_opened(&self, name: &str) -> NitriteResult<bool> {
        Ok(self.inner.maps.contains_key(name))
    }

    fn commit(&self) -> NitriteResult<()> {
        Ok(())
    }

    fn rollback(&self) -> NitriteResult<()> {
        Err(NitriteError::new("unsupported", ErrorKind::InvalidOperation))
    }

    fn compact(&self) -> NitriteResult<()> {
        Ok(())
    }

    fn before_close(&self) -> NitriteResult<()> {
        Ok(())
    }

    fn has_map(&self, name: &str) -> NitriteResult<bool> {
        Ok(self.inner.maps.contains_key(name))
    }

    fn map_names(&self) -> NitriteResult<BTreeSet<String>> {
        Ok(self.inner.maps.iter().map(|e| e.key().clone()).collect())
    }

    fn open_map(&self, name: &str) -> NitriteResult<NitriteMap> {
        let store = NitriteStore::new(self.clone());
        let map = self
            .inner
            .maps
            .entry(name.to_string())
            .or_insert_with(|| NitriteMap::new(TestMap::new(name, store)));
        Ok(map.value().clone())
    }

    fn close_map(&self, _name: &str) -> NitriteResult<()> {
        Ok(())
    }

    fn remove_map(&self, name: &str) -> NitriteResult<()> {
        self.inner.maps.remove(name);
        Ok(())
    }

    fn open_rtree(&self, name: &str) -> NitriteResult<NitriteRTree> {
        let map = self.open_map(&format!("{}{}", crate::common::RTREE_MAP_PREFIX, name))?;
        let tree = self
            .inner
            .rtrees
            .entry(name.to_string())
            .or_insert_with(|| NitriteRTree::new(MapBackedRTree::new(map)));
        Ok(tree.value().clone())
    }

    fn close_rtree(&self, name: &str) -> NitriteResult<()> {
        self.inner.rtrees.remove(name);
        Ok(())
    }

    fn remove_rtree(&self, name: &str) -> NitriteResult<()> {
        self.inner.rtrees.remove(name);
        self.remove_map(&format!("{}{}", crate::common::RTREE_MAP_PREFIX, name))
    }

    fn subscribe(&self, _listener: StoreEventListener) -> NitriteResult<Option<SubscriberRef>> {
        Ok(None)
    }

    fn unsubscribe(&self, _subscriber_ref: SubscriberRef) -> NitriteResult<()> {
        Ok(())
    }

    fn store_version(&self) -> NitriteResult<String> {
        Ok("TestStore/1".to_string())
    }

    fn store_config(&self) -> NitriteResult<StoreConfig> {
        Ok(StoreConfig::new(TestConfig))
    }
}

#[derive(Clone)]
struct TestMap {
    inner: Arc<TestMapInner>,
}

struct TestMapInner {
    name: String,
    store: NitriteStore,
    data: RwLock<BTreeMap<Key, Value>>,
    dropped: AtomicBool,
}

impl TestMap {
    fn new(name: &str, store: NitriteStore) -> Self {
        TestMap {
            inner: Arc::new(TestMapInner {
                name: name.to_string(),
                store,
                data: RwLock::new(BTreeMap::new()),
                dropped: AtomicBool::new(false),
            }),
        }
    }

    fn first_in<R: std::ops::RangeBounds<Key>>(&self, range: R, last: bool) -> Option<Key> {
        let data = self.inner.data.read();
        let mut iter = data.range(range).map(|(k, _)| k.clone());
        if last {
            iter.next_back()
        } else {
            iter.next()
        }
    }
}

impl AttributeAware for TestMap {
    fn attributes(&self) -> NitriteResult<Option<Attributes>> {
        read_map_attributes(&self.inner.store, &self.inner.name)
    }

    fn set_attributes(&self, attributes: Attributes) -> NitriteResult<()> {
        write_map_attributes(&self.inner.store, &self.inner.name, &attributes)
    }
}

impl NitriteMapProvider for TestMap {
    fn contains_key(&self, key: &Key) -> NitriteResult<bool> {
        Ok(self.inner.data.read().contains_key(key))
    }

    fn get(&self, key: &Key) -> NitriteResult<Option<Value>> {
        Ok(self.inner.data.read().get(key).cloned())
    }

    fn clear(&self) -> NitriteResult<()> {
        self.inner.data.write().clear();
        touch_last_modified(&self.inner.store, &self.inner.name)
    }

    fn is_closed(&self) -> NitriteResult<bool> {
        Ok(false)
    }

    fn close(&self) -> NitriteResult<()> {
        Ok(())
    }

    fn values(&self) -> NitriteResult<ValueIterator> {
        Ok(ValueIterator::new(SingleMapValueProvider::new(NitriteMap::new(self.clone()))))
    }

    fn keys(&self) -> NitriteResult<KeyIterator> {
        Ok(KeyIterator::new(SingleMapKeyProvider::new(NitriteMap::new(self.clone()))))
    }

    fn remove(&self, key: &Key) -> NitriteResult<Option<Value>> {
        let previous = self.inner.data.write().remove(key);
        touch_last_modified(&self.inner.store, &self.inner.name)?;
        Ok(previous)
    }

    fn put(&self, key: Key, value: Value) -> NitriteResult<()> {
        validate_value(&value)?;
        self.inner.data.write().insert(key, value);
        touch_last_modified(&self.inner.store, &self.inner.name)
    }

    fn size(&self) -> NitriteResult<u64> {
        Ok(self.inner.data.read().len() as u64)
    }

    fn put_if_absent(&self, key: Key, value: Value) -> NitriteResult<Option<Value>> {
        validate_value(&value)?;
        let mut data = self.inner.data.write();
        if let Some(existing) = data.get(&key) {
            return Ok(Some(existing.clone()));
        }
        data.insert(key, value);
        Ok(None)
    }

    fn first_key(&self) -> NitriteResult<Option<Key>> {
        Ok(self.first_in(.., false))
    }

    fn last_key(&self) -> NitriteResult<Option<Key>> {
        Ok(self.first_in(.., true))
    }

    fn higher_key(&self, key: &Key) -> NitriteResult<Option<Key>> {
        Ok(self.first_in((Excluded(key.clone()), Unbounded), false))
    }

    fn ceiling_key(&self, key: &Key) -> NitriteResult<Option<Key>> {
        Ok(self.first_in((Included(key.clone()), Unbounded), false))
    }

    fn lower_key(&self, key: &Key) -> NitriteResult<Option<Key>> {
        Ok(self.first_in((Unbounded, Excluded(key.clone())), true))
    }

    fn floor_key(&self, key: &Key) -> NitriteResult<Option<Key>> {
        Ok(self.first_in((Unbounded, Included(key.clone())), true))
    }

    fn is_empty(&self) -> NitriteResult<bool> {
        Ok(self.inner.data.read().is_empty())
    }

    fn get_store(&self) -> NitriteResult<NitriteStore> {
        Ok(self.inner.store.clone())
    }

    fn get_name(&self) -> NitriteResult<String> {
        Ok(self.inner.name.clone())
    }

    fn entries(&self) -> NitriteResult<EntryIterator> {
        Ok(EntryIterator::new(SingleMapEntryProvider::new(NitriteMap::new(self.clone()))))
    }

    fn reverse_entries(&self) -> NitriteResult<Rev<EntryIterator>> {
        Ok(self.entries()?.rev())
    }

    fn dispose(&self) -> NitriteResult<()> {
        self.inner.data.write().clear();
        self.inner.dropped.store(true, Ordering::SeqCst);
        self.inner.store.remove_map(&self.inner.name)
    }

    fn is_dropped(&self) -> NitriteResult<bool> {
        Ok(self.inner.dropped.load(Ordering::SeqCst))
    }
}
