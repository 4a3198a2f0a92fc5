use crate::store::MVStore;
use im::OrdMap;
use nitrite::common::{AttributeAware, Attributes, Key, Value};
use nitrite::errors::{ErrorKind, NitriteError, NitriteResult};
use nitrite::store::{
    read_map_attributes, touch_last_modified, validate_value, write_map_attributes,
    EntryIterator, EntryIteratorProvider, KeyIterator, KeyIteratorProvider, NitriteMapProvider,
    NitriteStore, ValueIterator, ValueIteratorProvider,
};
use parking_lot::RwLock;
use std::iter::Rev;
use std::ops::Bound::{self, Excluded, Included, Unbounded};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub(crate) type MapRoot = Arc<RwLock<OrdMap<Key, Value>>>;

/// Ordered map over a persistent B-tree.
///
/// Writers replace the root under the map's write lock; readers and
/// iterators work on an O(1) clone of the root, so an iteration never
/// observes writes made after it started.
#[derive(Clone)]
pub(crate) struct MVMap {
    inner: Arc<MVMapInner>,
}

struct MVMapInner {
    name: String,
    store: MVStore,
    root: MapRoot,
    closed: AtomicBool,
    dropped: AtomicBool,
}

impl MVMap {
    pub(crate) fn new(name: &str, store: MVStore, root: MapRoot) -> Self {
        MVMap {
            inner: Arc::new(MVMapInner {
                name: name.to_string(),
                store,
                root,
                closed: AtomicBool::new(false),
                dropped: AtomicBool::new(false),
            }),
        }
    }

    pub(crate) fn mark_closed(&self) {
        self.inner.closed.store(true, Ordering::Release);
    }

    pub(crate) fn mark_dropped(&self) {
        self.inner.dropped.store(true, Ordering::Release);
    }

    fn check_opened(&self) -> NitriteResult<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            log::error!("Map {} is closed", self.inner.name);
            return Err(NitriteError::new(
                &format!("Map {} is closed", self.inner.name),
                ErrorKind::InvalidOperation,
            ));
        }
        if self.inner.dropped.load(Ordering::Acquire) {
            log::error!("Map {} is dropped", self.inner.name);
            return Err(NitriteError::new(
                &format!("Map {} is dropped", self.inner.name),
                ErrorKind::InvalidOperation,
            ));
        }
        self.inner.store.check_opened()
    }

    fn check_writable(&self) -> NitriteResult<()> {
        self.check_opened()?;
        self.inner.store.check_writable()
    }

    fn snapshot(&self) -> OrdMap<Key, Value> {
        self.inner.root.read().clone()
    }

    /// Bookkeeping after a write, run once the map lock is released.
    fn modified(&self, bytes: u64) -> NitriteResult<()> {
        touch_last_modified(&self.nitrite_store(), &self.inner.name)?;
        self.inner.store.mark_unsaved(&self.inner.name, bytes)
    }

    fn nitrite_store(&self) -> NitriteStore {
        NitriteStore::new(self.inner.store.clone())
    }

    fn first_in(&self, range: (Bound<Key>, Bound<Key>)) -> Option<Key> {
        self.inner
            .root
            .read()
            .range(range)
            .next()
            .map(|(k, _)| k.clone())
    }

    fn last_in(&self, range: (Bound<Key>, Bound<Key>)) -> Option<Key> {
        self.inner
            .root
            .read()
            .range(range)
            .next_back()
            .map(|(k, _)| k.clone())
    }
}

impl AttributeAware for MVMap {
    fn attributes(&self) -> NitriteResult<Option<Attributes>> {
        self.check_opened()?;
        read_map_attributes(&self.nitrite_store(), &self.inner.name)
    }

    fn set_attributes(&self, attributes: Attributes) -> NitriteResult<()> {
        self.check_writable()?;
        write_map_attributes(&self.nitrite_store(), &self.inner.name, &attributes)
    }
}

impl NitriteMapProvider for MVMap {
    fn contains_key(&self, key: &Key) -> NitriteResult<bool> {
        self.check_opened()?;
        Ok(self.inner.root.read().contains_key(key))
    }

    fn get(&self, key: &Key) -> NitriteResult<Option<Value>> {
        self.check_opened()?;
        Ok(self.inner.root.read().get(key).cloned())
    }

    fn clear(&self) -> NitriteResult<()> {
        self.check_writable()?;
        *self.inner.root.write() = OrdMap::new();
        self.modified(0)
    }

    fn is_closed(&self) -> NitriteResult<bool> {
        Ok(self.inner.closed.load(Ordering::Acquire) || self.inner.store.is_store_closed())
    }

    fn close(&self) -> NitriteResult<()> {
        self.mark_closed();
        self.inner.store.detach_map(&self.inner.name);
        Ok(())
    }

    fn values(&self) -> NitriteResult<ValueIterator> {
        self.check_opened()?;
        Ok(ValueIterator::new(SnapshotCursor::new(self.snapshot())))
    }

    fn keys(&self) -> NitriteResult<KeyIterator> {
        self.check_opened()?;
        Ok(KeyIterator::new(SnapshotCursor::new(self.snapshot())))
    }

    fn remove(&self, key: &Key) -> NitriteResult<Option<Value>> {
        self.check_writable()?;
        let removed = self.inner.root.write().remove(key);
        if let Some(value) = &removed {
            self.modified(estimate_size(key) + estimate_size(value))?;
        }
        Ok(removed)
    }

    fn put(&self, key: Key, value: Value) -> NitriteResult<()> {
        validate_value(&value)?;
        self.check_writable()?;
        let bytes = estimate_size(&key) + estimate_size(&value);
        self.inner.root.write().insert(key, value);
        self.modified(bytes)
    }

    fn size(&self) -> NitriteResult<u64> {
        self.check_opened()?;
        Ok(self.inner.root.read().len() as u64)
    }

    fn put_if_absent(&self, key: Key, value: Value) -> NitriteResult<Option<Value>> {
        validate_value(&value)?;
        self.check_writable()?;
        let bytes = estimate_size(&key) + estimate_size(&value);
        {
            let mut root = self.inner.root.write();
            if let Some(existing) = root.get(&key) {
                return Ok(Some(existing.clone()));
            }
            root.insert(key, value);
        }
        self.modified(bytes)?;
        Ok(None)
    }

    fn first_key(&self) -> NitriteResult<Option<Key>> {
        self.check_opened()?;
        Ok(self.inner.root.read().get_min().map(|(k, _)| k.clone()))
    }

    fn last_key(&self) -> NitriteResult<Option<Key>> {
        self.check_opened()?;
        Ok(self.inner.root.read().get_max().map(|(k, _)| k.clone()))
    }

    fn higher_key(&self, key: &Key) -> NitriteResult<Option<Key>> {
        self.check_opened()?;
        Ok(self.first_in((Excluded(key.clone()), Unbounded)))
    }

    fn ceiling_key(&self, key: &Key) -> NitriteResult<Option<Key>> {
        self.check_opened()?;
        Ok(self.first_in((Included(key.clone()), Unbounded)))
    }

    fn lower_key(&self, key: &Key) -> NitriteResult<Option<Key>> {
        self.check_opened()?;
        Ok(self.last_in((Unbounded, Excluded(key.clone()))))
    }

    fn floor_key(&self, key: &Key) -> NitriteResult<Option<Key>> {
        self.check_opened()?;
        Ok(self.last_in((Unbounded, Included(key.clone()))))
    }

    fn is_empty(&self) -> NitriteResult<bool> {
        self.check_opened()?;
        Ok(self.inner.root.read().is_empty())
    }

    fn get_store(&self) -> NitriteResult<NitriteStore> {
        Ok(self.nitrite_store())
    }

    fn get_name(&self) -> NitriteResult<String> {
        Ok(self.inner.name.clone())
    }

    fn entries(&self) -> NitriteResult<EntryIterator> {
        self.check_opened()?;
        Ok(EntryIterator::new(SnapshotCursor::new(self.snapshot())))
    }

    fn reverse_entries(&self) -> NitriteResult<Rev<EntryIterator>> {
        self.check_opened()?;
        Ok(EntryIterator::new(SnapshotCursor::new(self.snapshot())).rev())
    }

    fn dispose(&self) -> NitriteResult<()> {
        self.check_writable()?;
        *self.inner.root.write() = OrdMap::new();
        self.mark_dropped();
        self.inner.store.forget_map(&self.inner.name)
    }

    fn is_dropped(&self) -> NitriteResult<bool> {
        Ok(self.inner.dropped.load(Ordering::Acquire))
    }
}

/// Walks a frozen root from both ends.
struct SnapshotCursor {
    snapshot: OrdMap<Key, Value>,
    front: Bound<Key>,
    back: Bound<Key>,
}

impl SnapshotCursor {
    fn new(snapshot: OrdMap<Key, Value>) -> Self {
        SnapshotCursor {
            snapshot,
            front: Unbounded,
            back: Unbounded,
        }
    }

    fn exhausted(&self) -> bool {
        match (&self.front, &self.back) {
            (Excluded(front), Excluded(back)) => front >= back,
            _ => false,
        }
    }

    fn step(&mut self, forward: bool) -> Option<(Key, Value)> {
        if self.exhausted() {
            return None;
        }
        let bounds = (self.front.clone(), self.back.clone());
        let mut range = self.snapshot.range(bounds);
        let found = if forward { range.next() } else { range.next_back() };
        let (key, value) = found.map(|(k, v)| (k.clone(), v.clone()))?;
        if forward {
            self.front = Excluded(key.clone());
        } else {
            self.back = Excluded(key.clone());
        }
        Some((key, value))
    }
}

impl EntryIteratorProvider for SnapshotCursor {
    fn next_entry(&mut self) -> Option<NitriteResult<(Key, Value)>> {
        self.step(true).map(Ok)
    }

    fn prev_entry(&mut self) -> Option<NitriteResult<(Key, Value)>> {
        self.step(false).map(Ok)
    }
}

impl KeyIteratorProvider for SnapshotCursor {
    fn next_key(&mut self) -> Option<NitriteResult<Key>> {
        self.step(true).map(|(k, _)| Ok(k))
    }

    fn prev_key(&mut self) -> Option<NitriteResult<Key>> {
        self.step(false).map(|(k, _)| Ok(k))
    }
}

impl ValueIteratorProvider for SnapshotCursor {
    fn next_value(&mut self) -> Option<NitriteResult<Value>> {
        self.step(true).map(|(_, v)| Ok(v))
    }

    fn prev_value(&mut self) -> Option<NitriteResult<Value>> {
        self.step(false).map(|(_, v)| Ok(v))
    }
}

/// Rough serialized size of a value, used for the auto-commit estimate.
pub(crate) fn estimate_size(value: &Value) -> u64 {
    match value {
        Value::Null | Value::Bool(_) => 1,
        Value::I64(_) | Value::F64(_) => 8,
        Value::String(s) => s.len() as u64 + 2,
        Value::Bytes(b) => b.len() as u64 + 2,
        Value::Array(items) => 2 + items.iter().map(estimate_size).sum::<u64>(),
        Value::Map(entries) => {
            2 + entries
                .iter()
                .map(|(k, v)| k.len() as u64 + 2 + estimate_size(v))
                .sum::<u64>()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MVStoreModule;
    use nitrite::common::{LAST_MODIFIED_TIME, NitritePluginProvider};
    use nitrite::store::{NitriteMap, StoreModule};

    fn memory_store() -> NitriteStore {
        let store = MVStoreModule::with_config().build().unwrap().get_store().unwrap();
        store.open_or_create().unwrap();
        store
    }

    fn filled_map(store: &NitriteStore) -> NitriteMap {
        let map = store.open_map("test").unwrap();
        map.put(Value::from("a"), Value::from(1)).unwrap();
        map.put(Value::from("b"), Value::from(2)).unwrap();
        map.put(Value::from("c"), Value::from(3)).unwrap();
        map
    }

    #[test]
    fn test_put_get_remove() {
        let store = memory_store();
        let map = filled_map(&store);
        assert_eq!(map.floor_key(&Value::from("b")).unwrap(), Some(Value::from("b")));
        assert_eq!(map.higher_key(&Value::from("b")).unwrap(), Some(Value::from("c")));
        assert_eq!(map.size().unwrap(), 3);

        assert_eq!(map.remove(&Value::from("b")).unwrap(), Some(Value::from(2)));
        assert_eq!(map.size().unwrap(), 2);
        assert_eq!(map.get(&Value::from("b")).unwrap(), None);
        assert_eq!(map.remove(&Value::from("b")).unwrap(), None);
    }

    #[test]
    fn test_navigation_boundaries() {
        let store = memory_store();
        let map = filled_map(&store);
        assert_eq!(map.lower_key(&Value::from("a")).unwrap(), None);
        assert_eq!(map.floor_key(&Value::from("0")).unwrap(), None);
        assert_eq!(map.higher_key(&Value::from("c")).unwrap(), None);
        assert_eq!(map.ceiling_key(&Value::from("d")).unwrap(), None);
        assert_eq!(map.ceiling_key(&Value::from("bb")).unwrap(), Some(Value::from("c")));
        assert_eq!(map.lower_key(&Value::from("c")).unwrap(), Some(Value::from("b")));
        assert_eq!(map.first_key().unwrap(), Some(Value::from("a")));
        assert_eq!(map.last_key().unwrap(), Some(Value::from("c")));
    }

    #[test]
    fn test_null_value_rejected() {
        let store = memory_store();
        let map = store.open_map("nulls").unwrap();
        let err = map.put(Value::from(1), Value::Null).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::ValidationError);
        assert!(map.is_empty().unwrap());
    }

    #[test]
    fn test_put_if_absent() {
        let store = memory_store();
        let map = store.open_map("absent").unwrap();
        assert_eq!(map.put_if_absent(Value::from(1), Value::from("x")).unwrap(), None);
        assert_eq!(
            map.put_if_absent(Value::from(1), Value::from("y")).unwrap(),
            Some(Value::from("x"))
        );
        assert_eq!(map.get(&Value::from(1)).unwrap(), Some(Value::from("x")));
    }

    #[test]
    fn test_reverse_entries_ignore_later_writes() {
        let store = memory_store();
        let map = filled_map(&store);
        let reversed = map.reverse_entries().unwrap();
        map.put(Value::from("d"), Value::from(4)).unwrap();
        map.remove(&Value::from("a")).unwrap();

        let keys: Vec<Key> = reversed.map(|r| r.unwrap().0).collect();
        assert_eq!(keys, vec![Value::from("c"), Value::from("b"), Value::from("a")]);
    }

    #[test]
    fn test_iterators_meet_in_the_middle() {
        let store = memory_store();
        let map = filled_map(&store);
        let mut keys = map.keys().unwrap();
        assert_eq!(keys.next().unwrap().unwrap(), Value::from("a"));
        assert_eq!(keys.next_back().unwrap().unwrap(), Value::from("c"));
        assert_eq!(keys.next().unwrap().unwrap(), Value::from("b"));
        assert!(keys.next().is_none());
        assert!(keys.next_back().is_none());

        let values: Vec<Value> = map.values().unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(values, vec![Value::from(1), Value::from(2), Value::from(3)]);
    }

    #[test]
    fn test_mixed_kind_keys_follow_rank() {
        let store = memory_store();
        let map = store.open_map("mixed").unwrap();
        map.put(Value::from("s"), Value::from(1)).unwrap();
        map.put(Value::from(2.5), Value::from(1)).unwrap();
        map.put(Value::from(7), Value::from(1)).unwrap();
        map.put(Value::from(true), Value::from(1)).unwrap();
        let keys: Vec<Key> = map.keys().unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(
            keys,
            vec![Value::from(true), Value::from(7), Value::from(2.5), Value::from("s")]
        );
    }

    #[test]
    fn test_clear_keeps_map_registered() {
        let store = memory_store();
        let map = filled_map(&store);
        map.clear().unwrap();
        assert_eq!(map.size().unwrap(), 0);
        assert!(store.has_map("test").unwrap());
    }

    #[test]
    fn test_dispose_then_reopen_is_empty() {
        let store = memory_store();
        let map = filled_map(&store);
        map.dispose().unwrap();
        assert!(map.is_dropped().unwrap());
        assert!(!store.has_map("test").unwrap());
        assert_eq!(map.size().unwrap_err().kind(), &ErrorKind::InvalidOperation);

        let reopened = store.open_map("test").unwrap();
        assert_eq!(reopened.size().unwrap(), 0);
        assert!(reopened.first_key().unwrap().is_none());
    }

    #[test]
    fn test_writes_refresh_last_modified() {
        let store = memory_store();
        let map = store.open_map("touched").unwrap();
        assert!(map.attributes().unwrap().is_none());
        map.put(Value::from(1), Value::from(1)).unwrap();
        let attributes = map.attributes().unwrap().unwrap();
        assert!(attributes.has_key(LAST_MODIFIED_TIME));
    }

    #[test]
    fn test_closed_map_rejects_calls() {
        let store = memory_store();
        let map = filled_map(&store);
        map.close().unwrap();
        assert!(map.is_closed().unwrap());
        assert_eq!(map.get(&Value::from("a")).unwrap_err().kind(), &ErrorKind::InvalidOperation);

        let reopened = store.open_map("test").unwrap();
        assert_eq!(reopened.size().unwrap(), 3);
    }

    #[test]
    fn test_store_close_closes_maps() {
        let store = memory_store();
        let map = filled_map(&store);
        store.close().unwrap();
        assert!(map.is_closed().unwrap());
        assert!(map.get(&Value::from("a")).is_err());
    }

    #[test]
    fn test_concurrent_put_if_absent_single_winner() {
        let store = memory_store();
        let map = store.open_map("race").unwrap();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let map = map.clone();
                std::thread::spawn(move || {
                    map.put_if_absent(Value::from("k"), Value::from(i)).unwrap()
                })
            })
            .collect();
        let results: Vec<Option<Value>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results.iter().filter(|r| r.is_none()).count(), 1);
        let winner = map.get(&Value::from("k")).unwrap().unwrap();
        assert!(results.iter().flatten().all(|v| *v == winner));
    }

    #[test]
    fn test_estimate_size() {
        assert_eq!(estimate_size(&Value::from(1)), 8);
        assert_eq!(estimate_size(&Value::from("abc")), 5);
        assert_eq!(estimate_size(&Value::Array(vec![Value::from(1), Value::Null])), 11);
    }
}
