use crate::config::FjallConfig;
use crate::map::FjallMap;
use crate::version::fjall_version;
use crate::wrapper::to_nitrite_error;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use fjall::{GarbageCollection, Keyspace, PersistMode};
use nitrite::common::{
    is_reserved_name, Key, NitriteEventBus, NitritePlugin, NitritePluginProvider, SubscriberRef,
    META_MAP_NAME, RTREE_MAP_PREFIX,
};
use nitrite::errors::{ErrorKind, NitriteError, NitriteResult};
use nitrite::nitrite_config::NitriteConfig;
use nitrite::store::rtree::{MapBackedRTree, NitriteRTree};
use nitrite::store::{
    NitriteMap, NitriteMapProvider, NitriteStoreProvider, StoreConfig, StoreEventInfo,
    StoreEventListener, StoreEvents,
};
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

pub(crate) const STORE_NAME: &str = "Fjall";

/// Persistent store over a fjall keyspace, one partition per map.
///
/// Spatial indexes are maps named with the reserved r-tree prefix and
/// queried by scanning. The keyspace needs a directory; an in-memory
/// configuration is rejected.
#[derive(Clone)]
pub struct FjallStore {
    inner: Arc<FjallStoreInner>,
}

impl FjallStore {
    pub fn new(config: FjallConfig) -> FjallStore {
        FjallStore {
            inner: Arc::new(FjallStoreInner::new(config)),
        }
    }

    pub(crate) fn check_opened(&self) -> NitriteResult<()> {
        if self.is_store_closed() {
            log::error!("Store is closed");
            return Err(NitriteError::new(
                "Store is closed",
                ErrorKind::StoreAlreadyClosed,
            ));
        }
        Ok(())
    }

    pub(crate) fn is_store_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub(crate) fn keyspace(&self) -> NitriteResult<Keyspace> {
        match self.inner.keyspace.read().as_ref() {
            Some(keyspace) => Ok(keyspace.clone()),
            None => {
                log::error!("Keyspace is not opened");
                Err(NitriteError::new(
                    "Store is closed",
                    ErrorKind::StoreAlreadyClosed,
                ))
            }
        }
    }

    /// Serializes partition creation and deletion across all maps.
    pub(crate) fn partition_lock(&self) -> MutexGuard<'_, ()> {
        self.inner.partition_lock.lock()
    }

    pub(crate) fn mark_dirty(&self) {
        self.inner.dirty.store(true, Ordering::Release);
    }

    pub(crate) fn detach_map(&self, name: &str) {
        self.inner.map_registry.remove(name);
    }

    /// Deletes the partition behind `map` and the map's attributes.
    pub(crate) fn remove_map_handle(&self, name: &str, map: &FjallMap) -> NitriteResult<()> {
        let keyspace = self.keyspace()?;
        {
            let _structure = self.partition_lock();
            self.inner.map_registry.remove(name);
            if let Some(partition) = map.mark_dropped() {
                keyspace
                    .delete_partition(partition)
                    .map_err(to_nitrite_error)?;
            }
        }
        self.forget_attributes(name)
    }

    fn forget_attributes(&self, name: &str) -> NitriteResult<()> {
        if !is_reserved_name(name) {
            let meta_map = self.open_map(META_MAP_NAME)?;
            meta_map.remove(&Key::from(name))?;
        }
        self.mark_dirty();
        Ok(())
    }

    fn alert(&self, event: StoreEvents) -> NitriteResult<()> {
        let info = StoreEventInfo::new(event, self.inner.config.db_path());
        self.inner.event_bus.publish(info)
    }

    fn rtree_map_name(name: &str) -> String {
        format!("{}{}", RTREE_MAP_PREFIX, name)
    }

    fn new_rtree(&self, name: &str) -> NitriteResult<NitriteRTree> {
        let backing_map = self.open_map(&Self::rtree_map_name(name))?;
        Ok(NitriteRTree::new(MapBackedRTree::new(backing_map)))
    }

    /// Maps a store name onto the partition name alphabet of fjall.
    ///
    /// Bytes outside `[A-Za-z0-9_.-$]` become `#` plus two hex digits.
    pub(crate) fn encode_name(name: &str) -> String {
        let mut encoded = String::with_capacity(name.len());
        for b in name.bytes() {
            match b {
                b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'_' | b'.' | b'-' | b'$' => {
                    encoded.push(b as char)
                }
                _ => encoded.push_str(&format!("#{:02X}", b)),
            }
        }
        encoded
    }

    pub(crate) fn decode_name(encoded: &str) -> NitriteResult<String> {
        let bytes = encoded.as_bytes();
        let mut decoded = Vec::with_capacity(bytes.len());
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'#' {
                let hex = encoded.get(i + 1..i + 3).ok_or_else(|| {
                    NitriteError::new(
                        &format!("Invalid partition name {}", encoded),
                        ErrorKind::EncodingError,
                    )
                })?;
                let b = u8::from_str_radix(hex, 16).map_err(|e| {
                    NitriteError::new(
                        &format!("Invalid partition name {}: {}", encoded, e),
                        ErrorKind::EncodingError,
                    )
                })?;
                decoded.push(b);
                i += 3;
            } else {
                decoded.push(bytes[i]);
                i += 1;
            }
        }
        Ok(String::from_utf8(decoded)?)
    }
}

impl NitritePluginProvider for FjallStore {
    fn initialize(&self, config: NitriteConfig) -> NitriteResult<()> {
        let cfg = self.inner.nitrite_config.get_or_init(|| config);
        let path = self.inner.config.db_path();
        if !path.is_empty() {
            cfg.set_db_path(path)?;
        }
        Ok(())
    }

    fn close(&self) -> NitriteResult<()> {
        let _guard = self.inner.open_lock.lock();
        if self.is_store_closed() {
            return Ok(());
        }

        if !self.inner.closing.swap(true, Ordering::AcqRel) {
            self.alert(StoreEvents::Closing)?;
        }

        if self.inner.config.commit_before_close() && self.inner.dirty.load(Ordering::Acquire) {
            if let Err(e) = self.commit() {
                log::error!("Failed to commit store before close: {}", e);
            }
        }

        for entry in self.inner.map_registry.iter() {
            entry.value().mark_closed();
        }
        for entry in self.inner.rtree_registry.iter() {
            if let Err(e) = entry.value().close() {
                log::debug!("R-tree {} already closed: {}", entry.key(), e);
            }
        }
        self.inner.map_registry.clear();
        self.inner.rtree_registry.clear();

        // dropping the last keyspace handle stops the engine workers
        *self.inner.keyspace.write() = None;
        self.inner.dirty.store(false, Ordering::Release);
        self.inner.closed.store(true, Ordering::Release);
        log::debug!("Closed {} {}", STORE_NAME, self.inner.config.db_path());

        self.alert(StoreEvents::Closed)?;
        self.inner.event_bus.close()
    }

    fn as_plugin(&self) -> NitritePlugin {
        NitritePlugin::new(self.clone())
    }
}

impl NitriteStoreProvider for FjallStore {
    fn open_or_create(&self) -> NitriteResult<()> {
        let _guard = self.inner.open_lock.lock();
        if !self.is_store_closed() {
            return Ok(());
        }

        if self.inner.config.db_path().is_empty() {
            log::error!("In-memory store is not supported by {}", STORE_NAME);
            return Err(NitriteError::new(
                "In-memory store is not supported by Fjall",
                ErrorKind::InvalidOperation,
            ));
        }

        let keyspace = Keyspace::open(self.inner.config.keyspace_config()).map_err(|e| {
            log::error!("Failed to open keyspace {}: {}", self.inner.config.db_path(), e);
            to_nitrite_error(e)
        })?;
        *self.inner.keyspace.write() = Some(keyspace);

        for listener in self.inner.config.event_listeners() {
            self.inner.event_bus.register(listener)?;
        }

        self.inner.dirty.store(false, Ordering::Release);
        self.inner.closing.store(false, Ordering::Release);
        self.inner.closed.store(false, Ordering::Release);
        log::debug!("Opened {} {}", STORE_NAME, self.inner.config.db_path());
        self.alert(StoreEvents::Opened)
    }

    fn is_closed(&self) -> NitriteResult<bool> {
        Ok(self.is_store_closed())
    }

    fn has_unsaved_changes(&self) -> NitriteResult<bool> {
        Ok(self.inner.dirty.load(Ordering::Acquire))
    }

    fn is_read_only(&self) -> NitriteResult<bool> {
        Ok(false)
    }

    fn is_map_opened(&self, name: &str) -> NitriteResult<bool> {
        match self.inner.map_registry.get(name) {
            Some(map) => Ok(!map.is_closed()?),
            None => Ok(false),
        }
    }

    fn commit(&self) -> NitriteResult<()> {
        self.check_opened()?;
        self.keyspace()?
            .persist(PersistMode::SyncAll)
            .map_err(to_nitrite_error)?;
        self.inner.dirty.store(false, Ordering::Release);
        self.alert(StoreEvents::Commit)
    }

    fn rollback(&self) -> NitriteResult<()> {
        log::error!("{} does not support rollback", STORE_NAME);
        Err(NitriteError::new(
            "Fjall store does not support rollback",
            ErrorKind::InvalidOperation,
        ))
    }

    fn compact(&self) -> NitriteResult<()> {
        self.check_opened()?;
        if !self.inner.config.kv_separated() {
            log::debug!("Compaction skipped, key-value separation is off");
            return Ok(());
        }

        let keyspace = self.keyspace()?;
        let space_amp_factor = self.inner.config.space_amp_factor();
        let staleness_threshold = self.inner.config.staleness_threshold();
        for name in keyspace.list_partitions() {
            let partition = keyspace
                .open_partition(name.trim(), self.inner.config.partition_config())
                .map_err(to_nitrite_error)?;
            partition.gc_scan().map_err(to_nitrite_error)?;
            partition
                .gc_with_space_amp_target(space_amp_factor)
                .map_err(to_nitrite_error)?;
            partition
                .gc_with_staleness_threshold(staleness_threshold)
                .map_err(to_nitrite_error)?;
        }
        Ok(())
    }

    fn before_close(&self) -> NitriteResult<()> {
        if self.inner.closing.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.alert(StoreEvents::Closing)
    }

    fn has_map(&self, name: &str) -> NitriteResult<bool> {
        Ok(self.keyspace()?.partition_exists(&Self::encode_name(name)))
    }

    fn map_names(&self) -> NitriteResult<BTreeSet<String>> {
        let mut names = BTreeSet::new();
        for partition in self.keyspace()?.list_partitions() {
            let name = Self::decode_name(partition.trim())?;
            if !name.starts_with(RTREE_MAP_PREFIX) {
                names.insert(name);
            }
        }
        Ok(names)
    }

    fn open_map(&self, name: &str) -> NitriteResult<NitriteMap> {
        self.check_opened()?;
        if let Some(map) = self.inner.map_registry.get(name) {
            return Ok(NitriteMap::new(map.value().clone()));
        }

        let keyspace = self.keyspace()?;
        let _structure = self.partition_lock();
        if let Some(map) = self.inner.map_registry.get(name) {
            return Ok(NitriteMap::new(map.value().clone()));
        }
        let partition = keyspace
            .open_partition(&Self::encode_name(name), self.inner.config.partition_config())
            .map_err(|e| {
                log::error!("Failed to open partition for map {}: {}", name, e);
                to_nitrite_error(e)
            })?;
        let map = FjallMap::new(name, partition, self.clone());
        self.inner.map_registry.insert(name.to_string(), map.clone());
        Ok(NitriteMap::new(map))
    }

    fn close_map(&self, name: &str) -> NitriteResult<()> {
        if let Some((_, map)) = self.inner.map_registry.remove(name) {
            map.mark_closed();
        }
        Ok(())
    }

    fn remove_map(&self, name: &str) -> NitriteResult<()> {
        self.check_opened()?;
        let registered = self.inner.map_registry.get(name).map(|m| m.value().clone());
        if let Some(map) = registered {
            return self.remove_map_handle(name, &map);
        }

        let encoded = Self::encode_name(name);
        let keyspace = self.keyspace()?;
        {
            let _structure = self.partition_lock();
            if !keyspace.partition_exists(&encoded) {
                return Ok(());
            }
            let partition = keyspace
                .open_partition(&encoded, self.inner.config.partition_config())
                .map_err(to_nitrite_error)?;
            keyspace
                .delete_partition(partition)
                .map_err(to_nitrite_error)?;
        }
        self.forget_attributes(name)
    }

    fn open_rtree(&self, name: &str) -> NitriteResult<NitriteRTree> {
        self.check_opened()?;
        // the entry guard keeps a concurrent caller from building a second handle
        match self.inner.rtree_registry.entry(name.to_string()) {
            Entry::Occupied(mut entry) => {
                let current = entry.get();
                if !current.is_closed() && !current.is_dropped() {
                    return Ok(current.clone());
                }
                let rtree = self.new_rtree(name)?;
                entry.insert(rtree.clone());
                Ok(rtree)
            }
            Entry::Vacant(entry) => {
                let rtree = self.new_rtree(name)?;
                entry.insert(rtree.clone());
                Ok(rtree)
            }
        }
    }

    fn close_rtree(&self, name: &str) -> NitriteResult<()> {
        if let Some((_, rtree)) = self.inner.rtree_registry.remove(name) {
            if !rtree.is_closed() && !rtree.is_dropped() {
                rtree.close()?;
            }
        }
        self.close_map(&Self::rtree_map_name(name))
    }

    fn remove_rtree(&self, name: &str) -> NitriteResult<()> {
        self.check_opened()?;
        if let Some((_, rtree)) = self.inner.rtree_registry.remove(name) {
            if !rtree.is_closed() && !rtree.is_dropped() {
                return rtree.drop_tree();
            }
        }
        self.remove_map(&Self::rtree_map_name(name))
    }

    fn subscribe(&self, listener: StoreEventListener) -> NitriteResult<Option<SubscriberRef>> {
        self.inner.event_bus.register(listener)
    }

    fn unsubscribe(&self, subscriber_ref: SubscriberRef) -> NitriteResult<()> {
        self.inner.event_bus.deregister(subscriber_ref)
    }

    fn store_version(&self) -> NitriteResult<String> {
        Ok(format!("{}/{}", STORE_NAME, fjall_version()?))
    }

    fn store_config(&self) -> NitriteResult<StoreConfig> {
        Ok(StoreConfig::new(self.inner.config.clone()))
    }
}

struct FjallStoreInner {
    config: FjallConfig,
    keyspace: RwLock<Option<Keyspace>>,
    closed: AtomicBool,
    closing: AtomicBool,
    dirty: AtomicBool,
    open_lock: Mutex<()>,
    partition_lock: Mutex<()>,
    map_registry: DashMap<String, FjallMap>,
    rtree_registry: DashMap<String, NitriteRTree>,
    event_bus: NitriteEventBus<StoreEventInfo, StoreEventListener>,
    nitrite_config: OnceLock<NitriteConfig>,
}

impl FjallStoreInner {
    fn new(config: FjallConfig) -> FjallStoreInner {
        FjallStoreInner {
            keyspace: RwLock::new(None),
            closed: AtomicBool::new(true),
            closing: AtomicBool::new(false),
            dirty: AtomicBool::new(false),
            open_lock: Mutex::new(()),
            partition_lock: Mutex::new(()),
            map_registry: DashMap::new(),
            rtree_registry: DashMap::new(),
            event_bus: NitriteEventBus::new(),
            nitrite_config: OnceLock::new(),
            config,
        }
    }
}

impl Drop for FjallStoreInner {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::Acquire) {
            log::warn!("{} {} dropped without close", STORE_NAME, self.config.db_path());
            if let Some(keyspace) = self.keyspace.get_mut().as_ref() {
                if let Err(e) = keyspace.persist(PersistMode::SyncAll) {
                    log::error!("Failed to persist keyspace on drop: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FjallModule;
    use nitrite::common::{NitriteId, Value};
    use nitrite::store::rtree::{BoundingBox, NitriteRTreeProvider};
    use nitrite::store::{NitriteStore, StoreModule};
    use std::path::Path;
    use tempfile::tempdir;

    fn file_store(path: &Path) -> NitriteStore {
        let store = FjallModule::with_config()
            .db_path(&path.to_string_lossy())
            .build()
            .unwrap()
            .get_store()
            .unwrap();
        store.open_or_create().unwrap();
        store
    }

    #[test]
    fn test_name_encoding() {
        for name in ["plain", "$nitrite_rtree|places", "a b/c#d", "ünï", "x+y|z"] {
            let encoded = FjallStore::encode_name(name);
            assert!(encoded
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b"_.-$#".contains(&b)));
            assert_eq!(FjallStore::decode_name(&encoded).unwrap(), name);
        }
        assert_eq!(FjallStore::encode_name("users"), "users");
        assert!(FjallStore::decode_name("bad#4").is_err());
        assert!(FjallStore::decode_name("bad#ZZ").is_err());
    }

    #[test]
    fn test_data_survives_reopen() {
        let dir = tempdir().unwrap();
        let store = file_store(dir.path());
        let map = store.open_map("users").unwrap();
        map.put(Value::from(1), Value::from("ann")).unwrap();
        map.put(Value::from(2), Value::from("bob")).unwrap();
        store.commit().unwrap();
        store.close().unwrap();

        let store = file_store(dir.path());
        let map = store.open_map("users").unwrap();
        assert_eq!(map.size().unwrap(), 2);
        assert_eq!(map.get(&Value::from(2)).unwrap(), Some(Value::from("bob")));
        store.close().unwrap();
    }

    #[test]
    fn test_in_memory_rejected() {
        let store = FjallStore::new(FjallConfig::new());
        let err = store.open_or_create().unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvalidOperation);
        assert!(store.is_closed().unwrap());
    }

    #[test]
    fn test_rollback_unsupported() {
        let dir = tempdir().unwrap();
        let store = file_store(dir.path());
        let err = store.rollback().unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvalidOperation);
        store.close().unwrap();
    }

    #[test]
    fn test_unsaved_changes_cleared_by_commit() {
        let dir = tempdir().unwrap();
        let store = file_store(dir.path());
        assert!(!store.has_unsaved_changes().unwrap());
        store.open_map("m").unwrap().put(Value::from(1), Value::from(1)).unwrap();
        assert!(store.has_unsaved_changes().unwrap());
        store.commit().unwrap();
        assert!(!store.has_unsaved_changes().unwrap());
        store.close().unwrap();
    }

    #[test]
    fn test_map_names_and_removal() {
        let dir = tempdir().unwrap();
        let store = file_store(dir.path());
        store.open_map("alpha").unwrap().put(Value::from(1), Value::from(1)).unwrap();
        store.open_map("beta|index").unwrap();
        store.open_rtree("places").unwrap();

        let names = store.map_names().unwrap();
        assert!(names.contains("alpha"));
        assert!(names.contains("beta|index"));
        assert!(names.iter().all(|n| !n.starts_with(RTREE_MAP_PREFIX)));
        assert!(store.is_map_opened("alpha").unwrap());

        store.remove_map("alpha").unwrap();
        assert!(!store.has_map("alpha").unwrap());
        assert!(!store.is_map_opened("alpha").unwrap());
        assert!(!store.map_names().unwrap().contains("alpha"));
        // attributes go with the map
        let meta = store.open_map(META_MAP_NAME).unwrap();
        assert!(meta.get(&Key::from("alpha")).unwrap().is_none());

        store.remove_map("never-existed").unwrap();
        store.close().unwrap();
    }

    #[test]
    fn test_remove_unopened_map() {
        let dir = tempdir().unwrap();
        let store = file_store(dir.path());
        store.open_map("cold").unwrap().put(Value::from(1), Value::from(1)).unwrap();
        store.close().unwrap();

        let store = file_store(dir.path());
        assert!(store.has_map("cold").unwrap());
        assert!(!store.is_map_opened("cold").unwrap());
        store.remove_map("cold").unwrap();
        assert!(!store.has_map("cold").unwrap());
        store.close().unwrap();
    }

    #[test]
    fn test_rtree_survives_reopen() {
        let dir = tempdir().unwrap();
        let store = file_store(dir.path());
        let rtree = store.open_rtree("places").unwrap();
        rtree
            .add(&BoundingBox::new(0.0, 1.0, 0.0, 1.0), Some(&NitriteId::create_id(7)))
            .unwrap();
        store.close().unwrap();
        assert!(rtree.is_closed());

        let store = file_store(dir.path());
        let rtree = store.open_rtree("places").unwrap();
        assert_eq!(rtree.size().unwrap(), 1);
        let hits = rtree
            .find_intersecting_keys(&BoundingBox::new(0.5, 2.0, 0.5, 2.0))
            .unwrap();
        assert_eq!(hits.len(), 1);

        store.remove_rtree("places").unwrap();
        assert!(rtree.is_dropped());
        assert!(!store.has_map(&FjallStore::rtree_map_name("places")).unwrap());
        store.close().unwrap();
    }

    #[test]
    fn test_concurrent_open_rtree_shares_handle() {
        let dir = tempdir().unwrap();
        let store = file_store(dir.path());
        let barrier = std::sync::Barrier::new(8);

        let trees: Vec<NitriteRTree> = std::thread::scope(|s| {
            let workers: Vec<_> = (0..8)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        store.open_rtree("shared").unwrap()
                    })
                })
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).collect()
        });

        trees[0].drop_tree().unwrap();
        assert!(trees.iter().all(|tree| tree.is_dropped()));
        store.close().unwrap();
    }

    #[test]
    fn test_closed_store_rejects_operations() {
        let dir = tempdir().unwrap();
        let store = file_store(dir.path());
        let map = store.open_map("m").unwrap();
        store.close().unwrap();
        assert!(map.is_closed().unwrap());
        assert_eq!(
            store.open_map("m").err().unwrap().kind(),
            &ErrorKind::StoreAlreadyClosed
        );
        assert!(store.commit().is_err());
        assert!(store.close().is_ok());
    }

    #[test]
    fn test_compact_with_kv_separation() {
        let dir = tempdir().unwrap();
        let store = FjallModule::with_config()
            .db_path(&dir.path().to_string_lossy())
            .kv_separated(true)
            .build()
            .unwrap()
            .get_store()
            .unwrap();
        store.open_or_create().unwrap();
        let map = store.open_map("blobs").unwrap();
        for i in 0..20 {
            map.put(Value::from(i), Value::from("x".repeat(4096))).unwrap();
        }
        for i in 0..10 {
            map.remove(&Value::from(i)).unwrap();
        }
        store.commit().unwrap();
        store.compact().unwrap();
        assert_eq!(map.size().unwrap(), 10);
        store.close().unwrap();
    }

    #[test]
    fn test_events_published() {
        let dir = tempdir().unwrap();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let store = FjallModule::with_config()
            .db_path(&dir.path().to_string_lossy())
            .event_listener(StoreEventListener::new(move |info: StoreEventInfo| {
                sink.lock().push(info.event());
                Ok(())
            }))
            .build()
            .unwrap()
            .get_store()
            .unwrap();
        store.open_or_create().unwrap();
        store.open_map("m").unwrap().put(Value::from(1), Value::from(1)).unwrap();
        store.commit().unwrap();
        store.before_close().unwrap();
        store.close().unwrap();

        assert_eq!(
            *events.lock(),
            vec![
                StoreEvents::Opened,
                StoreEvents::Commit,
                StoreEvents::Closing,
                StoreEvents::Closed
            ]
        );
    }

    #[test]
    fn test_store_version() {
        let dir = tempdir().unwrap();
        let store = file_store(dir.path());
        assert!(store.store_version().unwrap().starts_with("Fjall/"));
        store.close().unwrap();
    }
}
