use crate::chunk::Snapshot;
use crate::config::MVStoreConfig;
use crate::error::to_nitrite_error;
use crate::map::{MVMap, MapRoot};
use crate::page_file::PageFile;
use crate::rtree::{MVRTree, SpatialData};
use crate::store_utils;
use dashmap::DashMap;
use im::OrdMap;
use nitrite::common::{
    is_reserved_name, Key, NitriteEventBus, NitritePlugin, NitritePluginProvider, SubscriberRef,
    Value, META_MAP_NAME,
};
use nitrite::errors::{ErrorKind, NitriteError, NitriteResult};
use nitrite::nitrite_config::NitriteConfig;
use nitrite::store::rtree::NitriteRTree;
use nitrite::store::{
    NitriteMap, NitriteMapProvider, NitriteStoreProvider, StoreConfig, StoreEventInfo,
    StoreEventListener, StoreEvents,
};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

pub(crate) const STORE_NAME: &str = "MVStore";

/// Multi-version page store.
///
/// Every map and spatial index lives in memory as a persistent tree whose
/// root is swapped on write. A commit serializes the roots of all maps
/// and indexes into one chunk appended to the store file, so the file
/// always holds a sequence of complete, self-consistent versions. The
/// newest readable chunk is loaded on open.
///
/// Without a file path the store is purely in memory; [MVStore::commit]
/// then only moves the rollback point.
#[derive(Clone)]
pub struct MVStore {
    inner: Arc<MVStoreInner>,
}

impl MVStore {
    pub fn new(config: MVStoreConfig) -> MVStore {
        MVStore {
            inner: Arc::new(MVStoreInner::new(config)),
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

    pub(crate) fn check_writable(&self) -> NitriteResult<()> {
        if self.inner.config.read_only() {
            log::error!("Store is opened in read-only mode");
            return Err(NitriteError::new(
                "Store is opened in read-only mode",
                ErrorKind::InvalidOperation,
            ));
        }
        Ok(())
    }

    #[inline]
    pub(crate) fn is_store_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Records a write of roughly `bytes` to `name` and commits once the
    /// unsaved volume passes the auto-commit threshold.
    ///
    /// Must not be called while holding a map or index lock.
    pub(crate) fn mark_unsaved(&self, name: &str, bytes: u64) -> NitriteResult<()> {
        let mut added = bytes;
        if self.inner.touched.lock().insert(name.to_string()) {
            added += self.inner.config.page_split_size() as u64;
        }
        self.inner.dirty.store(true, Ordering::Release);
        let total = self.inner.unsaved.fetch_add(added, Ordering::AcqRel) + added;

        let config = &self.inner.config;
        if config.auto_commit() && total > config.auto_commit_buffer_size() as u64 * 1024 {
            log::debug!("Auto-committing {} unsaved bytes", total);
            self.commit()?;
        }
        Ok(())
    }

    /// Drops a closed handle from the cache; its data stays.
    pub(crate) fn detach_map(&self, name: &str) {
        self.inner.map_registry.remove(name);
    }

    /// Deletes the data of map `name` along with its attributes.
    pub(crate) fn forget_map(&self, name: &str) -> NitriteResult<()> {
        self.inner.map_registry.remove(name);
        self.inner.maps.remove(name);
        if !is_reserved_name(name) {
            let meta_map = self.open_map(META_MAP_NAME)?;
            meta_map.remove(&Key::from(name))?;
        }
        self.mark_unsaved(name, 0)
    }

    pub(crate) fn detach_rtree(&self, name: &str) {
        self.inner.rtree_registry.remove(name);
    }

    pub(crate) fn forget_rtree(&self, name: &str) -> NitriteResult<()> {
        self.inner.rtree_registry.remove(name);
        self.inner.rtrees.remove(name);
        self.mark_unsaved(name, 0)
    }

    fn alert(&self, event: StoreEvents) -> NitriteResult<()> {
        let info = StoreEventInfo::new(event, self.inner.config.file_path());
        self.inner.event_bus.publish(info)
    }

    /// Replaces the live state with `snapshot` and makes it the rollback point.
    fn load(&self, snapshot: Snapshot) {
        let inner = &self.inner;
        inner.maps.clear();
        inner.rtrees.clear();

        let mut committed = CommittedState::default();
        for (name, entries) in snapshot.maps {
            let root: OrdMap<Key, Value> = entries.into_iter().collect();
            committed.maps.insert(name.clone(), root.clone());
            inner.maps.insert(name, Arc::new(RwLock::new(root)));
        }
        for (name, entries) in snapshot.rtrees {
            let data = SpatialData::from_entries(entries);
            committed.rtrees.insert(name.clone(), data.clone());
            inner.rtrees.insert(name, Arc::new(RwLock::new(data)));
        }
        *inner.committed.write() = committed;
    }

    /// Point-in-time copy of every root. Each root is cloned in O(1).
    fn capture(&self) -> CommittedState {
        let maps = self
            .inner
            .maps
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().read().clone()))
            .collect();
        let rtrees = self
            .inner
            .rtrees
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().read().clone()))
            .collect();
        CommittedState { maps, rtrees }
    }

    fn reset_unsaved(&self) {
        self.inner.unsaved.store(0, Ordering::Release);
        self.inner.touched.lock().clear();
        self.inner.dirty.store(false, Ordering::Release);
    }
}

impl NitritePluginProvider for MVStore {
    fn initialize(&self, config: NitriteConfig) -> NitriteResult<()> {
        let cfg = self.inner.nitrite_config.get_or_init(|| config);
        let path = self.inner.config.file_path();
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

        let read_only = self.inner.config.read_only();
        if !read_only && self.inner.dirty.load(Ordering::Acquire) {
            if let Err(e) = self.commit() {
                log::error!("Failed to commit store before close: {}", e);
            }
        }

        {
            let mut page_file = self.inner.page_file.lock();
            if let Some(file) = page_file.as_mut() {
                let file_backed = !self.inner.config.file_path().is_empty();
                if self.inner.config.auto_compact() && file_backed && !read_only {
                    if let Err(e) = file.compact() {
                        log::warn!("Failed to compact store on close: {}", e);
                    }
                }
                if let Err(e) = file.sync() {
                    log::warn!("Failed to sync store on close: {}", e);
                }
            }
            // dropping the page file releases the file lock
            *page_file = None;
        }

        for entry in self.inner.map_registry.iter() {
            entry.value().mark_closed();
        }
        for entry in self.inner.rtree_registry.iter() {
            entry.value().mark_closed();
        }
        self.inner.map_registry.clear();
        self.inner.rtree_registry.clear();
        self.inner.maps.clear();
        self.inner.rtrees.clear();
        *self.inner.committed.write() = CommittedState::default();
        self.reset_unsaved();

        self.inner.closed.store(true, Ordering::Release);
        log::debug!("Closed {} {}", STORE_NAME, self.inner.config.file_path());

        self.alert(StoreEvents::Closed)?;
        self.inner.event_bus.close()
    }

    fn as_plugin(&self) -> NitritePlugin {
        NitritePlugin::new(self.clone())
    }
}

impl NitriteStoreProvider for MVStore {
    fn open_or_create(&self) -> NitriteResult<()> {
        let _guard = self.inner.open_lock.lock();
        if !self.is_store_closed() {
            return Ok(());
        }

        let (page_file, snapshot) = store_utils::open_or_create(&self.inner.config)?;
        self.load(snapshot);
        *self.inner.page_file.lock() = page_file;
        self.reset_unsaved();

        for listener in self.inner.config.event_listeners() {
            self.inner.event_bus.register(listener)?;
        }

        self.inner.closing.store(false, Ordering::Release);
        self.inner.closed.store(false, Ordering::Release);
        log::debug!("Opened {} {}", STORE_NAME, self.inner.config.file_path());
        self.alert(StoreEvents::Opened)
    }

    fn is_closed(&self) -> NitriteResult<bool> {
        Ok(self.is_store_closed())
    }

    fn has_unsaved_changes(&self) -> NitriteResult<bool> {
        Ok(self.inner.dirty.load(Ordering::Acquire))
    }

    fn is_read_only(&self) -> NitriteResult<bool> {
        Ok(self.inner.config.read_only())
    }

    fn is_map_opened(&self, name: &str) -> NitriteResult<bool> {
        match self.inner.map_registry.get(name) {
            Some(map) => Ok(!map.is_closed()?),
            None => Ok(false),
        }
    }

    fn commit(&self) -> NitriteResult<()> {
        self.check_opened()?;
        if !self.inner.dirty.load(Ordering::Acquire) {
            return Ok(());
        }

        {
            // held across capture and write so versions reach the file in order
            let mut page_file = self.inner.page_file.lock();
            self.reset_unsaved();
            let state = self.capture();

            if let Some(file) = page_file.as_mut() {
                let snapshot = state.to_snapshot();
                match file.write_snapshot(&snapshot) {
                    Ok(version) => log::debug!("Committed version {}", version),
                    Err(e) => {
                        self.inner.dirty.store(true, Ordering::Release);
                        return Err(to_nitrite_error(e));
                    }
                }
            }
            *self.inner.committed.write() = state;
        }
        self.alert(StoreEvents::Commit)
    }

    fn rollback(&self) -> NitriteResult<()> {
        self.check_opened()?;
        let _page_file = self.inner.page_file.lock();
        let committed = self.inner.committed.read();

        let names: Vec<String> = self.inner.maps.iter().map(|e| e.key().clone()).collect();
        for name in names {
            match committed.maps.get(&name) {
                Some(root) => {
                    if let Some(live) = self.inner.maps.get(&name) {
                        *live.write() = root.clone();
                    }
                }
                None => {
                    self.inner.maps.remove(&name);
                    if let Some((_, map)) = self.inner.map_registry.remove(&name) {
                        map.mark_closed();
                    }
                }
            }
        }
        for (name, root) in committed.maps.iter() {
            if !self.inner.maps.contains_key(name) {
                self.inner
                    .maps
                    .insert(name.clone(), Arc::new(RwLock::new(root.clone())));
            }
        }

        let names: Vec<String> = self.inner.rtrees.iter().map(|e| e.key().clone()).collect();
        for name in names {
            match committed.rtrees.get(&name) {
                Some(data) => {
                    if let Some(live) = self.inner.rtrees.get(&name) {
                        *live.write() = data.clone();
                    }
                }
                None => {
                    self.inner.rtrees.remove(&name);
                    if let Some((_, rtree)) = self.inner.rtree_registry.remove(&name) {
                        rtree.mark_closed();
                    }
                }
            }
        }
        for (name, data) in committed.rtrees.iter() {
            if !self.inner.rtrees.contains_key(name) {
                self.inner
                    .rtrees
                    .insert(name.clone(), Arc::new(RwLock::new(data.clone())));
            }
        }

        self.reset_unsaved();
        log::debug!("Rolled back uncommitted changes");
        Ok(())
    }

    fn compact(&self) -> NitriteResult<()> {
        self.check_opened()?;
        if self.inner.config.read_only() {
            return Ok(());
        }
        self.commit()?;
        let mut page_file = self.inner.page_file.lock();
        if let Some(file) = page_file.as_mut() {
            file.compact().map_err(to_nitrite_error)?;
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
        Ok(self.inner.maps.contains_key(name))
    }

    fn map_names(&self) -> NitriteResult<BTreeSet<String>> {
        Ok(self.inner.maps.iter().map(|e| e.key().clone()).collect())
    }

    fn open_map(&self, name: &str) -> NitriteResult<NitriteMap> {
        self.check_opened()?;
        if let Some(map) = self.inner.map_registry.get(name) {
            return Ok(NitriteMap::new(map.value().clone()));
        }

        let mut created = false;
        let root = self
            .inner
            .maps
            .entry(name.to_string())
            .or_insert_with(|| {
                created = true;
                Arc::new(RwLock::new(OrdMap::new()))
            })
            .value()
            .clone();
        let map = self
            .inner
            .map_registry
            .entry(name.to_string())
            .or_insert_with(|| MVMap::new(name, self.clone(), root))
            .value()
            .clone();

        if created && !self.inner.config.read_only() {
            self.mark_unsaved(name, 0)?;
        }
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
        self.check_writable()?;
        if let Some((_, map)) = self.inner.map_registry.remove(name) {
            map.mark_dropped();
        }
        if !self.inner.maps.contains_key(name) {
            return Ok(());
        }
        self.forget_map(name)
    }

    fn open_rtree(&self, name: &str) -> NitriteResult<NitriteRTree> {
        self.check_opened()?;
        if let Some(rtree) = self.inner.rtree_registry.get(name) {
            return Ok(NitriteRTree::new(rtree.value().clone()));
        }

        let mut created = false;
        let data = self
            .inner
            .rtrees
            .entry(name.to_string())
            .or_insert_with(|| {
                created = true;
                Arc::new(RwLock::new(SpatialData::default()))
            })
            .value()
            .clone();
        let rtree = self
            .inner
            .rtree_registry
            .entry(name.to_string())
            .or_insert_with(|| MVRTree::new(name, self.clone(), data))
            .value()
            .clone();

        if created && !self.inner.config.read_only() {
            self.mark_unsaved(name, 0)?;
        }
        Ok(NitriteRTree::new(rtree))
    }

    fn close_rtree(&self, name: &str) -> NitriteResult<()> {
        if let Some((_, rtree)) = self.inner.rtree_registry.remove(name) {
            rtree.mark_closed();
        }
        Ok(())
    }

    fn remove_rtree(&self, name: &str) -> NitriteResult<()> {
        self.check_opened()?;
        self.check_writable()?;
        let handle = self.inner.rtree_registry.get(name).map(|r| r.value().clone());
        if let Some(rtree) = handle {
            return NitriteRTree::new(rtree).drop_tree();
        }
        if !self.inner.rtrees.contains_key(name) {
            return Ok(());
        }
        self.forget_rtree(name)
    }

    fn subscribe(&self, listener: StoreEventListener) -> NitriteResult<Option<SubscriberRef>> {
        self.inner.event_bus.register(listener)
    }

    fn unsubscribe(&self, subscriber_ref: SubscriberRef) -> NitriteResult<()> {
        self.inner.event_bus.deregister(subscriber_ref)
    }

    fn store_version(&self) -> NitriteResult<String> {
        Ok(format!("{}/{}", STORE_NAME, crate::chunk::FORMAT_VERSION))
    }

    fn store_config(&self) -> NitriteResult<StoreConfig> {
        Ok(StoreConfig::new(self.inner.config.clone()))
    }
}

#[derive(Default)]
struct CommittedState {
    maps: HashMap<String, OrdMap<Key, Value>>,
    rtrees: HashMap<String, SpatialData>,
}

impl CommittedState {
    fn to_snapshot(&self) -> Snapshot {
        let mut snapshot = Snapshot::default();
        for (name, root) in self.maps.iter() {
            let entries = root.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            snapshot.maps.insert(name.clone(), entries);
        }
        for (name, data) in self.rtrees.iter() {
            snapshot.rtrees.insert(name.clone(), data.to_entries());
        }
        snapshot
    }
}

struct MVStoreInner {
    config: MVStoreConfig,
    closed: AtomicBool,
    closing: AtomicBool,
    open_lock: Mutex<()>,
    page_file: Mutex<Option<PageFile>>,
    maps: DashMap<String, MapRoot>,
    rtrees: DashMap<String, Arc<RwLock<SpatialData>>>,
    map_registry: DashMap<String, MVMap>,
    rtree_registry: DashMap<String, MVRTree>,
    committed: RwLock<CommittedState>,
    dirty: AtomicBool,
    unsaved: AtomicU64,
    touched: Mutex<HashSet<String>>,
    event_bus: NitriteEventBus<StoreEventInfo, StoreEventListener>,
    nitrite_config: OnceLock<NitriteConfig>,
}

impl MVStoreInner {
    fn new(config: MVStoreConfig) -> MVStoreInner {
        let capacity = config.cache_size();
        let shards = config.cache_concurrency().next_power_of_two().max(2);
        MVStoreInner {
            closed: AtomicBool::new(true),
            closing: AtomicBool::new(false),
            open_lock: Mutex::new(()),
            page_file: Mutex::new(None),
            maps: DashMap::new(),
            rtrees: DashMap::new(),
            map_registry: DashMap::with_capacity_and_shard_amount(capacity, shards),
            rtree_registry: DashMap::with_capacity_and_shard_amount(capacity, shards),
            committed: RwLock::new(CommittedState::default()),
            dirty: AtomicBool::new(false),
            unsaved: AtomicU64::new(0),
            touched: Mutex::new(HashSet::new()),
            event_bus: NitriteEventBus::new(),
            nitrite_config: OnceLock::new(),
            config,
        }
    }
}

impl Drop for MVStoreInner {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::Acquire) {
            log::warn!("{} {} dropped without close", STORE_NAME, self.config.file_path());
        }
    }
}
