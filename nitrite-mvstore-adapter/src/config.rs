use crate::chunk::Compression;
use crate::file_store::FileStore;
use nitrite::common::{atomic, Atomic, ReadExecutor, WriteExecutor};
use nitrite::store::{StoreConfigProvider, StoreEventListener};
use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

/// Configuration of an [MVStore](crate::MVStore).
///
/// Cheap to clone; clones share the same settings. Setters are
/// crate-private and reached through
/// [MVStoreModuleBuilder](crate::MVStoreModuleBuilder).
#[derive(Clone)]
pub struct MVStoreConfig {
    inner: Arc<MVStoreConfigInner>,
}

impl MVStoreConfig {
    /// Default auto-commit threshold in KB.
    pub const DEFAULT_AUTO_COMMIT_BUFFER_KB: u32 = 1024;
    /// Default estimated size of a rewritten page, in bytes.
    pub const DEFAULT_PAGE_SPLIT_SIZE: u32 = 16 * 1024;
    /// Default capacity hint of the open map cache.
    pub const DEFAULT_CACHE_SIZE: usize = 16;
    /// Default number of segments of the open map cache.
    pub const DEFAULT_CACHE_CONCURRENCY: usize = 16;

    pub fn new() -> MVStoreConfig {
        MVStoreConfig {
            inner: Arc::new(MVStoreConfigInner {
                file_path: OnceLock::new(),
                read_only: AtomicBool::new(false),
                auto_commit: AtomicBool::new(true),
                auto_commit_buffer_size: AtomicU32::new(Self::DEFAULT_AUTO_COMMIT_BUFFER_KB),
                compress: AtomicBool::new(false),
                compress_high: AtomicBool::new(false),
                page_split_size: AtomicU32::new(Self::DEFAULT_PAGE_SPLIT_SIZE),
                cache_size: AtomicUsize::new(Self::DEFAULT_CACHE_SIZE),
                cache_concurrency: AtomicUsize::new(Self::DEFAULT_CACHE_CONCURRENCY),
                recovery_mode: AtomicBool::new(false),
                encryption_key: atomic(None),
                file_store: OnceLock::new(),
                auto_compact: AtomicBool::new(true),
                event_listeners: atomic(Vec::new()),
            }),
        }
    }

    /// Path of the store file; empty for an in-memory store.
    pub fn file_path(&self) -> &str {
        self.inner.file_path.get().map(String::as_str).unwrap_or("")
    }

    /// First call wins.
    pub(crate) fn set_file_path(&self, path: &str) {
        let _ = self.inner.file_path.set(path.to_string());
    }

    pub fn read_only(&self) -> bool {
        self.inner.read_only.load(Ordering::Relaxed)
    }

    pub(crate) fn set_read_only(&self, value: bool) {
        self.inner.read_only.store(value, Ordering::Relaxed)
    }

    pub fn auto_commit(&self) -> bool {
        self.inner.auto_commit.load(Ordering::Relaxed)
    }

    pub(crate) fn set_auto_commit(&self, value: bool) {
        self.inner.auto_commit.store(value, Ordering::Relaxed)
    }

    /// Unsaved changes (in KB) that trigger an automatic commit.
    pub fn auto_commit_buffer_size(&self) -> u32 {
        self.inner.auto_commit_buffer_size.load(Ordering::Relaxed)
    }

    pub(crate) fn set_auto_commit_buffer_size(&self, kb: u32) {
        self.inner.auto_commit_buffer_size.store(kb, Ordering::Relaxed)
    }

    pub fn compress(&self) -> bool {
        self.inner.compress.load(Ordering::Relaxed)
    }

    pub(crate) fn set_compress(&self, value: bool) {
        self.inner.compress.store(value, Ordering::Relaxed)
    }

    pub fn compress_high(&self) -> bool {
        self.inner.compress_high.load(Ordering::Relaxed)
    }

    pub(crate) fn set_compress_high(&self, value: bool) {
        self.inner.compress_high.store(value, Ordering::Relaxed)
    }

    /// Compression applied to new chunks. `compress_high` wins over
    /// `compress`.
    pub fn compression(&self) -> Compression {
        if self.compress_high() {
            Compression::High
        } else if self.compress() {
            Compression::Fast
        } else {
            Compression::None
        }
    }

    /// Bytes counted as unsaved the first time a map changes after a
    /// commit, approximating the page rewritten by copy-on-write.
    pub fn page_split_size(&self) -> u32 {
        self.inner.page_split_size.load(Ordering::Relaxed)
    }

    pub(crate) fn set_page_split_size(&self, bytes: u32) {
        self.inner.page_split_size.store(bytes, Ordering::Relaxed)
    }

    pub fn cache_size(&self) -> usize {
        self.inner.cache_size.load(Ordering::Relaxed)
    }

    pub(crate) fn set_cache_size(&self, size: usize) {
        self.inner.cache_size.store(size, Ordering::Relaxed)
    }

    pub fn cache_concurrency(&self) -> usize {
        self.inner.cache_concurrency.load(Ordering::Relaxed)
    }

    pub(crate) fn set_cache_concurrency(&self, segments: usize) {
        self.inner.cache_concurrency.store(segments, Ordering::Relaxed)
    }

    pub fn recovery_mode(&self) -> bool {
        self.inner.recovery_mode.load(Ordering::Relaxed)
    }

    pub(crate) fn set_recovery_mode(&self, value: bool) {
        self.inner.recovery_mode.store(value, Ordering::Relaxed)
    }

    pub fn is_encrypted(&self) -> bool {
        self.inner.encryption_key.read_with(|key| key.is_some())
    }

    pub(crate) fn encryption_key(&self) -> Option<Vec<u8>> {
        self.inner.encryption_key.read_with(|key| key.clone())
    }

    pub(crate) fn set_encryption_key(&self, key: &[u8]) {
        self.inner
            .encryption_key
            .write_with(|current| *current = Some(key.to_vec()))
    }

    /// Byte storage supplied by the caller, used instead of a file.
    pub fn file_store(&self) -> Option<FileStore> {
        self.inner.file_store.get().cloned()
    }

    pub(crate) fn set_file_store(&self, file_store: FileStore) {
        let _ = self.inner.file_store.set(file_store);
    }

    pub fn auto_compact(&self) -> bool {
        self.inner.auto_compact.load(Ordering::Relaxed)
    }

    pub(crate) fn set_auto_compact(&self, value: bool) {
        self.inner.auto_compact.store(value, Ordering::Relaxed)
    }

    pub fn event_listeners(&self) -> Vec<StoreEventListener> {
        self.inner.event_listeners.read_with(|listeners| listeners.clone())
    }

    pub(crate) fn add_event_listener(&self, listener: StoreEventListener) {
        self.inner
            .event_listeners
            .write_with(|listeners| listeners.push(listener))
    }
}

impl Default for MVStoreConfig {
    fn default() -> Self {
        MVStoreConfig::new()
    }
}

impl StoreConfigProvider for MVStoreConfig {
    fn file_path(&self) -> String {
        MVStoreConfig::file_path(self).to_string()
    }

    fn is_read_only(&self) -> bool {
        self.read_only()
    }

    fn add_store_listener(&self, listener: StoreEventListener) {
        self.add_event_listener(listener)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct MVStoreConfigInner {
    file_path: OnceLock<String>,
    read_only: AtomicBool,
    auto_commit: AtomicBool,
    auto_commit_buffer_size: AtomicU32,
    compress: AtomicBool,
    compress_high: AtomicBool,
    page_split_size: AtomicU32,
    cache_size: AtomicUsize,
    cache_concurrency: AtomicUsize,
    recovery_mode: AtomicBool,
    encryption_key: Atomic<Option<Vec<u8>>>,
    file_store: OnceLock<FileStore>,
    auto_compact: AtomicBool,
    event_listeners: Atomic<Vec<StoreEventListener>>,
}
