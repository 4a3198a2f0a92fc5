use fjall::compaction::Strategy;
use fjall::{CompressionType, Config, KvSeparationOptions, PartitionCreateOptions};
use nitrite::common::{atomic, Atomic, ReadExecutor, WriteExecutor};
use nitrite::store::{StoreConfigProvider, StoreEventListener};
use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicI8, AtomicU16, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

const MB: u64 = 1_024 * 1_024;

/// Tuning options of a [FjallStore](crate::FjallStore).
///
/// Clones share the same settings. The keyspace directory is set once;
/// later calls to change it are ignored.
#[derive(Clone)]
pub struct FjallConfig {
    inner: Arc<FjallConfigInner>,
}

struct FjallConfigInner {
    db_path: OnceLock<String>,
    manual_journal_persist: AtomicBool,
    flush_workers: AtomicUsize,
    compaction_workers: AtomicUsize,
    block_cache_capacity: AtomicU64,
    blob_cache_capacity: AtomicU64,
    max_journaling_size: AtomicU64,
    max_write_buffer_size: AtomicU64,
    fsync_frequency: AtomicU16,
    event_listeners: Atomic<Vec<StoreEventListener>>,
    commit_before_close: AtomicBool,
    bloom_filter_bits: AtomicI8,
    compression_type: Atomic<CompressionType>,
    compaction_strategy: Atomic<Strategy>,
    max_memtable_size: AtomicU32,
    block_size: AtomicU32,
    kv_separated: AtomicBool,
    space_amp_factor: Atomic<f32>,
    staleness_threshold: Atomic<f32>,
}

impl Default for FjallConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl FjallConfig {
    /// Defaults: 64 MB block cache, 32 MB blob cache, 128 MB write buffer,
    /// 512 MB journal, 32 MB memtables, 10 bloom bits per key, LZ4. Flush
    /// uses every core, compaction half of them.
    pub fn new() -> FjallConfig {
        let cpus = std::thread::available_parallelism()
            .map(usize::from)
            .unwrap_or(4);

        FjallConfig {
            inner: Arc::new(FjallConfigInner {
                db_path: OnceLock::new(),
                manual_journal_persist: AtomicBool::new(false),
                flush_workers: AtomicUsize::new(cpus.max(1)),
                compaction_workers: AtomicUsize::new((cpus / 2).max(1)),
                block_cache_capacity: AtomicU64::new(64 * MB),
                blob_cache_capacity: AtomicU64::new(32 * MB),
                max_journaling_size: AtomicU64::new(512 * MB),
                max_write_buffer_size: AtomicU64::new(128 * MB),
                fsync_frequency: AtomicU16::new(0),
                event_listeners: atomic(Vec::new()),
                commit_before_close: AtomicBool::new(true),
                bloom_filter_bits: AtomicI8::new(10),
                compression_type: atomic(CompressionType::Lz4),
                compaction_strategy: atomic(Strategy::default()),
                max_memtable_size: AtomicU32::new(32 * MB as u32),
                block_size: AtomicU32::new(4 * 1_024),
                kv_separated: AtomicBool::new(false),
                space_amp_factor: atomic(1.5),
                staleness_threshold: atomic(0.8),
            }),
        }
    }

    pub(crate) fn keyspace_config(&self) -> Config {
        let mut config = Config::new(self.db_path())
            .manual_journal_persist(self.manual_journal_persist())
            .flush_workers(self.flush_workers())
            .compaction_workers(self.compaction_workers())
            .cache_size(self.block_cache_capacity() + self.blob_cache_capacity())
            .max_journaling_size(self.max_journaling_size())
            .max_write_buffer_size(self.max_write_buffer_size());

        if self.fsync_frequency() > 0 {
            config = config.fsync_ms(Some(self.fsync_frequency()));
        }
        config
    }

    pub(crate) fn partition_config(&self) -> PartitionCreateOptions {
        let bloom_bits = match self.bloom_filter_bits() {
            bits if bits < 0 => None,
            bits => Some(bits as u8),
        };
        let mut config = PartitionCreateOptions::default()
            .bloom_filter_bits(bloom_bits)
            .compression(self.compression_type())
            .compaction_strategy(self.compaction_strategy())
            .max_memtable_size(self.max_memtable_size())
            .block_size(self.block_size());

        if self.kv_separated() {
            config = config.with_kv_separation(KvSeparationOptions::default());
        }
        config
    }

    /// Keyspace directory; empty until configured.
    pub fn db_path(&self) -> &str {
        self.inner.db_path.get().map(String::as_str).unwrap_or("")
    }

    pub(crate) fn set_db_path(&self, db_path: &str) {
        let _ = self.inner.db_path.set(db_path.to_string());
    }

    pub fn manual_journal_persist(&self) -> bool {
        self.inner.manual_journal_persist.load(Ordering::Relaxed)
    }

    pub(crate) fn set_manual_journal_persist(&self, value: bool) {
        self.inner.manual_journal_persist.store(value, Ordering::Relaxed)
    }

    pub fn flush_workers(&self) -> usize {
        self.inner.flush_workers.load(Ordering::Relaxed)
    }

    pub(crate) fn set_flush_workers(&self, count: usize) {
        self.inner.flush_workers.store(count, Ordering::Relaxed)
    }

    pub fn compaction_workers(&self) -> usize {
        self.inner.compaction_workers.load(Ordering::Relaxed)
    }

    pub(crate) fn set_compaction_workers(&self, count: usize) {
        self.inner.compaction_workers.store(count, Ordering::Relaxed)
    }

    pub fn block_cache_capacity(&self) -> u64 {
        self.inner.block_cache_capacity.load(Ordering::Relaxed)
    }

    pub(crate) fn set_block_cache_capacity(&self, bytes: u64) {
        self.inner.block_cache_capacity.store(bytes, Ordering::Relaxed)
    }

    pub fn blob_cache_capacity(&self) -> u64 {
        self.inner.blob_cache_capacity.load(Ordering::Relaxed)
    }

    pub(crate) fn set_blob_cache_capacity(&self, bytes: u64) {
        self.inner.blob_cache_capacity.store(bytes, Ordering::Relaxed)
    }

    pub fn max_journaling_size(&self) -> u64 {
        self.inner.max_journaling_size.load(Ordering::Relaxed)
    }

    pub(crate) fn set_max_journaling_size(&self, bytes: u64) {
        self.inner.max_journaling_size.store(bytes, Ordering::Relaxed)
    }

    pub fn max_write_buffer_size(&self) -> u64 {
        self.inner.max_write_buffer_size.load(Ordering::Relaxed)
    }

    pub(crate) fn set_max_write_buffer_size(&self, bytes: u64) {
        self.inner.max_write_buffer_size.store(bytes, Ordering::Relaxed)
    }

    /// Background fsync interval in milliseconds, 0 to disable.
    pub fn fsync_frequency(&self) -> u16 {
        self.inner.fsync_frequency.load(Ordering::Relaxed)
    }

    pub(crate) fn set_fsync_frequency(&self, millis: u16) {
        self.inner.fsync_frequency.store(millis, Ordering::Relaxed)
    }

    pub fn event_listeners(&self) -> Vec<StoreEventListener> {
        self.inner.event_listeners.read_with(|it| it.clone())
    }

    pub(crate) fn add_event_listener(&self, listener: StoreEventListener) {
        self.inner.event_listeners.write_with(|it| it.push(listener))
    }

    /// Persist the journal when the store closes.
    pub fn commit_before_close(&self) -> bool {
        self.inner.commit_before_close.load(Ordering::Relaxed)
    }

    pub(crate) fn set_commit_before_close(&self, value: bool) {
        self.inner.commit_before_close.store(value, Ordering::Relaxed)
    }

    /// Bloom filter bits per key; negative disables the filter.
    pub fn bloom_filter_bits(&self) -> i8 {
        self.inner.bloom_filter_bits.load(Ordering::Relaxed)
    }

    pub(crate) fn set_bloom_filter_bits(&self, bits: i8) {
        self.inner.bloom_filter_bits.store(bits, Ordering::Relaxed)
    }

    pub fn compression_type(&self) -> CompressionType {
        self.inner.compression_type.read_with(|it| it.clone())
    }

    pub(crate) fn set_compression_type(&self, compression_type: CompressionType) {
        self.inner.compression_type.write_with(|it| *it = compression_type)
    }

    pub fn compaction_strategy(&self) -> Strategy {
        self.inner.compaction_strategy.read_with(|it| it.clone())
    }

    pub(crate) fn set_compaction_strategy(&self, strategy: Strategy) {
        self.inner.compaction_strategy.write_with(|it| *it = strategy)
    }

    pub fn max_memtable_size(&self) -> u32 {
        self.inner.max_memtable_size.load(Ordering::Relaxed)
    }

    pub(crate) fn set_max_memtable_size(&self, bytes: u32) {
        self.inner.max_memtable_size.store(bytes, Ordering::Relaxed)
    }

    pub fn block_size(&self) -> u32 {
        self.inner.block_size.load(Ordering::Relaxed)
    }

    pub(crate) fn set_block_size(&self, bytes: u32) {
        self.inner.block_size.store(bytes, Ordering::Relaxed)
    }

    /// Store large values in blob files apart from the LSM tree.
    pub fn kv_separated(&self) -> bool {
        self.inner.kv_separated.load(Ordering::Relaxed)
    }

    pub(crate) fn set_kv_separated(&self, value: bool) {
        self.inner.kv_separated.store(value, Ordering::Relaxed)
    }

    pub fn space_amp_factor(&self) -> f32 {
        self.inner.space_amp_factor.read_with(|it| *it)
    }

    pub(crate) fn set_space_amp_factor(&self, factor: f32) {
        self.inner.space_amp_factor.write_with(|it| *it = factor)
    }

    pub fn staleness_threshold(&self) -> f32 {
        self.inner.staleness_threshold.read_with(|it| *it)
    }

    pub(crate) fn set_staleness_threshold(&self, threshold: f32) {
        self.inner.staleness_threshold.write_with(|it| *it = threshold)
    }
}

impl StoreConfigProvider for FjallConfig {
    fn file_path(&self) -> String {
        self.db_path().to_string()
    }

    fn is_read_only(&self) -> bool {
        false
    }

    fn add_store_listener(&self, listener: StoreEventListener) {
        self.add_event_listener(listener)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FjallConfig::new();
        let cpus = std::thread::available_parallelism()
            .map(usize::from)
            .unwrap_or(4);

        assert_eq!(config.db_path(), "");
        assert!(!config.manual_journal_persist());
        assert_eq!(config.flush_workers(), cpus.max(1));
        assert_eq!(config.compaction_workers(), (cpus / 2).max(1));
        assert_eq!(config.block_cache_capacity(), 64 * MB);
        assert_eq!(config.blob_cache_capacity(), 32 * MB);
        assert_eq!(config.max_journaling_size(), 512 * MB);
        assert_eq!(config.max_write_buffer_size(), 128 * MB);
        assert_eq!(config.fsync_frequency(), 0);
        assert!(config.commit_before_close());
        assert_eq!(config.bloom_filter_bits(), 10);
        assert_eq!(config.compression_type(), CompressionType::Lz4);
        assert_eq!(config.max_memtable_size(), 32 * MB as u32);
        assert_eq!(config.block_size(), 4 * 1_024);
        assert!(!config.kv_separated());
        assert_eq!(config.space_amp_factor(), 1.5);
        assert_eq!(config.staleness_threshold(), 0.8);
    }

    #[test]
    fn test_setters() {
        let config = FjallConfig::new();
        config.set_manual_journal_persist(true);
        config.set_flush_workers(8);
        config.set_block_cache_capacity(16 * MB);
        config.set_fsync_frequency(100);
        config.set_bloom_filter_bits(-1);
        config.set_kv_separated(true);
        config.set_staleness_threshold(0.9);
        config.add_event_listener(StoreEventListener::new(|_| Ok(())));

        assert!(config.manual_journal_persist());
        assert_eq!(config.flush_workers(), 8);
        assert_eq!(config.block_cache_capacity(), 16 * MB);
        assert_eq!(config.fsync_frequency(), 100);
        assert_eq!(config.bloom_filter_bits(), -1);
        assert!(config.kv_separated());
        assert_eq!(config.staleness_threshold(), 0.9);
        assert_eq!(config.event_listeners().len(), 1);
    }

    #[test]
    fn test_db_path_set_once() {
        let config = FjallConfig::new();
        config.set_db_path("/tmp/first");
        config.set_db_path("/tmp/second");
        assert_eq!(config.db_path(), "/tmp/first");
        assert_eq!(config.file_path(), "/tmp/first");
    }

    #[test]
    fn test_clones_share_settings() {
        let config = FjallConfig::new();
        let other = config.clone();
        other.set_block_size(8 * 1_024);
        assert_eq!(config.block_size(), 8 * 1_024);
        assert!(!config.is_read_only());
    }
}
