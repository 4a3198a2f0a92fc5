use crate::config::FjallConfig;
use crate::store::FjallStore;
use fjall::compaction::Strategy;
use fjall::CompressionType;
use nitrite::common::{NitriteModule, NitritePlugin, PluginRegistrar};
use nitrite::errors::{ErrorKind, NitriteError, NitriteResult};
use nitrite::store::{NitriteStore, StoreEventListener, StoreModule};

const MB: u64 = 1024 * 1024;

/// Storage module backed by a fjall keyspace.
///
/// ```rust,ignore
/// use nitrite::nitrite::Nitrite;
/// use nitrite_fjall_adapter::FjallModule;
///
/// let db = Nitrite::builder()
///     .load_module(
///         FjallModule::with_config()
///             .production_preset()
///             .db_path("/path/to/db")
///             .build()?,
///     )
///     .open_or_create(None, None)?;
/// ```
///
/// Presets tune the engine for common workloads; any setter applied after
/// a preset overrides it.
pub struct FjallModule {
    store_config: FjallConfig,
    store: NitriteStore,
}

impl FjallModule {
    pub fn with_config() -> FjallModuleBuilder {
        FjallModuleBuilder::new()
    }

    pub fn store_config(&self) -> &FjallConfig {
        &self.store_config
    }
}

impl NitriteModule for FjallModule {
    fn plugins(&self) -> NitriteResult<Vec<NitritePlugin>> {
        Ok(vec![self.get_store()?.as_plugin()])
    }

    fn load(&self, plugin_registrar: &PluginRegistrar) -> NitriteResult<()> {
        plugin_registrar.register_store_plugin(self.get_store()?)
    }
}

impl StoreModule for FjallModule {
    fn get_store(&self) -> NitriteResult<NitriteStore> {
        Ok(self.store.clone())
    }
}

/// Fluent builder for [FjallModule].
pub struct FjallModuleBuilder {
    store_config: FjallConfig,
}

impl Default for FjallModuleBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FjallModuleBuilder {
    pub fn new() -> FjallModuleBuilder {
        FjallModuleBuilder {
            store_config: FjallConfig::new(),
        }
    }

    /// Large caches, every core flushing, bloom filters, LZ4 and a 100 ms
    /// fsync interval.
    pub fn production_preset(self) -> Self {
        let cpus = available_cpus();
        self.block_cache_capacity(256 * MB)
            .blob_cache_capacity(64 * MB)
            .max_write_buffer_size(128 * MB)
            .max_memtable_size(32 * MB as u32)
            .flush_workers(cpus)
            .compaction_workers((cpus / 2).max(1))
            .bloom_filter_bits(10)
            .fsync_frequency(100)
            .compression_type(CompressionType::Lz4)
    }

    /// Bulk loading: big buffers, manual journal persistence and key-value
    /// separation. Data written after the last commit may be lost on crash.
    pub fn high_throughput_preset(self) -> Self {
        let cpus = available_cpus();
        self.block_cache_capacity(512 * MB)
            .blob_cache_capacity(128 * MB)
            .max_write_buffer_size(256 * MB)
            .max_memtable_size(64 * MB as u32)
            .flush_workers(cpus)
            .compaction_workers(cpus)
            .manual_journal_persist(true)
            .kv_separated(true)
            .disable_bloom_filter()
    }

    /// Small caches and a single worker of each kind.
    pub fn low_memory_preset(self) -> Self {
        self.block_cache_capacity(16 * MB)
            .blob_cache_capacity(8 * MB)
            .max_write_buffer_size(32 * MB)
            .max_memtable_size(8 * MB as u32)
            .flush_workers(1)
            .compaction_workers(1)
            .bloom_filter_bits(10)
    }

    pub fn db_path(self, db_path: &str) -> Self {
        self.store_config.set_db_path(db_path);
        self
    }

    pub fn manual_journal_persist(self, manual_journal_persist: bool) -> Self {
        self.store_config
            .set_manual_journal_persist(manual_journal_persist);
        self
    }

    pub fn flush_workers(self, count: usize) -> Self {
        self.store_config.set_flush_workers(count);
        self
    }

    pub fn compaction_workers(self, count: usize) -> Self {
        self.store_config.set_compaction_workers(count);
        self
    }

    pub fn block_cache_capacity(self, bytes: u64) -> Self {
        self.store_config.set_block_cache_capacity(bytes);
        self
    }

    pub fn blob_cache_capacity(self, bytes: u64) -> Self {
        self.store_config.set_blob_cache_capacity(bytes);
        self
    }

    pub fn max_journaling_size(self, bytes: u64) -> Self {
        self.store_config.set_max_journaling_size(bytes);
        self
    }

    pub fn max_write_buffer_size(self, bytes: u64) -> Self {
        self.store_config.set_max_write_buffer_size(bytes);
        self
    }

    /// Fsync interval in milliseconds; `0` leaves syncing to commits.
    pub fn fsync_frequency(self, millis: u16) -> Self {
        self.store_config.set_fsync_frequency(millis);
        self
    }

    pub fn event_listener(self, listener: StoreEventListener) -> Self {
        self.store_config.add_event_listener(listener);
        self
    }

    pub fn commit_before_close(self, value: bool) -> Self {
        self.store_config.set_commit_before_close(value);
        self
    }

    pub fn bloom_filter_bits(self, bits: u8) -> Self {
        self.store_config
            .set_bloom_filter_bits(bits.min(i8::MAX as u8) as i8);
        self
    }

    pub fn disable_bloom_filter(self) -> Self {
        self.store_config.set_bloom_filter_bits(-1);
        self
    }

    pub fn compression_type(self, compression_type: CompressionType) -> Self {
        self.store_config.set_compression_type(compression_type);
        self
    }

    pub fn compaction_strategy(self, strategy: Strategy) -> Self {
        self.store_config.set_compaction_strategy(strategy);
        self
    }

    pub fn max_memtable_size(self, bytes: u32) -> Self {
        self.store_config.set_max_memtable_size(bytes);
        self
    }

    pub fn block_size(self, bytes: u32) -> Self {
        self.store_config.set_block_size(bytes);
        self
    }

    pub fn kv_separated(self, kv_separated: bool) -> Self {
        self.store_config.set_kv_separated(kv_separated);
        self
    }

    pub fn space_amp_factor(self, factor: f32) -> Self {
        self.store_config.set_space_amp_factor(factor);
        self
    }

    pub fn staleness_threshold(self, threshold: f32) -> Self {
        self.store_config.set_staleness_threshold(threshold);
        self
    }

    /// Validates the configuration and creates the module's store.
    ///
    /// # Errors
    ///
    /// `InvalidOperation` when no `db_path` was given; fjall keeps its
    /// data on disk only.
    pub fn build(self) -> NitriteResult<FjallModule> {
        let config = self.store_config;
        if config.db_path().is_empty() {
            log::error!("In-memory store is not supported by Fjall");
            return Err(NitriteError::new(
                "In-memory store is not supported by Fjall",
                ErrorKind::InvalidOperation,
            ));
        }

        if config.space_amp_factor() < 1.0 {
            log::error!("Space amplification target must be at least 1.0");
            return Err(NitriteError::new(
                "Space amplification target must be at least 1.0",
                ErrorKind::ValidationError,
            ));
        }

        if !(0.0..=1.0).contains(&config.staleness_threshold()) {
            log::error!("Staleness threshold must be within 0.0 and 1.0");
            return Err(NitriteError::new(
                "Staleness threshold must be within 0.0 and 1.0",
                ErrorKind::ValidationError,
            ));
        }

        let store = NitriteStore::new(FjallStore::new(config.clone()));
        Ok(FjallModule {
            store_config: config,
            store,
        })
    }
}

fn available_cpus() -> usize {
    std::thread::available_parallelism()
        .map(usize::from)
        .unwrap_or(4)
}
