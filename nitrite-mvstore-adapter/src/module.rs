use crate::config::MVStoreConfig;
use crate::file_store::FileStore;
use crate::store::MVStore;
use nitrite::common::{NitriteModule, NitritePlugin, PluginRegistrar};
use nitrite::errors::{ErrorKind, NitriteError, NitriteResult};
use nitrite::store::{NitriteStore, StoreEventListener, StoreModule};

/// Nitrite storage module backed by the chunked page store.
///
/// # Examples
///
/// ```rust,ignore
/// use nitrite::Nitrite;
/// use nitrite_mvstore_adapter::MVStoreModule;
///
/// let db = Nitrite::builder()
///     .load_module(
///         MVStoreModule::with_config()
///             .file_path("/path/to/test.db")
///             .compress(true)
///             .build()?,
///     )
///     .open_or_create(None, None)?;
/// ```
///
/// Without a file path the store lives in memory.
pub struct MVStoreModule {
    store_config: MVStoreConfig,
    store: NitriteStore,
}

impl MVStoreModule {
    pub fn with_config() -> MVStoreModuleBuilder {
        MVStoreModuleBuilder::new()
    }

    pub fn store_config(&self) -> &MVStoreConfig {
        &self.store_config
    }
}

impl NitriteModule for MVStoreModule {
    fn plugins(&self) -> NitriteResult<Vec<NitritePlugin>> {
        Ok(vec![self.get_store()?.as_plugin()])
    }

    fn load(&self, plugin_registrar: &PluginRegistrar) -> NitriteResult<()> {
        plugin_registrar.register_store_plugin(self.get_store()?)
    }
}

impl StoreModule for MVStoreModule {
    fn get_store(&self) -> NitriteResult<NitriteStore> {
        Ok(self.store.clone())
    }
}

/// Fluent builder for [MVStoreModule].
pub struct MVStoreModuleBuilder {
    store_config: MVStoreConfig,
}

impl MVStoreModuleBuilder {
    pub fn new() -> MVStoreModuleBuilder {
        MVStoreModuleBuilder {
            store_config: MVStoreConfig::new(),
        }
    }

    /// Store file; leave unset for an in-memory store.
    pub fn file_path(self, path: &str) -> Self {
        self.store_config.set_file_path(path);
        self
    }

    pub fn read_only(self, value: bool) -> Self {
        self.store_config.set_read_only(value);
        self
    }

    pub fn auto_commit(self, value: bool) -> Self {
        self.store_config.set_auto_commit(value);
        self
    }

    /// Auto-commit threshold in KB.
    pub fn auto_commit_buffer_size(self, kb: u32) -> Self {
        self.store_config.set_auto_commit_buffer_size(kb);
        self
    }

    pub fn compress(self, value: bool) -> Self {
        self.store_config.set_compress(value);
        self
    }

    pub fn compress_high(self, value: bool) -> Self {
        self.store_config.set_compress_high(value);
        self
    }

    pub fn page_split_size(self, bytes: u32) -> Self {
        self.store_config.set_page_split_size(bytes);
        self
    }

    pub fn cache_size(self, size: usize) -> Self {
        self.store_config.set_cache_size(size);
        self
    }

    pub fn cache_concurrency(self, segments: usize) -> Self {
        self.store_config.set_cache_concurrency(segments);
        self
    }

    pub fn recovery_mode(self, value: bool) -> Self {
        self.store_config.set_recovery_mode(value);
        self
    }

    pub fn encryption_key(self, key: &[u8]) -> Self {
        self.store_config.set_encryption_key(key);
        self
    }

    pub fn file_store(self, file_store: FileStore) -> Self {
        self.store_config.set_file_store(file_store);
        self
    }

    pub fn auto_compact(self, value: bool) -> Self {
        self.store_config.set_auto_compact(value);
        self
    }

    pub fn add_store_event_listener(self, listener: StoreEventListener) -> Self {
        self.store_config.add_event_listener(listener);
        self
    }

    /// Validates the option combination and builds the module.
    ///
    /// # Errors
    ///
    /// `ValidationError` for a read-only in-memory store, or an empty
    /// encryption key.
    pub fn build(self) -> NitriteResult<MVStoreModule> {
        let config = self.store_config;
        if config.read_only() && config.file_path().is_empty() {
            log::error!("Unable to create in-memory database in read-only mode");
            return Err(NitriteError::new(
                "Unable to create in-memory database in read-only mode",
                ErrorKind::ValidationError,
            ));
        }

        if matches!(config.encryption_key(), Some(key) if key.is_empty()) {
            log::error!("Encryption key cannot be empty");
            return Err(NitriteError::new(
                "Encryption key cannot be empty",
                ErrorKind::ValidationError,
            ));
        }

        let store = NitriteStore::new(MVStore::new(config.clone()));
        Ok(MVStoreModule {
            store_config: config,
            store,
        })
    }
}

impl Default for MVStoreModuleBuilder {
    fn default() -> Self {
        MVStoreModuleBuilder::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nitrite::common::PluginManager;

    #[test]
    fn test_builder_applies_options() {
        let module = MVStoreModule::with_config()
            .file_path("/tmp/builder.db")
            .auto_commit(false)
            .auto_commit_buffer_size(64)
            .compress(true)
            .cache_size(8)
            .cache_concurrency(4)
            .recovery_mode(true)
            .auto_compact(false)
            .build()
            .unwrap();

        let config = module.store_config();
        assert_eq!(config.file_path(), "/tmp/builder.db");
        assert!(!config.auto_commit());
        assert_eq!(config.auto_commit_buffer_size(), 64);
        assert!(config.compress());
        assert_eq!(config.cache_size(), 8);
        assert_eq!(config.cache_concurrency(), 4);
        assert!(config.recovery_mode());
        assert!(!config.auto_compact());
    }

    #[test]
    fn test_read_only_in_memory_rejected() {
        let err = MVStoreModule::with_config().read_only(true).build().err().unwrap();
        assert_eq!(err.kind(), &ErrorKind::ValidationError);
    }

    #[test]
    fn test_empty_encryption_key_rejected() {
        let err = MVStoreModule::with_config()
            .encryption_key(b"")
            .build()
            .err()
            .unwrap();
        assert_eq!(err.kind(), &ErrorKind::ValidationError);
    }

    #[test]
    fn test_module_registers_one_store() {
        let module = MVStoreModule::with_config().build().unwrap();
        assert_eq!(module.plugins().unwrap().len(), 1);

        let manager = PluginManager::new();
        let registrar = PluginRegistrar::new(manager.clone());
        module.load(&registrar).unwrap();
        assert!(manager.get_store().is_some());
        assert_eq!(
            module.get_store().unwrap().store_version().unwrap(),
            "MVStore/2"
        );
    }
}
