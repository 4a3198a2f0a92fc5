//! Configuration of a database instance.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};

use crate::common::{NitriteModule, PluginManager, INITIAL_SCHEMA_VERSION};
use crate::errors::{ErrorKind, NitriteError, NitriteResult};
use crate::store::NitriteStore;

/// Settings and plugins of one database instance.
///
/// A configuration is mutable until the database initializes it; after
/// that, loading modules or changing the schema version fails with
/// `InvalidOperation`.
///
/// # Examples
///
/// ```rust,ignore
/// let config = NitriteConfig::new();
/// config.load_module(MVStoreModule::with_config().file_path("/tmp/test.db").build())?;
/// ```
#[derive(Clone)]
pub struct NitriteConfig {
    inner: Arc<NitriteConfigInner>,
}

impl Default for NitriteConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl NitriteConfig {
    pub fn new() -> Self {
        NitriteConfig {
            inner: Arc::new(NitriteConfigInner::new()),
        }
    }

    /// The store plugin registered by the loaded module.
    ///
    /// # Errors
    ///
    /// `PluginError` if no module registered a store.
    pub fn nitrite_store(&self) -> NitriteResult<NitriteStore> {
        self.inner.nitrite_store()
    }

    pub fn load_module<T: NitriteModule + 'static>(&self, module: T) -> NitriteResult<()> {
        self.inner.load_module(module)
    }

    pub fn close(&self) -> NitriteResult<()> {
        self.inner.close()
    }

    pub fn schema_version(&self) -> u32 {
        self.inner.schema_version()
    }

    pub fn set_schema_version(&self, version: u32) -> NitriteResult<()> {
        self.inner.set_schema_version(version)
    }

    /// Records the path of the database file; only the first call wins.
    pub fn set_db_path(&self, db_path: &str) -> NitriteResult<()> {
        self.inner.set_db_path(db_path)
    }

    pub fn db_path(&self) -> Option<String> {
        self.inner.db_path()
    }

    pub fn is_configured(&self) -> bool {
        self.inner.configured.load(Ordering::Relaxed)
    }

    pub(crate) fn initialize(&self) -> NitriteResult<()> {
        self.inner.set_nitrite_config(self.clone());
        self.inner.initialize()
    }
}

struct NitriteConfigInner {
    configured: AtomicBool,
    plugin_manager: PluginManager,
    schema_version: AtomicU32,
    db_path: OnceLock<String>,
}

impl NitriteConfigInner {
    fn new() -> Self {
        NitriteConfigInner {
            configured: AtomicBool::from(false),
            plugin_manager: PluginManager::new(),
            schema_version: AtomicU32::from(INITIAL_SCHEMA_VERSION),
            db_path: OnceLock::new(),
        }
    }

    fn nitrite_store(&self) -> NitriteResult<NitriteStore> {
        match self.plugin_manager.get_store() {
            Some(store) => Ok(store),
            None => {
                log::error!("No store plugin is configured");
                Err(NitriteError::new(
                    "No store plugin is configured",
                    ErrorKind::PluginError,
                ))
            }
        }
    }

    fn load_module<T: NitriteModule + 'static>(&self, module: T) -> NitriteResult<()> {
        if self.configured.load(Ordering::Relaxed) {
            log::error!("Cannot load module after initialization");
            return Err(NitriteError::new(
                "Cannot load module after initialization",
                ErrorKind::InvalidOperation,
            ));
        }
        self.plugin_manager.load_module(Box::new(module))
    }

    fn close(&self) -> NitriteResult<()> {
        self.plugin_manager.close().map_err(|e| {
            NitriteError::new_with_cause(
                "Failed to close nitrite configuration",
                e.kind().clone(),
                e,
            )
        })
    }

    fn schema_version(&self) -> u32 {
        self.schema_version.load(Ordering::Relaxed)
    }

    fn set_schema_version(&self, version: u32) -> NitriteResult<()> {
        if self.configured.load(Ordering::Relaxed) {
            log::error!("Schema version cannot be changed after initialization");
            return Err(NitriteError::new(
                "Schema version cannot be changed after initialization",
                ErrorKind::InvalidOperation,
            ));
        }
        self.schema_version.store(version, Ordering::Relaxed);
        Ok(())
    }

    fn set_db_path(&self, db_path: &str) -> NitriteResult<()> {
        self.db_path.get_or_init(|| db_path.to_string());
        Ok(())
    }

    fn db_path(&self) -> Option<String> {
        self.db_path.get().cloned()
    }

    fn initialize(&self) -> NitriteResult<()> {
        self.configured.store(true, Ordering::Relaxed);
        self.plugin_manager.initialize_plugins().map_err(|e| {
            NitriteError::new_with_cause(
                "Failed to initialize nitrite configuration plugins",
                e.kind().clone(),
                e,
            )
        })
    }

    fn set_nitrite_config(&self, nitrite_config: NitriteConfig) {
        self.plugin_manager.set_nitrite_config(nitrite_config);
    }
}
