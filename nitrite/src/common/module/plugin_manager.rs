use super::NitriteModule;
use crate::errors::{ErrorKind, NitriteError, NitriteResult};
use crate::nitrite_config::NitriteConfig;
use crate::store::NitriteStore;
use std::sync::{Arc, OnceLock};

/// Sink through which a [NitriteModule] hands its plugins over.
pub trait PluginRegistrarProvider {
    fn register_store_plugin(&self, plugin: NitriteStore) -> NitriteResult<()>;
}

pub struct PluginRegistrar {
    inner: Arc<dyn PluginRegistrarProvider>,
}

impl PluginRegistrar {
    pub fn new<T: PluginRegistrarProvider + 'static>(inner: T) -> Self {
        PluginRegistrar {
            inner: Arc::new(inner),
        }
    }

    pub fn register_store_plugin(&self, plugin: NitriteStore) -> NitriteResult<()> {
        self.inner.register_store_plugin(plugin)
    }
}

/// Holds the plugins of one database instance.
///
/// Exactly one store plugin may be registered; a second registration is
/// rejected so that two backends never compete for the same database.
#[derive(Clone)]
pub struct PluginManager {
    inner: Arc<PluginManagerInner>,
}

impl PluginManager {
    pub fn new() -> Self {
        PluginManager {
            inner: Arc::new(PluginManagerInner {
                nitrite_config: OnceLock::new(),
                nitrite_store: OnceLock::new(),
            }),
        }
    }

    pub fn set_nitrite_config(&self, nitrite_config: NitriteConfig) {
        self.inner.nitrite_config.get_or_init(|| nitrite_config);
    }

    pub fn get_store(&self) -> Option<NitriteStore> {
        self.inner.nitrite_store.get().cloned()
    }

    pub fn load_module(&self, module: Box<dyn NitriteModule>) -> NitriteResult<()> {
        let registrar = PluginRegistrar::new(self.clone());
        module.load(&registrar)
    }

    pub fn initialize_plugins(&self) -> NitriteResult<()> {
        let config = match self.inner.nitrite_config.get() {
            Some(config) => config.clone(),
            None => {
                log::error!("NitriteConfig is not set");
                return Err(NitriteError::new(
                    "NitriteConfig is not set",
                    ErrorKind::PluginError,
                ));
            }
        };

        match self.inner.nitrite_store.get() {
            Some(store) => store.initialize(config),
            None => {
                log::error!("No store plugin is configured");
                Err(NitriteError::new(
                    "No store plugin is configured",
                    ErrorKind::PluginError,
                ))
            }
        }
    }

    pub fn close(&self) -> NitriteResult<()> {
        if let Some(store) = self.inner.nitrite_store.get() {
            store.close()?;
        }
        Ok(())
    }
}

impl Default for PluginManager {
    fn default() -> Self {
        PluginManager::new()
    }
}

impl PluginRegistrarProvider for PluginManager {
    fn register_store_plugin(&self, plugin: NitriteStore) -> NitriteResult<()> {
        if self.inner.nitrite_store.set(plugin).is_err() {
            log::error!("A store plugin is already registered");
            return Err(NitriteError::new(
                "A store plugin is already registered",
                ErrorKind::PluginError,
            ));
        }
        Ok(())
    }
}

struct PluginManagerInner {
    nitrite_config: OnceLock<NitriteConfig>,
    nitrite_store: OnceLock<NitriteStore>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::NitritePlugin;
    use crate::store::test_util::test_store;

    struct SingleStoreModule;

    impl NitriteModule for SingleStoreModule {
        fn plugins(&self) -> NitriteResult<Vec<NitritePlugin>> {
            Ok(vec![test_store().as_plugin()])
        }

        fn load(&self, plugin_registrar: &PluginRegistrar) -> NitriteResult<()> {
            plugin_registrar.register_store_plugin(test_store())
        }
    }

    #[test]
    fn test_load_module_registers_store() {
        let manager = PluginManager::new();
        assert!(manager.get_store().is_none());
        manager.load_module(Box::new(SingleStoreModule)).unwrap();
        assert!(manager.get_store().is_some());
    }

    #[test]
    fn test_second_store_is_rejected() {
        let manager = PluginManager::new();
        manager.load_module(Box::new(SingleStoreModule)).unwrap();
        let err = manager.load_module(Box::new(SingleStoreModule)).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::PluginError);
    }

    #[test]
    fn test_initialize_requires_config() {
        let manager = PluginManager::new();
        manager.load_module(Box::new(SingleStoreModule)).unwrap();
        let err = manager.initialize_plugins().unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::PluginError);

        manager.set_nitrite_config(NitriteConfig::new());
        assert!(manager.initialize_plugins().is_ok());
    }

    #[test]
    fn test_close_closes_store() {
        let manager = PluginManager::new();
        manager.close().unwrap();
        manager.load_module(Box::new(SingleStoreModule)).unwrap();
        manager.close().unwrap();
        assert!(manager.get_store().unwrap().is_closed().unwrap());
    }
}
