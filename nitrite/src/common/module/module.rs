use super::plugin_manager::PluginRegistrar;
use crate::errors::NitriteResult;
use crate::nitrite_config::NitriteConfig;
use std::ops::Deref;
use std::sync::Arc;

/// A component whose lifetime is managed by the database: initialized
/// once the configuration is final, closed with the database.
pub trait NitritePluginProvider: Send + Sync {
    fn initialize(&self, config: NitriteConfig) -> NitriteResult<()>;

    fn close(&self) -> NitriteResult<()>;

    fn as_plugin(&self) -> NitritePlugin;
}

/// A bundle of plugins loaded into a [NitriteConfig].
///
/// Storage backends ship a module that registers their store plugin.
pub trait NitriteModule: Send + Sync {
    fn plugins(&self) -> NitriteResult<Vec<NitritePlugin>>;

    fn load(&self, plugin_registrar: &PluginRegistrar) -> NitriteResult<()>;
}

#[derive(Clone)]
pub struct NitritePlugin {
    inner: Arc<dyn NitritePluginProvider>,
}

impl NitritePlugin {
    pub fn new<T: NitritePluginProvider + 'static>(inner: T) -> Self {
        NitritePlugin {
            inner: Arc::new(inner),
        }
    }
}

impl Deref for NitritePlugin {
    type Target = Arc<dyn NitritePluginProvider>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
