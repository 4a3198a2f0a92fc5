use crate::errors::{ErrorKind, NitriteError, NitriteResult};
use crate::store::StoreEventListener;
use std::any::Any;
use std::ops::Deref;
use std::sync::Arc;

/// Backend-specific store configuration.
pub trait StoreConfigProvider: Any + Send + Sync {
    fn file_path(&self) -> String;

    fn is_read_only(&self) -> bool;

    fn add_store_listener(&self, listener: StoreEventListener);

    /// A store without a file path lives in memory only.
    fn is_in_memory(&self) -> bool {
        self.file_path().is_empty()
    }

    fn as_any(&self) -> &dyn Any;
}

#[derive(Clone)]
pub struct StoreConfig {
    inner: Arc<dyn StoreConfigProvider>,
}

impl StoreConfig {
    pub fn new<T: StoreConfigProvider + 'static>(inner: T) -> Self {
        StoreConfig {
            inner: Arc::new(inner),
        }
    }

    /// Downcasts to the backend's concrete configuration type.
    pub fn as_ref<T: StoreConfigProvider + 'static>(&self) -> NitriteResult<&T> {
        self.inner.as_any().downcast_ref::<T>().ok_or_else(|| {
            log::error!("Store config is not of the requested type");
            NitriteError::new(
                "Store config is not of the requested type",
                ErrorKind::InvalidOperation,
            )
        })
    }
}

impl Deref for StoreConfig {
    type Target = Arc<dyn StoreConfigProvider>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
