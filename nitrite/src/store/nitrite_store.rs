use crate::common::{NitritePluginProvider, SubscriberRef};
use crate::errors::NitriteResult;
use crate::store::rtree::NitriteRTree;
use crate::store::{NitriteMap, StoreConfig, StoreEventListener};
use std::collections::BTreeSet;
use std::ops::Deref;
use std::sync::Arc;

/// A physical database instance owning named maps and spatial indexes.
///
/// Maps and indexes are created lazily on first open and cached by name
/// for the life of the store. Opening happens once; concurrent callers
/// racing on `open_or_create` cause a single physical open.
pub trait NitriteStoreProvider: NitritePluginProvider + Send + Sync {
    fn open_or_create(&self) -> NitriteResult<()>;

    fn is_closed(&self) -> NitriteResult<bool>;

    fn has_unsaved_changes(&self) -> NitriteResult<bool>;

    fn is_read_only(&self) -> NitriteResult<bool>;

    fn is_map_opened(&self, name: &str) -> NitriteResult<bool>;

    /// Persists pending changes.
    fn commit(&self) -> NitriteResult<()>;

    /// Discards changes made since the last commit.
    fn rollback(&self) -> NitriteResult<()>;

    /// Reclaims physical space.
    fn compact(&self) -> NitriteResult<()>;

    fn before_close(&self) -> NitriteResult<()>;

    fn has_map(&self, name: &str) -> NitriteResult<bool>;

    /// Names of every map present in the store, opened or not.
    fn map_names(&self) -> NitriteResult<BTreeSet<String>>;

    fn open_map(&self, name: &str) -> NitriteResult<NitriteMap>;

    fn close_map(&self, name: &str) -> NitriteResult<()>;

    /// Drops the map's records and forgets its name.
    fn remove_map(&self, name: &str) -> NitriteResult<()>;

    fn open_rtree(&self, name: &str) -> NitriteResult<NitriteRTree>;

    fn close_rtree(&self, name: &str) -> NitriteResult<()>;

    fn remove_rtree(&self, name: &str) -> NitriteResult<()>;

    fn subscribe(&self, listener: StoreEventListener) -> NitriteResult<Option<SubscriberRef>>;

    fn unsubscribe(&self, subscriber_ref: SubscriberRef) -> NitriteResult<()>;

    /// Backend name and version, e.g. `MVStore/2`.
    fn store_version(&self) -> NitriteResult<String>;

    fn store_config(&self) -> NitriteResult<StoreConfig>;
}

#[derive(Clone)]
pub struct NitriteStore {
    inner: Arc<dyn NitriteStoreProvider>,
}

impl NitriteStore {
    pub fn new<T: NitriteStoreProvider + 'static>(inner: T) -> Self {
        NitriteStore {
            inner: Arc::new(inner),
        }
    }
}

impl std::fmt::Debug for NitriteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NitriteStore").finish()
    }
}

impl Deref for NitriteStore {
    type Target = Arc<dyn NitriteStoreProvider>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
