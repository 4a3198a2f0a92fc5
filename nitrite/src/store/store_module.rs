use crate::common::NitriteModule;
use crate::errors::NitriteResult;
use crate::store::NitriteStore;

/// A module contributing the database's storage backend.
pub trait StoreModule: NitriteModule {
    fn get_store(&self) -> NitriteResult<NitriteStore>;
}
