use crate::common::NitriteId;
use crate::errors::{ErrorKind, NitriteError, NitriteResult};
use crate::store::rtree::BoundingBox;
use std::ops::Deref;
use std::sync::Arc;

/// A named spatial index from bounding boxes to record ids.
///
/// The same id may appear under several boxes; an entry is removed by
/// exact (box, id) match. Once closed or dropped, every method fails with
/// `InvalidOperation`.
pub trait NitriteRTreeProvider: Send + Sync {
    /// Adds an entry. Does nothing when `nitrite_id` is `None`.
    fn add(&self, key: &BoundingBox, nitrite_id: Option<&NitriteId>) -> NitriteResult<()>;

    /// Removes the entry matching both `key` and `nitrite_id`. Does
    /// nothing when `nitrite_id` is `None`.
    fn remove(&self, key: &BoundingBox, nitrite_id: Option<&NitriteId>) -> NitriteResult<()>;

    /// Ids whose box overlaps `key`, borders included.
    fn find_intersecting_keys(&self, key: &BoundingBox) -> NitriteResult<Vec<NitriteId>>;

    /// Ids whose box lies strictly inside `key`.
    fn find_contained_keys(&self, key: &BoundingBox) -> NitriteResult<Vec<NitriteId>>;

    fn size(&self) -> NitriteResult<u64>;

    fn clear(&self) -> NitriteResult<()>;

    fn close(&self) -> NitriteResult<()>;

    /// Removes every entry and the index itself from the store.
    fn drop_tree(&self) -> NitriteResult<()>;

    fn is_closed(&self) -> bool;

    fn is_dropped(&self) -> bool;
}

#[derive(Clone)]
pub struct NitriteRTree {
    inner: Arc<dyn NitriteRTreeProvider>,
}

impl NitriteRTree {
    pub fn new<T: NitriteRTreeProvider + 'static>(inner: T) -> Self {
        NitriteRTree {
            inner: Arc::new(inner),
        }
    }
}

impl Deref for NitriteRTree {
    type Target = Arc<dyn NitriteRTreeProvider>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

/// Fails when an index is no longer usable. Backends call this first in
/// every public method.
pub fn check_rtree_opened(closed: bool, dropped: bool) -> NitriteResult<()> {
    if closed {
        log::error!("RTreeMap is closed");
        return Err(NitriteError::new(
            "RTreeMap is closed",
            ErrorKind::InvalidOperation,
        ));
    }
    if dropped {
        log::error!("RTreeMap is dropped");
        return Err(NitriteError::new(
            "RTreeMap is dropped",
            ErrorKind::InvalidOperation,
        ));
    }
    Ok(())
}
