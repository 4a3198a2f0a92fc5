use crate::store::MVStore;
use nitrite::common::NitriteId;
use nitrite::errors::NitriteResult;
use nitrite::store::rtree::{check_rtree_opened, BoundingBox, NitriteRTreeProvider};
use parking_lot::RwLock;
use rstar::{RTree, RTreeObject, AABB};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Approximate on-disk footprint of one spatial entry.
const ENTRY_SIZE: u64 = 40;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct SpatialEntry {
    bbox: BoundingBox,
    id: u64,
}

impl RTreeObject for SpatialEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(
            [self.bbox.min_x(), self.bbox.min_y()],
            [self.bbox.max_x(), self.bbox.max_y()],
        )
    }
}

/// Contents of one spatial index: an R*-tree for real boxes plus the
/// ids indexed under [BoundingBox::EMPTY], which match no query.
#[derive(Clone, Default)]
pub(crate) struct SpatialData {
    tree: RTree<SpatialEntry>,
    empties: BTreeSet<u64>,
}

impl SpatialData {
    pub(crate) fn from_entries(entries: Vec<(BoundingBox, u64)>) -> Self {
        let mut empties = BTreeSet::new();
        let mut boxes = Vec::with_capacity(entries.len());
        for (bbox, id) in entries {
            if bbox.is_empty() {
                empties.insert(id);
            } else {
                boxes.push(SpatialEntry { bbox, id });
            }
        }
        SpatialData {
            tree: RTree::bulk_load(boxes),
            empties,
        }
    }

    pub(crate) fn to_entries(&self) -> Vec<(BoundingBox, u64)> {
        self.tree
            .iter()
            .map(|entry| (entry.bbox, entry.id))
            .chain(self.empties.iter().map(|id| (BoundingBox::EMPTY, *id)))
            .collect()
    }

    /// Returns `false` if the exact entry was already present.
    fn insert(&mut self, bbox: BoundingBox, id: u64) -> bool {
        if bbox.is_empty() {
            return self.empties.insert(id);
        }
        let entry = SpatialEntry { bbox, id };
        if self.tree.contains(&entry) {
            return false;
        }
        self.tree.insert(entry);
        true
    }

    fn remove(&mut self, bbox: BoundingBox, id: u64) -> bool {
        if bbox.is_empty() {
            return self.empties.remove(&id);
        }
        self.tree.remove(&SpatialEntry { bbox, id }).is_some()
    }

    fn len(&self) -> usize {
        self.tree.size() + self.empties.len()
    }

    fn intersecting(&self, query: &BoundingBox) -> Vec<NitriteId> {
        if query.is_empty() {
            return Vec::new();
        }
        let envelope = SpatialEntry { bbox: *query, id: 0 }.envelope();
        collect_ids(
            self.tree
                .locate_in_envelope_intersecting(&envelope)
                .filter(|entry| entry.bbox.intersects(query)),
        )
    }

    fn contained(&self, query: &BoundingBox) -> Vec<NitriteId> {
        if query.is_empty() {
            return Vec::new();
        }
        let envelope = SpatialEntry { bbox: *query, id: 0 }.envelope();
        collect_ids(
            self.tree
                .locate_in_envelope(&envelope)
                .filter(|entry| query.strictly_contains(&entry.bbox)),
        )
    }
}

fn collect_ids<'a>(entries: impl Iterator<Item = &'a SpatialEntry>) -> Vec<NitriteId> {
    entries
        .map(|entry| NitriteId::create_id(entry.id))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Spatial index stored natively in the page store.
#[derive(Clone)]
pub(crate) struct MVRTree {
    inner: Arc<MVRTreeInner>,
}

struct MVRTreeInner {
    name: String,
    store: MVStore,
    data: Arc<RwLock<SpatialData>>,
    closed: AtomicBool,
    dropped: AtomicBool,
}

impl MVRTree {
    pub(crate) fn new(name: &str, store: MVStore, data: Arc<RwLock<SpatialData>>) -> Self {
        MVRTree {
            inner: Arc::new(MVRTreeInner {
                name: name.to_string(),
                store,
                data,
                closed: AtomicBool::new(false),
                dropped: AtomicBool::new(false),
            }),
        }
    }

    /// Detaches the handle without touching the store's registry.
    pub(crate) fn mark_closed(&self) {
        self.inner.closed.store(true, Ordering::Release);
    }

    fn check_opened(&self) -> NitriteResult<()> {
        check_rtree_opened(self.is_closed(), self.is_dropped())?;
        self.inner.store.check_opened()
    }

    fn modified(&self, bytes: u64) -> NitriteResult<()> {
        self.inner.store.mark_unsaved(&self.inner.name, bytes)
    }
}

impl NitriteRTreeProvider for MVRTree {
    fn add(&self, key: &BoundingBox, nitrite_id: Option<&NitriteId>) -> NitriteResult<()> {
        self.check_opened()?;
        if let Some(id) = nitrite_id {
            self.inner.store.check_writable()?;
            let inserted = self.inner.data.write().insert(*key, id.id_value());
            if inserted {
                self.modified(ENTRY_SIZE)?;
            }
        }
        Ok(())
    }

    fn remove(&self, key: &BoundingBox, nitrite_id: Option<&NitriteId>) -> NitriteResult<()> {
        self.check_opened()?;
        if let Some(id) = nitrite_id {
            self.inner.store.check_writable()?;
            let removed = self.inner.data.write().remove(*key, id.id_value());
            if removed {
                self.modified(ENTRY_SIZE)?;
            }
        }
        Ok(())
    }

    fn find_intersecting_keys(&self, key: &BoundingBox) -> NitriteResult<Vec<NitriteId>> {
        self.check_opened()?;
        Ok(self.inner.data.read().intersecting(key))
    }

    fn find_contained_keys(&self, key: &BoundingBox) -> NitriteResult<Vec<NitriteId>> {
        self.check_opened()?;
        Ok(self.inner.data.read().contained(key))
    }

    fn size(&self) -> NitriteResult<u64> {
        self.check_opened()?;
        Ok(self.inner.data.read().len() as u64)
    }

    fn clear(&self) -> NitriteResult<()> {
        self.check_opened()?;
        self.inner.store.check_writable()?;
        *self.inner.data.write() = SpatialData::default();
        self.modified(0)
    }

    fn close(&self) -> NitriteResult<()> {
        self.check_opened()?;
        self.mark_closed();
        self.inner.store.detach_rtree(&self.inner.name);
        Ok(())
    }

    fn drop_tree(&self) -> NitriteResult<()> {
        self.check_opened()?;
        self.inner.store.check_writable()?;
        *self.inner.data.write() = SpatialData::default();
        self.inner.dropped.store(true, Ordering::Release);
        self.inner.store.forget_rtree(&self.inner.name)
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    fn is_dropped(&self) -> bool {
        self.inner.dropped.load(Ordering::Acquire)
    }
}
