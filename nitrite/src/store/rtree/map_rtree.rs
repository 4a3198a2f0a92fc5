use crate::common::{Key, NitriteId, Value};
use crate::errors::{ErrorKind, NitriteError, NitriteResult};
use crate::store::rtree::{check_rtree_opened, BoundingBox, NitriteRTreeProvider};
use crate::store::NitriteMap;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Spatial index emulated on top of an ordered map.
///
/// Each entry is stored under the key `[id, min_x, max_x, min_y, max_y]`
/// with the box as value, so identical boxes for different ids stay
/// distinct. Queries scan every entry, which makes them O(n); engines
/// with a native spatial structure should provide their own index.
#[derive(Clone)]
pub struct MapBackedRTree {
    inner: Arc<MapBackedRTreeInner>,
}

impl MapBackedRTree {
    pub fn new(backing_map: NitriteMap) -> Self {
        MapBackedRTree {
            inner: Arc::new(MapBackedRTreeInner {
                backing_map,
                closed: AtomicBool::new(false),
                dropped: AtomicBool::new(false),
            }),
        }
    }

    pub fn backing_map(&self) -> &NitriteMap {
        &self.inner.backing_map
    }
}

impl NitriteRTreeProvider for MapBackedRTree {
    fn add(&self, key: &BoundingBox, nitrite_id: Option<&NitriteId>) -> NitriteResult<()> {
        self.inner.check_opened()?;
        if let Some(id) = nitrite_id {
            self.inner
                .backing_map
                .put(spatial_key(key, id), box_value(key))?;
        }
        Ok(())
    }

    fn remove(&self, key: &BoundingBox, nitrite_id: Option<&NitriteId>) -> NitriteResult<()> {
        self.inner.check_opened()?;
        if let Some(id) = nitrite_id {
            self.inner.backing_map.remove(&spatial_key(key, id))?;
        }
        Ok(())
    }

    fn find_intersecting_keys(&self, key: &BoundingBox) -> NitriteResult<Vec<NitriteId>> {
        self.inner.check_opened()?;
        self.inner.scan(|stored| stored.intersects(key))
    }

    fn find_contained_keys(&self, key: &BoundingBox) -> NitriteResult<Vec<NitriteId>> {
        self.inner.check_opened()?;
        self.inner.scan(|stored| key.strictly_contains(stored))
    }

    fn size(&self) -> NitriteResult<u64> {
        self.inner.check_opened()?;
        self.inner.backing_map.size()
    }

    fn clear(&self) -> NitriteResult<()> {
        self.inner.check_opened()?;
        self.inner.backing_map.clear()
    }

    fn close(&self) -> NitriteResult<()> {
        self.inner.check_opened()?;
        self.inner.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn drop_tree(&self) -> NitriteResult<()> {
        self.inner.check_opened()?;
        self.inner.dropped.store(true, Ordering::Release);
        self.inner.backing_map.dispose()
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    fn is_dropped(&self) -> bool {
        self.inner.dropped.load(Ordering::Acquire)
    }
}

struct MapBackedRTreeInner {
    backing_map: NitriteMap,
    closed: AtomicBool,
    dropped: AtomicBool,
}

impl MapBackedRTreeInner {
    fn check_opened(&self) -> NitriteResult<()> {
        check_rtree_opened(
            self.closed.load(Ordering::Acquire),
            self.dropped.load(Ordering::Acquire),
        )
    }

    fn scan(&self, matches: impl Fn(&BoundingBox) -> bool) -> NitriteResult<Vec<NitriteId>> {
        let mut result = BTreeSet::new();
        for key in self.backing_map.keys()? {
            let (id, stored) = decode_spatial_key(&key?)?;
            if matches(&stored) {
                result.insert(id);
            }
        }
        Ok(result.into_iter().collect())
    }
}

fn spatial_key(bbox: &BoundingBox, id: &NitriteId) -> Key {
    Value::Array(vec![
        Value::from(*id),
        Value::F64(bbox.min_x()),
        Value::F64(bbox.max_x()),
        Value::F64(bbox.min_y()),
        Value::F64(bbox.max_y()),
    ])
}

fn box_value(bbox: &BoundingBox) -> Value {
    Value::Array(vec![
        Value::F64(bbox.min_x()),
        Value::F64(bbox.max_x()),
        Value::F64(bbox.min_y()),
        Value::F64(bbox.max_y()),
    ])
}

fn decode_spatial_key(key: &Key) -> NitriteResult<(NitriteId, BoundingBox)> {
    if let Some([id, min_x, max_x, min_y, max_y]) = key.as_array().map(|a| a.as_slice()) {
        if let (Some(min_x), Some(max_x), Some(min_y), Some(max_y)) =
            (min_x.as_f64(), max_x.as_f64(), min_y.as_f64(), max_y.as_f64())
        {
            let id = id.as_nitrite_id()?;
            let bbox = if min_x > max_x {
                BoundingBox::EMPTY
            } else {
                BoundingBox::new(min_x, max_x, min_y, max_y)
            };
            return Ok((id, bbox));
        }
    }

    log::error!("Malformed spatial key {}", key);
    Err(NitriteError::new(
        &format!("Malformed spatial key {}", key),
        ErrorKind::FileCorrupted,
    ))
}
