use std::sync::Arc;

use nitrite::common::{NitriteId, Value};
use nitrite::errors::{ErrorKind, NitriteError, NitriteResult};
use nitrite::store::rtree::{BoundingBox, NitriteRTree};
use nitrite::store::NitriteStore;

use crate::filter::SpatialFilter;
use crate::geometry::Geometry;

/// The index type name for spatial indexes.
pub const SPATIAL_INDEX: &str = "Spatial";

/// Spatial index over one document field, kept in a [NitriteRTree].
///
/// Documents whose field holds no geometry are indexed under
/// [BoundingBox::EMPTY] so they never match a query.
#[derive(Clone)]
pub struct SpatialIndex {
    inner: Arc<SpatialIndexInner>,
}

struct SpatialIndexInner {
    field: String,
    rtree: NitriteRTree,
}

impl SpatialIndex {
    pub fn new(field: impl Into<String>, rtree: NitriteRTree) -> Self {
        SpatialIndex {
            inner: Arc::new(SpatialIndexInner {
                field: field.into(),
                rtree,
            }),
        }
    }

    /// Opens the index of `field` in `collection`, creating its tree on
    /// first use.
    pub fn open(store: &NitriteStore, collection: &str, field: &str) -> NitriteResult<Self> {
        let name = derive_index_map_name(collection, field);
        let rtree = store.open_rtree(&name)?;
        log::debug!("Opened spatial index {}", name);
        Ok(SpatialIndex::new(field, rtree))
    }

    pub fn field_name(&self) -> &str {
        &self.inner.field
    }

    pub fn rtree(&self) -> &NitriteRTree {
        &self.inner.rtree
    }

    /// Indexes the geometry held in `value` for document `nitrite_id`.
    pub fn write(&self, nitrite_id: &NitriteId, value: &Value) -> NitriteResult<()> {
        let bbox = bounding_box_of(value)?;
        self.inner.rtree.add(&bbox, Some(nitrite_id))
    }

    /// Removes the entry `write` made for the same id and value.
    pub fn remove(&self, nitrite_id: &NitriteId, value: &Value) -> NitriteResult<()> {
        let bbox = bounding_box_of(value)?;
        self.inner.rtree.remove(&bbox, Some(nitrite_id))
    }

    /// Ids of documents matching `filter`. `lookup` resolves an id to the
    /// current value of the indexed field.
    pub fn find<F>(&self, filter: &SpatialFilter, lookup: F) -> NitriteResult<Vec<NitriteId>>
    where
        F: FnMut(&NitriteId) -> NitriteResult<Option<Value>>,
    {
        if filter.field_name() != self.inner.field {
            log::error!(
                "Filter on {} cannot use the spatial index of {}",
                filter.field_name(),
                self.inner.field
            );
            return Err(NitriteError::new(
                &format!(
                    "Filter on {} cannot use the spatial index of {}",
                    filter.field_name(),
                    self.inner.field
                ),
                ErrorKind::InvalidOperation,
            ));
        }
        filter.find(&self.inner.rtree, lookup)
    }

    pub fn size(&self) -> NitriteResult<u64> {
        self.inner.rtree.size()
    }

    pub fn close(&self) -> NitriteResult<()> {
        self.inner.rtree.close()
    }

    /// Removes every entry and the backing tree.
    pub fn drop_index(&self) -> NitriteResult<()> {
        self.inner.rtree.drop_tree()
    }
}

fn bounding_box_of(value: &Value) -> NitriteResult<BoundingBox> {
    Ok(match Geometry::from_value(value)? {
        Some(geometry) => geometry.bounding_box(),
        None => BoundingBox::EMPTY,
    })
}

pub(crate) fn derive_index_map_name(collection: &str, field: &str) -> String {
    format!("{}|{}|{}", collection, field, SPATIAL_INDEX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fluent::spatial_field;
    use crate::geometry::GeoPoint;
    use nitrite::store::StoreModule;
    use nitrite_mvstore_adapter::MVStoreModule;
    use std::collections::HashMap;

    fn memory_store() -> NitriteStore {
        let store = MVStoreModule::with_config().build().unwrap().get_store().unwrap();
        store.open_or_create().unwrap();
        store
    }

    struct Places {
        index: SpatialIndex,
        values: HashMap<NitriteId, Value>,
    }

    impl Places {
        fn new(store: &NitriteStore) -> Self {
            Places {
                index: SpatialIndex::open(store, "places", "location").unwrap(),
                values: HashMap::new(),
            }
        }

        fn insert(&mut self, id: u64, value: Value) {
            let id = NitriteId::create_id(id);
            self.index.write(&id, &value).unwrap();
            self.values.insert(id, value);
        }

        fn find(&self, filter: &SpatialFilter) -> Vec<u64> {
            self.index
                .find(filter, |id| Ok(self.values.get(id).cloned()))
                .unwrap()
                .into_iter()
                .map(|id| id.id_value())
                .collect()
        }
    }

    #[test]
    fn test_two_phase_intersects() {
        let store = memory_store();
        let mut places = Places::new(&store);
        places.insert(1, Value::from("POINT (1 1)"));
        places.insert(2, Value::from("POINT (9 9)"));
        places.insert(3, Value::from("POINT (20 20)"));
        places.insert(4, Value::Null);

        let triangle = Geometry::polygon(vec![(0.0, 0.0), (10.0, 0.0), (0.0, 10.0)]).unwrap();
        // point 2 is inside the triangle's box only
        assert_eq!(places.find(&spatial_field("location").intersects(triangle)), vec![1]);
        assert_eq!(places.index.size().unwrap(), 4);
    }

    #[test]
    fn test_within_uses_strict_box_containment() {
        let store = memory_store();
        let mut places = Places::new(&store);
        places.insert(1, Value::from("POLYGON ((0 0, 10 0, 10 10, 0 10, 0 0))"));
        places.insert(2, Value::from("POINT (5 5)"));

        let same = spatial_field("location").within(Geometry::envelope(0.0, 10.0, 0.0, 10.0));
        assert_eq!(places.find(&same), vec![2]);

        let larger = spatial_field("location").within(Geometry::envelope(-1.0, 11.0, -1.0, 11.0));
        assert_eq!(places.find(&larger), vec![1, 2]);
    }

    #[test]
    fn test_geodesic_near_at_equator() {
        let store = memory_store();
        let mut places = Places::new(&store);
        places.insert(1, Value::from("POINT (0 0)"));
        places.insert(2, Value::from("POINT (0.01 0)"));
        places.insert(3, Value::from("POINT (1 0)"));
        places.insert(4, Value::from("POINT (2 0)"));

        let near = |meters| spatial_field("location").near(0.0, 0.0, meters).unwrap();
        assert_eq!(places.find(&near(2000.0)), vec![1, 2]);
        assert_eq!(places.find(&near(0.2)), vec![1]);
        assert_eq!(places.find(&near(150_000.0)), vec![1, 2, 3]);
    }

    #[test]
    fn test_geo_near_north_south() {
        let store = memory_store();
        let mut places = Places::new(&store);
        places.insert(1, GeoPoint::new(0.0, 0.0).unwrap().to_value());
        places.insert(2, GeoPoint::new(0.009, 0.0).unwrap().to_value());
        places.insert(3, GeoPoint::new(-0.9, 0.0).unwrap().to_value());

        let center = GeoPoint::new(0.0, 0.0).unwrap();
        let filter = spatial_field("location").geo_near(center, 2000.0).unwrap();
        assert_eq!(places.find(&filter), vec![1, 2]);

        let filter = spatial_field("location").geo_near(center, 110_000.0).unwrap();
        assert_eq!(places.find(&filter), vec![1, 2, 3]);
    }

    #[test]
    fn test_remove_and_field_mismatch() {
        let store = memory_store();
        let mut places = Places::new(&store);
        places.insert(1, Value::from("POINT (1 1)"));
        let id = NitriteId::create_id(1);
        places.index.remove(&id, &Value::from("POINT (1 1)")).unwrap();
        assert_eq!(places.index.size().unwrap(), 0);

        let other = spatial_field("elsewhere").intersects(Geometry::point(1.0, 1.0));
        let err = places.index.find(&other, |_| Ok(None)).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvalidOperation);
    }

    #[test]
    fn test_rejects_non_geometry_values() {
        let store = memory_store();
        let index = SpatialIndex::open(&store, "places", "location").unwrap();
        let err = index.write(&NitriteId::create_id(1), &Value::from(12)).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::ValidationError);
    }

    #[test]
    fn test_drop_and_reopen() {
        let store = memory_store();
        let mut places = Places::new(&store);
        places.insert(1, Value::from("POINT (1 1)"));
        places.index.drop_index().unwrap();
        assert!(places.index.size().is_err());

        let reopened = SpatialIndex::open(&store, "places", "location").unwrap();
        assert_eq!(reopened.size().unwrap(), 0);
    }
}
