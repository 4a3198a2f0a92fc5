use crate::key_codec::{decode_key, encode_key};
use crate::store::FjallStore;
use crate::wrapper::{to_nitrite_error, FjallValue};
use fjall::{PartitionHandle, Slice, Snapshot};
use nitrite::common::{AttributeAware, Attributes, Key, Value};
use nitrite::errors::{ErrorKind, NitriteError, NitriteResult};
use nitrite::store::{
    read_map_attributes, touch_last_modified, validate_value, write_map_attributes,
    EntryIterator, EntryIteratorProvider, KeyIterator, KeyIteratorProvider, NitriteMapProvider,
    NitriteStore, ValueIterator, ValueIteratorProvider,
};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::iter::Rev;
use std::ops::Bound::{self, Excluded, Included, Unbounded};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Removals committed per write batch while clearing a map.
const CLEAR_BATCH_SIZE: usize = 4096;

/// Record count of a partition.
///
/// Fjall has no O(1) length, so the count is computed by a full scan on
/// first use and maintained by every write after that.
#[derive(Debug, Clone, Copy, PartialEq)]
enum SizeState {
    Uncomputed,
    Computed(u64),
}

/// Ordered map over one fjall partition.
///
/// Keys are stored in the byte-sortable form of [crate::key_codec], so
/// partition order is [Value] order. Writes to one map are serialized by
/// the map's write lock; iterators read a partition snapshot taken when
/// they were created.
#[derive(Clone)]
pub(crate) struct FjallMap {
    inner: Arc<FjallMapInner>,
}

struct FjallMapInner {
    name: String,
    partition: RwLock<Option<PartitionHandle>>,
    store: FjallStore,
    write_lock: Mutex<()>,
    size: Mutex<SizeState>,
    closed: AtomicBool,
    dropped: AtomicBool,
}

impl FjallMap {
    pub(crate) fn new(name: &str, partition: PartitionHandle, store: FjallStore) -> FjallMap {
        FjallMap {
            inner: Arc::new(FjallMapInner {
                name: name.to_string(),
                partition: RwLock::new(Some(partition)),
                store,
                write_lock: Mutex::new(()),
                size: Mutex::new(SizeState::Uncomputed),
                closed: AtomicBool::new(false),
                dropped: AtomicBool::new(false),
            }),
        }
    }

    /// Marks the handle closed and releases its partition handle.
    pub(crate) fn mark_closed(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.partition.write().take();
    }

    /// Marks the map dropped and hands back its partition for deletion.
    pub(crate) fn mark_dropped(&self) -> Option<PartitionHandle> {
        self.inner.dropped.store(true, Ordering::Release);
        self.inner.partition.write().take()
    }

    fn check_opened(&self) -> NitriteResult<()> {
        if self.inner.dropped.load(Ordering::Acquire) {
            log::error!("Map {} is dropped", self.inner.name);
            return Err(NitriteError::new(
                &format!("Map {} is dropped", self.inner.name),
                ErrorKind::InvalidOperation,
            ));
        }
        if self.inner.closed.load(Ordering::Acquire) {
            log::error!("Map {} is closed", self.inner.name);
            return Err(NitriteError::new(
                &format!("Map {} is closed", self.inner.name),
                ErrorKind::InvalidOperation,
            ));
        }
        self.inner.store.check_opened()
    }

    fn partition(&self) -> NitriteResult<PartitionHandle> {
        self.check_opened()?;
        match self.inner.partition.read().as_ref() {
            Some(partition) => Ok(partition.clone()),
            None => {
                log::error!("Map {} has no open partition", self.inner.name);
                Err(NitriteError::new(
                    &format!("Map {} is closed", self.inner.name),
                    ErrorKind::InvalidOperation,
                ))
            }
        }
    }

    fn snapshot(&self) -> NitriteResult<Snapshot> {
        Ok(self.partition()?.snapshot())
    }

    fn nitrite_store(&self) -> NitriteStore {
        NitriteStore::new(self.inner.store.clone())
    }

    fn read_value(&self, partition: &PartitionHandle, key: &[u8]) -> NitriteResult<Option<Value>> {
        match partition.get(key).map_err(to_nitrite_error)? {
            Some(bytes) => Ok(Some(FjallValue::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Applies `delta` to a computed size; an uncomputed size stays so.
    fn adjust_size(&self, delta: i64) {
        let mut size = self.inner.size.lock();
        if let SizeState::Computed(count) = *size {
            *size = SizeState::Computed(count.saturating_add_signed(delta));
        }
    }

    fn modified(&self) -> NitriteResult<()> {
        self.inner.store.mark_dirty();
        touch_last_modified(&self.nitrite_store(), &self.inner.name)
    }

    fn first_in(&self, range: (Bound<Vec<u8>>, Bound<Vec<u8>>)) -> NitriteResult<Option<Key>> {
        let partition = self.partition()?;
        match partition.range(range).next() {
            Some(entry) => {
                let (key, _) = entry.map_err(to_nitrite_error)?;
                Ok(Some(decode_key(&key)?))
            }
            None => Ok(None),
        }
    }

    fn last_in(&self, range: (Bound<Vec<u8>>, Bound<Vec<u8>>)) -> NitriteResult<Option<Key>> {
        let partition = self.partition()?;
        match partition.range(range).next_back() {
            Some(entry) => {
                let (key, _) = entry.map_err(to_nitrite_error)?;
                Ok(Some(decode_key(&key)?))
            }
            None => Ok(None),
        }
    }
}

impl AttributeAware for FjallMap {
    fn attributes(&self) -> NitriteResult<Option<Attributes>> {
        self.check_opened()?;
        read_map_attributes(&self.nitrite_store(), &self.inner.name)
    }

    fn set_attributes(&self, attributes: Attributes) -> NitriteResult<()> {
        self.check_opened()?;
        write_map_attributes(&self.nitrite_store(), &self.inner.name, &attributes)
    }
}

impl NitriteMapProvider for FjallMap {
    fn contains_key(&self, key: &Key) -> NitriteResult<bool> {
        let partition = self.partition()?;
        partition
            .contains_key(encode_key(key))
            .map_err(to_nitrite_error)
    }

    fn get(&self, key: &Key) -> NitriteResult<Option<Value>> {
        let partition = self.partition()?;
        self.read_value(&partition, &encode_key(key))
    }

    fn clear(&self) -> NitriteResult<()> {
        let partition = self.partition()?;
        let keyspace = self.inner.store.keyspace()?;
        {
            let _structure = self.inner.store.partition_lock();
            let _guard = self.inner.write_lock.lock();
            // a failed batch leaves part of the map; rescan on the next size()
            *self.inner.size.lock() = SizeState::Uncomputed;
            let mut batch = keyspace.batch();
            let mut pending = 0;
            for entry in partition.snapshot().iter() {
                let (key, _) = entry.map_err(to_nitrite_error)?;
                batch.remove(&partition, key);
                pending += 1;
                if pending == CLEAR_BATCH_SIZE {
                    batch.commit().map_err(to_nitrite_error)?;
                    batch = keyspace.batch();
                    pending = 0;
                }
            }
            if pending > 0 {
                batch.commit().map_err(to_nitrite_error)?;
            }
            *self.inner.size.lock() = SizeState::Computed(0);
        }
        self.modified()
    }

    fn is_closed(&self) -> NitriteResult<bool> {
        Ok(self.inner.closed.load(Ordering::Acquire) || self.inner.store.is_store_closed())
    }

    fn close(&self) -> NitriteResult<()> {
        self.inner.store.detach_map(&self.inner.name);
        self.mark_closed();
        Ok(())
    }

    fn values(&self) -> NitriteResult<ValueIterator> {
        Ok(ValueIterator::new(SnapshotCursor::new(self.snapshot()?)))
    }

    fn keys(&self) -> NitriteResult<KeyIterator> {
        Ok(KeyIterator::new(SnapshotCursor::new(self.snapshot()?)))
    }

    fn remove(&self, key: &Key) -> NitriteResult<Option<Value>> {
        let partition = self.partition()?;
        let encoded = encode_key(key);
        let removed = {
            let _guard = self.inner.write_lock.lock();
            let previous = self.read_value(&partition, &encoded)?;
            if previous.is_some() {
                partition.remove(encoded).map_err(to_nitrite_error)?;
                self.adjust_size(-1);
            }
            previous
        };
        if removed.is_some() {
            self.modified()?;
        }
        Ok(removed)
    }

    fn put(&self, key: Key, value: Value) -> NitriteResult<()> {
        validate_value(&value)?;
        let partition = self.partition()?;
        let encoded = encode_key(&key);
        let record = FjallValue::try_from_value(&value)?.into_bytes();
        {
            let _guard = self.inner.write_lock.lock();
            let existed = partition
                .contains_key(&encoded)
                .map_err(to_nitrite_error)?;
            partition.insert(encoded, record).map_err(to_nitrite_error)?;
            if !existed {
                self.adjust_size(1);
            }
        }
        self.modified()
    }

    fn put_all(&self, entries: Vec<(Key, Value)>) -> NitriteResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        for (_, value) in entries.iter() {
            validate_value(value)?;
        }
        let partition = self.partition()?;
        let keyspace = self.inner.store.keyspace()?;
        {
            let _guard = self.inner.write_lock.lock();
            let mut batch = keyspace.batch();
            let mut fresh = HashSet::new();
            for (key, value) in entries.iter() {
                let encoded = encode_key(key);
                let existed = partition
                    .contains_key(&encoded)
                    .map_err(to_nitrite_error)?;
                if !existed {
                    fresh.insert(encoded.clone());
                }
                batch.insert(&partition, encoded, FjallValue::try_from_value(value)?.into_bytes());
            }
            batch.commit().map_err(to_nitrite_error)?;
            self.adjust_size(fresh.len() as i64);
        }
        self.modified()
    }

    fn size(&self) -> NitriteResult<u64> {
        let partition = self.partition()?;
        if let SizeState::Computed(count) = *self.inner.size.lock() {
            return Ok(count);
        }

        // writers take the write lock before the size lock; the seeding
        // scan must not overlap an insert that then adjusts the count
        let _guard = self.inner.write_lock.lock();
        let mut size = self.inner.size.lock();
        match *size {
            SizeState::Computed(count) => Ok(count),
            SizeState::Uncomputed => {
                let count = partition.len().map_err(to_nitrite_error)? as u64;
                *size = SizeState::Computed(count);
                Ok(count)
            }
        }
    }

    fn put_if_absent(&self, key: Key, value: Value) -> NitriteResult<Option<Value>> {
        validate_value(&value)?;
        let partition = self.partition()?;
        let encoded = encode_key(&key);
        let record = FjallValue::try_from_value(&value)?.into_bytes();
        {
            let _guard = self.inner.write_lock.lock();
            if let Some(existing) = self.read_value(&partition, &encoded)? {
                return Ok(Some(existing));
            }
            partition.insert(encoded, record).map_err(to_nitrite_error)?;
            self.adjust_size(1);
        }
        self.modified()?;
        Ok(None)
    }

    fn first_key(&self) -> NitriteResult<Option<Key>> {
        self.first_in((Unbounded, Unbounded))
    }

    fn last_key(&self) -> NitriteResult<Option<Key>> {
        self.last_in((Unbounded, Unbounded))
    }

    fn higher_key(&self, key: &Key) -> NitriteResult<Option<Key>> {
        self.first_in((Excluded(encode_key(key)), Unbounded))
    }

    fn ceiling_key(&self, key: &Key) -> NitriteResult<Option<Key>> {
        self.first_in((Included(encode_key(key)), Unbounded))
    }

    fn lower_key(&self, key: &Key) -> NitriteResult<Option<Key>> {
        self.last_in((Unbounded, Excluded(encode_key(key))))
    }

    fn floor_key(&self, key: &Key) -> NitriteResult<Option<Key>> {
        self.last_in((Unbounded, Included(encode_key(key))))
    }

    fn is_empty(&self) -> NitriteResult<bool> {
        let partition = self.partition()?;
        partition.is_empty().map_err(to_nitrite_error)
    }

    fn get_store(&self) -> NitriteResult<NitriteStore> {
        Ok(self.nitrite_store())
    }

    fn get_name(&self) -> NitriteResult<String> {
        Ok(self.inner.name.clone())
    }

    fn entries(&self) -> NitriteResult<EntryIterator> {
        Ok(EntryIterator::new(SnapshotCursor::new(self.snapshot()?)))
    }

    fn reverse_entries(&self) -> NitriteResult<Rev<EntryIterator>> {
        Ok(EntryIterator::new(SnapshotCursor::new(self.snapshot()?)).rev())
    }

    fn dispose(&self) -> NitriteResult<()> {
        self.check_opened()?;
        self.inner.store.remove_map_handle(&self.inner.name, self)
    }

    fn is_dropped(&self) -> NitriteResult<bool> {
        Ok(self.inner.dropped.load(Ordering::Acquire))
    }
}

/// Walks a partition snapshot from both ends.
///
/// Each step seeks from the last key returned on that side, so the two
/// ends meet without overlapping.
struct SnapshotCursor {
    snapshot: Snapshot,
    front: Bound<Vec<u8>>,
    back: Bound<Vec<u8>>,
    done: bool,
}

impl SnapshotCursor {
    fn new(snapshot: Snapshot) -> Self {
        SnapshotCursor {
            snapshot,
            front: Unbounded,
            back: Unbounded,
            done: false,
        }
    }

    fn exhausted(&self) -> bool {
        if self.done {
            return true;
        }
        match (&self.front, &self.back) {
            (Excluded(front), Excluded(back)) => front >= back,
            _ => false,
        }
    }

    fn step(&mut self, forward: bool) -> Option<NitriteResult<(Key, Value)>> {
        if self.exhausted() {
            return None;
        }
        let bounds = (self.front.clone(), self.back.clone());
        let mut range = self.snapshot.range(bounds);
        let found = if forward { range.next() } else { range.next_back() };
        let (key, value) = match found? {
            Ok(entry) => entry,
            Err(e) => {
                self.done = true;
                return Some(Err(to_nitrite_error(e)));
            }
        };
        if forward {
            self.front = Excluded(key.to_vec());
        } else {
            self.back = Excluded(key.to_vec());
        }
        Some(decode_entry(&key, &value))
    }
}

fn decode_entry(key: &Slice, value: &Slice) -> NitriteResult<(Key, Value)> {
    Ok((decode_key(key)?, FjallValue::decode(value)?))
}

impl EntryIteratorProvider for SnapshotCursor {
    fn next_entry(&mut self) -> Option<NitriteResult<(Key, Value)>> {
        self.step(true)
    }

    fn prev_entry(&mut self) -> Option<NitriteResult<(Key, Value)>> {
        self.step(false)
    }
}

impl KeyIteratorProvider for SnapshotCursor {
    fn next_key(&mut self) -> Option<NitriteResult<Key>> {
        self.step(true).map(|r| r.map(|(k, _)| k))
    }

    fn prev_key(&mut self) -> Option<NitriteResult<Key>> {
        self.step(false).map(|r| r.map(|(k, _)| k))
    }
}

impl ValueIteratorProvider for SnapshotCursor {
    fn next_value(&mut self) -> Option<NitriteResult<Value>> {
        self.step(true).map(|r| r.map(|(_, v)| v))
    }

    fn prev_value(&mut self) -> Option<NitriteResult<Value>> {
        self.step(false).map(|r| r.map(|(_, v)| v))
    }
}
