use crate::common::{Key, Value};
use crate::errors::NitriteResult;
use crate::store::NitriteMap;
use std::sync::Arc;

/// Source of (key, value) pairs for an [EntryIterator].
///
/// Backends implement this when they can iterate more efficiently than
/// key-by-key navigation, e.g. over an immutable snapshot.
pub trait EntryIteratorProvider: Send {
    fn next_entry(&mut self) -> Option<NitriteResult<(Key, Value)>>;

    fn prev_entry(&mut self) -> Option<NitriteResult<(Key, Value)>>;
}

/// Source of keys for a [KeyIterator].
pub trait KeyIteratorProvider: Send {
    fn next_key(&mut self) -> Option<NitriteResult<Key>>;

    fn prev_key(&mut self) -> Option<NitriteResult<Key>>;
}

/// Source of values for a [ValueIterator].
pub trait ValueIteratorProvider: Send {
    fn next_value(&mut self) -> Option<NitriteResult<Value>>;

    fn prev_value(&mut self) -> Option<NitriteResult<Value>>;
}

/// Lazy, ordered iterator over the entries of a map.
///
/// Clones share the same position.
pub struct EntryIterator {
    provider: Arc<parking_lot::Mutex<Box<dyn EntryIteratorProvider>>>,
}

impl EntryIterator {
    pub fn new<T: EntryIteratorProvider + 'static>(provider: T) -> Self {
        EntryIterator {
            provider: Arc::new(parking_lot::Mutex::new(Box::new(provider))),
        }
    }
}

impl Clone for EntryIterator {
    fn clone(&self) -> Self {
        EntryIterator {
            provider: Arc::clone(&self.provider),
        }
    }
}

impl Iterator for EntryIterator {
    type Item = NitriteResult<(Key, Value)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.provider.lock().next_entry()
    }
}

impl DoubleEndedIterator for EntryIterator {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.provider.lock().prev_entry()
    }
}

/// Lazy, ordered iterator over the keys of a map.
pub struct KeyIterator {
    provider: Arc<parking_lot::Mutex<Box<dyn KeyIteratorProvider>>>,
}

impl KeyIterator {
    pub fn new<T: KeyIteratorProvider + 'static>(provider: T) -> Self {
        KeyIterator {
            provider: Arc::new(parking_lot::Mutex::new(Box::new(provider))),
        }
    }
}

impl Clone for KeyIterator {
    fn clone(&self) -> Self {
        KeyIterator {
            provider: Arc::clone(&self.provider),
        }
    }
}

impl Iterator for KeyIterator {
    type Item = NitriteResult<Key>;

    fn next(&mut self) -> Option<Self::Item> {
        self.provider.lock().next_key()
    }
}

impl DoubleEndedIterator for KeyIterator {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.provider.lock().prev_key()
    }
}

/// Lazy iterator over the values of a map, in key order.
pub struct ValueIterator {
    provider: Arc<parking_lot::Mutex<Box<dyn ValueIteratorProvider>>>,
}

impl ValueIterator {
    pub fn new<T: ValueIteratorProvider + 'static>(provider: T) -> Self {
        ValueIterator {
            provider: Arc::new(parking_lot::Mutex::new(Box::new(provider))),
        }
    }
}

impl Clone for ValueIterator {
    fn clone(&self) -> Self {
        ValueIterator {
            provider: Arc::clone(&self.provider),
        }
    }
}

impl Iterator for ValueIterator {
    type Item = NitriteResult<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        self.provider.lock().next_value()
    }
}

impl DoubleEndedIterator for ValueIterator {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.provider.lock().prev_value()
    }
}

/// Walks a map by key navigation, remembering the last visited key.
///
/// A fresh cursor starts before the first key when moving forward and
/// after the last key when moving backward. Entries removed between the
/// navigation call and the read are skipped.
struct MapCursor {
    map: NitriteMap,
    current: Option<Key>,
}

impl MapCursor {
    fn new(map: NitriteMap) -> Self {
        MapCursor { map, current: None }
    }

    fn step(&mut self, forward: bool) -> Option<NitriteResult<(Key, Value)>> {
        loop {
            let next_key = match (&self.current, forward) {
                (Some(key), true) => self.map.higher_key(key),
                (Some(key), false) => self.map.lower_key(key),
                (None, true) => self.map.first_key(),
                (None, false) => self.map.last_key(),
            };

            let key = match next_key {
                Ok(Some(key)) => key,
                Ok(None) => return None,
                Err(e) => return Some(Err(e)),
            };

            self.current = Some(key.clone());
            match self.map.get(&key) {
                Ok(Some(value)) => return Some(Ok((key, value))),
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Entry provider navigating a single [NitriteMap].
pub struct SingleMapEntryProvider {
    cursor: MapCursor,
}

impl SingleMapEntryProvider {
    pub fn new(map: NitriteMap) -> Self {
        SingleMapEntryProvider {
            cursor: MapCursor::new(map),
        }
    }
}

impl EntryIteratorProvider for SingleMapEntryProvider {
    fn next_entry(&mut self) -> Option<NitriteResult<(Key, Value)>> {
        self.cursor.step(true)
    }

    fn prev_entry(&mut self) -> Option<NitriteResult<(Key, Value)>> {
        self.cursor.step(false)
    }
}

/// Key provider navigating a single [NitriteMap].
pub struct SingleMapKeyProvider {
    cursor: MapCursor,
}

impl SingleMapKeyProvider {
    pub fn new(map: NitriteMap) -> Self {
        SingleMapKeyProvider {
            cursor: MapCursor::new(map),
        }
    }
}

impl KeyIteratorProvider for SingleMapKeyProvider {
    fn next_key(&mut self) -> Option<NitriteResult<Key>> {
        self.cursor.step(true).map(|r| r.map(|(k, _)| k))
    }

    fn prev_key(&mut self) -> Option<NitriteResult<Key>> {
        self.cursor.step(false).map(|r| r.map(|(k, _)| k))
    }
}

/// Value provider navigating a single [NitriteMap].
pub struct SingleMapValueProvider {
    cursor: MapCursor,
}

impl SingleMapValueProvider {
    pub fn new(map: NitriteMap) -> Self {
        SingleMapValueProvider {
            cursor: MapCursor::new(map),
        }
    }
}

impl ValueIteratorProvider for SingleMapValueProvider {
    fn next_value(&mut self) -> Option<NitriteResult<Value>> {
        self.cursor.step(true).map(|r| r.map(|(_, v)| v))
    }

    fn prev_value(&mut self) -> Option<NitriteResult<Value>> {
        self.cursor.step(false).map(|r| r.map(|(_, v)| v))
    }
}

/// Entry provider over an already materialized, key-ordered buffer.
pub struct BufferedEntryProvider {
    entries: std::collections::VecDeque<(Key, Value)>,
}

impl BufferedEntryProvider {
    pub fn new(entries: Vec<(Key, Value)>) -> Self {
        BufferedEntryProvider {
            entries: entries.into(),
        }
    }
}

impl EntryIteratorProvider for BufferedEntryProvider {
    fn next_entry(&mut self) -> Option<NitriteResult<(Key, Value)>> {
        self.entries.pop_front().map(Ok)
    }

    fn prev_entry(&mut self) -> Option<NitriteResult<(Key, Value)>> {
        self.entries.pop_back().map(Ok)
    }
}
