//! Reader and writer for format 1 store files.
//!
//! Format 1 shares the block layout of the current format but stores
//! its chunk payload as an uncompressed list of maps whose records use
//! the older document-oriented value encoding. Spatial indexes did not
//! exist yet. Opening such a file routes through the upgrade path,
//! which reads it here and rewrites it in the current format.

use crate::chunk::{encode_chunk, read_chunk, Snapshot, StoreHeader, BLOCK_SIZE, HEADER_BLOCKS};
use crate::error::{MVStoreError, MVStoreResult};
use crate::file_store::{DiskFileStore, FileStore};
use crate::page_file::read_store_header;
use nitrite::common::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

pub const LEGACY_FORMAT: u32 = 1;

/// Record encoding of format 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LegacyValue {
    Null,
    Boolean(bool),
    Long(i64),
    Double(f64),
    Text(String),
    Binary(Vec<u8>),
    List(Vec<LegacyValue>),
    Document(Vec<(String, LegacyValue)>),
}

impl From<LegacyValue> for Value {
    fn from(value: LegacyValue) -> Self {
        match value {
            LegacyValue::Null => Value::Null,
            LegacyValue::Boolean(b) => Value::Bool(b),
            LegacyValue::Long(l) => Value::I64(l),
            LegacyValue::Double(d) => Value::F64(d),
            LegacyValue::Text(s) => Value::String(s),
            LegacyValue::Binary(b) => Value::Bytes(b),
            LegacyValue::List(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            LegacyValue::Document(fields) => Value::Map(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect::<BTreeMap<_, _>>(),
            ),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LegacySnapshot {
    maps: Vec<(String, Vec<(LegacyValue, LegacyValue)>)>,
}

/// Reads every map of the format 1 store at `path`.
pub fn read_legacy_store(path: &Path) -> MVStoreResult<BTreeMap<String, Vec<(LegacyValue, LegacyValue)>>> {
    let file = FileStore::new(DiskFileStore::open(path, true)?);
    let header = read_store_header(&file)?;
    if header.format != LEGACY_FORMAT {
        log::error!("{} is not a format {} store", path.display(), LEGACY_FORMAT);
        return Err(MVStoreError::Corrupted(format!(
            "unexpected store format {}",
            header.format
        )));
    }
    if header.version == 0 {
        return Ok(BTreeMap::new());
    }

    let (_, payload) = read_chunk(&file, header.block)?;
    let (legacy, _): (LegacySnapshot, usize) =
        bincode::serde::decode_from_slice(&payload, bincode::config::standard())
            .map_err(|e| MVStoreError::Corrupted(format!("unreadable legacy chunk: {}", e)))?;
    Ok(legacy.maps.into_iter().collect())
}

/// Converts format 1 maps into a current snapshot. Null records are
/// dropped since maps no longer accept them.
pub(crate) fn upgrade_snapshot(maps: BTreeMap<String, Vec<(LegacyValue, LegacyValue)>>) -> Snapshot {
    let mut snapshot = Snapshot::default();
    for (name, entries) in maps {
        let mut records: Vec<(Value, Value)> = entries
            .into_iter()
            .filter(|(_, v)| *v != LegacyValue::Null)
            .map(|(k, v)| (Value::from(k), Value::from(v)))
            .collect();
        records.sort_by(|a, b| a.0.cmp(&b.0));
        records.dedup_by(|a, b| a.0 == b.0);
        snapshot.maps.insert(name, records);
    }
    snapshot
}

/// Writes a format 1 store holding `maps` in a single chunk.
pub fn write_legacy_store(
    path: &Path,
    maps: &BTreeMap<String, Vec<(LegacyValue, LegacyValue)>>,
) -> MVStoreResult<()> {
    let file = FileStore::new(DiskFileStore::open(path, false)?);
    file.truncate(0)?;

    let legacy = LegacySnapshot {
        maps: maps.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
    };
    let payload = bincode::serde::encode_to_vec(&legacy, bincode::config::standard())
        .map_err(|e| MVStoreError::Encoding(e.to_string()))?;
    let (chunk, bytes) = encode_chunk(1, HEADER_BLOCKS, 1, &payload);
    file.write_all_at(&bytes, HEADER_BLOCKS * BLOCK_SIZE)?;

    let mut header = StoreHeader::new(0, None);
    header.format = LEGACY_FORMAT;
    header.block = chunk.block;
    header.chunk = chunk.id;
    header.version = chunk.version;
    let block = header.to_block();
    file.write_all_at(&block, 0)?;
    file.write_all_at(&block, BLOCK_SIZE)?;
    file.sync()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_legacy_value_conversion() {
        let doc = LegacyValue::Document(vec![
            ("name".to_string(), LegacyValue::Text("x".to_string())),
            ("tags".to_string(), LegacyValue::List(vec![LegacyValue::Long(1)])),
        ]);
        let value = Value::from(doc);
        let map = value.as_map().unwrap();
        assert_eq!(map.get("name"), Some(&Value::from("x")));
        assert_eq!(map.get("tags"), Some(&Value::Array(vec![Value::from(1)])));
        assert_eq!(Value::from(LegacyValue::Double(1.5)), Value::from(1.5));
        assert_eq!(Value::from(LegacyValue::Binary(vec![1])), Value::from(vec![1u8]));
    }

    #[test]
    fn test_write_then_read_legacy_store() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("legacy.db");
        let mut maps = BTreeMap::new();
        maps.insert(
            "people".to_string(),
            vec![(LegacyValue::Long(1), LegacyValue::Text("ann".to_string()))],
        );
        write_legacy_store(&path, &maps).unwrap();
        assert_eq!(read_legacy_store(&path).unwrap(), maps);
    }

    #[test]
    fn test_upgrade_snapshot_orders_and_drops_nulls() {
        let mut maps = BTreeMap::new();
        maps.insert(
            "m".to_string(),
            vec![
                (LegacyValue::Long(2), LegacyValue::Boolean(true)),
                (LegacyValue::Long(1), LegacyValue::Text("a".to_string())),
                (LegacyValue::Long(3), LegacyValue::Null),
            ],
        );
        let snapshot = upgrade_snapshot(maps);
        assert_eq!(
            snapshot.maps["m"],
            vec![
                (Value::from(1), Value::from("a")),
                (Value::from(2), Value::from(true)),
            ]
        );
        assert!(snapshot.rtrees.is_empty());
    }
}
