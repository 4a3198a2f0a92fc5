use crate::chunk::Snapshot;
use crate::compat::{read_legacy_store, upgrade_snapshot};
use crate::config::MVStoreConfig;
use crate::error::{to_nitrite_error, MVStoreError, MVStoreResult};
use crate::file_store::{remove_if_exists, sibling_path, DiskFileStore, FileStore};
use crate::page_file::PageFile;
use crate::recovery;
use nitrite::errors::{ErrorKind, NitriteError, NitriteResult};
use std::path::Path;

/// Opens the storage described by `config`.
///
/// Returns no page file for a plain in-memory store. A file that is
/// locked, or sits at an invalid path, fails at once. An outdated format
/// is upgraded and a corrupted file is repaired, each at most once,
/// before the open is retried.
pub(crate) fn open_or_create(config: &MVStoreConfig) -> NitriteResult<(Option<PageFile>, Snapshot)> {
    let file_path = config.file_path();
    if file_path.is_empty() {
        return open_in_memory(config);
    }

    let path = Path::new(file_path);
    validate_path(path, config.read_only())?;

    match open_file(path, config) {
        Ok(opened) => Ok(opened),
        Err(MVStoreError::FormatTooOld { found, .. }) => {
            log::warn!("{} uses store format {}, upgrading", path.display(), found);
            upgrade(path, config)?;
            open_file(path, config).map_err(to_nitrite_error)
        }
        Err(MVStoreError::Corrupted(reason)) => {
            if config.read_only() {
                log::error!("{} is corrupted and opened read-only: {}", path.display(), reason);
                return Err(NitriteError::new(
                    &format!("{} is corrupted and cannot be repaired read-only", path.display()),
                    ErrorKind::FileCorrupted,
                ));
            }
            log::warn!("{} is corrupted ({}), attempting recovery", path.display(), reason);
            recovery::repair(path, config).map_err(to_nitrite_error)?;
            open_file(path, config).map_err(to_nitrite_error)
        }
        Err(e) => Err(to_nitrite_error(e)),
    }
}

fn open_file(path: &Path, config: &MVStoreConfig) -> MVStoreResult<(Option<PageFile>, Snapshot)> {
    let file = FileStore::new(DiskFileStore::open(path, config.read_only())?);
    let (page_file, snapshot) = PageFile::open_or_create(file, config)?;
    Ok((Some(page_file), snapshot))
}

fn open_in_memory(config: &MVStoreConfig) -> NitriteResult<(Option<PageFile>, Snapshot)> {
    let Some(file_store) = config.file_store() else {
        return Ok((None, Snapshot::default()));
    };
    match PageFile::open_or_create(file_store, config) {
        Ok((page_file, snapshot)) => Ok((Some(page_file), snapshot)),
        Err(e) => {
            log::error!("Unable to create in-memory database: {}", e);
            Err(NitriteError::new_with_cause(
                "Unable to create in-memory database",
                ErrorKind::IOError,
                NitriteError::from(e),
            ))
        }
    }
}

fn validate_path(path: &Path, read_only: bool) -> NitriteResult<()> {
    if path.is_dir() {
        log::error!("{} is a directory, must be a file", path.display());
        return Err(NitriteError::new(
            &format!("{} is a directory, must be a file", path.display()),
            ErrorKind::ValidationError,
        ));
    }

    if path.exists() {
        return Ok(());
    }

    if read_only {
        log::error!("Cannot create read-only database {}", path.display());
        return Err(NitriteError::new(
            &format!("Cannot create read-only database {}", path.display()),
            ErrorKind::InvalidOperation,
        ));
    }

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            log::error!("Directory {} does not exist", parent.display());
            return Err(NitriteError::new(
                &format!("Directory {} does not exist", parent.display()),
                ErrorKind::ValidationError,
            ));
        }
    }
    Ok(())
}

/// Rewrites an old-format store in the current format.
///
/// The converted store is built at `<file>_new` and swapped in only once
/// complete; on failure it is deleted and the original stays as it was.
fn upgrade(path: &Path, config: &MVStoreConfig) -> NitriteResult<()> {
    let new_path = sibling_path(path, "_new");

    let converted = (|| -> MVStoreResult<()> {
        if config.read_only() {
            return Err(MVStoreError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "store opened read-only",
            )));
        }
        let maps = read_legacy_store(path)?;
        remove_if_exists(&new_path)?;
        let file = FileStore::new(DiskFileStore::open(&new_path, false)?);
        let mut page_file = PageFile::create(file, config)?;
        page_file.write_snapshot(&upgrade_snapshot(maps))?;
        Ok(())
    })();

    let result = converted.and_then(|_| switch_files(path, &new_path));
    if let Err(e) = result {
        let _ = remove_if_exists(&new_path);
        log::error!("Failed to upgrade {}: {}", path.display(), e);
        return Err(NitriteError::new_with_cause(
            &format!("Failed to upgrade store {}", path.display()),
            ErrorKind::MigrationError,
            NitriteError::from(e),
        ));
    }

    log::debug!("Upgraded {} to the current store format", path.display());
    Ok(())
}

/// `orig -> orig_old`, `new -> orig`, then deletes `orig_old`.
fn switch_files(original: &Path, new_file: &Path) -> MVStoreResult<()> {
    let old_path = sibling_path(original, "_old");
    remove_if_exists(&old_path)?;
    std::fs::rename(original, &old_path)?;
    if let Err(e) = std::fs::rename(new_file, original) {
        std::fs::rename(&old_path, original)?;
        return Err(e.into());
    }
    remove_if_exists(&old_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compat::{write_legacy_store, LegacyValue};
    use crate::file_store::OffHeapStore;
    use nitrite::common::Value;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn file_config(path: &Path) -> MVStoreConfig {
        let config = MVStoreConfig::new();
        config.set_file_path(&path.to_string_lossy());
        config
    }

    #[test]
    fn test_plain_in_memory_has_no_file() {
        let (page_file, snapshot) = open_or_create(&MVStoreConfig::new()).unwrap();
        assert!(page_file.is_none());
        assert_eq!(snapshot, Snapshot::default());
    }

    #[test]
    fn test_in_memory_with_file_store() {
        let config = MVStoreConfig::new();
        config.set_file_store(FileStore::new(OffHeapStore::new()));
        let (page_file, _) = open_or_create(&config).unwrap();
        assert!(page_file.is_some());
    }

    #[test]
    fn test_broken_file_store_is_fatal() {
        let config = MVStoreConfig::new();
        let file_store = FileStore::new(OffHeapStore::new());
        file_store.write_all_at(b"garbage", 0).unwrap();
        config.set_file_store(file_store);
        let err = open_or_create(&config).err().unwrap();
        assert_eq!(err.kind(), &ErrorKind::IOError);
        assert_eq!(err.message(), "Unable to create in-memory database");
    }

    #[test]
    fn test_directory_path_rejected() {
        let dir = tempdir().unwrap();
        let err = open_or_create(&file_config(dir.path())).err().unwrap();
        assert_eq!(err.kind(), &ErrorKind::ValidationError);
        assert!(err.message().contains("is a directory"));
    }

    #[test]
    fn test_missing_parent_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing").join("test.db");
        let err = open_or_create(&file_config(&path)).err().unwrap();
        assert_eq!(err.kind(), &ErrorKind::ValidationError);
        assert!(!path.exists());
    }

    #[test]
    fn test_read_only_missing_file_rejected() {
        let dir = tempdir().unwrap();
        let config = file_config(&dir.path().join("none.db"));
        config.set_read_only(true);
        let err = open_or_create(&config).err().unwrap();
        assert_eq!(err.kind(), &ErrorKind::InvalidOperation);
    }

    #[test]
    fn test_locked_file_fails_fast() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("locked.db");
        let config = file_config(&path);
        let first = open_or_create(&config).unwrap();

        let err = open_or_create(&config).err().unwrap();
        assert_eq!(err.kind(), &ErrorKind::StoreLocked);
        assert_eq!(err.message(), "database is already opened in other process");
        drop(first);
    }

    #[test]
    fn test_legacy_file_upgraded_in_place() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("legacy.db");
        let mut maps = BTreeMap::new();
        maps.insert(
            "people".to_string(),
            vec![
                (LegacyValue::Long(1), LegacyValue::Text("ann".to_string())),
                (LegacyValue::Long(2), LegacyValue::Text("bob".to_string())),
            ],
        );
        write_legacy_store(&path, &maps).unwrap();

        let (page_file, snapshot) = open_or_create(&file_config(&path)).unwrap();
        assert!(page_file.is_some());
        assert_eq!(
            snapshot.maps["people"],
            vec![
                (Value::from(1), Value::from("ann")),
                (Value::from(2), Value::from("bob")),
            ]
        );
        assert!(!sibling_path(&path, "_new").exists());
        assert!(!sibling_path(&path, "_old").exists());
    }

    #[test]
    fn test_failed_upgrade_keeps_original() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("legacy.db");
        write_legacy_store(&path, &BTreeMap::new()).unwrap();
        let before = std::fs::read(&path).unwrap();

        let config = file_config(&path);
        config.set_read_only(true);
        let err = open_or_create(&config).err().unwrap();
        assert_eq!(err.kind(), &ErrorKind::MigrationError);
        assert_eq!(std::fs::read(&path).unwrap(), before);
        assert!(!sibling_path(&path, "_new").exists());
    }

    #[test]
    fn test_corrupted_file_recovered() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("corrupt.db");
        let config = file_config(&path);
        {
            let (page_file, _) = open_or_create(&config).unwrap();
            let mut page_file = page_file.unwrap();
            let mut snapshot = Snapshot::default();
            snapshot
                .maps
                .insert("m".to_string(), vec![(Value::from(1), Value::from("one"))]);
            page_file.write_snapshot(&snapshot).unwrap();
        }
        // wipe both header copies
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[..8192].fill(0);
        std::fs::write(&path, bytes).unwrap();

        let (page_file, snapshot) = open_or_create(&config).unwrap();
        assert_eq!(page_file.unwrap().version(), 1);
        assert_eq!(snapshot.maps["m"], vec![(Value::from(1), Value::from("one"))]);
        assert!(sibling_path(&path, ".back").exists());
    }
}
