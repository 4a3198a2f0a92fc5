use crate::error::{MVStoreError, MVStoreResult};
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Random-access byte storage underneath a store.
///
/// Positions are absolute byte offsets; writes past the end grow the
/// storage, leaving any gap zero filled.
pub trait FileStoreProvider: Send + Sync {
    fn read_exact_at(&self, buf: &mut [u8], pos: u64) -> MVStoreResult<()>;

    fn write_all_at(&self, buf: &[u8], pos: u64) -> MVStoreResult<()>;

    fn size(&self) -> MVStoreResult<u64>;

    fn truncate(&self, size: u64) -> MVStoreResult<()>;

    fn sync(&self) -> MVStoreResult<()>;

    fn is_read_only(&self) -> bool;
}

#[derive(Clone)]
pub struct FileStore {
    inner: Arc<dyn FileStoreProvider>,
}

impl FileStore {
    pub fn new<T: FileStoreProvider + 'static>(inner: T) -> Self {
        FileStore {
            inner: Arc::new(inner),
        }
    }

    /// Reads `len` bytes at `pos`, or fewer if the storage ends first.
    pub(crate) fn read_at_most(&self, pos: u64, len: usize) -> MVStoreResult<Vec<u8>> {
        let size = self.size()?;
        if pos >= size {
            return Ok(Vec::new());
        }
        let available = ((size - pos) as usize).min(len);
        let mut buf = vec![0u8; available];
        self.read_exact_at(&mut buf, pos)?;
        Ok(buf)
    }
}

impl Deref for FileStore {
    type Target = Arc<dyn FileStoreProvider>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

/// A store file on disk, guarded by a lock on `<file>.lock`.
///
/// Writable opens take an exclusive lock, read-only opens a shared one,
/// so a second writer in any process fails with [MVStoreError::Locked].
pub struct DiskFileStore {
    file: Mutex<File>,
    lock_file: File,
    lock_path: PathBuf,
    read_only: bool,
}

impl DiskFileStore {
    pub fn open(path: &Path, read_only: bool) -> MVStoreResult<DiskFileStore> {
        let lock_path = lock_path_of(path);
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&lock_path)?;

        let locked = if read_only {
            FileExt::try_lock_shared(&lock_file)
        } else {
            FileExt::try_lock_exclusive(&lock_file)
        };
        if locked.is_err() {
            log::error!("Store file {} is locked", path.display());
            return Err(MVStoreError::Locked);
        }

        let file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .create(!read_only)
            .truncate(false)
            .open(path);

        let file = match file {
            Ok(file) => file,
            Err(e) => {
                let _ = FileExt::unlock(&lock_file);
                return Err(e.into());
            }
        };

        Ok(DiskFileStore {
            file: Mutex::new(file),
            lock_file,
            lock_path,
            read_only,
        })
    }
}

impl FileStoreProvider for DiskFileStore {
    fn read_exact_at(&self, buf: &mut [u8], pos: u64) -> MVStoreResult<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(pos))?;
        file.read_exact(buf)?;
        Ok(())
    }

    fn write_all_at(&self, buf: &[u8], pos: u64) -> MVStoreResult<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(pos))?;
        file.write_all(buf)?;
        Ok(())
    }

    fn size(&self) -> MVStoreResult<u64> {
        Ok(self.file.lock().metadata()?.len())
    }

    fn truncate(&self, size: u64) -> MVStoreResult<()> {
        self.file.lock().set_len(size)?;
        Ok(())
    }

    fn sync(&self) -> MVStoreResult<()> {
        self.file.lock().sync_all()?;
        Ok(())
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }
}

impl Drop for DiskFileStore {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.lock_file) {
            log::warn!("Failed to release lock {}: {}", self.lock_path.display(), e);
        }
        if !self.read_only {
            let _ = std::fs::remove_file(&self.lock_path);
        }
    }
}

/// Volatile byte storage for in-memory stores that still want chunked
/// commits, e.g. to roll back to the last commit.
#[derive(Default)]
pub struct OffHeapStore {
    data: RwLock<Vec<u8>>,
}

impl OffHeapStore {
    pub fn new() -> Self {
        OffHeapStore::default()
    }
}

impl FileStoreProvider for OffHeapStore {
    fn read_exact_at(&self, buf: &mut [u8], pos: u64) -> MVStoreResult<()> {
        let data = self.data.read();
        let start = pos as usize;
        let end = start + buf.len();
        if end > data.len() {
            return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
        }
        buf.copy_from_slice(&data[start..end]);
        Ok(())
    }

    fn write_all_at(&self, buf: &[u8], pos: u64) -> MVStoreResult<()> {
        let mut data = self.data.write();
        let start = pos as usize;
        let end = start + buf.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(buf);
        Ok(())
    }

    fn size(&self) -> MVStoreResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn truncate(&self, size: u64) -> MVStoreResult<()> {
        self.data.write().truncate(size as usize);
        Ok(())
    }

    fn sync(&self) -> MVStoreResult<()> {
        Ok(())
    }

    fn is_read_only(&self) -> bool {
        false
    }
}

pub(crate) fn lock_path_of(path: &Path) -> PathBuf {
    sibling_path(path, ".lock")
}

/// `path` with `suffix` appended to its file name.
pub(crate) fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

pub(crate) fn remove_if_exists(path: &Path) -> MVStoreResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_disk_file_read_write() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.db");
        let store = FileStore::new(DiskFileStore::open(&path, false).unwrap());

        store.write_all_at(b"hello", 10).unwrap();
        assert_eq!(store.size().unwrap(), 15);
        let mut buf = [0u8; 5];
        store.read_exact_at(&mut buf, 10).unwrap();
        assert_eq!(&buf, b"hello");
        assert_eq!(store.read_at_most(12, 100).unwrap(), b"llo".to_vec());
        assert!(store.read_at_most(20, 4).unwrap().is_empty());
    }

    #[test]
    fn test_second_writer_is_locked_out() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.db");
        let first = DiskFileStore::open(&path, false).unwrap();

        let second = DiskFileStore::open(&path, false);
        assert!(matches!(second, Err(MVStoreError::Locked)));

        drop(first);
        assert!(DiskFileStore::open(&path, false).is_ok());
    }

    #[test]
    fn test_read_only_open_of_missing_file_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.db");
        assert!(matches!(
            DiskFileStore::open(&path, true),
            Err(MVStoreError::Io(_))
        ));
    }

    #[test]
    fn test_off_heap_store() {
        let store = FileStore::new(OffHeapStore::new());
        store.write_all_at(b"abc", 4).unwrap();
        assert_eq!(store.size().unwrap(), 7);
        assert_eq!(store.read_at_most(0, 7).unwrap(), vec![0, 0, 0, 0, b'a', b'b', b'c']);
        store.truncate(5).unwrap();
        assert_eq!(store.size().unwrap(), 5);

        let mut buf = [0u8; 4];
        assert!(store.read_exact_at(&mut buf, 3).is_err());
    }

    #[test]
    fn test_sibling_path() {
        let path = Path::new("/tmp/data.db");
        assert_eq!(sibling_path(path, ".back"), PathBuf::from("/tmp/data.db.back"));
        assert_eq!(lock_path_of(path), PathBuf::from("/tmp/data.db.lock"));
    }
}
