//! Rebuilds a damaged store file from its older chunks.
//!
//! Each pass copies the file block by block into `<file>.temp`, leaving
//! out every chunk newer than a target version, then re-appends the
//! newest surviving chunk so the candidate ends with a valid footer. The
//! first candidate that opens cleanly replaces the original, which is
//! kept as `<file>.back`. The target starts at the newest version and
//! drops by one after every failed pass.

use crate::chunk::{parse_chunk_header, StoreHeader, BLOCK_SIZE};
use crate::config::MVStoreConfig;
use crate::error::{MVStoreError, MVStoreResult};
use crate::file_store::{remove_if_exists, sibling_path, DiskFileStore, FileStore};
use crate::page_file::PageFile;
use std::path::Path;

/// Copies `source` into `out`, keeping only chunks at or below
/// `target_version`.
///
/// Returns the version of the newest chunk kept, or `None` when no
/// chunk qualifies.
pub(crate) fn rollback(
    source: &FileStore,
    target_version: u64,
    out: &FileStore,
) -> MVStoreResult<Option<u64>> {
    let file_size = source.size()?;
    let blocks = file_size.div_ceil(BLOCK_SIZE);
    let mut newest: Option<(u64, u64, Vec<u8>)> = None;
    let mut header_found = false;

    let mut block = 0;
    while block < blocks {
        let pos = block * BLOCK_SIZE;
        let head = source.read_at_most(pos, BLOCK_SIZE as usize)?;
        match head.first() {
            Some(b'H') => {
                header_found |= StoreHeader::parse(&head).is_some();
                out.write_all_at(&head, pos)?;
                block += 1;
            }
            Some(b'c') => match parse_chunk_header(&head) {
                Some(chunk) if chunk.len > 0 => {
                    if chunk.version <= target_version {
                        let bytes = source.read_at_most(pos, (chunk.len * BLOCK_SIZE) as usize)?;
                        out.write_all_at(&bytes, pos)?;
                        if newest.as_ref().map_or(true, |(v, _, _)| chunk.version > *v) {
                            newest = Some((chunk.version, chunk.block, bytes));
                        }
                    }
                    block += chunk.len;
                }
                _ => block += 1,
            },
            _ => block += 1,
        }
    }

    let Some((version, chunk_block, bytes)) = newest else {
        return Ok(None);
    };

    let end = blocks * BLOCK_SIZE;
    out.write_all_at(&bytes, end)?;

    if !header_found {
        log::warn!("No readable store header, writing a new one");
        let mut header = StoreHeader::new(0, None);
        header.block = chunk_block;
        header.version = version;
        let header_block = header.to_block();
        out.write_all_at(&header_block, 0)?;
        out.write_all_at(&header_block, BLOCK_SIZE)?;
    }

    out.sync()?;
    Ok(Some(version))
}

/// Replaces the corrupted store at `path` with its newest consistent
/// version.
///
/// # Errors
///
/// [MVStoreError::Corrupted] when no version, down to the oldest chunk,
/// opens cleanly; the original file is then left untouched.
pub(crate) fn repair(path: &Path, config: &MVStoreConfig) -> MVStoreResult<u64> {
    let temp_path = sibling_path(path, ".temp");
    let back_path = sibling_path(path, ".back");
    let source = FileStore::new(DiskFileStore::open(path, true)?);

    let mut target = u64::MAX;
    loop {
        remove_if_exists(&temp_path)?;
        let kept = {
            let out = FileStore::new(DiskFileStore::open(&temp_path, false)?);
            rollback(&source, target, &out)?
        };

        let Some(version) = kept else {
            remove_if_exists(&temp_path)?;
            log::error!("Unable to recover {}, no readable chunk left", path.display());
            return Err(MVStoreError::Corrupted(format!(
                "unable to recover {}",
                path.display()
            )));
        };

        if verify(&temp_path, config) {
            drop(source);
            remove_if_exists(&back_path)?;
            std::fs::rename(path, &back_path)?;
            std::fs::rename(&temp_path, path)?;
            log::warn!(
                "Recovered {} at version {}, original kept as {}",
                path.display(),
                version,
                back_path.display()
            );
            return Ok(version);
        }

        log::debug!("Version {} of {} is not consistent", version, path.display());
        if version == 0 {
            remove_if_exists(&temp_path)?;
            return Err(MVStoreError::Corrupted(format!(
                "unable to recover {}",
                path.display()
            )));
        }
        target = version - 1;
    }
}

fn verify(path: &Path, config: &MVStoreConfig) -> bool {
    let file = match DiskFileStore::open(path, true) {
        Ok(file) => FileStore::new(file),
        Err(_) => return false,
    };
    match PageFile::open(file, config) {
        Ok(_) => true,
        Err(e) => {
            log::debug!("Candidate {} rejected: {}", path.display(), e);
            false
        }
    }
}
