mod chunk;
pub mod compat;
mod config;
mod error;
mod file_store;
mod map;
mod module;
mod page_file;
mod recovery;
mod rtree;
mod store;
mod store_utils;

pub use chunk::Compression;
pub use config::*;
pub use error::{MVStoreError, MVStoreResult};
pub use file_store::{DiskFileStore, FileStore, FileStoreProvider, OffHeapStore};
pub use module::*;
pub use store::MVStore;
