use nitrite::errors::{ErrorKind, NitriteError, NitriteResult};
use nitrite::nitrite::Nitrite;
use nitrite::store::{NitriteStore, StoreModule};
use nitrite_fjall_adapter::FjallModule;
use nitrite_mvstore_adapter::MVStoreModule;
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::time::Duration;
use std::{env, fs, thread};

/// Storage engines every conformance test runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    MVMemory,
    MVFile,
    Fjall,
}

impl Backend {
    pub fn all() -> [Backend; 3] {
        [Backend::MVMemory, Backend::MVFile, Backend::Fjall]
    }

    /// Backends that keep their data across a close and reopen.
    pub fn persistent() -> [Backend; 2] {
        [Backend::MVFile, Backend::Fjall]
    }
}

impl Display for Backend {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::MVMemory => write!(f, "mvstore (in-memory)"),
            Backend::MVFile => write!(f, "mvstore (file)"),
            Backend::Fjall => write!(f, "fjall"),
        }
    }
}

#[derive(Clone)]
pub struct TestContext {
    backend: Backend,
    path: String,
    store: NitriteStore,
}

impl TestContext {
    pub fn new(backend: Backend, path: String, store: NitriteStore) -> Self {
        Self {
            backend,
            path,
            store,
        }
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn store(&self) -> NitriteStore {
        self.store.clone()
    }

    /// Closes the store and opens it again from the same path.
    pub fn reopen(&self) -> NitriteResult<TestContext> {
        self.store.close()?;
        let store = open_store(self.backend, &self.path)?;
        Ok(TestContext::new(self.backend, self.path.clone(), store))
    }
}

pub fn random_path() -> String {
    let id = uuid::Uuid::new_v4();
    env::temp_dir().join(id.to_string()).to_string_lossy().to_string()
}

/// Store module for `backend` at `path`; the path is ignored in memory.
pub fn store_module(backend: Backend, path: &str) -> NitriteResult<Box<dyn StoreModule>> {
    Ok(match backend {
        Backend::MVMemory => Box::new(MVStoreModule::with_config().build()?),
        Backend::MVFile => Box::new(
            MVStoreModule::with_config()
                .file_path(path)
                .auto_commit(false)
                .auto_compact(false)
                .build()?,
        ),
        Backend::Fjall => Box::new(
            FjallModule::with_config()
                .db_path(path)
                .low_memory_preset()
                .build()?,
        ),
    })
}

pub fn open_store(backend: Backend, path: &str) -> NitriteResult<NitriteStore> {
    let store = store_module(backend, path)?.get_store()?;
    store.open_or_create()?;
    Ok(store)
}

pub fn create_test_context(backend: Backend) -> NitriteResult<TestContext> {
    let path = random_path();
    let store = open_store(backend, &path)?;
    Ok(TestContext::new(backend, path, store))
}

/// Opens a database over an MVStore file.
pub fn open_mv_db(path: &str, user: Option<&str>, password: Option<&str>) -> NitriteResult<Nitrite> {
    Nitrite::builder()
        .load_module(MVStoreModule::with_config().file_path(path).build()?)
        .open_or_create(user, password)
}

/// Opens a database over a fjall keyspace.
pub fn open_fjall_db(path: &str, user: Option<&str>, password: Option<&str>) -> NitriteResult<Nitrite> {
    Nitrite::builder()
        .load_module(
            FjallModule::with_config()
                .db_path(path)
                .low_memory_preset()
                .build()?,
        )
        .open_or_create(user, password)
}

/// Runs `test` once per backend in `backends`, each on a fresh store.
///
/// The store is cleaned up whether the test passes or not; the first
/// failure is reported with the backend it happened on.
pub fn run_on<T>(backends: &[Backend], test: T)
where
    T: Fn(&TestContext) -> NitriteResult<()>,
{
    for backend in backends.iter().copied() {
        let ctx = match create_test_context(backend) {
            Ok(ctx) => ctx,
            Err(e) => panic!("Failed to open {} store: {}", backend, e),
        };

        let result = test(&ctx);
        if let Err(e) = cleanup(&ctx) {
            eprintln!("Warning: cleanup of {} store failed: {}", backend, e);
        }
        if let Err(e) = result {
            panic!("Test failed on {}: {:?}", backend, e);
        }
    }
}

pub fn run_on_all<T>(test: T)
where
    T: Fn(&TestContext) -> NitriteResult<()>,
{
    run_on(&Backend::all(), test)
}

pub fn cleanup(ctx: &TestContext) -> NitriteResult<()> {
    if !ctx.store.is_closed()? {
        ctx.store.close()?;
    }
    remove_path(ctx.path())
}

/// Deletes a store file or directory and the artifacts next to it.
///
/// Retries a few times since engine threads may still hold handles for
/// a moment after close.
pub fn remove_path(path: &str) -> NitriteResult<()> {
    const MAX_RETRIES: u32 = 5;
    let candidates = [
        path.to_string(),
        format!("{}.back", path),
        format!("{}.temp", path),
        format!("{}_new", path),
        format!("{}_old", path),
        format!("{}.lock", path),
    ];

    for candidate in candidates.iter() {
        let target = Path::new(candidate);
        let mut attempt = 0;
        while target.exists() {
            attempt += 1;
            let removed = if target.is_dir() {
                fs::remove_dir_all(target)
            } else {
                fs::remove_file(target)
            };
            match removed {
                Ok(_) => break,
                Err(e) if attempt >= MAX_RETRIES => {
                    return Err(NitriteError::new(
                        &format!("Failed to remove {}: {}", candidate, e),
                        ErrorKind::IOError,
                    ));
                }
                Err(_) => thread::sleep(Duration::from_millis(50 * attempt as u64)),
            }
        }
    }
    Ok(())
}
