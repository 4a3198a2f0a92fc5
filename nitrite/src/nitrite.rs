use crate::common::{
    current_time_value, is_reserved_name, AuthService, Value, NITRITE_VERSION,
    NITRITE_VERSION_KEY, SCHEMA_VERSION, STORE_CREATED_TIME, STORE_INFO, STORE_NAME,
    STORE_VERSION,
};
use crate::errors::{ErrorKind, NitriteError, NitriteResult};
use crate::nitrite_builder::NitriteBuilder;
use crate::nitrite_config::NitriteConfig;
use crate::store::rtree::NitriteRTree;
use crate::store::{NitriteMap, NitriteStore};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, OnceLock};

/// An open database.
///
/// `Nitrite` owns the store registered by the loaded module and gates it
/// behind the credential check performed on open. Clones share the same
/// database; the store is committed and closed when the last clone is
/// dropped, or earlier through [close](Nitrite::close).
///
/// # Examples
///
/// ```rust,ignore
/// let db = Nitrite::builder()
///     .load_module(MVStoreModule::with_config().file_path("/tmp/test.db").build())
///     .open_or_create(None, None)?;
///
/// let map = db.open_map("places")?;
/// map.put(Value::from("home"), Value::from("here"))?;
/// db.commit()?;
/// db.close()?;
/// ```
#[derive(Clone)]
pub struct Nitrite {
    inner: Arc<NitriteInner>,
}

impl Nitrite {
    pub fn builder() -> NitriteBuilder {
        NitriteBuilder::new()
    }

    pub(crate) fn new(nitrite_config: NitriteConfig) -> Self {
        Nitrite {
            inner: Arc::new(NitriteInner {
                nitrite_config,
                store: OnceLock::new(),
            }),
        }
    }

    /// Opens (or creates) a named map.
    ///
    /// # Errors
    ///
    /// `ValidationError` for an empty or reserved name.
    pub fn open_map(&self, name: &str) -> NitriteResult<NitriteMap> {
        self.inner.validate_map_name(name)?;
        self.inner.check_opened()?;
        self.inner.store()?.open_map(name)
    }

    /// Opens (or creates) a named spatial index.
    pub fn open_rtree(&self, name: &str) -> NitriteResult<NitriteRTree> {
        self.inner.validate_map_name(name)?;
        self.inner.check_opened()?;
        self.inner.store()?.open_rtree(name)
    }

    pub fn has_map(&self, name: &str) -> NitriteResult<bool> {
        self.inner.check_opened()?;
        self.inner.store()?.has_map(name)
    }

    /// Drops a map and all of its records.
    pub fn remove_map(&self, name: &str) -> NitriteResult<()> {
        self.inner.validate_map_name(name)?;
        self.inner.check_opened()?;
        self.inner.store()?.remove_map(name)
    }

    /// Names of the user maps in the store; internal maps are excluded.
    pub fn map_names(&self) -> NitriteResult<BTreeSet<String>> {
        self.inner.check_opened()?;
        let names = self.inner.store()?.map_names()?;
        Ok(names.into_iter().filter(|n| !is_reserved_name(n)).collect())
    }

    /// The store info record written when the database was created.
    pub fn store_info(&self) -> NitriteResult<Option<Value>> {
        self.inner.check_opened()?;
        let info_map = self.inner.store()?.open_map(STORE_INFO)?;
        info_map.get(&Value::from(STORE_INFO))
    }

    /// Replaces the password of `username` after checking the old one.
    pub fn update_password(
        &self,
        username: &str,
        old_password: &str,
        new_password: &str,
    ) -> NitriteResult<()> {
        self.inner.check_opened()?;
        let auth_service = AuthService::new(self.inner.store()?);
        auth_service.add_or_update_password(true, username, old_password, new_password)
    }

    pub fn has_unsaved_changes(&self) -> NitriteResult<bool> {
        self.inner.check_opened()?;
        self.inner.store()?.has_unsaved_changes()
    }

    pub fn is_closed(&self) -> NitriteResult<bool> {
        match self.inner.store.get() {
            Some(store) => store.is_closed(),
            None => Ok(true),
        }
    }

    pub fn config(&self) -> NitriteConfig {
        self.inner.nitrite_config.clone()
    }

    pub fn store(&self) -> NitriteResult<NitriteStore> {
        self.inner.store()
    }

    pub fn commit(&self) -> NitriteResult<()> {
        self.inner.check_opened()?;
        self.inner.store()?.commit()
    }

    /// Discards changes made since the last commit, where the backend
    /// supports it.
    pub fn rollback(&self) -> NitriteResult<()> {
        self.inner.check_opened()?;
        self.inner.store()?.rollback()
    }

    pub fn compact(&self) -> NitriteResult<()> {
        self.inner.check_opened()?;
        self.inner.store()?.compact()
    }

    /// Commits pending changes and closes the store. Closing twice is a
    /// no-op.
    pub fn close(&self) -> NitriteResult<()> {
        self.inner.close()
    }

    pub(crate) fn initialize(
        &self,
        username: Option<&str>,
        password: Option<&str>,
    ) -> NitriteResult<()> {
        if let Err(e) = self.inner.initialize() {
            log::error!("Failed to initialize Nitrite: {}", e);
            if let Err(close_error) = self.inner.close() {
                log::warn!("Failed to release store after open failure: {}", close_error);
            }
            return Err(e);
        }

        if let Err(e) = self.inner.authenticate(username, password) {
            if let Err(close_error) = self.inner.close() {
                log::warn!("Failed to release store after authentication failure: {}", close_error);
            }
            return Err(e);
        }

        self.inner.write_store_info()
    }
}

struct NitriteInner {
    nitrite_config: NitriteConfig,
    store: OnceLock<NitriteStore>,
}

impl NitriteInner {
    fn store(&self) -> NitriteResult<NitriteStore> {
        match self.store.get() {
            Some(store) => Ok(store.clone()),
            None => {
                log::error!("Nitrite store is not initialized");
                Err(NitriteError::new(
                    "Nitrite store is not initialized",
                    ErrorKind::StoreNotInitialized,
                ))
            }
        }
    }

    fn initialize(&self) -> NitriteResult<()> {
        self.nitrite_config.initialize()?;
        let store = self.nitrite_config.nitrite_store()?;
        let store = self.store.get_or_init(|| store);
        store.open_or_create()?;
        log::debug!("Opened store {}", store.store_version()?);
        Ok(())
    }

    fn authenticate(&self, username: Option<&str>, password: Option<&str>) -> NitriteResult<()> {
        let store = self.store()?;
        // a store counts as existing once a previous open has completed
        let existing = store.has_map(STORE_INFO)?;
        let auth_service = AuthService::new(store);
        auth_service.authenticate(username, password, existing)
    }

    fn write_store_info(&self) -> NitriteResult<()> {
        let store = self.store()?;
        if store.is_read_only()? {
            return Ok(());
        }

        let info_map = store.open_map(STORE_INFO)?;
        let key = Value::from(STORE_INFO);
        if info_map.contains_key(&key)? {
            return Ok(());
        }

        let store_version = store.store_version()?;
        let store_name = store_version
            .split('/')
            .next()
            .unwrap_or_default()
            .to_string();

        let mut info = BTreeMap::new();
        info.insert(STORE_CREATED_TIME.to_string(), current_time_value());
        info.insert(STORE_NAME.to_string(), Value::from(store_name));
        info.insert(STORE_VERSION.to_string(), Value::from(store_version));
        info.insert(
            SCHEMA_VERSION.to_string(),
            Value::from(self.nitrite_config.schema_version()),
        );
        info.insert(NITRITE_VERSION_KEY.to_string(), Value::from(NITRITE_VERSION));
        info_map.put(key, Value::Map(info))
    }

    fn validate_map_name(&self, name: &str) -> NitriteResult<()> {
        if name.is_empty() {
            log::error!("Map name cannot be empty");
            return Err(NitriteError::new(
                "Map name cannot be empty",
                ErrorKind::ValidationError,
            ));
        }

        if is_reserved_name(name) {
            log::error!("Map name '{}' is reserved", name);
            return Err(NitriteError::new(
                &format!("Map name '{}' is reserved", name),
                ErrorKind::ValidationError,
            ));
        }
        Ok(())
    }

    fn check_opened(&self) -> NitriteResult<()> {
        if self.store()?.is_closed()? {
            log::error!("Nitrite store is closed");
            return Err(NitriteError::new(
                "Nitrite store is closed",
                ErrorKind::StoreAlreadyClosed,
            ));
        }
        Ok(())
    }

    fn close(&self) -> NitriteResult<()> {
        let store = match self.store.get() {
            Some(store) => store,
            None => return self.nitrite_config.close(),
        };

        if store.is_closed()? {
            return Ok(());
        }

        store.before_close()?;
        if !store.is_read_only()? && store.has_unsaved_changes()? {
            store.commit()?;
        }
        self.nitrite_config.close()?;
        log::debug!("Closed nitrite database");
        Ok(())
    }
}

// Runs when the last clone is gone; Drop on Nitrite itself would close
// the store as soon as any clone is dropped.
impl Drop for NitriteInner {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("Failed to close nitrite database on drop: {}", e);
        }
    }
}
