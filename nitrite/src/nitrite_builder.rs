use crate::common::NitriteModule;
use crate::errors::{NitriteError, NitriteResult};
use crate::nitrite::Nitrite;
use crate::nitrite_config::NitriteConfig;

/// Builder for opening a [Nitrite] database.
///
/// Configuration errors are captured and surface from
/// [open_or_create](NitriteBuilder::open_or_create), so calls can be chained.
///
/// # Examples
///
/// ```rust,ignore
/// let db = Nitrite::builder()
///     .load_module(MVStoreModule::with_config().file_path("/tmp/test.db").build())
///     .open_or_create(Some("user"), Some("secret"))?;
/// ```
#[derive(Default)]
pub struct NitriteBuilder {
    error: Option<NitriteError>,
    nitrite_config: NitriteConfig,
}

impl NitriteBuilder {
    pub fn new() -> Self {
        NitriteBuilder {
            error: None,
            nitrite_config: NitriteConfig::new(),
        }
    }

    /// Loads a module, typically the store module of a backend.
    pub fn load_module<T: NitriteModule + 'static>(mut self, module: T) -> Self {
        if self.error.is_none() {
            if let Err(e) = self.nitrite_config.load_module(module) {
                self.error = Some(e);
            }
        }
        self
    }

    /// Schema version recorded in the store info of a new database.
    pub fn schema_version(mut self, schema_version: u32) -> Self {
        if self.error.is_none() {
            if let Err(e) = self.nitrite_config.set_schema_version(schema_version) {
                self.error = Some(e);
            }
        }
        self
    }

    /// Opens the database, creating it if needed.
    ///
    /// A database created with a username and password is secured: later
    /// opens must present the same pair. Empty strings count as absent.
    ///
    /// # Errors
    ///
    /// The first captured configuration error, any store open failure,
    /// or `SecurityError` when the credentials do not match the store.
    pub fn open_or_create(
        self,
        username: Option<&str>,
        password: Option<&str>,
    ) -> NitriteResult<Nitrite> {
        if let Some(error) = self.error {
            return Err(error);
        }
        let nitrite = Nitrite::new(self.nitrite_config);
        nitrite.initialize(username, password)?;
        Ok(nitrite)
    }
}
