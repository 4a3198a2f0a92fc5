use nitrite::errors::{ErrorKind, NitriteError};
use thiserror::Error;

/// Failures raised while reading or writing the store file.
///
/// Converted into [NitriteError] before leaving this crate; the kind
/// decides how the open state machine reacts (upgrade, repair or fail).
#[derive(Error, Debug)]
pub enum MVStoreError {
    /// The file (or its lock file) is held by another process.
    #[error("database is already opened in other process")]
    Locked,
    /// The header declares a format older than this engine reads.
    #[error("store format {found} is older than the supported format {minimum}")]
    FormatTooOld { found: u32, minimum: u32 },
    /// The header declares a format written by a newer engine.
    #[error("store format {0} is newer than this engine supports")]
    FormatTooNew(u32),
    /// No readable header or chunk could be located.
    #[error("file corrupted: {0}")]
    Corrupted(String),
    /// A chunk payload failed to decrypt.
    #[error("chunk could not be decrypted, wrong encryption key")]
    WrongKey,
    #[error("encoding failed: {0}")]
    Encoding(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<MVStoreError> for NitriteError {
    fn from(err: MVStoreError) -> Self {
        let kind = match &err {
            MVStoreError::Locked => ErrorKind::StoreLocked,
            MVStoreError::FormatTooOld { .. } => ErrorKind::MigrationError,
            MVStoreError::FormatTooNew(_) => ErrorKind::IOError,
            MVStoreError::Corrupted(_) => ErrorKind::FileCorrupted,
            MVStoreError::WrongKey => ErrorKind::SecurityError,
            MVStoreError::Encoding(_) => ErrorKind::EncodingError,
            MVStoreError::Io(_) => ErrorKind::IOError,
        };
        let message = err.to_string();
        let cause = match err {
            MVStoreError::Io(io) => NitriteError::from(io),
            _ => NitriteError::new(&message, ErrorKind::BackendError),
        };
        NitriteError::new_with_cause(&message, kind, cause)
    }
}

pub type MVStoreResult<T> = Result<T, MVStoreError>;

/// Logs and converts in one step, for `map_err` at crate boundaries.
pub(crate) fn to_nitrite_error(err: MVStoreError) -> NitriteError {
    log::error!("MVStore error: {}", err);
    NitriteError::from(err)
}
