use backtrace::Backtrace;
use serde::{de, ser};
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::result::Result;

use crate::common::{atomic, Atomic};

/// Error kinds for storage operations.
///
/// Each kind names a remediation category. Callers are expected to tell
/// a lock conflict apart from corruption or a security failure, so the
/// storage backends map every physical failure onto one of these.
///
/// # Examples
///
/// ```rust,ignore
/// use nitrite::errors::{NitriteError, ErrorKind, NitriteResult};
///
/// fn example() -> NitriteResult<()> {
///     Err(NitriteError::new("value cannot be null", ErrorKind::ValidationError))
/// }
/// ```
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ErrorKind {
    /// A caller-supplied argument violates a precondition
    ValidationError,
    /// The operation is not valid in the current state or configuration
    InvalidOperation,
    /// The requested entry was not found
    NotFound,

    /// The store file is already opened by another process
    StoreLocked,
    /// Generic storage I/O failure
    IOError,
    /// The file was not found
    FileNotFound,
    /// Permission denied for file operation
    PermissionDenied,
    /// Store data is corrupted or unreadable
    FileCorrupted,

    /// Error encoding or decoding data
    EncodingError,
    /// Error mapping a value to or from its stored form
    ObjectMappingError,

    /// Credential mismatch or unexpected credential state
    SecurityError,

    /// Error in event processing
    EventError,
    /// Generic plugin error
    PluginError,

    /// Error from a storage backend
    BackendError,
    /// Store has not been initialized
    StoreNotInitialized,
    /// Store has already been closed
    StoreAlreadyClosed,

    /// The on-disk format is older than supported and must be upgraded
    MigrationError,

    /// Error from an extension crate (e.g. "spatial")
    Extension(String),

    /// Internal error (usually indicates a bug)
    InternalError,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::ValidationError => write!(f, "Validation error"),
            ErrorKind::InvalidOperation => write!(f, "Invalid operation"),
            ErrorKind::NotFound => write!(f, "Not found"),
            ErrorKind::StoreLocked => write!(f, "Store locked"),
            ErrorKind::IOError => write!(f, "IO error"),
            ErrorKind::FileNotFound => write!(f, "File not found"),
            ErrorKind::PermissionDenied => write!(f, "Permission denied"),
            ErrorKind::FileCorrupted => write!(f, "File corrupted"),
            ErrorKind::EncodingError => write!(f, "Encoding error"),
            ErrorKind::ObjectMappingError => write!(f, "Object mapping error"),
            ErrorKind::SecurityError => write!(f, "Security error"),
            ErrorKind::EventError => write!(f, "Event error"),
            ErrorKind::PluginError => write!(f, "Plugin error"),
            ErrorKind::BackendError => write!(f, "Backend error"),
            ErrorKind::StoreNotInitialized => write!(f, "Store not initialized"),
            ErrorKind::StoreAlreadyClosed => write!(f, "Store already closed"),
            ErrorKind::MigrationError => write!(f, "Migration error"),
            ErrorKind::Extension(name) => write!(f, "Extension error: {}", name),
            ErrorKind::InternalError => write!(f, "Internal error"),
        }
    }
}

/// The error type for every fallible storage operation.
///
/// It supports error chaining and captures a backtrace at construction.
///
/// ```rust,ignore
/// let cause = NitriteError::new("short read", ErrorKind::IOError);
/// let err = NitriteError::new_with_cause("chunk unreadable", ErrorKind::FileCorrupted, cause);
/// ```
#[derive(Clone)]
pub struct NitriteError {
    message: String,
    error_kind: ErrorKind,
    cause: Option<Box<NitriteError>>,
    backtrace: Atomic<Backtrace>,
}

impl NitriteError {
    /// Creates a new `NitriteError` with the specified message and error kind.
    ///
    /// # Arguments
    ///
    /// * `message` - A description of the error
    /// * `error_kind` - The category of error
    pub fn new(message: &str, error_kind: ErrorKind) -> Self {
        NitriteError {
            message: message.to_string(),
            error_kind,
            cause: None,
            backtrace: atomic(Backtrace::new_unresolved()),
        }
    }

    /// Creates a new `NitriteError` wrapping the error that caused it.
    ///
    /// # Arguments
    ///
    /// * `message` - A description of the error
    /// * `error_kind` - The category of error
    /// * `cause` - The underlying error
    pub fn new_with_cause(message: &str, error_kind: ErrorKind, cause: NitriteError) -> Self {
        NitriteError {
            message: message.to_string(),
            error_kind,
            cause: Some(Box::new(cause)),
            backtrace: atomic(Backtrace::new_unresolved()),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.error_kind
    }

    pub fn cause(&self) -> Option<&NitriteError> {
        self.cause.as_deref()
    }

    /// Walks the cause chain and returns the innermost error.
    pub fn root_cause(&self) -> &NitriteError {
        let mut current = self;
        while let Some(cause) = current.cause() {
            current = cause;
        }
        current
    }
}

impl Display for NitriteError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Debug for NitriteError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.cause {
            Some(cause) => write!(f, "{}\nCaused by: {:?}", self.message, cause),
            None => {
                let mut backtrace = self.backtrace.write();
                backtrace.resolve();
                write!(f, "{}\n{:?}", self.message, *backtrace)
            }
        }
    }
}

impl Error for NitriteError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self.cause {
            Some(cause) => Some(cause.as_ref()),
            None => None,
        }
    }
}

/// `NitriteResult<T>` is shorthand for `Result<T, NitriteError>`.
pub type NitriteResult<T> = Result<T, NitriteError>;

impl de::Error for NitriteError {
    fn custom<T: Display>(msg: T) -> Self {
        NitriteError::new(&msg.to_string(), ErrorKind::ObjectMappingError)
    }
}

impl ser::Error for NitriteError {
    fn custom<T: Display>(msg: T) -> Self {
        NitriteError::new(&msg.to_string(), ErrorKind::ObjectMappingError)
    }
}

impl From<std::io::Error> for NitriteError {
    fn from(err: std::io::Error) -> Self {
        let error_kind = match err.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::FileNotFound,
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
            std::io::ErrorKind::UnexpectedEof | std::io::ErrorKind::InvalidData => {
                ErrorKind::FileCorrupted
            }
            _ => ErrorKind::IOError,
        };
        NitriteError::new(&format!("IO error: {}", err), error_kind)
    }
}

impl From<std::string::FromUtf8Error> for NitriteError {
    fn from(err: std::string::FromUtf8Error) -> Self {
        NitriteError::new(
            &format!("UTF-8 encoding error: {}", err),
            ErrorKind::EncodingError,
        )
    }
}

impl From<std::num::ParseIntError> for NitriteError {
    fn from(err: std::num::ParseIntError) -> Self {
        NitriteError::new(
            &format!("Integer parsing error: {}", err),
            ErrorKind::EncodingError,
        )
    }
}

impl From<String> for NitriteError {
    fn from(msg: String) -> Self {
        NitriteError::new(&msg, ErrorKind::InternalError)
    }
}

impl From<&str> for NitriteError {
    fn from(msg: &str) -> Self {
        NitriteError::new(msg, ErrorKind::InternalError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nitrite_error_new_creates_error() {
        let error = NitriteError::new("value cannot be null", ErrorKind::ValidationError);
        assert_eq!(error.message(), "value cannot be null");
        assert_eq!(error.kind(), &ErrorKind::ValidationError);
        assert!(error.cause().is_none());
    }

    #[test]
    fn nitrite_error_new_with_cause_keeps_chain() {
        let cause = NitriteError::new("short read", ErrorKind::IOError);
        let error = NitriteError::new_with_cause("chunk unreadable", ErrorKind::FileCorrupted, cause);
        assert_eq!(error.kind(), &ErrorKind::FileCorrupted);
        assert_eq!(error.cause().map(|c| c.message()), Some("short read"));
        assert!(error.source().is_some());
    }

    #[test]
    fn root_cause_returns_innermost() {
        let inner = NitriteError::new("disk gone", ErrorKind::IOError);
        let middle = NitriteError::new_with_cause("commit failed", ErrorKind::BackendError, inner);
        let outer = NitriteError::new_with_cause("close failed", ErrorKind::BackendError, middle);
        assert_eq!(outer.root_cause().message(), "disk gone");
    }

    #[test]
    fn display_prints_message_only() {
        let error = NitriteError::new("RTreeMap is closed", ErrorKind::InvalidOperation);
        assert_eq!(format!("{}", error), "RTreeMap is closed");
    }

    #[test]
    fn debug_prints_cause() {
        let cause = NitriteError::new("inner", ErrorKind::IOError);
        let error = NitriteError::new_with_cause("outer", ErrorKind::BackendError, cause);
        let debug = format!("{:?}", error);
        assert!(debug.contains("outer"));
        assert!(debug.contains("Caused by: inner"));
    }

    #[test]
    fn error_kind_display() {
        assert_eq!(ErrorKind::StoreLocked.to_string(), "Store locked");
        assert_eq!(ErrorKind::MigrationError.to_string(), "Migration error");
        assert_eq!(
            ErrorKind::Extension("spatial".to_string()).to_string(),
            "Extension error: spatial"
        );
    }

    #[test]
    fn from_io_error_maps_kinds() {
        let not_found: NitriteError =
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing").into();
        assert_eq!(not_found.kind(), &ErrorKind::FileNotFound);

        let denied: NitriteError =
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into();
        assert_eq!(denied.kind(), &ErrorKind::PermissionDenied);

        let eof: NitriteError =
            std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof").into();
        assert_eq!(eof.kind(), &ErrorKind::FileCorrupted);

        let other: NitriteError = std::io::Error::other("boom").into();
        assert_eq!(other.kind(), &ErrorKind::IOError);
    }

    #[test]
    fn from_string_and_str() {
        let from_string: NitriteError = String::from("oops").into();
        assert_eq!(from_string.kind(), &ErrorKind::InternalError);
        let from_str: NitriteError = "oops".into();
        assert_eq!(from_str.message(), "oops");
    }

    #[test]
    fn question_mark_converts_io_error() {
        fn read_missing() -> NitriteResult<Vec<u8>> {
            Ok(std::fs::read("/definitely/not/here/nitrite.db")?)
        }
        let err = read_missing().unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::FileNotFound);
    }

    #[test]
    fn serde_custom_maps_to_object_mapping() {
        let err = <NitriteError as ser::Error>::custom("bad field");
        assert_eq!(err.kind(), &ErrorKind::ObjectMappingError);
    }
}
