use backtrace::Backtrace;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::result::Result;

use parking_lot::RwLock;
use std::sync::Arc;

/// Error kinds for LogJam storage operations.
///
/// Each kind names one category of failure so callers can match on it
/// instead of parsing messages.
///
/// # Examples
///
/// ```rust,ignore
/// use logjam::errors::{ErrorKind, LogjamError, LogjamResult};
///
/// fn example() -> LogjamResult<()> {
///     Err(LogjamError::new("Unable to find child [name].", ErrorKind::DocumentError))
/// }
/// ```
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ErrorKind {
    /// A child was addressed through a read-only accessor and does not exist
    DocumentError,
    /// A write was refused, for example by a unique constraint
    StorageError,
    /// Wire bytes could not be decoded
    EncodingError,
    /// The underlying byte-store or search engine failed
    BackendError,
    /// Transaction calls were issued out of order
    TransactionError,
    /// The storage configuration cannot be used
    ConfigError,

    /// Generic IO error
    IOError,
    /// The file was not found
    FileNotFound,
    /// Permission denied for file operation
    PermissionDenied,

    /// The operation is not valid in the current state
    InvalidOperation,
    /// Internal error (usually indicates a bug)
    InternalError,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::DocumentError => write!(f, "Document error"),
            ErrorKind::StorageError => write!(f, "Storage error"),
            ErrorKind::EncodingError => write!(f, "Encoding error"),
            ErrorKind::BackendError => write!(f, "Backend error"),
            ErrorKind::TransactionError => write!(f, "Transaction error"),
            ErrorKind::ConfigError => write!(f, "Configuration error"),
            ErrorKind::IOError => write!(f, "IO error"),
            ErrorKind::FileNotFound => write!(f, "File not found"),
            ErrorKind::PermissionDenied => write!(f, "Permission denied"),
            ErrorKind::InvalidOperation => write!(f, "Invalid operation"),
            ErrorKind::InternalError => write!(f, "Internal error"),
        }
    }
}

/// Error type shared by every LogJam module.
///
/// Carries a message, an [ErrorKind], an optional cause and the backtrace
/// captured where the error was created.
///
/// # Examples
///
/// ```rust,ignore
/// use logjam::errors::{ErrorKind, LogjamError};
///
/// let cause = LogjamError::new("disk went away", ErrorKind::IOError);
/// let err = LogjamError::new_with_cause("Unable to place record", ErrorKind::BackendError, cause);
/// ```
#[derive(Clone)]
pub struct LogjamError {
    message: String,
    error_kind: ErrorKind,
    cause: Option<Box<LogjamError>>,
    backtrace: Arc<RwLock<Backtrace>>,
}

impl LogjamError {
    /// Creates a new `LogjamError` with the specified message and error kind.
    ///
    /// # Arguments
    ///
    /// * `message` - A description of the error
    /// * `error_kind` - The category of error
    pub fn new(message: &str, error_kind: ErrorKind) -> Self {
        LogjamError {
            message: message.to_string(),
            error_kind,
            cause: None,
            backtrace: Arc::new(RwLock::new(Backtrace::new())),
        }
    }

    /// Creates a new `LogjamError` wrapping the error that caused it.
    ///
    /// # Arguments
    ///
    /// * `message` - A description of the error
    /// * `error_kind` - The category of error
    /// * `cause` - The underlying error
    pub fn new_with_cause(message: &str, error_kind: ErrorKind, cause: LogjamError) -> Self {
        LogjamError {
            message: message.to_string(),
            error_kind,
            cause: Some(Box::new(cause)),
            backtrace: Arc::new(RwLock::new(Backtrace::new())),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.error_kind
    }

    pub fn cause(&self) -> Option<&LogjamError> {
        self.cause.as_deref()
    }
}

impl Display for LogjamError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Debug for LogjamError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.cause {
            Some(cause) => write!(f, "{}\nCaused by: {:?}", self.message, cause),
            None => write!(f, "{}\n{:?}", self.message, self.backtrace.read()),
        }
    }
}

impl Error for LogjamError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self.cause {
            Some(cause) => Some(cause.as_ref()),
            None => None,
        }
    }
}

/// Shorthand for `Result<T, LogjamError>`, returned by every fallible call.
pub type LogjamResult<T> = Result<T, LogjamError>;

impl From<std::io::Error> for LogjamError {
    fn from(err: std::io::Error) -> Self {
        let error_kind = match err.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::FileNotFound,
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
            std::io::ErrorKind::UnexpectedEof => ErrorKind::EncodingError,
            _ => ErrorKind::IOError,
        };
        LogjamError::new(&format!("IO error: {}", err), error_kind)
    }
}

impl From<std::string::FromUtf8Error> for LogjamError {
    fn from(err: std::string::FromUtf8Error) -> Self {
        LogjamError::new(
            &format!("UTF-8 encoding error: {}", err),
            ErrorKind::EncodingError,
        )
    }
}

impl From<std::str::Utf8Error> for LogjamError {
    fn from(err: std::str::Utf8Error) -> Self {
        LogjamError::new(
            &format!("UTF-8 encoding error: {}", err),
            ErrorKind::EncodingError,
        )
    }
}

impl From<std::num::ParseIntError> for LogjamError {
    fn from(err: std::num::ParseIntError) -> Self {
        LogjamError::new(
            &format!("Integer parsing error: {}", err),
            ErrorKind::ConfigError,
        )
    }
}

impl From<String> for LogjamError {
    fn from(msg: String) -> Self {
        LogjamError::new(&msg, ErrorKind::InternalError)
    }
}

impl From<&str> for LogjamError {
    fn from(msg: &str) -> Self {
        LogjamError::new(msg, ErrorKind::InternalError)
    }
}
