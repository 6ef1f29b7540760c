use logjam::errors::{ErrorKind, LogjamError};
use std::error::Error;
use thiserror::Error;

/// Failures raised by the adapter itself rather than by fjall.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FjallAdapterError {
    #[error("Tree path has no file name: {0}")]
    InvalidPath(String),
    #[error("Tree {0} is closed")]
    TreeClosed(String),
    #[error("Engine is closed")]
    EngineClosed,
}

impl From<FjallAdapterError> for LogjamError {
    fn from(err: FjallAdapterError) -> Self {
        let kind = match err {
            FjallAdapterError::InvalidPath(_) => ErrorKind::ConfigError,
            FjallAdapterError::TreeClosed(_) | FjallAdapterError::EngineClosed => {
                ErrorKind::InvalidOperation
            }
        };
        LogjamError::new(&err.to_string(), kind)
    }
}

/// Maps a fjall failure onto the closest [ErrorKind].
pub(crate) fn to_logjam_error(error: impl Error) -> LogjamError {
    let message = error.to_string();
    let kind = if message.contains("permission") || message.contains("Permission") {
        ErrorKind::PermissionDenied
    } else if message.contains("closed") || message.contains("poisoned") {
        ErrorKind::InvalidOperation
    } else if message.contains("I/O") || message.contains("Io") {
        ErrorKind::IOError
    } else {
        ErrorKind::BackendError
    };
    LogjamError::new(&format!("Fjall error: {}", message), kind)
}
