//! Common error types for Conduit.

use thiserror::Error;

/// Top-level error type for Conduit operations.
#[derive(Debug, Error)]
pub enum Error {
    /// No provider is registered under the requested name.
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    /// A different constructor is already bound to the provider name.
    #[error("Duplicate registration: {0}")]
    DuplicateRegistration(String),

    /// Provider construction options were rejected.
    #[error("Construction error: {0}")]
    Construction(String),

    /// An accelerated (intra-provider) transfer was declined.
    ///
    /// The orchestrator treats this as a signal to fall back to the generic
    /// download-then-upload path.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation not permitted by the backend.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Generic backend or transport failure.
    #[error("Transfer error: {0}")]
    Transfer(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Whether this error declines an accelerated transfer.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Error::Unsupported(_))
    }

    /// Map an I/O error onto the transfer taxonomy.
    ///
    /// `NotFound` and `PermissionDenied` keep their meaning; everything else
    /// becomes a generic transfer failure.
    pub fn from_io(err: std::io::Error, context: impl std::fmt::Display) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Error::NotFound(format!("{}: {}", context, err)),
            std::io::ErrorKind::PermissionDenied => {
                Error::PermissionDenied(format!("{}: {}", context, err))
            }
            _ => Error::Transfer(format!("{}: {}", context, err)),
        }
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_is_unsupported() {
        assert!(Error::Unsupported("x".to_string()).is_unsupported());
        assert!(!Error::NotFound("x".to_string()).is_unsupported());
        assert!(!Error::Transfer("x".to_string()).is_unsupported());
    }

    #[test]
    fn test_from_io_mapping() {
        let err = Error::from_io(io::Error::from(io::ErrorKind::NotFound), "/a");
        assert!(matches!(err, Error::NotFound(_)));

        let err = Error::from_io(io::Error::from(io::ErrorKind::PermissionDenied), "/a");
        assert!(matches!(err, Error::PermissionDenied(_)));

        let err = Error::from_io(io::Error::from(io::ErrorKind::BrokenPipe), "/a");
        assert!(matches!(err, Error::Transfer(_)));
    }
}
