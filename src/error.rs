//! Error types for the I/O layer
//!
//! Every public operation returns one of these instead of panicking, so the
//! scripting boundary can always degrade a failure into a (no-value, message)
//! pair.

use std::path::{Path, PathBuf};

// ============================================================================
// I/O Errors
// ============================================================================

/// Errors raised by file handles, line readers/writers and file locks
#[derive(Debug, thiserror::Error)]
pub enum IoError {
    /// Handle was already closed by an explicit close call
    #[error("file has been closed")]
    AlreadyClosed,

    /// Bad mode string, lock mode, read size or seek target
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation not available for this handle kind or encoding
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Open target does not exist
    #[error("file not found: {}", path.display())]
    NotFound { path: PathBuf },

    /// Underlying stream or lock primitive failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl IoError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        IoError::InvalidArgument(message.into())
    }

    pub(crate) fn unsupported(message: impl Into<String>) -> Self {
        IoError::UnsupportedOperation(message.into())
    }

    /// Map an open failure, keeping `NotFound` distinct from other OS errors
    pub(crate) fn from_open(error: std::io::Error, path: &Path) -> Self {
        if error.kind() == std::io::ErrorKind::NotFound {
            IoError::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            IoError::Io(error)
        }
    }
}

/// Result alias used across file and lock operations
pub type IoResult<T> = Result<T, IoError>;

// ============================================================================
// Configuration Errors
// ============================================================================

/// Configuration validation and building errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Value outside its accepted range
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    /// Environment variable present but unparsable
    #[error("Invalid environment variable {name}={value}")]
    InvalidEnv { name: String, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_error_mapping() {
        let path = Path::new("/no/such/file");
        let missing = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        assert!(matches!(
            IoError::from_open(missing, path),
            IoError::NotFound { .. }
        ));

        let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert!(matches!(IoError::from_open(denied, path), IoError::Io(_)));
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(IoError::AlreadyClosed.to_string(), "file has been closed");
        assert_eq!(
            IoError::invalid("bad mode").to_string(),
            "invalid argument: bad mode"
        );
        let not_found = IoError::NotFound {
            path: PathBuf::from("/tmp/x"),
        };
        assert_eq!(not_found.to_string(), "file not found: /tmp/x");
    }
}
