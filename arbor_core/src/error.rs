//! Error types for arbor_core.

use crate::checksum::Checksum;
use crate::object::ObjectName;
use crate::pack::PackCorruption;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using arbor_core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during repository and fsck operations.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error occurred while reading from or writing to the store.
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Decoded metadata is malformed or violates a structural rule.
    #[error("Schema error: {reason}")]
    Schema { reason: String },

    /// An error that occurred while handling a specific object.
    #[error("{name}: {source}")]
    Object {
        name: ObjectName,
        #[source]
        source: Box<Error>,
    },

    /// An object's recomputed checksum differs from its name.
    #[error("Corrupted object {name}; actual checksum: {actual}")]
    CorruptObject {
        name: ObjectName,
        expected: Checksum,
        actual: Checksum,
    },

    /// A pack failed validation.
    #[error("Corrupted pack '{pack}': {reason}")]
    CorruptPack { pack: Checksum, reason: PackCorruption },

    /// The run was aborted through its cancel flag.
    #[error("Operation was cancelled")]
    Cancelled,

    /// Invalid checksum format or encoding.
    #[error("Invalid checksum: {reason}")]
    InvalidChecksum { reason: String },

    /// Object not found in store.
    #[error("Object not found: {name}")]
    ObjectNotFound { name: String },

    /// Store is invalid or not initialized.
    #[error("Invalid repository at {path}: {reason}")]
    InvalidStore { path: PathBuf, reason: String },

    /// Unknown object type tag.
    #[error("Invalid object type: {value}")]
    UnknownObjectType { value: String },

    /// Object type differs from what the caller asked for.
    #[error("Invalid object type: expected {expected}, got {got}")]
    InvalidObjectType { expected: String, got: String },

    /// Stored object envelope is unreadable.
    #[error("Corrupted object at {path}: {reason}")]
    CorruptedEnvelope { path: PathBuf, reason: String },

    /// Unsupported algorithm.
    #[error("Unsupported algorithm: {algorithm}")]
    UnsupportedAlgorithm { algorithm: String },

    /// Unsupported repository mode.
    #[error("Unsupported repository mode: {mode}")]
    UnsupportedMode { mode: String },

    /// Compression or decompression failed.
    #[error("Compression error: {reason}")]
    Compression { reason: String },
}

impl Error {
    /// Create a Schema error.
    pub fn schema(reason: impl Into<String>) -> Self {
        Error::Schema {
            reason: reason.into(),
        }
    }

    /// Attach the name of the object being processed.
    pub fn for_object(self, name: ObjectName) -> Self {
        match self {
            // Already attributed to an object (or self-describing).
            err @ (Error::Object { .. } | Error::CorruptObject { .. } | Error::Cancelled) => err,
            err => Error::Object {
                name,
                source: Box::new(err),
            },
        }
    }

    /// Create an InvalidChecksum error.
    pub fn invalid_checksum(reason: impl Into<String>) -> Self {
        Error::InvalidChecksum {
            reason: reason.into(),
        }
    }

    /// Create an ObjectNotFound error.
    pub fn object_not_found(name: impl Into<String>) -> Self {
        Error::ObjectNotFound { name: name.into() }
    }

    /// Create an InvalidStore error.
    pub fn invalid_store(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::InvalidStore {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an UnknownObjectType error.
    pub fn unknown_object_type(value: impl Into<String>) -> Self {
        Error::UnknownObjectType {
            value: value.into(),
        }
    }

    /// Create an InvalidObjectType error.
    pub fn invalid_object_type(expected: impl Into<String>, got: impl Into<String>) -> Self {
        Error::InvalidObjectType {
            expected: expected.into(),
            got: got.into(),
        }
    }

    /// Create a CorruptedEnvelope error.
    pub fn corrupted_envelope(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::CorruptedEnvelope {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an UnsupportedAlgorithm error.
    pub fn unsupported_algorithm(algorithm: impl Into<String>) -> Self {
        Error::UnsupportedAlgorithm {
            algorithm: algorithm.into(),
        }
    }

    /// Create an UnsupportedMode error.
    pub fn unsupported_mode(mode: impl Into<String>) -> Self {
        Error::UnsupportedMode { mode: mode.into() }
    }

    /// Create a Compression error.
    pub fn compression_error(reason: impl Into<String>) -> Self {
        Error::Compression {
            reason: reason.into(),
        }
    }

    /// The innermost error, looking through object attribution.
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::Object { source, .. } => source.root_cause(),
            err => err,
        }
    }

    /// Whether this error was caused by the cancel flag.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.root_cause(), Error::Cancelled)
    }
}

// Additional From implementations for external error types

impl From<tempfile::PersistError> for Error {
    fn from(err: tempfile::PersistError) -> Self {
        Error::Io { source: err.error }
    }
}

impl From<ignore::Error> for Error {
    fn from(err: ignore::Error) -> Self {
        // ignore::Error can wrap an io::Error or be a path error
        match err.io_error() {
            Some(io_err) => Error::Io {
                source: std::io::Error::new(io_err.kind(), io_err.to_string()),
            },
            None => Error::Io {
                source: std::io::Error::other(err.to_string()),
            },
        }
    }
}
