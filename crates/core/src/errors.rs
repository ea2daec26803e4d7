use std::path::PathBuf;
use std::sync::Arc;

use crate::types::ExitStatus;

/// Result type alias for cryo operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for cryo operations
///
/// Errors are `Clone` so that the outcome of a single in-flight computation can be
/// handed unchanged to every caller waiting on it; boxed sources are held in `Arc`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The target could not be reached or refused the session
    #[error("connection to target '{target_id}' failed: {message}")]
    Connection {
        target_id: String,
        message: String,
        #[source]
        source: Option<Arc<dyn std::error::Error + Send + Sync>>,
    },

    /// The connection pool is at capacity and every entry is in use
    #[error("connection pool exhausted: all {capacity} connections are in use")]
    PoolExhausted { capacity: usize },

    /// A recording is absent from the live target
    #[error("recording '{recording_name}' not found on target '{target_id}'")]
    RecordingNotFound {
        target_id: String,
        recording_name: String,
    },

    /// An archived recording is absent from the archive store
    #[error("archived recording '{recording_name}' not found")]
    ArchivedRecordingNotFound { recording_name: String },

    /// Report generation failed with a classified worker status
    #[error("report generation failed ({status:?}): {}", .status.message())]
    Generation { status: ExitStatus, detail: String },

    /// File system operations
    #[error("file system {operation} operation failed for '{path}': {source}")]
    FileSystem {
        path: PathBuf,
        operation: String,
        #[source]
        source: Arc<std::io::Error>,
    },

    /// JSON serialization/deserialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Arc<serde_json::Error>,
    },

    /// Configuration errors
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Network-related errors
    #[error("network error for '{endpoint}': {message}")]
    Network { endpoint: String, message: String },
}

/// Coarse category used by outer facades to map errors onto a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Connection,
    Generation,
    Internal,
}

// Conversion implementations
impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::FileSystem {
            path: PathBuf::new(),
            operation: "unknown".to_string(),
            source: Arc::new(error),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::Json {
            message: error.to_string(),
            source: Arc::new(error),
        }
    }
}

// Helper methods for creating errors with context
impl Error {
    /// Create a connection error
    #[must_use]
    pub fn connection(target_id: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Connection {
            target_id: target_id.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection error with the underlying transport failure attached
    #[must_use]
    pub fn connection_with_source(
        target_id: impl Into<String>,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Error::Connection {
            target_id: target_id.into(),
            message: message.into(),
            source: Some(Arc::new(source)),
        }
    }

    /// Create a not-found error for a live recording
    #[must_use]
    pub fn recording_not_found(
        target_id: impl Into<String>,
        recording_name: impl Into<String>,
    ) -> Self {
        Error::RecordingNotFound {
            target_id: target_id.into(),
            recording_name: recording_name.into(),
        }
    }

    /// Create a not-found error for an archived recording
    #[must_use]
    pub fn archived_not_found(recording_name: impl Into<String>) -> Self {
        Error::ArchivedRecordingNotFound {
            recording_name: recording_name.into(),
        }
    }

    /// Create a generation error carrying the worker's classified status
    #[must_use]
    pub fn generation(status: ExitStatus, detail: impl Into<String>) -> Self {
        Error::Generation {
            status,
            detail: detail.into(),
        }
    }

    /// Create a file system error with context
    #[must_use]
    pub fn file_system(
        path: impl Into<PathBuf>,
        operation: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        Error::FileSystem {
            path: path.into(),
            operation: operation.into(),
            source: Arc::new(source),
        }
    }

    /// Create a configuration error
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Error::Configuration {
            message: message.into(),
        }
    }

    /// Create a network error
    #[must_use]
    pub fn network(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Network {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// The worker status carried by a generation error, if any
    #[must_use]
    pub fn exit_status(&self) -> Option<ExitStatus> {
        match self {
            Error::Generation { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether this error means the requested recording does not exist
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::RecordingNotFound { .. } | Error::ArchivedRecordingNotFound { .. }
        )
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::RecordingNotFound { .. } | Error::ArchivedRecordingNotFound { .. } => {
                ErrorKind::NotFound
            }
            Error::Connection { .. } | Error::PoolExhausted { .. } | Error::Network { .. } => {
                ErrorKind::Connection
            }
            Error::Generation { .. } => ErrorKind::Generation,
            Error::FileSystem { .. } | Error::Json { .. } | Error::Configuration { .. } => {
                ErrorKind::Internal
            }
        }
    }
}

// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Attach a path and operation to an I/O failure
    fn fs_context(self, path: impl Into<PathBuf>, operation: &str) -> Result<T>;
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn fs_context(self, path: impl Into<PathBuf>, operation: &str) -> Result<T> {
        self.map_err(|e| Error::file_system(path, operation, e))
    }
}
