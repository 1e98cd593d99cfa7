use shellymgr_domain::{DomainError, ErrorKind};
use shellymgr_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("plugin not found: {0}")]
    PluginNotFound(String),

    #[error("plugin already registered: {0}")]
    DuplicatePlugin(String),

    #[error("plugin '{plugin}' does not support format '{format}'")]
    UnsupportedFormat { plugin: String, format: String },

    #[error("invalid plugin config: {0}")]
    InvalidConfig(String),

    #[error("operation not supported: {0}")]
    UnsupportedOperation(String),

    #[error("invalid archive: {0}")]
    InvalidArchive(String),

    #[error("output path escapes base directory: {0}")]
    PathTraversal(String),

    #[error("schedule {0} is already running")]
    ScheduleBusy(i64),

    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("yaml error in {path}: {message}")]
    Yaml { path: String, message: String },

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SyncError {
    pub fn io(path: impl std::fmt::Display, source: std::io::Error) -> SyncError {
        SyncError::Io { path: path.to_string(), source }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::PluginNotFound(_) => ErrorKind::NotFound,
            SyncError::DuplicatePlugin(_) => ErrorKind::Conflict,
            SyncError::UnsupportedFormat { .. } => ErrorKind::Validation,
            SyncError::InvalidConfig(_) => ErrorKind::Validation,
            SyncError::UnsupportedOperation(_) => ErrorKind::Permanent,
            SyncError::InvalidArchive(_) => ErrorKind::Permanent,
            SyncError::PathTraversal(_) => ErrorKind::Validation,
            SyncError::ScheduleBusy(_) => ErrorKind::Conflict,
            SyncError::Io { .. } => ErrorKind::Transient,
            SyncError::Yaml { .. } => ErrorKind::Permanent,
            SyncError::Domain(e) => e.kind(),
            SyncError::Store(e) => e.kind(),
            SyncError::Serialization(_) => ErrorKind::Permanent,
        }
    }
}
