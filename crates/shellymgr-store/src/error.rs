use shellymgr_domain::{DomainError, ErrorKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("channel {channel_id} is referenced by an enabled rule")]
    ChannelInUse { channel_id: i64 },

    #[error("task {task_id} is not owned by agent {agent_id}")]
    TaskOwnership { task_id: String, agent_id: String },

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal store error: {0}")]
    Internal(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, key: impl ToString) -> StoreError {
        StoreError::NotFound { entity, key: key.to_string() }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::NotFound { .. } => ErrorKind::NotFound,
            StoreError::ChannelInUse { .. } => ErrorKind::Conflict,
            StoreError::TaskOwnership { .. } => ErrorKind::Conflict,
            StoreError::Domain(e) => e.kind(),
            StoreError::Serialization(_) => ErrorKind::Permanent,
            StoreError::Internal(_) => ErrorKind::Transient,
        }
    }
}
