use shellymgr_domain::{DomainError, ErrorKind};
use shellymgr_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("agent not registered: {0}")]
    AgentNotRegistered(String),

    #[error("invalid task: {0}")]
    InvalidTask(String),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ProvisionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProvisionError::AgentNotRegistered(_) => ErrorKind::NotFound,
            ProvisionError::InvalidTask(_) => ErrorKind::Validation,
            ProvisionError::Domain(e) => e.kind(),
            ProvisionError::Store(e) => e.kind(),
        }
    }
}
