use shellymgr_domain::{DomainError, ErrorKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("network operation failed: {0}")]
    Network(String),

    #[error("device call failed: {0}")]
    Device(String),

    #[error("control plane call failed: {0}")]
    ControlPlane(String),

    #[error("unauthorized by control plane")]
    Unauthorized,

    #[error("{0} timed out")]
    Timeout(String),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AgentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AgentError::Network(_) | AgentError::Device(_) | AgentError::ControlPlane(_) => {
                ErrorKind::Transient
            }
            AgentError::Unauthorized => ErrorKind::Unauthorized,
            AgentError::Timeout(_) => ErrorKind::Timeout,
            AgentError::Domain(e) => e.kind(),
            AgentError::Serialization(_) => ErrorKind::Permanent,
        }
    }
}
