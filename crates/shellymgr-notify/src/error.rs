use shellymgr_domain::{ChannelType, DomainError, ErrorKind};
use shellymgr_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("channel not found: {0}")]
    ChannelNotFound(i64),

    #[error("no driver for channel type {0}")]
    NoDriver(ChannelType),

    #[error("delivery failed: {0}")]
    Delivery(String),

    #[error("delivery timed out after {0}s")]
    Timeout(u64),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl NotifyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            NotifyError::ChannelNotFound(_) => ErrorKind::NotFound,
            NotifyError::NoDriver(_) => ErrorKind::Permanent,
            NotifyError::Delivery(_) => ErrorKind::Transient,
            NotifyError::Timeout(_) => ErrorKind::Timeout,
            NotifyError::Domain(e) => e.kind(),
            NotifyError::Store(e) => e.kind(),
        }
    }
}
