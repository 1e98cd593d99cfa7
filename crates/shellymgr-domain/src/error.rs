use thiserror::Error;

/// Coarse classification of every fallible operation in the system.
///
/// Components attach a kind to each error they return; the API layer maps
/// kinds to HTTP status codes and tests assert on kinds rather than message
/// strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Input fails declared schema or invariants.
    Validation,
    /// Entity absent by id or unique key.
    NotFound,
    /// Uniqueness or in-use guard violated.
    Conflict,
    /// Admin key missing or mismatched.
    Unauthorized,
    /// Network, driver, or storage error likely retriable.
    Transient,
    /// Non-retriable external failure.
    Permanent,
    /// Deadline exceeded.
    Timeout,
    /// Cooperative cancellation observed.
    Cancelled,
}

impl ErrorKind {
    /// Stable wire code used in the API error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Transient => "transient",
            ErrorKind::Permanent => "permanent",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid MAC address: {0}")]
    InvalidMac(String),

    #[error("unknown channel type: {0}")]
    UnknownChannelType(String),

    #[error("invalid {channel_type} channel config: {message}")]
    InvalidChannelConfig {
        channel_type: String,
        message: String,
    },

    #[error("invalid schedule interval {seconds}s: must be between 60s and 30 days")]
    InvalidScheduleInterval { seconds: u64 },

    #[error("invalid task transition {from} -> {to}")]
    InvalidTaskTransition { from: String, to: String },

    #[error("invalid time of day '{0}': expected HH:MM")]
    InvalidTimeOfDay(String),
}

impl DomainError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Validation
    }
}
