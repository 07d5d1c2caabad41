use thiserror::Error;

/// Top-level error type for the VibeStudy progress layer.
#[derive(Debug, Error)]
pub enum VibeError {
    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("missing or invalid credentials")]
    Unauthorized,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Failure reported by a [`ProgressStore`](crate::ProgressStore).
///
/// The split decides whether the sync worker retries: transient failures
/// (network, throttling, busy database) are retried with backoff, permanent
/// ones (rejected credentials, malformed writes) are not.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("transient store failure: {0}")]
    Transient(String),

    #[error("permanent store failure: {0}")]
    Permanent(String),
}

impl StoreError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}
