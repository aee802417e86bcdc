//! Cache error types

use std::time::Duration;

use redis::RedisError;

/// Cache-related errors
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Backend is not ready yet or connection is lost. Keep trying...")]
    NotReady,

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Operation aborted")]
    Aborted,

    #[error("Redis error: {0}")]
    Redis(#[from] RedisError),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Payload decode error: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl CacheError {
    /// True for errors raised by the abort wrapper rather than the backend.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, CacheError::Timeout(_) | CacheError::Aborted)
    }
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, CacheError>;

/// Keep the first error out of a set of independently attempted operations.
pub(crate) fn first_error<I>(results: I) -> Result<()>
where
    I: IntoIterator<Item = Result<()>>,
{
    let mut first = None;
    for result in results {
        if let Err(e) = result
            && first.is_none()
        {
            first = Some(e);
        }
    }
    match first {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
