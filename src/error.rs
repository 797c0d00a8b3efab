//! Error types for the recall engine

use thiserror::Error;

/// How a failed operation should be treated by retry loops.
///
/// Classification is carried on the error itself so retry policy stays
/// data-driven instead of being re-derived at every call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Worth retrying with backoff (timeouts, rate limits, upstream 5xx).
    Transient,
    /// Retrying cannot help (bad input, auth, violated invariants).
    Permanent,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Query flagged as suspicious (pattern: {pattern})")]
    SuspiciousQuery { pattern: String },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{provider} unavailable: {message}")]
    UpstreamUnavailable {
        provider: &'static str,
        message: String,
    },

    #[error("Rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for upstream provider failures.
    pub fn upstream(provider: &'static str, message: impl Into<String>) -> Self {
        Error::UpstreamUnavailable {
            provider,
            message: message.into(),
        }
    }

    /// Whether a retry loop should attempt this operation again.
    ///
    /// `PayloadTooLarge` is deliberately `Permanent`: the same payload will
    /// fail again until the caller re-batches it.
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Error::UpstreamUnavailable { .. } | Error::RateLimited { .. } | Error::Io(_) => {
                RetryClass::Transient
            }
            _ => RetryClass::Permanent,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
