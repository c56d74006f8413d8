//! Engine-wide error taxonomy.
//!
//! Every fallible path in the crate funnels into [`EngineError`] so that the
//! retry layer can make a single classification decision: transient failures
//! (network, 429, 5xx) are retried with backoff, permanent failures (auth,
//! 404, validation) surface immediately.

use thiserror::Error;

use crate::storage::StoreError;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Request timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Rate limited by upstream (retry-after: {retry_after:?}s)")]
    RateLimited { retry_after: Option<u64> },

    #[error("Upstream server error: HTTP {status} - {message}")]
    Server { status: u16, message: String },

    #[error("Authentication failed: HTTP {status}")]
    Authentication { status: u16 },

    #[error("Resource not found: {resource}")]
    NotFound { resource: String },

    #[error("Request rejected: HTTP {status} - {message}")]
    Validation { status: u16, message: String },

    #[error("Parse error: {message}")]
    Parse { message: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Worker {worker_id} crashed: {reason}")]
    WorkerCrash { worker_id: usize, reason: String },
}

impl EngineError {
    /// Create a network error from any displayable cause.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create a parse error from any displayable cause.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    /// Classify an HTTP status line into the taxonomy.
    pub fn from_status(status: u16, message: impl Into<String>, retry_after: Option<u64>) -> Self {
        match status {
            429 => Self::RateLimited { retry_after },
            401 | 403 => Self::Authentication { status },
            404 => Self::NotFound {
                resource: message.into(),
            },
            400..=499 => Self::Validation {
                status,
                message: message.into(),
            },
            _ => Self::Server {
                status,
                message: message.into(),
            },
        }
    }

    /// Whether the retry layer should attempt this operation again.
    ///
    /// Transient: network failures, timeouts, 429, 5xx. Everything else is
    /// permanent and must surface without another request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network { .. }
                | Self::Timeout { .. }
                | Self::RateLimited { .. }
                | Self::Server { .. }
        )
    }

    /// Whether this error should trigger a one-shot credential refresh.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::Authentication { status: 401 })
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout { seconds: 30 }
        } else if let Some(status) = err.status() {
            Self::from_status(status.as_u16(), err.to_string(), None)
        } else {
            Self::Network {
                message: err.to_string(),
            }
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
