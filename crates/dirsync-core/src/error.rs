//! Error taxonomy with transient/permanent classification for retry logic.

use thiserror::Error;

/// Error returned by a [`crate::traits::DirectorySource`].
///
/// All directory read failures are fatal to the run: an incomplete
/// directory snapshot could otherwise produce destructive deletes.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// Could not reach the directory server.
    #[error("directory unavailable: {message}")]
    Unavailable {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Bind failed (invalid credentials).
    #[error("directory authentication failed")]
    AuthFailed,

    /// The directory returned a malformed or unexpected response.
    #[error("directory protocol error: {message}")]
    Protocol { message: String },
}

impl DirectoryError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        DirectoryError::Unavailable {
            message: message.into(),
            source: None,
        }
    }

    pub fn unavailable_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        DirectoryError::Unavailable {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        DirectoryError::Protocol {
            message: message.into(),
        }
    }
}

/// Error returned by a [`crate::traits::TestOpsGateway`] operation.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The remote rate-limited the request. `retry_after_secs` carries the
    /// server-provided delay when present.
    #[error("rate limited by remote (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    /// The entity already exists or the write conflicts with remote state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The targeted entity does not exist remotely.
    #[error("not found: {0}")]
    NotFound(String),

    /// The remote rejected the payload (4xx other than rate limit).
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    /// Remote 5xx response.
    #[error("server error ({status}): {detail}")]
    ServerError { status: u16, detail: String },

    /// Connection failure or timeout; the outcome of the request is unknown.
    #[error("network error: {message}")]
    NetworkError {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Authentication against the remote failed.
    #[error("gateway authentication failed: {0}")]
    AuthFailed(String),

    /// The remote returned a response the client could not interpret.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl GatewayError {
    pub fn network(message: impl Into<String>) -> Self {
        GatewayError::NetworkError {
            message: message.into(),
            source: None,
        }
    }

    pub fn network_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        GatewayError::NetworkError {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Whether this error is transient and the operation should be retried.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GatewayError::RateLimited { .. }
                | GatewayError::ServerError { .. }
                | GatewayError::NetworkError { .. }
        )
    }

    /// Whether retrying a create after this error risks duplicating the
    /// entity. True when the outcome of the original request is unknown.
    #[must_use]
    pub fn outcome_unknown(&self) -> bool {
        matches!(
            self,
            GatewayError::NetworkError { .. } | GatewayError::ServerError { .. }
        )
    }

    /// Short classification code, used in reports and logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::RateLimited { .. } => "RATE_LIMITED",
            GatewayError::Conflict(_) => "CONFLICT",
            GatewayError::NotFound(_) => "NOT_FOUND",
            GatewayError::ValidationFailed(_) => "VALIDATION_FAILED",
            GatewayError::ServerError { .. } => "SERVER_ERROR",
            GatewayError::NetworkError { .. } => "NETWORK_ERROR",
            GatewayError::AuthFailed(_) => "AUTH_FAILED",
            GatewayError::Protocol(_) => "PROTOCOL_ERROR",
        }
    }
}

/// Result type for directory operations.
pub type DirectoryResult<T> = Result<T, DirectoryError>;

/// Result type for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;
