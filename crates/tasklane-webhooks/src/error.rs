//! Error types for webhook delivery.
//!
//! Categorizes every failure mode of a delivery attempt so the retry state
//! machine can decide between another attempt and terminal failure. Nothing
//! here is ever propagated to the producer that dispatched the event.

use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Failure modes of a webhook delivery attempt.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// Network-level connectivity failure.
    #[error("network connection failed: {message}")]
    Network {
        /// Description of the transport failure.
        message: String,
    },

    /// Per-attempt HTTP timeout exceeded.
    #[error("request timeout after {timeout_seconds}s")]
    Timeout {
        /// Seconds before the request was abandoned.
        timeout_seconds: u64,
    },

    /// Endpoint rejected the request (4xx).
    ///
    /// Retrying an unchanged payload will not succeed; treated as a receiver
    /// configuration problem.
    #[error("endpoint rejected delivery: HTTP {status_code}")]
    ClientError {
        /// HTTP status code (4xx).
        status_code: u16,
        /// Response body, truncated.
        body: String,
    },

    /// Endpoint failed to process the request (5xx).
    #[error("endpoint error: HTTP {status_code}")]
    ServerError {
        /// HTTP status code (5xx).
        status_code: u16,
        /// Response body, truncated.
        body: String,
    },

    /// Invalid dispatcher or subscription configuration.
    #[error("invalid configuration: {message}")]
    Configuration {
        /// Description of the configuration problem.
        message: String,
    },
}

impl DeliveryError {
    /// Creates a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_seconds: u64) -> Self {
        Self::Timeout { timeout_seconds }
    }

    /// Creates a client error from an HTTP response.
    pub fn client_error(status_code: u16, body: impl Into<String>) -> Self {
        Self::ClientError { status_code, body: body.into() }
    }

    /// Creates a server error from an HTTP response.
    pub fn server_error(status_code: u16, body: impl Into<String>) -> Self {
        Self::ServerError { status_code, body: body.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Whether this failure warrants another delivery attempt.
    ///
    /// Timeouts and transport errors classify like 5xx responses: the
    /// endpoint may recover. Client errors never do, since the payload bytes
    /// are identical on every attempt of a delivery.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } | Self::Timeout { .. } | Self::ServerError { .. } => true,
            Self::ClientError { .. } | Self::Configuration { .. } => false,
        }
    }

    /// HTTP status of this error, when the endpoint responded at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::ClientError { status_code, .. } | Self::ServerError { status_code, .. } => {
                Some(*status_code)
            },
            Self::Network { .. } | Self::Timeout { .. } | Self::Configuration { .. } => None,
        }
    }
}
