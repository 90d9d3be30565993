//! Error types for the Socrata client.

use crate::types::STALE_SCHEMA_MARKER;
use std::sync::Arc;

/// Errors that can occur when using the Socrata client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// HTTP transport error (connection, DNS, TLS, etc.)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// HTTP request failed inside the retry middleware
    #[error("HTTP request error: {0}")]
    HttpMiddleware(#[from] reqwest_middleware::Error),

    /// Non-success HTTP status returned by the API
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Error message from the server
        message: String,
        /// Socrata error code, if the body carried one
        code: Option<String>,
        /// Request ID for tracking
        request_id: Option<String>,
    },

    /// Invalid response from server
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A condition referenced a field the view does not have
    #[error("Unknown column: {field}")]
    UnknownColumn {
        /// The `fieldName` that could not be resolved
        field: String,
    },

    /// The server kept rejecting column ids after every schema refresh
    #[error("Schema still stale after {attempts} attempts: {last_message}")]
    StaleSchemaRetryExhausted {
        /// Number of submissions made
        attempts: u32,
        /// Message from the last stale response
        last_message: String,
    },

    /// Row data did not line up with the column list
    #[error("Row {row} has {actual} values, expected {expected}")]
    RaggedRows {
        /// Index of the offending row
        row: usize,
        /// Length every row was expected to have
        expected: usize,
        /// Actual row length
        actual: usize,
    },

    /// A concurrent schema fetch this caller was waiting on failed
    #[error("Schema fetch failed: {0}")]
    SchemaFetchFailed(#[source] Arc<ClientError>),

    /// An operator name that is not one of the filter operators
    #[error("Unknown operator: {0}")]
    InvalidOperator(String),

    /// The caller cancelled the query
    #[error("Query cancelled")]
    Cancelled,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ClientError {
    /// Returns true if this error is a transient transport failure.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Api { status, .. } => *status >= 500 || *status == 429,
            ClientError::Http(e) => e.is_timeout() || e.is_connect(),
            ClientError::HttpMiddleware(e) => e.is_timeout() || e.is_connect(),
            ClientError::SchemaFetchFailed(inner) => inner.is_retryable(),
            _ => false,
        }
    }

    /// Returns true if the server rejected the request's column ids.
    pub fn is_stale_schema(&self) -> bool {
        self.stale_schema_message().is_some()
    }

    /// The server's message, if this error reports unknown column ids.
    pub fn stale_schema_message(&self) -> Option<&str> {
        match self {
            ClientError::Api { message, .. } if message.contains(STALE_SCHEMA_MARKER) => {
                Some(message)
            }
            _ => None,
        }
    }

    /// Returns the request ID if available.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            ClientError::Api { request_id, .. } => request_id.as_deref(),
            ClientError::SchemaFetchFailed(inner) => inner.request_id(),
            _ => None,
        }
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(status: u16, message: &str) -> ClientError {
        ClientError::Api {
            status,
            message: message.to_string(),
            code: None,
            request_id: Some("req-123".to_string()),
        }
    }

    #[test]
    fn test_retryable_errors() {
        assert!(api_error(503, "Service unavailable").is_retryable());
        assert!(api_error(429, "Slow down").is_retryable());
        assert!(!api_error(400, "Bad request").is_retryable());
        assert!(!ClientError::UnknownColumn {
            field: "objectid".to_string()
        }
        .is_retryable());
    }

    #[test]
    fn test_stale_schema_detection() {
        assert!(api_error(400, "Cannot find column 7").is_stale_schema());
        assert!(!api_error(400, "Invalid filter").is_stale_schema());
        assert!(!ClientError::Cancelled.is_stale_schema());
    }

    #[test]
    fn test_request_id_extraction() {
        assert_eq!(api_error(500, "boom").request_id(), Some("req-123"));
        assert_eq!(ClientError::Cancelled.request_id(), None);
    }

    #[test]
    fn test_shared_fetch_failure_delegates_to_source() {
        let err = ClientError::SchemaFetchFailed(Arc::new(api_error(503, "Service unavailable")));
        assert!(err.is_retryable());
        assert_eq!(err.request_id(), Some("req-123"));
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().contains("Service unavailable"));
    }

    #[test]
    fn test_exhausted_message_includes_context() {
        let err = ClientError::StaleSchemaRetryExhausted {
            attempts: 3,
            last_message: "Cannot find column 9".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains('3'));
        assert!(text.contains("Cannot find column 9"));
    }
}
