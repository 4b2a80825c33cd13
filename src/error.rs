//! Error types for grantor

use thiserror::Error;
use uuid::Uuid;

/// Result type alias for grantor
pub type Result<T> = std::result::Result<T, Error>;

/// Grantor errors
///
/// The variants form the service's error taxonomy: validation failures,
/// referential not-found outcomes, store capacity/deadline failures, and a
/// correlation-id-carrying catch-all for everything unexpected. "Not found"
/// on a `Get*` read is a nullable return, never an error.
#[derive(Error, Debug)]
pub enum Error {
    /// Syntactic validation failure on a name or identifier. Never retried.
    #[error("Invalid {field}: {reason}")]
    InvalidName {
        /// Which input failed validation
        field: &'static str,
        /// The violated rule
        reason: String,
    },

    /// Referenced resource does not exist
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    /// Referenced scope does not exist within the resource
    #[error("Scope not found: {scope} on {resource}")]
    ScopeNotFound {
        /// Parent resource name
        resource: String,
        /// Missing scope name
        scope: String,
    },

    /// Referenced role does not exist within the resource
    #[error("Role not found: {role} on {resource}")]
    RoleNotFound {
        /// Parent resource name
        resource: String,
        /// Missing role name
        role: String,
    },

    /// Reserved: creates are idempotent, so this is currently unreachable
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The store signaled capacity exhaustion after the retry budget
    #[error("Store throttled after retry budget exhausted")]
    Throttled,

    /// Deadline exceeded before the store responded. Not retried by the core.
    #[error("Deadline exceeded")]
    Timeout,

    /// The caller cancelled the operation
    #[error("Operation cancelled")]
    Cancelled,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Any unexpected failure from collaborators, including signing errors
    /// and transaction-cancellation reasons other than condition failures.
    /// Carries a correlation id for later triage.
    #[error("Internal error [{correlation_id}]: {message}")]
    Internal {
        /// Correlation id logged at construction
        correlation_id: Uuid,
        /// What went wrong
        message: String,
    },
}

impl Error {
    /// Create an `InvalidName` error for the given field
    pub fn invalid_name(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidName {
            field,
            reason: reason.into(),
        }
    }

    /// Create an `Internal` error with a fresh correlation id.
    ///
    /// The correlation id is logged immediately so the triage trail exists
    /// even if the caller drops the error.
    pub fn internal(message: impl Into<String>) -> Self {
        let correlation_id = Uuid::new_v4();
        let message = message.into();
        tracing::error!(%correlation_id, %message, "Internal error");
        Self::Internal {
            correlation_id,
            message,
        }
    }

    /// Whether the store adapter may retry the failed call
    #[must_use]
    pub fn is_throttle(&self) -> bool {
        matches!(self, Self::Throttled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_name_formats_field_and_reason() {
        // GIVEN: a validation failure
        let err = Error::invalid_name("scopeName", "must not be empty");

        // THEN: the message names the field and the violated rule
        assert_eq!(err.to_string(), "Invalid scopeName: must not be empty");
    }

    #[test]
    fn internal_carries_correlation_id() {
        // GIVEN: an internal error
        let err = Error::internal("signing failed");

        // THEN: a correlation id is embedded in the message
        match err {
            Error::Internal {
                correlation_id,
                message,
            } => {
                assert!(!correlation_id.is_nil());
                assert_eq!(message, "signing failed");
            }
            other => panic!("expected Internal, got {other:?}"),
        }
    }

    #[test]
    fn only_throttled_is_retryable() {
        assert!(Error::Throttled.is_throttle());
        assert!(!Error::Timeout.is_throttle());
        assert!(!Error::Cancelled.is_throttle());
        assert!(!Error::ResourceNotFound("urn://r1".into()).is_throttle());
    }
}
