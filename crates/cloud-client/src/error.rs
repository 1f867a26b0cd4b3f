//! Backend errors and their retry classification

use thiserror::Error;

/// Errors that can occur when talking to the remote service
#[derive(Debug, Error)]
pub enum CloudError {
    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Request rate exceeded
    #[error("Throttled: {0}")]
    Throttled(String),

    /// Remote resource is not in a state that allows the operation yet
    /// (still provisioning, still enabled, stale eTag)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Remote service temporarily unavailable
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Call exceeded its deadline
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Request rejected as malformed or invalid
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Credentials rejected or permission denied
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Whether a failed call may succeed if repeated unchanged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Retryable,
    Permanent,
}

impl CloudError {
    /// Classifies the error for the reconciler's backoff logic.
    ///
    /// `NotFound` is permanent here; callers that expect read-after-write
    /// misses decide for themselves how long to tolerate it.
    pub fn class(&self) -> ErrorClass {
        match self {
            CloudError::Http(e) => {
                if e.is_timeout() || e.is_connect() || e.is_request() {
                    ErrorClass::Retryable
                } else {
                    ErrorClass::Permanent
                }
            }
            CloudError::Throttled(_)
            | CloudError::Conflict(_)
            | CloudError::Unavailable(_)
            | CloudError::Timeout(_) => ErrorClass::Retryable,
            CloudError::NotFound(_)
            | CloudError::InvalidRequest(_)
            | CloudError::AccessDenied(_)
            | CloudError::Serialization(_) => ErrorClass::Permanent,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Retryable
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CloudError::NotFound(_))
    }

    /// Short machine-readable reason used in status conditions
    pub fn reason(&self) -> &'static str {
        match self {
            CloudError::Http(_) => "TransportError",
            CloudError::Throttled(_) => "Throttled",
            CloudError::Conflict(_) => "Conflict",
            CloudError::Unavailable(_) => "ServiceUnavailable",
            CloudError::Timeout(_) => "Timeout",
            CloudError::NotFound(_) => "NotFound",
            CloudError::InvalidRequest(_) => "InvalidRequest",
            CloudError::AccessDenied(_) => "AccessDenied",
            CloudError::Serialization(_) => "SerializationError",
        }
    }

    /// Maps an HTTP status code and body from the remote service
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            404 | 410 => CloudError::NotFound(message),
            409 | 412 => CloudError::Conflict(message),
            429 => CloudError::Throttled(message),
            401 | 403 => CloudError::AccessDenied(message),
            408 | 504 => CloudError::Timeout(message),
            500..=599 => CloudError::Unavailable(message),
            _ => CloudError::InvalidRequest(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping_classes() {
        assert_eq!(CloudError::from_status(429, String::new()).class(), ErrorClass::Retryable);
        assert_eq!(CloudError::from_status(503, String::new()).class(), ErrorClass::Retryable);
        assert_eq!(CloudError::from_status(412, String::new()).class(), ErrorClass::Retryable);
        assert_eq!(CloudError::from_status(400, String::new()).class(), ErrorClass::Permanent);
        assert_eq!(CloudError::from_status(403, String::new()).class(), ErrorClass::Permanent);
        assert!(CloudError::from_status(404, String::new()).is_not_found());
    }

    #[test]
    fn test_timeout_is_retryable() {
        let err = CloudError::from_status(504, "gateway".to_string());
        assert!(matches!(err, CloudError::Timeout(_)));
        assert!(err.is_retryable());
        assert_eq!(err.reason(), "Timeout");
    }
}
