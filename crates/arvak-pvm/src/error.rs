//! Error types for the persistent QVM client.

use thiserror::Error;

use crate::config::ConfigError;

/// Errors that can occur when talking to a QVM-NG service.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PvmError {
    /// Malformed local input. Always raised before any RPC is issued.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The service could not be reached.
    #[error("No QVM-NG server running at {endpoint}: {reason}")]
    ServiceUnreachable {
        /// Endpoint that was contacted.
        endpoint: String,
        /// Underlying connectivity failure.
        reason: String,
    },

    /// The service was reached but did not answer within the request timeout.
    #[error("Request to QVM-NG at {endpoint} timed out: {reason}")]
    Timeout {
        /// Endpoint that was contacted.
        endpoint: String,
        /// Underlying timeout report.
        reason: String,
    },

    /// Any other HTTP-level failure.
    #[error("HTTP error talking to QVM-NG at {endpoint}: {reason}")]
    Http {
        /// Endpoint that was contacted.
        endpoint: String,
        /// Underlying HTTP failure.
        reason: String,
    },

    /// The server reported a version string that is not `major.minor.patch`.
    #[error("Malformed QVM version string: {0:?}")]
    VersionParse(String),

    /// The server is reachable but too old.
    #[error("Must use QVM >= 1.11.0 with the persistent QVM, but you have QVM {found}")]
    VersionMismatch {
        /// Version reported by the server.
        found: String,
    },

    /// Operation invoked on a session or job whose token was released.
    #[error("Usage error: {0}")]
    Usage(String),

    /// The service accepted the request but reported a failure.
    #[error("QVM error ({status}): {message}")]
    Remote {
        /// HTTP status code of the reply.
        status: u16,
        /// Error message reported by the service.
        message: String,
    },

    /// An asynchronous job finished with an error status.
    #[error("Job failed: {0}")]
    JobFailed(String),

    /// A reply did not match the expected shape.
    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type for persistent QVM operations.
pub type PvmResult<T> = Result<T, PvmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_mismatch_display() {
        let err = PvmError::VersionMismatch {
            found: "1.10.2".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("1.11.0"));
        assert!(msg.contains("1.10.2"));
    }

    #[test]
    fn test_unreachable_display() {
        let err = PvmError::ServiceUnreachable {
            endpoint: "http://127.0.0.1:5222".into(),
            reason: "connection refused".into(),
        };
        assert!(err.to_string().contains("http://127.0.0.1:5222"));
    }

    #[test]
    fn test_remote_display() {
        let err = PvmError::Remote {
            status: 500,
            message: "QVM is not waiting".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("500"));
        assert!(msg.contains("not waiting"));
    }
}
