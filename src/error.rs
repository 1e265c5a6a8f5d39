//! Error types for the CSAR gateway

use std::fmt;
use std::io;

use axum::http::StatusCode;
use thiserror::Error;

/// Result type alias for the CSAR gateway
pub type Result<T> = std::result::Result<T, Error>;

/// Phase of a replication transfer that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPhase {
    /// Reading the artifact from the source registry
    Download,
    /// Writing the artifact to the destination registry
    Upload,
    /// Removing the artifact from the destination registry
    Delete,
}

impl fmt::Display for TransferPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Download => "download",
            Self::Upload => "upload",
            Self::Delete => "delete",
        })
    }
}

/// CSAR gateway errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (unresolvable external URL, malformed backend URL)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Multipart re-encoding of an upload failed
    #[error("Request rewrite error: {0}")]
    RequestRewrite(String),

    /// Upload exceeded the request body limit
    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    /// Backend rejected the internal service credential
    #[error("operation request from unauthorized source is rejected")]
    UpstreamAuth,

    /// Backend answered with a non-success status
    #[error("Backend error {status}: {message}")]
    Backend {
        /// Backend status code
        status: u16,
        /// Backend error message
        message: String,
    },

    /// Project existence/visibility lookup failed
    #[error("Project lookup failed: {0}")]
    ProjectLookup(String),

    /// Notification could not be delivered
    #[error("Notification error: {0}")]
    Notification(String),

    /// No adapter for the registry type, or adapter construction failed
    #[error("Adapter creation error: {0}")]
    AdapterCreation(String),

    /// Destination existence check failed
    #[error("Failed to check the existence of {name}: {source}")]
    ExistenceCheck {
        /// Artifact checked
        name: String,
        /// Underlying adapter error
        #[source]
        source: Box<Error>,
    },

    /// Download, upload or delete of a replicated artifact failed
    #[error("Failed to {phase} {name}: {source}")]
    Transfer {
        /// Failing phase
        phase: TransferPhase,
        /// Artifact name on the side that failed
        name: String,
        /// Underlying adapter error
        #[source]
        source: Box<Error>,
    },

    /// Malformed `namespace/name`
    #[error("Invalid artifact identity: {0}")]
    InvalidIdentity(#[from] csar_core::IdentityError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Wrap an adapter error as a transfer failure
    pub fn transfer(phase: TransferPhase, name: impl Into<String>, source: Self) -> Self {
        Self::Transfer {
            phase,
            name: name.into(),
            source: Box::new(source),
        }
    }

    /// Wrap an adapter error as an existence-check failure
    pub fn existence_check(name: impl Into<String>, source: Self) -> Self {
        Self::ExistenceCheck {
            name: name.into(),
            source: Box::new(source),
        }
    }

    /// HTTP status reported to a client for this error
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidIdentity(_) => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Backend { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::Http(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Backend status code if this error came from an HTTP response
    #[must_use]
    pub fn backend_status(&self) -> Option<u16> {
        match self {
            Self::Backend { status, .. } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_auth_message() {
        assert_eq!(
            Error::UpstreamAuth.to_string(),
            "operation request from unauthorized source is rejected"
        );
    }

    #[test]
    fn test_transfer_error_carries_phase_and_name() {
        let err = Error::transfer(
            TransferPhase::Upload,
            "prod/kong",
            Error::Backend {
                status: 500,
                message: "disk full".to_string(),
            },
        );
        let msg = err.to_string();
        assert!(msg.contains("upload"));
        assert!(msg.contains("prod/kong"));
        assert!(msg.contains("disk full"));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            Error::RequestRewrite("missing csar".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            Error::Backend {
                status: 404,
                message: String::new()
            }
            .status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            Error::PayloadTooLarge("limit".into()).status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            Error::Backend {
                status: 1000,
                message: String::new()
            }
            .status_code(),
            StatusCode::BAD_GATEWAY
        );
    }
}
