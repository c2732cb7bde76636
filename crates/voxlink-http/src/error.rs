//! Error types for voxlink transport operations.

use std::time::Duration;
use thiserror::Error;

/// Result type for voxlink transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Errors that can occur while talking to the assistant backend.
///
/// Cloneable so a single outcome can be handed to every caller sharing a
/// de-duplicated or queued request.
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum TransportError {
    #[error("Connection error: {0}")]
    Connectivity(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Server error: {0}")]
    Server(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Request failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<TransportError>,
    },

    #[error("Request queue was destroyed")]
    QueueDestroyed,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        TransportError::Decode(err.to_string())
    }
}

impl TransportError {
    /// Network-level failure (unreachable, DNS, TLS, timed out) as opposed
    /// to a well-formed response the server rejected.
    #[inline]
    #[must_use]
    pub fn is_connectivity(&self) -> bool {
        matches!(self, TransportError::Connectivity(_) | TransportError::Timeout(_))
    }

    /// The server answered, but with a failure status or an error payload.
    #[inline]
    #[must_use]
    pub fn is_application(&self) -> bool {
        matches!(
            self,
            TransportError::Status { .. } | TransportError::Server(_) | TransportError::Decode(_)
        )
    }

    /// Whether the retry queue will try this request again.
    ///
    /// Application errors are retried too; only teardown and local
    /// rejections are final.
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            TransportError::QueueDestroyed
                | TransportError::InvalidInput(_)
                | TransportError::Config(_)
                | TransportError::RetriesExhausted { .. }
        )
    }

    /// Attempts made before giving up, if this is a terminal queue error.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            TransportError::RetriesExhausted { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }
}
