//! ONTAP client errors

use thiserror::Error;

/// Errors that can occur when talking to an ONTAP cluster, on either dialect.
///
/// Status codes and ZAPI fault codes are carried verbatim; deciding what they
/// mean is left to [`crate::classify`].
#[derive(Debug, Error)]
pub enum OntapError {
    /// Connection refused, DNS failure, TLS handshake failure or request timeout.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Any other HTTP client failure (request building, body decoding)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The REST API answered with a 4xx/5xx status
    #[error("REST API error calling {method} {api}: {status} - {message}")]
    Rest {
        method: String,
        api: String,
        status: u16,
        code: Option<String>,
        message: String,
    },

    /// The ZAPI call returned `status="failed"`
    #[error("ZAPI error calling {api}: code {code} - {reason}")]
    Zapi {
        api: String,
        code: String,
        reason: String,
    },

    /// Malformed XML in a ZAPI response
    #[error("XML error: {0}")]
    Xml(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An asynchronous job reached a non-success terminal state
    #[error("Job error: {0}")]
    Job(String),

    /// An asynchronous job was still running when the wait budget ran out
    #[error("{0}")]
    JobTimeout(String),

    /// Client certificate or key could not be loaded
    #[error("Certificate error: {0}")]
    Certificate(String),

    /// Connection options are inconsistent (e.g. credentials mix)
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The response did not have the expected shape
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Invalid request (e.g., unexpected call against a mock)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A size string could not be parsed
    #[error(transparent)]
    Size(#[from] SizeError),
}

impl OntapError {
    /// Map a `reqwest` send failure, keeping connection faults distinct from
    /// HTTP protocol errors.
    pub fn from_send(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            OntapError::Connection(err.to_string())
        } else {
            OntapError::Http(err)
        }
    }

    /// Build the error raised when a ZAPI response reports `status="failed"`.
    pub fn zapi(api: impl Into<String>, code: impl Into<String>, reason: impl Into<String>) -> Self {
        OntapError::Zapi {
            api: api.into(),
            code: code.into(),
            reason: reason.into(),
        }
    }

    /// Status code for REST errors
    pub fn status(&self) -> Option<u16> {
        match self {
            OntapError::Rest { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Cluster-provided message, if this error came from the cluster
    pub fn cluster_message(&self) -> Option<&str> {
        match self {
            OntapError::Rest { message, .. } => Some(message),
            OntapError::Zapi { reason, .. } => Some(reason),
            OntapError::Job(message) => Some(message),
            _ => None,
        }
    }
}

/// Errors raised by the size/unit parser
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SizeError {
    /// Suffix is not one of the known units
    #[error("unexpected unit in {option}: {value}")]
    UnexpectedUnit { option: String, value: String },

    /// Numeric part is malformed or out of range
    #[error("unexpected value in {option}: {value}")]
    UnexpectedValue { option: String, value: String },
}
