//! Error types for the jcs-cloudstore crate

use thiserror::Error;

/// Result type alias using `CloudError`
pub type Result<T> = std::result::Result<T, CloudError>;

/// Errors that can occur while talking to a cloud
#[derive(Error, Debug)]
pub enum CloudError {
    /// Object not found
    #[error("object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    /// The cloud is marked offline
    #[error("cloud offline: {0}")]
    Offline(String),

    /// The cloud answered with a non-success status
    #[error("cloud returned {status}: {message}")]
    Status { status: u16, message: String },

    /// Body length differs from the declared length
    #[error("length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch { expected: u64, actual: u64 },

    /// Connection error
    #[error("connection error: {0}")]
    Connection(String),

    /// Timeout error
    #[error("operation timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// HTTP error
    #[error("http error: {0}")]
    Http(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Request signing failed
    #[error("signing error: {0}")]
    Signing(#[from] jcs_crypto::CryptoError),

    /// Configuration error
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl CloudError {
    pub fn not_found(bucket: &str, key: &str) -> Self {
        CloudError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CloudError::NotFound { .. })
    }
}

impl From<reqwest::Error> for CloudError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() {
            CloudError::Connection(err.to_string())
        } else {
            CloudError::Http(err.to_string())
        }
    }
}
