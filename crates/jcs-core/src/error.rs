//! Error types for the jcs-core crate

use jcs_cloudstore::CloudError;
use thiserror::Error;

/// Result type alias using `CoreError`
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur in metadata and synchronization operations
#[derive(Error, Debug)]
pub enum CoreError {
    /// Bucket not found
    #[error("bucket not found: {0}")]
    BucketNotFound(String),

    /// No user owns the access key
    #[error("user not found for access key: {0}")]
    UserNotFound(String),

    /// No file record for the object
    #[error("file record not found: {bucket}/{key}")]
    FileNotFound { bucket: String, key: String },

    /// A location names a cloud without a client
    #[error("unknown cloud: {0}")]
    UnknownCloud(String),

    /// Metadata backend failure
    #[error("metadata error: {0}")]
    Metadata(String),

    /// Erasure codec failure
    #[error("erasure coding error: {0}")]
    Erasure(String),

    /// Too few shards to store or rebuild an object
    #[error("insufficient shards: have {have}, need {need}")]
    InsufficientShards { have: usize, need: usize },

    /// Bucket locations do not match its shard layout
    #[error("bucket {bucket} has {actual} locations, expected {expected}")]
    LocationMismatch {
        bucket: String,
        expected: usize,
        actual: usize,
    },

    /// No destination accepted a replica
    #[error("replication of {bucket}/{key} failed on all {attempted} clouds")]
    ReplicationFailed {
        bucket: String,
        key: String,
        attempted: usize,
    },

    /// No candidate cloud could serve the object
    #[error("no available cloud holds {bucket}/{key}")]
    NoAvailableCloud { bucket: String, key: String },

    /// A cloud call exceeded its deadline
    #[error("call to {cloud} timed out after {seconds}s")]
    Timeout { cloud: String, seconds: u64 },

    /// Cloud client error
    #[error("cloud error: {0}")]
    Cloud(#[from] CloudError),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Background task failed
    #[error("task error: {0}")]
    Task(String),
}

impl CoreError {
    /// True for every "does not exist" flavour, including a missing cloud object
    pub fn is_not_found(&self) -> bool {
        match self {
            CoreError::BucketNotFound(_)
            | CoreError::UserNotFound(_)
            | CoreError::FileNotFound { .. } => true,
            CoreError::Cloud(err) => err.is_not_found(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Serialization(err.to_string())
    }
}

impl From<reed_solomon_erasure::Error> for CoreError {
    fn from(err: reed_solomon_erasure::Error) -> Self {
        CoreError::Erasure(format!("{:?}", err))
    }
}

impl From<tokio::task::JoinError> for CoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        CoreError::Task(err.to_string())
    }
}
