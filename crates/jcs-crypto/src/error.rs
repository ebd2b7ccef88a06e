//! Error types for the jcs-crypto crate

use thiserror::Error;

/// Result type alias using `CryptoError`
pub type Result<T> = std::result::Result<T, CryptoError>;

/// Errors that can occur while signing requests
#[derive(Error, Debug)]
pub enum CryptoError {
    /// A header value could not be represented on the wire
    #[error("invalid header value: {0}")]
    InvalidHeaderValue(String),

    /// The request target has no usable host
    #[error("missing host for request signing")]
    MissingHost,

    /// Hex decode error
    #[error("hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),
}
