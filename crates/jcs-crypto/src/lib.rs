//! # JCS Crypto
//!
//! AWS Signature Version 4 primitives shared by the JCS gateway.
//!
//! This crate provides:
//! - **Hashing**: SHA-256 digests and HMAC-SHA256 helpers
//! - **SigV4**: canonical requests, credential scopes, signing-key derivation
//!   and constant-time signature checks
//! - **Signer**: re-signing of outbound requests with long-lived backend
//!   credentials, plus presigned query generation
//!
//! The gateway uses the same primitives in both directions: verifying what
//! clients sent, and signing what it forwards to storage backends.
//!
//! ## Example
//!
//! ```rust,ignore
//! use jcs_crypto::{CredentialScope, SigningKey};
//!
//! let scope = CredentialScope::new(date, "us-east-1");
//! let key = SigningKey::derive(secret_key, date, "us-east-1");
//! let signature = key.sign(&string_to_sign);
//! ```

pub mod error;
pub mod hashing;
pub mod signer;
pub mod sigv4;

pub use error::{CryptoError, Result};
pub use hashing::{hmac_sha256, sha256_hex};
pub use signer::{Credentials, RequestSigner};
pub use sigv4::{
    canonical_query_string, canonical_request, string_to_sign, CanonicalHeaders, CredentialScope,
    SigningKey, EMPTY_SHA256, ISO8601_FORMAT, SIGN_V4_ALGORITHM, UNSIGNED_PAYLOAD, YYYYMMDD_FORMAT,
};

/// Default region used when signing requests to backends
pub const DEFAULT_REGION: &str = "us-east-1";
