//! JCS multi-cloud storage gateway
//!
//! Umbrella package re-exporting the workspace crates; the cross-crate
//! integration tests live in `tests/`.

pub use jcs_cloudstore as cloudstore;
pub use jcs_core as core;
pub use jcs_crypto as crypto;
